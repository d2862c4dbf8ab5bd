use std::convert::Infallible;
use std::sync::Arc;
use anyhow::Context;
use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use http_body_util::Full;
use hyper::header::{HeaderValue, CONNECTION, UPGRADE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{HeaderMap, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::{Role, WebSocketConfig};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, span, warn, Instrument, Level};
use uuid::Uuid;
use crate::tunnel::manager::TunnelManager;

const TRACE_HEADERS: [&str; 3] = ["Request-Nodes", "Request-Nodes-Timestamps", "User-Timestamp"];

/// Accept loop of the HTTP front-end: every connection gets its own task serving the upgrade
///  gate at `/tun` and the `/trace` endpoint.
pub async fn serve(listener: TcpListener, manager: Arc<TunnelManager>) -> anyhow::Result<()> {
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let manager = manager.clone();

        let correlation_id = Uuid::new_v4();
        let connection_span = span!(Level::DEBUG, "http_connection", %peer_addr, ?correlation_id);
        tokio::spawn(
            async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| handle_request(manager.clone(), req));
                if let Err(e) = http1::Builder::new()
                    .serve_connection(io, service)
                    .with_upgrades()
                    .await
                {
                    debug!("error serving connection: {}", e);
                }
            }
            .instrument(connection_span),
        );
    }
}

pub async fn handle_request<B>(
    manager: Arc<TunnelManager>,
    req: Request<B>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let result = match req.uri().path() {
        "/tun" => upgrade_to_tunnel(manager, req),
        "/trace" => trace_response(&req),
        other => {
            debug!("request for unknown path {}", other);
            plain_response(StatusCode::NOT_FOUND, "Not Found")
        }
    };

    Ok(result.unwrap_or_else(|e| {
        error!("error handling request: {:#}", e);
        plain_response(StatusCode::INTERNAL_SERVER_ERROR, &format!("{:#}", e))
            .expect("a plain text response is always buildable")
    }))
}

/// The websocket upgrade gate. Commits the upgrade by responding 101 and hands the upgraded
///  stream to the tunnel manager from a background task.
///
/// NB: If the upgrade itself fails after the 101 went out, there is no stream to speak
///  websocket on, so the failure is only logged and the connection torn down.
fn upgrade_to_tunnel<B>(
    manager: Arc<TunnelManager>,
    mut req: Request<B>,
) -> anyhow::Result<Response<Full<Bytes>>> {
    if !is_websocket_upgrade(req.headers()) {
        debug!("request to the tunnel endpoint without websocket upgrade");
        return plain_response(StatusCode::UPGRADE_REQUIRED, "Expected Upgrade: websocket");
    }

    let key = req
        .headers()
        .get("Sec-WebSocket-Key")
        .context("upgrade request without Sec-WebSocket-Key header")?;
    let accept_key = derive_accept_key(key.as_bytes());

    // the configured frame limit bounds what the websocket layer is willing to buffer
    let ws_config = WebSocketConfig::default()
        .max_message_size(Some(manager.config.max_frame_len))
        .max_frame_size(Some(manager.config.max_frame_len));

    let on_upgrade = hyper::upgrade::on(&mut req);
    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                let ws = WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, Some(ws_config)).await;
                manager.accept(ws).await;
            }
            Err(e) => warn!("websocket upgrade failed: {}", e),
        }
    });

    let mut response = Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(CONNECTION, "upgrade")
        .header(UPGRADE, "websocket")
        .header("Sec-WebSocket-Accept", accept_key)
        .body(Full::new(Bytes::new()))?;
    apply_trace_headers(response.headers_mut(), req.headers())?;
    Ok(response)
}

/// Diagnostic endpoint: echoes the trace headers of the request and stamps the response with
///  the server's wall clock.
fn trace_response<B>(req: &Request<B>) -> anyhow::Result<Response<Full<Bytes>>> {
    let mut response = Response::builder()
        .status(StatusCode::OK)
        .body(Full::new(Bytes::new()))?;
    apply_trace_headers(response.headers_mut(), req.headers())?;
    Ok(response)
}

fn apply_trace_headers(response_headers: &mut HeaderMap, request_headers: &HeaderMap) -> anyhow::Result<()> {
    for name in TRACE_HEADERS {
        if let Some(value) = request_headers.get(name) {
            response_headers.insert(name, value.clone());
        }
    }
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    response_headers.insert("Server-Timestamp", HeaderValue::from_str(&now)?);
    Ok(())
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(UPGRADE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

fn plain_response(status: StatusCode, body: &str) -> anyhow::Result<Response<Full<Bytes>>> {
    Ok(Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body.to_string())))?)
}
