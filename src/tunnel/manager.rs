use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use futures_util::{Sink, Stream, StreamExt};
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, span, Instrument, Level};
use crate::config::ServerConfig;
use crate::egress::EgressConnector;
use crate::tunnel::tunnel::{Tunnel, TunnelHandle};

/// The process-wide registry of tunnels. Accepts upgraded websockets, hands each one to its
///  own tunnel task, drives the global keepalive ticker and reaps tunnels when their task
///  finishes. Created once at startup and never destroyed.
pub struct TunnelManager {
    pub config: Arc<ServerConfig>,
    connector: Arc<dyn EgressConnector>,
    tunnels: RwLock<FxHashMap<u64, TunnelHandle>>,
    next_id: AtomicU64,
    keepalive_started: AtomicBool,
}

impl TunnelManager {
    pub fn new(config: Arc<ServerConfig>, connector: Arc<dyn EgressConnector>) -> Arc<TunnelManager> {
        Arc::new(TunnelManager {
            config,
            connector,
            tunnels: RwLock::new(FxHashMap::default()),
            next_id: AtomicU64::new(0),
            keepalive_started: AtomicBool::new(false),
        })
    }

    /// Register a freshly upgraded websocket and spawn its tunnel task. The first call also
    ///  starts the keepalive ticker.
    pub async fn accept<WS>(self: &Arc<Self>, ws: WS) -> u64
    where
        WS: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Send + Unpin + 'static,
    {
        self.start_keepalive_once();

        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        let (handle, command_rx) = TunnelHandle::new();
        self.tunnels.write().await.insert(id, handle);
        info!("accepted tunnel {}", id);

        let manager = self.clone();
        let config = self.config.clone();
        let connector = self.connector.clone();
        tokio::spawn(async move {
            let (ws_sink, ws_stream) = ws.split();
            Tunnel::run(id, config, connector, ws_sink, ws_stream, command_rx)
                .instrument(span!(Level::DEBUG, "tunnel", id))
                .await;
            manager.on_tunnel_closed(id).await;
        });

        id
    }

    pub async fn tunnel_count(&self) -> usize {
        self.tunnels.read().await.len()
    }

    async fn on_tunnel_closed(&self, id: u64) {
        if self.tunnels.write().await.remove(&id).is_some() {
            debug!("removed tunnel {} from the registry", id);
        }
    }

    fn start_keepalive_once(self: &Arc<Self>) {
        if self.keepalive_started.swap(true, Ordering::AcqRel) {
            return;
        }

        debug!("starting keepalive ticker with period {:?}", self.config.keepalive_interval);
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.config.keepalive_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // the first tick completes immediately

            loop {
                ticker.tick().await;
                for handle in manager.tunnels.read().await.values() {
                    handle.keepalive_tick();
                }
            }
        });
    }
}
