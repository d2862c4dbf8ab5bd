use std::sync::Arc;
use std::time::{Duration, SystemTime};
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};
use crate::config::ServerConfig;
use crate::egress::{EgressConnector, EgressEvent};
use crate::frame;
use crate::frame::{FrameCommand, RequestHeader, TargetAddr};
use crate::tunnel::table::RequestTable;

pub enum TunnelCommand {
    KeepaliveTick,
}

/// The manager's handle to a running tunnel task.
pub struct TunnelHandle {
    command_tx: mpsc::UnboundedSender<TunnelCommand>,
}

impl TunnelHandle {
    pub fn new() -> (TunnelHandle, mpsc::UnboundedReceiver<TunnelCommand>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        (TunnelHandle { command_tx }, command_rx)
    }

    pub fn keepalive_tick(&self) {
        let _ = self.command_tx.send(TunnelCommand::KeepaliveTick);
    }
}

/// One tunnel: a single client websocket multiplexing egress requests over the request table.
///
/// Everything a tunnel does runs on one task: inbound frames, egress events and keepalive
///  ticks are serialized through the `select!` loop in [`Tunnel::run`], and outbound frames
///  go through a dedicated writer task that drains its queue in FIFO order. That writer is
///  the only place that touches the websocket sink, which guarantees that a close
///  notification for a slot can never overtake data frames enqueued for it earlier.
pub struct Tunnel {
    id: u64,
    config: Arc<ServerConfig>,
    connector: Arc<dyn EgressConnector>,
    table: RequestTable,
    last_activity: Instant,
    waiting_ping: u32,
    frame_tx: mpsc::UnboundedSender<Message>,
    events_tx: mpsc::UnboundedSender<(RequestHeader, EgressEvent)>,
}

impl Tunnel {
    /// How long a closing tunnel waits for the writer to flush its queue and finish the
    ///  websocket close handshake before the transport is abandoned.
    const WRITER_CLOSE_GRACE: Duration = Duration::from_secs(5);

    /// Drive the tunnel until the websocket goes away or keepalive gives up on the peer.
    ///  Consumes the websocket halves; when this returns, all of the tunnel's egress sockets
    ///  are torn down and the websocket close handshake has been attempted.
    pub async fn run<Si, St>(
        id: u64,
        config: Arc<ServerConfig>,
        connector: Arc<dyn EgressConnector>,
        ws_sink: Si,
        mut ws_stream: St,
        mut command_rx: mpsc::UnboundedReceiver<TunnelCommand>,
    ) where
        Si: Sink<Message, Error = WsError> + Send + Unpin + 'static,
        St: Stream<Item = Result<Message, WsError>> + Unpin,
    {
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        let mut writer = tokio::spawn(run_writer(ws_sink, frame_rx));

        let mut tunnel = Tunnel {
            id,
            table: RequestTable::new(config.slots_per_tunnel),
            config,
            connector,
            last_activity: Instant::now(),
            waiting_ping: 0,
            frame_tx,
            events_tx,
        };

        loop {
            select! {
                message = ws_stream.next() => match message {
                    Some(Ok(message)) => tunnel.on_message(message),
                    Some(Err(e)) => {
                        debug!("websocket error - closing tunnel: {}", e);
                        break;
                    }
                    None => {
                        debug!("websocket closed by peer");
                        break;
                    }
                },
                Some((slot, event)) = events_rx.recv() => tunnel.on_egress_event(slot, event),
                command = command_rx.recv() => match command {
                    Some(TunnelCommand::KeepaliveTick) => {
                        if tunnel.keepalive() {
                            info!("peer missed too many keepalive pings - closing tunnel");
                            break;
                        }
                    }
                    None => {
                        debug!("tunnel manager went away - closing tunnel");
                        break;
                    }
                },
            }
        }

        // closing: tear down all egress sockets, then let the writer drain its queue and
        //  complete the websocket close handshake. Dropping the tunnel drops the queue's
        //  sender, which is what lets the writer run dry. A transport that cannot even
        //  flush the close within the grace period is abandoned.
        tunnel.table.cleanup();
        drop(tunnel);
        if tokio::time::timeout(Self::WRITER_CLOSE_GRACE, &mut writer).await.is_err() {
            debug!("websocket did not flush in time - abandoning it");
            writer.abort();
        }
        info!("tunnel {} closed", id);
    }

    fn on_message(&mut self, message: Message) {
        self.last_activity = Instant::now();

        match message {
            Message::Binary(frame) => self.on_frame(frame),
            Message::Ping(_) | Message::Pong(_) => {
                // transport-level liveness, answered by the websocket layer itself
            }
            Message::Close(_) => debug!("received close frame from peer"),
            Message::Text(_) => warn!("received a text frame on the binary-only tunnel protocol - dropping"),
            Message::Frame(_) => {}
        }
    }

    fn on_frame(&mut self, frame: Bytes) {
        if frame.is_empty() {
            debug!("received empty frame - dropping");
            return;
        }
        if frame.len() > self.config.max_frame_len {
            warn!("received frame exceeding the configured maximum of {} bytes - dropping", self.config.max_frame_len);
            return;
        }

        let command = match FrameCommand::try_from(frame[0]) {
            Ok(command) => command,
            Err(_) => {
                warn!("received frame with unknown command {} - dropping", frame[0]);
                return;
            }
        };

        if command.is_request() {
            self.on_request_frame(command, frame);
        } else {
            match command {
                FrameCommand::Ping => {
                    trace!("answering keepalive ping");
                    self.enqueue_frame(frame::pong_for_ping(&frame));
                }
                FrameCommand::Pong => {
                    self.waiting_ping = 0;
                }
                _ => warn!("received unexpected command {:?} - dropping", command),
            }
        }
    }

    fn on_request_frame(&mut self, command: FrameCommand, frame: Bytes) {
        let header = match RequestHeader::deser(&mut &frame[1..]) {
            Ok(header) => header,
            Err(_) => {
                debug!("received truncated request frame - dropping");
                return;
            }
        };
        let payload = frame.slice(1 + RequestHeader::SERIALIZED_LEN..);

        match command {
            FrameCommand::ReqCreated => self.on_req_created(header, payload),
            FrameCommand::ReqData => {
                match self.table.get(header.slot_idx, header.slot_tag) {
                    Some(slot) => slot.on_client_data(payload),
                    None => trace!("data for stale slot address {:?} - dropping", header),
                }
            }
            FrameCommand::ReqClientFinished => {
                match self.table.get(header.slot_idx, header.slot_tag) {
                    Some(slot) => slot.on_client_finished(),
                    None => trace!("client finish for stale slot address {:?} - dropping", header),
                }
            }
            FrameCommand::ReqClientClosed => self.table.free(header.slot_idx, header.slot_tag),
            FrameCommand::ReqServerFinished | FrameCommand::ReqServerClosed | FrameCommand::ReqRefreshQuota => {
                trace!("ignoring inbound {:?}", command);
            }
            _ => {}
        }
    }

    fn on_req_created(&mut self, header: RequestHeader, payload: Bytes) {
        let target = match TargetAddr::deser(&mut payload.as_ref()) {
            Ok(target) => target,
            Err(e) => {
                debug!("unparseable address block in request-open frame: {:#} - dropping", e);
                return;
            }
        };

        let connector = self.connector.clone();
        let events_tx = self.events_tx.clone();
        match self.table.alloc(header.slot_idx, header.slot_tag) {
            Some(slot) => {
                debug!("opening egress connection to {} for slot {:?}", target, header);
                slot.proxy(connector, target.to_string(), events_tx);
            }
            None => debug!("request-open for unavailable slot {:?} - dropping", header),
        }
    }

    fn on_egress_event(&mut self, slot: RequestHeader, event: EgressEvent) {
        match event {
            EgressEvent::Connected => {
                trace!("egress connection for slot {:?} is up", slot);
            }
            EgressEvent::Data(chunk) => {
                if self.table.get(slot.slot_idx, slot.slot_tag).is_some() {
                    self.enqueue_frame(frame::encode_request_frame(FrameCommand::ReqData, slot, &chunk));
                }
            }
            EgressEvent::Finished => {
                if self.table.get(slot.slot_idx, slot.slot_tag).is_some() {
                    debug!("egress read side for slot {:?} ended", slot);
                    self.enqueue_frame(frame::encode_request_frame(FrameCommand::ReqServerFinished, slot, &[]));
                    self.table.free(slot.slot_idx, slot.slot_tag);
                }
            }
            EgressEvent::Closed => {
                if self.table.get(slot.slot_idx, slot.slot_tag).is_some() {
                    debug!("egress connection for slot {:?} closed", slot);
                    self.enqueue_frame(frame::encode_request_frame(FrameCommand::ReqServerClosed, slot, &[]));
                    self.table.free(slot.slot_idx, slot.slot_tag);
                }
            }
            EgressEvent::Error(e) => {
                if self.table.get(slot.slot_idx, slot.slot_tag).is_some() {
                    debug!("egress connection for slot {:?} failed: {}", slot, e);
                    self.enqueue_frame(frame::encode_request_frame(FrameCommand::ReqServerClosed, slot, &[]));
                    self.table.free(slot.slot_idx, slot.slot_tag);
                }
            }
        }
    }

    /// One keepalive tick: ping the peer if the tunnel has gone quiet, and report whether the
    ///  peer has missed enough pongs for the tunnel to be declared dead.
    fn keepalive(&mut self) -> bool {
        if self.last_activity.elapsed() > self.config.keepalive_interval {
            trace!("tunnel is idle - sending keepalive ping");
            self.enqueue_frame(frame::encode_ping(wallclock_millis()));
            self.waiting_ping += 1;
        }
        self.waiting_ping > self.config.max_missed_pongs
    }

    fn enqueue_frame(&self, frame: Bytes) {
        // once the tunnel is closing the writer is gone, and enqueueing degrades to a no-op
        let _ = self.frame_tx.send(Message::Binary(frame));
    }
}

/// The single drainer of a tunnel's outbound queue: frames reach the wire in exactly the
///  order they were enqueued. A send failure marks the websocket as unhealthy; the tunnel
///  notices through its read side and runs the close sequence.
async fn run_writer<Si>(mut ws_sink: Si, mut frame_rx: mpsc::UnboundedReceiver<Message>)
where
    Si: Sink<Message, Error = WsError> + Unpin,
{
    while let Some(message) = frame_rx.recv().await {
        if let Err(e) = ws_sink.send(message).await {
            debug!("websocket send failed - stopping writer: {}", e);
            return;
        }
    }
    let _ = ws_sink.close().await;
}

fn wallclock_millis() -> f64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::egress::connector::{EgressStream, MockEgressConnector};
    use bytes::{BufMut, BytesMut};
    use futures::channel::mpsc as futures_mpsc;
    use std::io::ErrorKind;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::task::JoinHandle;
    use tokio::time;

    struct TestTunnel {
        in_tx: futures_mpsc::UnboundedSender<Result<Message, WsError>>,
        out_rx: futures_mpsc::UnboundedReceiver<Message>,
        handle: TunnelHandle,
        task: JoinHandle<()>,
    }

    impl TestTunnel {
        fn spawn(connector: Arc<MockEgressConnector>) -> TestTunnel {
            Self::spawn_with_config(connector, test_config())
        }

        fn spawn_with_config(connector: Arc<MockEgressConnector>, config: ServerConfig) -> TestTunnel {
            let (in_tx, in_rx) = futures_mpsc::unbounded();
            let (out_tx, out_rx) = futures_mpsc::unbounded();
            let (handle, command_rx) = TunnelHandle::new();

            let ws_sink = Box::pin(out_tx.sink_map_err(|_| WsError::ConnectionClosed));
            let task = tokio::spawn(Tunnel::run(0, Arc::new(config), connector, ws_sink, in_rx, command_rx));

            TestTunnel { in_tx, out_rx, handle, task }
        }

        fn send_frame(&self, raw: Vec<u8>) {
            self.in_tx.unbounded_send(Ok(Message::Binary(raw.into()))).unwrap();
        }

        async fn next_binary(&mut self) -> Bytes {
            let message = time::timeout(Duration::from_secs(5), self.out_rx.next())
                .await
                .expect("timed out waiting for an outbound frame")
                .expect("outbound channel closed unexpectedly");
            match message {
                Message::Binary(frame) => frame,
                other => panic!("expected a binary frame, got {:?}", other),
            }
        }
    }

    fn test_config() -> ServerConfig {
        let mut config = ServerConfig::new("127.0.0.1:8080".parse().unwrap());
        config.slots_per_tunnel = 100;
        config
    }

    fn req_frame(cmd: u8, idx: u16, tag: u16, payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(cmd);
        buf.put_u16_le(idx);
        buf.put_u16_le(tag);
        buf.put_slice(payload);
        buf.to_vec()
    }

    fn req_created(idx: u16, tag: u16, host: &str, port: u16) -> Vec<u8> {
        let mut addr_block = vec![1, host.len() as u8];
        addr_block.extend_from_slice(host.as_bytes());
        addr_block.extend_from_slice(&port.to_le_bytes());
        req_frame(4, idx, tag, &addr_block)
    }

    fn connector_returning(target: &'static str, stream: DuplexStream) -> MockEgressConnector {
        let mut connector = MockEgressConnector::new();
        connector.expect_connect()
            .withf(move |t| t == target)
            .times(1)
            .return_once(move |_| Ok(Box::new(stream) as Box<dyn EgressStream>));
        connector
    }

    #[tokio::test]
    async fn test_connect_and_echo() {
        let (local, mut remote) = tokio::io::duplex(4096);
        let mut tunnel = TestTunnel::spawn(Arc::new(connector_returning("example.com:80", local)));

        tunnel.send_frame(req_created(0, 7, "example.com", 80));
        tunnel.send_frame(req_frame(3, 0, 7, b"GET / HTTP/1.0\r\n\r\n"));

        let mut buf = [0u8; 18];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"GET / HTTP/1.0\r\n\r\n");

        remote.write_all(&[0xab; 512]).await.unwrap();

        let mut received = Vec::new();
        while received.len() < 512 {
            let frame = tunnel.next_binary().await;
            assert_eq!(frame[0], 3);
            assert_eq!(&frame[1..5], &[0, 0, 7, 0]);
            received.extend_from_slice(&frame[5..]);
        }
        assert_eq!(received, vec![0xab; 512]);
    }

    #[tokio::test]
    async fn test_client_finish_half_closes_the_egress_connection() {
        let (local, mut remote) = tokio::io::duplex(4096);
        let tunnel = TestTunnel::spawn(Arc::new(connector_returning("example.com:80", local)));

        tunnel.send_frame(req_created(0, 7, "example.com", 80));
        tunnel.send_frame(req_frame(3, 0, 7, b"request"));
        tunnel.send_frame(req_frame(6, 0, 7, &[]));

        let mut buf = Vec::new();
        remote.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"request");
    }

    #[tokio::test]
    async fn test_remote_close_emits_server_finished_and_frees_the_slot() {
        let (local, remote) = tokio::io::duplex(4096);
        let (second_local, mut second_remote) = tokio::io::duplex(4096);

        let mut connector = MockEgressConnector::new();
        let mut seq = mockall::Sequence::new();
        connector.expect_connect()
            .times(1)
            .in_sequence(&mut seq)
            .return_once(move |_| Ok(Box::new(local) as Box<dyn EgressStream>));
        connector.expect_connect()
            .times(1)
            .in_sequence(&mut seq)
            .return_once(move |_| Ok(Box::new(second_local) as Box<dyn EgressStream>));

        let mut tunnel = TestTunnel::spawn(Arc::new(connector));

        tunnel.send_frame(req_created(0, 7, "example.com", 80));
        drop(remote);

        let frame = tunnel.next_binary().await;
        assert_eq!(frame.as_ref(), &[7, 0, 0, 7, 0]);

        // frames addressed to the old generation bounce off the freed slot
        tunnel.send_frame(req_frame(3, 0, 7, b"stale"));

        // and the slot is immediately reusable with a fresh tag
        tunnel.send_frame(req_created(0, 9, "example.com", 80));
        tunnel.send_frame(req_frame(3, 0, 9, b"fresh"));

        let mut buf = [0u8; 5];
        second_remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"fresh");
    }

    #[tokio::test]
    async fn test_connect_failure_emits_server_closed() {
        let mut connector = MockEgressConnector::new();
        connector.expect_connect()
            .times(1)
            .return_once(|_| Err(std::io::Error::new(ErrorKind::ConnectionRefused, "refused")));

        let mut tunnel = TestTunnel::spawn(Arc::new(connector));
        tunnel.send_frame(req_created(0, 7, "example.com", 80));

        let frame = tunnel.next_binary().await;
        assert_eq!(frame.as_ref(), &[8, 0, 0, 7, 0]);
    }

    #[tokio::test]
    async fn test_client_close_frees_the_slot_without_a_response() {
        let (local, mut remote) = tokio::io::duplex(4096);
        let (second_local, mut second_remote) = tokio::io::duplex(4096);

        let mut connector = MockEgressConnector::new();
        let mut seq = mockall::Sequence::new();
        connector.expect_connect()
            .times(1)
            .in_sequence(&mut seq)
            .return_once(move |_| Ok(Box::new(local) as Box<dyn EgressStream>));
        connector.expect_connect()
            .times(1)
            .in_sequence(&mut seq)
            .return_once(move |_| Ok(Box::new(second_local) as Box<dyn EgressStream>));

        let mut tunnel = TestTunnel::spawn(Arc::new(connector));

        tunnel.send_frame(req_created(0, 7, "example.com", 80));
        tunnel.send_frame(req_frame(5, 0, 7, &[]));

        // the egress connection is gone
        let mut buf = Vec::new();
        remote.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());

        // the slot is reusable; no ReqServerClosed was sent for the client-initiated teardown
        tunnel.send_frame(req_created(0, 8, "example.com", 80));
        tunnel.send_frame(req_frame(3, 0, 8, b"again"));
        let mut buf = [0u8; 5];
        second_remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"again");

        tunnel.send_frame(vec![1, 0xee]);
        let pong = tunnel.next_binary().await;
        assert_eq!(pong.as_ref(), &[2, 0xee]);
    }

    #[tokio::test]
    async fn test_pings_are_answered_in_fifo_order() {
        let mut tunnel = TestTunnel::spawn(Arc::new(MockEgressConnector::new()));

        tunnel.send_frame(vec![1, 0xaa]);
        tunnel.send_frame(vec![1, 0xbb]);
        tunnel.send_frame(vec![1, 0xcc]);

        assert_eq!(tunnel.next_binary().await.as_ref(), &[2, 0xaa]);
        assert_eq!(tunnel.next_binary().await.as_ref(), &[2, 0xbb]);
        assert_eq!(tunnel.next_binary().await.as_ref(), &[2, 0xcc]);
    }

    #[tokio::test]
    async fn test_malformed_frames_are_dropped_without_closing_the_tunnel() {
        let mut tunnel = TestTunnel::spawn(Arc::new(MockEgressConnector::new()));

        tunnel.send_frame(vec![]);                          // empty
        tunnel.send_frame(vec![42]);                        // unknown command
        tunnel.send_frame(vec![0]);                         // reserved command
        tunnel.send_frame(vec![3, 0]);                      // truncated request header
        tunnel.send_frame(req_frame(3, 0, 7, b"no slot")); // data for a slot that was never allocated
        tunnel.send_frame(req_created(0, 7, "x", 80)[..6].to_vec()); // truncated address block
        tunnel.in_tx.unbounded_send(Ok(Message::Text("nope".into()))).unwrap();

        // the tunnel is still alive and the dropped frames produced no output
        tunnel.send_frame(vec![1, 0xee]);
        assert_eq!(tunnel.next_binary().await.as_ref(), &[2, 0xee]);
    }

    #[tokio::test]
    async fn test_req_created_for_out_of_range_slot_is_rejected() {
        let (local, mut remote) = tokio::io::duplex(4096);
        let mut connector = MockEgressConnector::new();
        connector.expect_connect()
            .times(1)
            .return_once(move |_| Ok(Box::new(local) as Box<dyn EgressStream>));

        let mut config = test_config();
        config.slots_per_tunnel = 100;
        let tunnel = TestTunnel::spawn_with_config(Arc::new(connector), config);

        // idx 100 is out of range for cap 100, idx 99 is the last valid slot
        tunnel.send_frame(req_created(100, 7, "example.com", 80));
        tunnel.send_frame(req_created(99, 7, "example.com", 80));
        tunnel.send_frame(req_frame(3, 99, 7, b"ok"));

        let mut buf = [0u8; 2];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ok");
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_pings_then_closes() {
        let mut tunnel = TestTunnel::spawn(Arc::new(MockEgressConnector::new()));

        for _ in 0..3 {
            time::sleep(Duration::from_millis(10_100)).await;
            tunnel.handle.keepalive_tick();
            let ping = tunnel.next_binary().await;
            assert_eq!(ping[0], 1);
            assert_eq!(ping.len(), 9);
        }

        // the fourth unanswered ping pushes the tunnel over the threshold
        time::sleep(Duration::from_millis(10_100)).await;
        tunnel.handle.keepalive_tick();
        tunnel.task.await.unwrap();

        // the writer drained its queue before completing the close, so the final ping was
        //  still flushed
        match tunnel.out_rx.next().await {
            Some(Message::Binary(ping)) => assert_eq!(ping[0], 1),
            other => panic!("expected the final ping, got {:?}", other),
        }
        assert!(tunnel.out_rx.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_resets_the_keepalive_counter() {
        let mut tunnel = TestTunnel::spawn(Arc::new(MockEgressConnector::new()));

        for _ in 0..6 {
            time::sleep(Duration::from_millis(10_100)).await;
            tunnel.handle.keepalive_tick();
            let ping = tunnel.next_binary().await;
            assert_eq!(ping[0], 1);
            tunnel.send_frame(vec![2]);
        }

        // the peer kept answering, so the tunnel is still alive
        tunnel.send_frame(vec![1, 0xee]);
        assert_eq!(tunnel.next_binary().await.as_ref(), &[2, 0xee]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_traffic_suppresses_pings() {
        let mut tunnel = TestTunnel::spawn(Arc::new(MockEgressConnector::new()));

        time::sleep(Duration::from_millis(5_000)).await;
        tunnel.send_frame(vec![2]);
        time::sleep(Duration::from_millis(6_000)).await;

        // last activity was 6s ago, less than the 10s keepalive interval
        tunnel.handle.keepalive_tick();

        tunnel.send_frame(vec![1, 0xee]);
        assert_eq!(tunnel.next_binary().await.as_ref(), &[2, 0xee]);
    }

    #[tokio::test]
    async fn test_closing_the_websocket_tears_down_egress_connections() {
        let (local, mut remote) = tokio::io::duplex(4096);
        let mut tunnel = TestTunnel::spawn(Arc::new(connector_returning("example.com:80", local)));

        tunnel.send_frame(req_created(0, 7, "example.com", 80));
        tunnel.send_frame(req_frame(3, 0, 7, b"hi"));
        let mut buf = [0u8; 2];
        remote.read_exact(&mut buf).await.unwrap();

        drop(tunnel.in_tx);
        tunnel.task.await.unwrap();

        // cleanup closed the egress socket, so the remote end sees EOF
        let mut buf = Vec::new();
        remote.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());

        // and the writer closed the sink instead of leaving it dangling
        assert!(tunnel.out_rx.next().await.is_none());
    }
}
