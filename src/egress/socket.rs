use std::sync::Arc;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use crate::egress::connector::EgressConnector;
use crate::frame::RequestHeader;

const READ_CHUNK_LEN: usize = 16 * 1024;

/// Events an egress socket delivers to the tunnel that owns its slot. They are produced by a
///  single task per socket, so they arrive strictly in order.
#[derive(Debug)]
pub enum EgressEvent {
    /// the outbound connection is open; queued writes start draining
    Connected,
    /// a chunk read from the remote peer
    Data(Bytes),
    /// the remote peer half-closed its side; the write side is still usable
    Finished,
    /// terminal, delivered exactly once after a successful connect
    Closed,
    /// the connect attempt failed; delivered instead of `Connected`, no separate `Closed` follows
    Error(std::io::Error),
}

enum Command {
    Write(Bytes),
    ShutdownWrite,
    Close,
}

/// Handle to one outbound connection, owned by a request slot. Connecting starts immediately
///  on `open`; writes are queued and drained in order by the socket's task once the
///  connection is up. All methods are fire-and-forget: after the socket is closed they
///  degrade to no-ops.
pub struct EgressSocket {
    command_tx: mpsc::UnboundedSender<Command>,
}

impl EgressSocket {
    pub fn open(
        connector: Arc<dyn EgressConnector>,
        target: String,
        slot: RequestHeader,
        events: mpsc::UnboundedSender<(RequestHeader, EgressEvent)>,
    ) -> EgressSocket {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_socket(connector, target, slot, events, command_rx));
        EgressSocket { command_tx }
    }

    pub fn write(&self, chunk: Bytes) {
        let _ = self.command_tx.send(Command::Write(chunk));
    }

    /// Best-effort signal that no more data will be written. Sends a FIN, leaving the read
    ///  side open.
    pub fn shutdown_write(&self) {
        let _ = self.command_tx.send(Command::ShutdownWrite);
    }

    pub fn close(&self) {
        let _ = self.command_tx.send(Command::Close);
    }
}

async fn run_socket(
    connector: Arc<dyn EgressConnector>,
    target: String,
    slot: RequestHeader,
    events: mpsc::UnboundedSender<(RequestHeader, EgressEvent)>,
    mut command_rx: mpsc::UnboundedReceiver<Command>,
) {
    let stream = match connector.connect(&target).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!("connecting to {} failed: {}", target, e);
            let _ = events.send((slot, EgressEvent::Error(e)));
            return;
        }
    };

    trace!("connected to {}", target);
    let _ = events.send((slot, EgressEvent::Connected));

    let (mut read_half, mut write_half) = tokio::io::split(stream);
    let mut read_buf = BytesMut::with_capacity(READ_CHUNK_LEN);
    let mut read_open = true;

    loop {
        tokio::select! {
            result = read_half.read_buf(&mut read_buf), if read_open => match result {
                Ok(0) => {
                    trace!("{} half-closed its side", target);
                    read_open = false;
                    let _ = events.send((slot, EgressEvent::Finished));
                }
                Ok(_) => {
                    let _ = events.send((slot, EgressEvent::Data(read_buf.split().freeze())));
                    read_buf.reserve(READ_CHUNK_LEN);
                }
                Err(e) => {
                    debug!("read from {} failed: {}", target, e);
                    break;
                }
            },
            command = command_rx.recv() => match command {
                Some(Command::Write(chunk)) => {
                    if let Err(e) = write_half.write_all(&chunk).await {
                        debug!("write to {} failed: {}", target, e);
                        break;
                    }
                }
                Some(Command::ShutdownWrite) => {
                    let _ = write_half.shutdown().await;
                }
                Some(Command::Close) | None => break,
            },
        }
    }

    let _ = events.send((slot, EgressEvent::Closed));
}
