//! The binary frame format spoken on the tunnel websocket. Every websocket message is one
//!  frame: a command byte, followed for request commands by the slot address, followed by a
//!  command-specific body. All integers are little-endian. The peer is authoritative on frame
//!  lengths; trailing bytes beyond the documented body are ignored.

pub mod command;
pub mod request_header;
pub mod target_addr;

pub use command::FrameCommand;
pub use request_header::RequestHeader;
pub use target_addr::TargetAddr;

use bytes::{BufMut, Bytes, BytesMut};

/// Encode an outbound request frame: command byte, slot address, optional payload.
pub fn encode_request_frame(command: FrameCommand, slot: RequestHeader, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + RequestHeader::SERIALIZED_LEN + payload.len());
    buf.put_u8(command.into());
    slot.ser(&mut buf);
    buf.put_slice(payload);
    buf.freeze()
}

/// Encode a keepalive ping carrying the sender's wall clock in milliseconds.
pub fn encode_ping(wallclock_millis: f64) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + size_of::<f64>());
    buf.put_u8(FrameCommand::Ping.into());
    buf.put_f64_le(wallclock_millis);
    buf.freeze()
}

/// A pong is the received ping with the command byte rewritten, so the peer gets its own
///  timestamp (including any trailing bytes) back unchanged.
pub fn pong_for_ping(ping_frame: &[u8]) -> Bytes {
    let mut buf = BytesMut::from(ping_frame);
    buf[0] = FrameCommand::Pong.into();
    buf.freeze()
}
