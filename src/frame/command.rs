use num_enum::{IntoPrimitive, TryFromPrimitive};

/// The commands of the tunnel protocol. Commands in the request range carry a slot address
///  and are dispatched through the request table; everything else is tunnel-level control.
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum FrameCommand {
    None = 0,
    Ping = 1,
    Pong = 2,
    ReqData = 3,
    ReqCreated = 4,
    ReqClientClosed = 5,
    ReqClientFinished = 6,
    ReqServerFinished = 7,
    ReqServerClosed = 8,
    ReqRefreshQuota = 9,
}

impl FrameCommand {
    /// true for commands that are addressed to a request slot
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            FrameCommand::ReqData
                | FrameCommand::ReqCreated
                | FrameCommand::ReqClientClosed
                | FrameCommand::ReqClientFinished
                | FrameCommand::ReqServerFinished
                | FrameCommand::ReqServerClosed
                | FrameCommand::ReqRefreshQuota
        )
    }
}
