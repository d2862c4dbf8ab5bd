use bytes::{Buf, BufMut, BytesMut};

/// The addressing pair that follows the command byte of every request frame: the slot index
///  and the generation tag the peer believes the slot currently has. Frames whose tag does
///  not match the slot's current generation are stale and get dropped.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    pub slot_idx: u16,
    pub slot_tag: u16,
}

impl RequestHeader {
    pub const SERIALIZED_LEN: usize = 2 * size_of::<u16>();

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.slot_idx);
        buf.put_u16_le(self.slot_tag);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<RequestHeader> {
        let slot_idx = buf.try_get_u16_le()?;
        let slot_tag = buf.try_get_u16_le()?;
        Ok(RequestHeader { slot_idx, slot_tag })
    }
}
