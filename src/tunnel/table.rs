use std::sync::Arc;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use crate::egress::{EgressConnector, EgressEvent, EgressSocket};
use crate::frame::RequestHeader;
use crate::util::safe_converter::SafeCast;

/// One multiplexed request inside a tunnel. A slot is a fixed position in the request table;
///  successive requests reuse it, distinguished by the generation tag. While a request is
///  active the slot owns its egress socket.
pub struct RequestSlot {
    idx: u16,
    tag: u16,
    in_use: bool,
    egress: Option<EgressSocket>,
}

impl RequestSlot {
    fn new(idx: u16) -> RequestSlot {
        RequestSlot {
            idx,
            tag: idx,
            in_use: false,
            egress: None,
        }
    }

    pub fn addr(&self) -> RequestHeader {
        RequestHeader {
            slot_idx: self.idx,
            slot_tag: self.tag,
        }
    }

    /// Start the egress connection for this slot. Events are routed back to the owning tunnel
    ///  tagged with the slot address of this generation, so events from an earlier occupant
    ///  of the slot can be told apart from current ones.
    pub fn proxy(
        &mut self,
        connector: Arc<dyn EgressConnector>,
        target: String,
        events: mpsc::UnboundedSender<(RequestHeader, EgressEvent)>,
    ) {
        debug_assert!(self.egress.is_none());
        self.egress = Some(EgressSocket::open(connector, target, self.addr(), events));
    }

    pub fn on_client_data(&self, chunk: Bytes) {
        if let Some(egress) = &self.egress {
            egress.write(chunk);
        }
    }

    pub fn on_client_finished(&self) {
        if let Some(egress) = &self.egress {
            egress.shutdown_write();
        }
    }

    fn free(&mut self) {
        if let Some(egress) = self.egress.take() {
            egress.close();
        }
    }
}

/// Fixed-capacity table of request slots. The peer addresses slots by `(index, tag)`; every
///  operation validates both, so frames for a request that was already torn down locally are
///  rejected without touching the slot's next occupant.
pub struct RequestTable {
    slots: Vec<RequestSlot>,
}

impl RequestTable {
    pub fn new(capacity: u16) -> RequestTable {
        RequestTable {
            slots: (0..capacity).map(RequestSlot::new).collect(),
        }
    }

    /// Claim a slot for a new request with the peer-chosen tag. Returns None if the index is
    ///  out of range or the slot is still occupied; the caller drops the request in that case.
    pub fn alloc(&mut self, idx: u16, tag: u16) -> Option<&mut RequestSlot> {
        let slot = self.slots.get_mut(idx.safe_cast())?;
        if slot.in_use {
            debug!("slot {} is already in use - rejecting allocation", idx);
            return None;
        }
        slot.in_use = true;
        slot.tag = tag;
        Some(slot)
    }

    /// Look up an active slot; returns None for out-of-range, unused or stale-tag addressing.
    pub fn get(&mut self, idx: u16, tag: u16) -> Option<&mut RequestSlot> {
        let slot = self.slots.get_mut(idx.safe_cast())?;
        if slot.in_use && slot.tag == tag {
            Some(slot)
        } else {
            None
        }
    }

    /// Tear down a request. Bumps the slot's generation so that frames still in flight for
    ///  the old generation are rejected from here on. Stale addressing is silently ignored.
    pub fn free(&mut self, idx: u16, tag: u16) {
        let Some(slot) = self.slots.get_mut(idx.safe_cast()) else {
            return;
        };
        if !slot.in_use || slot.tag != tag {
            trace!("free for stale slot address ({}, {}) - ignoring", idx, tag);
            return;
        }
        slot.tag = slot.tag.wrapping_add(1);
        slot.in_use = false;
        slot.free();
    }

    /// Tear down every active request. Called exactly once when the tunnel is closing.
    pub fn cleanup(&mut self) {
        for slot in self.slots.iter_mut().filter(|s| s.in_use) {
            trace!("cleaning up active slot {}", slot.idx);
            slot.tag = slot.tag.wrapping_add(1);
            slot.in_use = false;
            slot.free();
        }
    }
}
