//! Suppression of a connection's own announcement echo
//!
//! A room (or hub) publishes "X joined" before adding X locally, and the bus
//! echoes that payload back to the publishing instance. By the time the echo
//! arrives X is already a member, so the payload is remembered together with
//! X's connection id and X is skipped when that payload comes back.

use std::collections::VecDeque;
use uuid::Uuid;

/// Upper bound on remembered payloads; older entries are forgotten first.
const MAX_PENDING: usize = 1024;

#[derive(Debug, Default)]
pub struct EchoFilter {
    pending: VecDeque<(String, Uuid)>,
}

impl EchoFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember that `payload` must not be delivered to `conn_id`
    pub fn expect(&mut self, payload: String, conn_id: Uuid) {
        if self.pending.len() == MAX_PENDING {
            self.pending.pop_front();
        }
        self.pending.push_back((payload, conn_id));
    }

    /// Consume the oldest expectation matching `payload`, returning the
    /// connection that must be skipped for this delivery
    pub fn take(&mut self, payload: &str) -> Option<Uuid> {
        let position = self.pending.iter().position(|(p, _)| p == payload)?;
        self.pending.remove(position).map(|(_, conn_id)| conn_id)
    }

    /// Drop every expectation held for a departed connection
    pub fn forget(&mut self, conn_id: Uuid) {
        self.pending.retain(|(_, id)| *id != conn_id);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
