//! Peripheral liveness tracking (coordinator only)

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::time::{Duration, Instant};
use tracing::info;

use crate::address::{NodeAddress, NodeId};

#[derive(Debug, Default)]
struct LivenessState {
    last_seen: HashMap<NodeAddress, Instant>,
}

/// Last "up" notification per peripheral
pub struct LivenessTable {
    state: Mutex<LivenessState>,
}

impl Default for LivenessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessTable {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LivenessState::default()),
        }
    }

    /// Record an "up" notification; returns true if the node was down before
    pub fn mark_up(&self, node: NodeAddress) -> bool {
        self.mark_up_at(node, Instant::now())
    }

    pub fn mark_up_at(&self, node: NodeAddress, now: Instant) -> bool {
        let was_down = self.state.lock().last_seen.insert(node, now).is_none();
        if was_down {
            info!(node = format!("0x{:02X}", node), "Node is up");
        }
        was_down
    }

    pub fn is_up(&self, node: NodeAddress) -> bool {
        self.state.lock().last_seen.contains_key(&node)
    }

    /// Evict peripherals unseen for longer than `timeout`; returns them
    pub fn sweep(&self, now: Instant, timeout: Duration) -> Vec<NodeAddress> {
        let mut state = self.state.lock();
        let mut expired: Vec<NodeAddress> = state
            .last_seen
            .iter()
            .filter(|(_, seen)| now.saturating_duration_since(**seen) > timeout)
            .map(|(node, _)| *node)
            .collect();
        expired.sort_unstable();

        for node in &expired {
            state.last_seen.remove(node);
            info!(node = format!("0x{:02X}", node), "Node is down");
        }
        expired
    }

    /// One byte per peripheral in address order: 0x01 up, 0x00 down
    pub fn status_bytes(&self) -> Vec<u8> {
        let state = self.state.lock();
        NodeId::PERIPHERALS
            .iter()
            .map(|p| u8::from(state.last_seen.contains_key(&p.address())))
            .collect()
    }
}
