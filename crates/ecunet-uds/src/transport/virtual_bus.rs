//! In-process bus backed by a broadcast channel

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::trace;

use super::{BusChannel, TransportError};
use crate::frame::CanFrame;

const DEFAULT_CAPACITY: usize = 1024;

/// Shared in-process bus; clone the `Arc` to attach more nodes
pub struct VirtualBus {
    name: String,
    connected: AtomicBool,
    tx: broadcast::Sender<CanFrame>,
}

impl VirtualBus {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_capacity(name, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(name: impl Into<String>, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            name: name.into(),
            connected: AtomicBool::new(true),
            tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Simulate the interface going away (or coming back)
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

#[async_trait]
impl BusChannel for VirtualBus {
    async fn send(&self, frame: CanFrame) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        trace!(bus = %self.name, frame = %frame, "tx");
        // No subscribers is not an error: nobody is listening yet
        let _ = self.tx.send(frame);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<CanFrame> {
        self.tx.subscribe()
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
