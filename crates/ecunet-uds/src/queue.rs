//! Per-node ingress queue
//!
//! Readers push from any task; one egress worker pops in FIFO order, so a
//! node services at most one request at a time.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

use crate::address::{address, NodeAddress};
use crate::frame::Frame;

/// Which receivers a node accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverFilter {
    /// Coordinator: its own address, broadcast, or replies headed to the API
    Coordinator,
    /// Peripheral: only its own address
    Peripheral(NodeAddress),
}

impl ReceiverFilter {
    /// Frames read from the shared bus
    pub fn accepts_bus(&self, receiver: NodeAddress) -> bool {
        match self {
            ReceiverFilter::Coordinator => {
                matches!(receiver, address::MCU | address::BROADCAST | address::API)
            }
            ReceiverFilter::Peripheral(own) => receiver == *own,
        }
    }

    /// Frames read from the API channel (coordinator only)
    pub fn accepts_api(&self, receiver: NodeAddress) -> bool {
        match self {
            ReceiverFilter::Coordinator => receiver != address::API,
            ReceiverFilter::Peripheral(_) => false,
        }
    }
}

/// Where a queued frame came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Bus,
    Api,
}

/// A frame waiting for the egress worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Queued {
    pub frame: Frame,
    pub origin: Origin,
}

pub struct FrameQueue {
    filter: ReceiverFilter,
    frames: Mutex<VecDeque<Queued>>,
    notify: Notify,
    shutdown: AtomicBool,
}

impl FrameQueue {
    pub fn new(filter: ReceiverFilter) -> Self {
        Self {
            filter,
            frames: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn filter(&self) -> ReceiverFilter {
        self.filter
    }

    /// Push a frame read from the bus; returns false if it is not for this node
    pub fn enqueue(&self, frame: Frame) -> bool {
        if !self.filter.accepts_bus(frame.receiver) {
            return false;
        }
        self.push(frame, Origin::Bus);
        true
    }

    /// Push a frame read from the API channel; returns false if filtered out
    pub fn enqueue_from_api(&self, frame: Frame) -> bool {
        if !self.filter.accepts_api(frame.receiver) {
            return false;
        }
        self.push(frame, Origin::Api);
        true
    }

    fn push(&self, frame: Frame, origin: Origin) {
        trace!(frame = %frame, ?origin, "enqueue");
        self.frames.lock().push_back(Queued { frame, origin });
        self.notify.notify_one();
    }

    /// Wait for the next frame; `None` once shut down and drained
    pub async fn dequeue(&self) -> Option<Queued> {
        loop {
            // Register interest before checking, so a push in between is not lost
            let notified = self.notify.notified();

            if let Some(queued) = self.frames.lock().pop_front() {
                return Some(queued);
            }
            if self.shutdown.load(Ordering::SeqCst) {
                return None;
            }

            notified.await;
        }
    }

    /// Wake the consumer and make `dequeue` return `None` once empty
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    /// Discard everything still queued
    pub fn clear(&self) {
        self.frames.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_coordinator_filter() {
        let queue = FrameQueue::new(ReceiverFilter::Coordinator);
        assert!(queue.enqueue(Frame::new(0x11, 0x10, vec![0xD9])));
        assert!(queue.enqueue(Frame::new(0x11, 0xFA, vec![0x62])));
        assert!(queue.enqueue(Frame::new(0x11, 0xFF, vec![0xD9])));
        assert!(!queue.enqueue(Frame::new(0x10, 0x12, vec![0x99])));

        assert!(queue.enqueue_from_api(Frame::new(0xFA, 0x13, vec![0x22])));
        assert!(!queue.enqueue_from_api(Frame::new(0x10, 0xFA, vec![0x62])));
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn test_peripheral_filter() {
        let queue = FrameQueue::new(ReceiverFilter::Peripheral(0x12));
        assert!(queue.enqueue(Frame::new(0x10, 0x12, vec![0x99])));
        assert!(!queue.enqueue(Frame::new(0x10, 0x11, vec![0x99])));
        assert!(!queue.enqueue(Frame::new(0x10, 0xFF, vec![0x99])));
        assert!(!queue.enqueue_from_api(Frame::new(0xFA, 0x12, vec![0x22])));
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = FrameQueue::new(ReceiverFilter::Peripheral(0x11));
        for sid in [0x22, 0x2E, 0x3E] {
            queue.enqueue(Frame::new(0xFA, 0x11, vec![sid]));
        }
        for sid in [0x22, 0x2E, 0x3E] {
            let queued = queue.dequeue().await.unwrap();
            assert_eq!(queued.frame.sid(), Some(sid));
            assert_eq!(queued.origin, Origin::Bus);
        }
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_producer() {
        let queue = Arc::new(FrameQueue::new(ReceiverFilter::Coordinator));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue_from_api(Frame::new(0xFA, 0x10, vec![0x3E, 0x00]));

        let queued = consumer.await.unwrap().unwrap();
        assert_eq!(queued.origin, Origin::Api);
    }

    #[tokio::test]
    async fn test_shutdown_releases_consumer() {
        let queue = Arc::new(FrameQueue::new(ReceiverFilter::Coordinator));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.shutdown();

        assert_eq!(consumer.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_shutdown_drains_remaining_frames_first() {
        let queue = FrameQueue::new(ReceiverFilter::Peripheral(0x13));
        queue.enqueue(Frame::new(0x10, 0x13, vec![0x99]));
        queue.shutdown();
        assert!(queue.dequeue().await.is_some());
        assert!(queue.dequeue().await.is_none());
    }
}
