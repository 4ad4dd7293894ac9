//! Outgoing frame routing for one node

use std::sync::Arc;

use tracing::{debug, error};

use super::{BusChannel, TransportError};
use crate::address::address;
use crate::frame::Frame;

/// Sends a node's frames to the right channel
///
/// Frames addressed to the API actor leave through the API channel when the
/// node has one (the coordinator); everything else goes on the shared bus.
#[derive(Clone)]
pub struct Outbox {
    bus: Arc<dyn BusChannel>,
    api: Option<Arc<dyn BusChannel>>,
}

impl Outbox {
    pub fn new(bus: Arc<dyn BusChannel>, api: Option<Arc<dyn BusChannel>>) -> Self {
        Self { bus, api }
    }

    pub fn bus(&self) -> &Arc<dyn BusChannel> {
        &self.bus
    }

    pub fn api(&self) -> Option<&Arc<dyn BusChannel>> {
        self.api.as_ref()
    }

    pub async fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        match (&self.api, frame.receiver) {
            (Some(api), address::API) => {
                debug!(frame = %frame, "-> api");
                api.send_frame(frame).await
            }
            _ => {
                debug!(frame = %frame, "-> bus");
                self.bus.send_frame(frame).await
            }
        }
    }

    /// Send and log failures; used where the caller has no one to report to
    pub async fn send_logged(&self, frame: &Frame) {
        if let Err(e) = self.send(frame).await {
            error!(frame = %frame, error = %e, "Failed to send frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::VirtualBus;

    #[tokio::test]
    async fn test_api_frames_use_api_channel() {
        let bus = Arc::new(VirtualBus::new("bus"));
        let api = Arc::new(VirtualBus::new("api"));
        let mut bus_rx = bus.subscribe();
        let mut api_rx = api.subscribe();
        let api_channel: Arc<dyn BusChannel> = api.clone();
        let outbox = Outbox::new(bus.clone(), Some(api_channel));

        outbox.send(&Frame::new(0x10, 0xFA, vec![0x67, 0x02])).await.unwrap();
        outbox.send(&Frame::new(0x10, 0x11, vec![0xCE])).await.unwrap();

        assert_eq!(api_rx.recv().await.unwrap().id, 0x10FA);
        assert_eq!(bus_rx.recv().await.unwrap().id, 0x1011);
        assert!(api_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_without_api_channel_everything_goes_on_the_bus() {
        let bus = Arc::new(VirtualBus::new("bus"));
        let mut bus_rx = bus.subscribe();
        let outbox = Outbox::new(bus.clone(), None);

        outbox.send(&Frame::new(0x12, 0xFA, vec![0x7E, 0x00])).await.unwrap();
        assert_eq!(bus_rx.recv().await.unwrap().id, 0x12FA);
    }
}
