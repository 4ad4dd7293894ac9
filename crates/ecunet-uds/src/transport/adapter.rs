//! Bus channel trait

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::TransportError;
use crate::frame::{CanFrame, Frame};

/// Raw duplex channel a node reads and writes physical frames on
///
/// Every subscriber sees every frame sent on the channel, including its own;
/// receivers filter by routing id.
#[async_trait]
pub trait BusChannel: Send + Sync {
    /// Put one physical frame on the channel
    async fn send(&self, frame: CanFrame) -> Result<(), TransportError>;

    /// Subscribe to every frame sent after this call
    fn subscribe(&self) -> broadcast::Receiver<CanFrame>;

    /// Check if the channel is usable
    async fn is_connected(&self) -> bool;

    /// Segment a logical frame and send each physical unit in order
    async fn send_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        for can in frame.to_can_frames()? {
            self.send(can).await?;
        }
        Ok(())
    }
}
