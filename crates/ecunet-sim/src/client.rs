//! The external API actor (0xFA)
//!
//! Talks to the coordinator over the API channel. Requests carry the target
//! node as receiver; the coordinator forwards them and relays the replies.

use std::sync::Arc;
use std::time::Duration;

use ecunet_uds::address::address;
use ecunet_uds::frame::{CanFrame, Reassembler};
use ecunet_uds::{BusChannel, Frame, NegativeResponseCode, TransportError};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("No reply from 0x{receiver:02X} within {timeout:?}")]
    Timeout { receiver: u8, timeout: Duration },

    #[error("API channel closed")]
    Closed,
}

pub struct ApiClient {
    channel: Arc<dyn BusChannel>,
    rx: broadcast::Receiver<CanFrame>,
    reassembler: Reassembler,
}

impl ApiClient {
    /// Attach to `channel`; replies sent from now on are seen
    pub fn new(channel: Arc<dyn BusChannel>) -> Self {
        let rx = channel.subscribe();
        Self {
            channel,
            rx,
            reassembler: Reassembler::new(),
        }
    }

    /// Send `data` to `receiver` without waiting for an answer
    pub async fn send(&self, receiver: u8, data: &[u8]) -> Result<(), ClientError> {
        let frame = Frame::new(address::API, receiver, data.to_vec());
        debug!(frame = %frame, "API request");
        self.channel.send_frame(&frame).await?;
        Ok(())
    }

    /// Next complete frame addressed to the API actor
    pub async fn recv(&mut self) -> Result<Frame, ClientError> {
        loop {
            let can = match self.rx.recv().await {
                Ok(can) => can,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "API client lagged, frames dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return Err(ClientError::Closed),
            };
            if can.receiver() != address::API {
                continue;
            }
            match self.reassembler.push(&can) {
                Ok(Some(frame)) => return Ok(frame),
                Ok(None) => {}
                Err(e) => debug!(frame = %can, error = %e, "Dropping malformed reply"),
            }
        }
    }

    /// Send a request and wait for the final answer from `receiver`
    ///
    /// Response-pending notices are skipped.
    pub async fn request(
        &mut self,
        receiver: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<Frame, ClientError> {
        self.send(receiver, data).await?;
        let wait = async {
            loop {
                let frame = self.recv().await?;
                if frame.sender != receiver || is_pending(&frame) {
                    continue;
                }
                return Ok(frame);
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| ClientError::Timeout { receiver, timeout })?
    }

    /// Drop any reply that arrived without being awaited
    pub fn drain(&mut self) {
        while self.rx.try_recv().is_ok() {}
        self.reassembler = Reassembler::new();
    }
}

fn is_pending(frame: &Frame) -> bool {
    frame.is_negative_response()
        && frame
            .data
            .get(2)
            .is_some_and(|&nrc| !NegativeResponseCode::from(nrc).is_terminal())
}
