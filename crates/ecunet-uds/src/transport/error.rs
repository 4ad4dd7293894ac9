//! Bus errors

use thiserror::Error;

use crate::frame::FrameError;

#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
}
