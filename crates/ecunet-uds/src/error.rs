//! Node startup errors

use thiserror::Error;

use crate::address::NodeId;
use crate::config::ConfigError;
use crate::store::StoreError;
use crate::transport::TransportError;

/// Conditions that abort node initialisation
///
/// Once a node runs, failures are per request and end up as negative
/// responses instead.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Channel {0} is not connected")]
    ChannelUnavailable(String),

    #[error("{0} cannot run in this role")]
    WrongRole(NodeId),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, NodeError>;
