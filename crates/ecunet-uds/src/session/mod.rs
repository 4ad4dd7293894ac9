//! Diagnostic session state machine

mod manager;

pub use manager::SessionManager;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::uds::session_type;

/// Diagnostic session of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSession {
    #[default]
    Default,
    Programming,
    Extended,
}

impl DiagnosticSession {
    pub fn from_sub_function(sub: u8) -> Option<Self> {
        match sub {
            session_type::DEFAULT => Some(Self::Default),
            session_type::PROGRAMMING => Some(Self::Programming),
            session_type::EXTENDED => Some(Self::Extended),
            _ => None,
        }
    }

    pub fn as_sub_function(&self) -> u8 {
        match self {
            Self::Default => session_type::DEFAULT,
            Self::Programming => session_type::PROGRAMMING,
            Self::Extended => session_type::EXTENDED,
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, Self::Default)
    }
}

impl std::fmt::Display for DiagnosticSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Programming => write!(f, "programming"),
            Self::Extended => write!(f, "extended"),
        }
    }
}

/// Session-related errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Unsupported session type 0x{0:02X}")]
    UnsupportedSession(u8),
}
