//! Firmware update (OTA) lifecycle

pub mod image;
mod machine;

pub use image::{FirmwareImage, FirmwareImageError};
pub use machine::{DownloadSummary, OtaMachine, TransferCompleteHook, VersionCheck};

use std::fmt;

/// Update state persisted per node
///
/// High nibble is the phase, low nibble the outcome within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OtaState {
    Idle = 0x00,
    Init = 0x10,
    Wait = 0x20,
    WaitDownloadCompleted = 0x21,
    WaitDownloadFailed = 0x22,
    Processing = 0x30,
    ProcessingTransferComplete = 0x31,
    ProcessingTransferFailed = 0x32,
    Ready = 0x40,
    Verify = 0x50,
    VerifyComplete = 0x51,
    VerifyFailed = 0x52,
    Activate = 0x60,
    ActivateInstallComplete = 0x61,
    ActivateInstallFailed = 0x62,
    Error = 0xFF,
}

impl OtaState {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x00 => Self::Idle,
            0x10 => Self::Init,
            0x20 => Self::Wait,
            0x21 => Self::WaitDownloadCompleted,
            0x22 => Self::WaitDownloadFailed,
            0x30 => Self::Processing,
            0x31 => Self::ProcessingTransferComplete,
            0x32 => Self::ProcessingTransferFailed,
            0x40 => Self::Ready,
            0x50 => Self::Verify,
            0x51 => Self::VerifyComplete,
            0x52 => Self::VerifyFailed,
            0x60 => Self::Activate,
            0x61 => Self::ActivateInstallComplete,
            0x62 => Self::ActivateInstallFailed,
            0xFF => Self::Error,
            _ => return None,
        })
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Phase nibble (0x1 Init .. 0x6 Activate, 0xF Error)
    pub fn phase(&self) -> u8 {
        self.as_u8() >> 4
    }

    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            Self::WaitDownloadFailed
                | Self::ProcessingTransferFailed
                | Self::VerifyFailed
                | Self::ActivateInstallFailed
                | Self::Error
        )
    }
}

impl fmt::Display for OtaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}(0x{:02X})", self, self.as_u8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_round_trip() {
        for value in 0u8..=0xFF {
            if let Some(state) = OtaState::from_u8(value) {
                assert_eq!(state.as_u8(), value);
            }
        }
        assert_eq!(OtaState::from_u8(0x41), None);
    }

    #[test]
    fn test_phase_nibble() {
        assert_eq!(OtaState::ProcessingTransferFailed.phase(), 0x3);
        assert_eq!(OtaState::ActivateInstallComplete.phase(), 0x6);
        assert!(OtaState::VerifyFailed.is_failed());
        assert!(!OtaState::Ready.is_failed());
    }
}
