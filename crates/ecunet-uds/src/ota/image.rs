//! Firmware image format accepted by the update routines
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │  Header magic "ECUNET_FW\0" (10)    │  offset 0
//! ├─────────────────────────────────────┤
//! │  Target node address (1)            │  offset 10
//! │  Software version (1)               │  offset 11
//! ├─────────────────────────────────────┤
//! │  Payload (variable)                 │  offset 12
//! ├─────────────────────────────────────┤
//! │  SHA-256 of bytes 0..(len-42) (32)  │  offset len-42
//! │  Footer magic "ECUNET_END" (10)     │  offset len-10
//! └─────────────────────────────────────┘
//! ```

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::address::NodeAddress;

// ── Layout constants ───────────────────────────────────────────────────────

pub const FW_HEADER_MAGIC: &[u8] = b"ECUNET_FW\0";
pub const FW_FOOTER_MAGIC: &[u8] = b"ECUNET_END";

const FW_TARGET_OFFSET: usize = FW_HEADER_MAGIC.len();
const FW_VERSION_OFFSET: usize = FW_TARGET_OFFSET + 1;
pub const FW_PAYLOAD_OFFSET: usize = FW_VERSION_OFFSET + 1;

const DIGEST_LEN: usize = 32;
/// SHA-256 + footer magic
pub const FW_FOOTER_SIZE: usize = DIGEST_LEN + FW_FOOTER_MAGIC.len();
/// Header and footer around an empty payload
pub const FW_MIN_SIZE: usize = FW_PAYLOAD_OFFSET + FW_FOOTER_SIZE;

// ── Error type ─────────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FirmwareImageError {
    #[error("Image too small: {got} bytes (minimum {need})")]
    TooSmall { need: usize, got: usize },

    #[error("Invalid header magic")]
    BadHeaderMagic,

    #[error("Invalid footer magic")]
    BadFooterMagic,

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: String, got: String },

    #[error("Image targets node 0x{got:02X}, expected 0x{expected:02X}")]
    TargetMismatch { expected: NodeAddress, got: NodeAddress },

    #[error("Image carries version 0x{got:02X}, expected 0x{expected:02X}")]
    VersionMismatch { expected: u8, got: u8 },
}

// ── Parsed image ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    pub target: NodeAddress,
    pub version: u8,
    pub payload: Vec<u8>,
}

impl FirmwareImage {
    pub fn build(target: NodeAddress, version: u8, payload: &[u8]) -> Self {
        Self {
            target,
            version,
            payload: payload.to_vec(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FW_MIN_SIZE + self.payload.len());
        buf.extend_from_slice(FW_HEADER_MAGIC);
        buf.push(self.target);
        buf.push(self.version);
        buf.extend_from_slice(&self.payload);

        let digest = sha256(&buf);
        buf.extend_from_slice(&digest);
        buf.extend_from_slice(FW_FOOTER_MAGIC);
        buf
    }

    /// Parse and check magic bytes and checksum
    pub fn parse(data: &[u8]) -> Result<Self, FirmwareImageError> {
        if data.len() < FW_MIN_SIZE {
            return Err(FirmwareImageError::TooSmall {
                need: FW_MIN_SIZE,
                got: data.len(),
            });
        }
        if &data[..FW_HEADER_MAGIC.len()] != FW_HEADER_MAGIC {
            return Err(FirmwareImageError::BadHeaderMagic);
        }
        if &data[data.len() - FW_FOOTER_MAGIC.len()..] != FW_FOOTER_MAGIC {
            return Err(FirmwareImageError::BadFooterMagic);
        }

        let digest_offset = data.len() - FW_FOOTER_SIZE;
        let expected = &data[digest_offset..digest_offset + DIGEST_LEN];
        let actual = sha256(&data[..digest_offset]);
        if actual != expected {
            return Err(FirmwareImageError::ChecksumMismatch {
                expected: hex::encode(expected),
                got: hex::encode(actual),
            });
        }

        Ok(Self {
            target: data[FW_TARGET_OFFSET],
            version: data[FW_VERSION_OFFSET],
            payload: data[FW_PAYLOAD_OFFSET..digest_offset].to_vec(),
        })
    }

    pub fn verify_target(&self, expected: NodeAddress) -> Result<(), FirmwareImageError> {
        if self.target != expected {
            return Err(FirmwareImageError::TargetMismatch {
                expected,
                got: self.target,
            });
        }
        Ok(())
    }

    pub fn verify_version(&self, expected: u8) -> Result<(), FirmwareImageError> {
        if self.version != expected {
            return Err(FirmwareImageError::VersionMismatch {
                expected,
                got: self.version,
            });
        }
        Ok(())
    }
}

fn sha256(data: &[u8]) -> Vec<u8> {
    let mut h = Sha256::new();
    h.update(data);
    h.finalize().to_vec()
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_built_image() {
        let bytes = FirmwareImage::build(0x12, 0x21, &[0xAA; 100]).to_bytes();
        assert_eq!(bytes.len(), FW_MIN_SIZE + 100);

        let image = FirmwareImage::parse(&bytes).unwrap();
        assert_eq!(image.target, 0x12);
        assert_eq!(image.version, 0x21);
        assert_eq!(image.payload.len(), 100);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = FirmwareImage::build(0x10, 0x10, &[0; 8]).to_bytes();
        bytes[0] = b'X';
        assert_eq!(
            FirmwareImage::parse(&bytes),
            Err(FirmwareImageError::BadHeaderMagic)
        );

        let mut bytes = FirmwareImage::build(0x10, 0x10, &[0; 8]).to_bytes();
        let len = bytes.len();
        bytes[len - 1] = b'X';
        assert_eq!(
            FirmwareImage::parse(&bytes),
            Err(FirmwareImageError::BadFooterMagic)
        );
    }

    #[test]
    fn test_corrupted_payload_fails_checksum() {
        let mut bytes = FirmwareImage::build(0x11, 0x12, &[0x55; 32]).to_bytes();
        bytes[FW_PAYLOAD_OFFSET + 3] ^= 0xFF;
        assert!(matches!(
            FirmwareImage::parse(&bytes),
            Err(FirmwareImageError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_too_small() {
        assert!(matches!(
            FirmwareImage::parse(&[0u8; 10]),
            Err(FirmwareImageError::TooSmall { .. })
        ));
    }

    #[test]
    fn test_target_and_version_checks() {
        let image = FirmwareImage::build(0x13, 0x20, &[]);
        assert!(image.verify_target(0x13).is_ok());
        assert!(image.verify_target(0x14).is_err());
        assert!(image.verify_version(0x20).is_ok());
        assert_eq!(
            image.verify_version(0x21),
            Err(FirmwareImageError::VersionMismatch {
                expected: 0x21,
                got: 0x20
            })
        );
    }
}
