//! Frame codec
//!
//! A [`Frame`] is one logical diagnostic message (sender, receiver, UDS bytes).
//! A [`CanFrame`] is one physical unit on the bus: a 32-bit routing id plus
//! at most 8 data bytes, the first of which is the PCI byte.
//!
//! ```text
//! routing id:  0x0000_SSRR   (SS = sender, RR = receiver)
//!
//! single frame       [0x0L] [data; L<=7]
//! first frame        [0x1H] [LL] [data; 6]        total length = 0xHLL
//! consecutive frame  [0x2N] [data; <=7]           N = 1..15, 0, 1, ...
//! ```

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use crate::address::NodeAddress;
use crate::uds::{service_id, NegativeResponseCode};

/// Maximum bytes in one physical frame, PCI included
pub const MAX_FRAME_LEN: usize = 8;
/// Maximum UDS bytes carried by a single frame
pub const SINGLE_FRAME_CAPACITY: usize = 7;
/// Largest logical message expressible with a 12-bit first-frame length
pub const MAX_MESSAGE_LEN: usize = 0x0FFF;

const FIRST_FRAME_CAPACITY: usize = 6;
const CONSECUTIVE_FRAME_CAPACITY: usize = 7;

/// PCI frame types (high nibble of the first byte)
pub mod pci {
    pub const SINGLE_FRAME: u8 = 0x00;
    pub const FIRST_FRAME: u8 = 0x10;
    pub const CONSECUTIVE_FRAME: u8 = 0x20;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Empty frame")]
    Empty,

    #[error("Message of {len} bytes exceeds the 4095-byte limit")]
    TooLong { len: usize },

    #[error("PCI declares {declared} bytes but only {available} are present")]
    Truncated {
        /// SID of the truncated request, if one byte of payload survived
        sid: Option<u8>,
        declared: usize,
        available: usize,
    },

    #[error("Invalid PCI byte 0x{0:02X}")]
    InvalidPci(u8),

    #[error("Consecutive frame on 0x{0:04X} without a first frame")]
    UnexpectedConsecutive(u32),

    #[error("Consecutive frame sequence mismatch: expected {expected}, got {got}")]
    SequenceMismatch { expected: u8, got: u8 },
}

/// Compose a routing id from sender and receiver
pub fn routing_id(sender: NodeAddress, receiver: NodeAddress) -> u32 {
    ((sender as u32) << 8) | receiver as u32
}

/// One physical frame on the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    pub id: u32,
    pub data: Vec<u8>,
}

impl CanFrame {
    pub fn new(id: u32, data: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            data: data.into(),
        }
    }

    pub fn sender(&self) -> NodeAddress {
        ((self.id >> 8) & 0xFF) as u8
    }

    pub fn receiver(&self) -> NodeAddress {
        (self.id & 0xFF) as u8
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X} [{}]", self.id, hex::encode_upper(&self.data))
    }
}

/// One logical diagnostic message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sender: NodeAddress,
    pub receiver: NodeAddress,
    /// UDS bytes starting with the SID (no PCI)
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(sender: NodeAddress, receiver: NodeAddress, data: impl Into<Vec<u8>>) -> Self {
        Self {
            sender,
            receiver,
            data: data.into(),
        }
    }

    pub fn from_routing_id(id: u32, data: impl Into<Vec<u8>>) -> Self {
        Self::new(((id >> 8) & 0xFF) as u8, (id & 0xFF) as u8, data)
    }

    pub fn routing_id(&self) -> u32 {
        routing_id(self.sender, self.receiver)
    }

    pub fn sid(&self) -> Option<u8> {
        self.data.first().copied()
    }

    /// Sub-function byte, if present
    pub fn sub_function(&self) -> Option<u8> {
        self.data.get(1).copied()
    }

    pub fn is_negative_response(&self) -> bool {
        self.sid() == Some(service_id::NEGATIVE_RESPONSE)
    }

    /// Build a frame travelling back to this frame's sender
    pub fn reply(&self, data: impl Into<Vec<u8>>) -> Frame {
        Frame::new(self.receiver, self.sender, data)
    }

    /// Build a negative response to this frame
    pub fn negative_reply(&self, sid: u8, nrc: NegativeResponseCode) -> Frame {
        self.reply(vec![service_id::NEGATIVE_RESPONSE, sid, nrc.into()])
    }

    /// Segment into physical frames
    pub fn to_can_frames(&self) -> Result<Vec<CanFrame>, FrameError> {
        encode(self.routing_id(), &self.data)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{:04X} [{}]",
            self.routing_id(),
            hex::encode_upper(&self.data)
        )
    }
}

/// Segment a logical payload into single / first / consecutive frames
pub fn encode(id: u32, data: &[u8]) -> Result<Vec<CanFrame>, FrameError> {
    if data.is_empty() {
        return Err(FrameError::Empty);
    }
    if data.len() > MAX_MESSAGE_LEN {
        return Err(FrameError::TooLong { len: data.len() });
    }

    if data.len() <= SINGLE_FRAME_CAPACITY {
        let mut bytes = Vec::with_capacity(data.len() + 1);
        bytes.push(pci::SINGLE_FRAME | data.len() as u8);
        bytes.extend_from_slice(data);
        return Ok(vec![CanFrame::new(id, bytes)]);
    }

    let len = data.len();
    let mut frames = Vec::with_capacity(1 + (len - FIRST_FRAME_CAPACITY).div_ceil(7));

    let mut first = Vec::with_capacity(MAX_FRAME_LEN);
    first.push(pci::FIRST_FRAME | ((len >> 8) as u8 & 0x0F));
    first.push((len & 0xFF) as u8);
    first.extend_from_slice(&data[..FIRST_FRAME_CAPACITY]);
    frames.push(CanFrame::new(id, first));

    let mut seq: u8 = 1;
    for chunk in data[FIRST_FRAME_CAPACITY..].chunks(CONSECUTIVE_FRAME_CAPACITY) {
        let mut bytes = Vec::with_capacity(chunk.len() + 1);
        bytes.push(pci::CONSECUTIVE_FRAME | seq);
        bytes.extend_from_slice(chunk);
        frames.push(CanFrame::new(id, bytes));
        seq = (seq + 1) & 0x0F;
    }

    Ok(frames)
}

#[derive(Debug)]
struct PartialMessage {
    expected_len: usize,
    next_seq: u8,
    data: Vec<u8>,
}

/// Reassembles multi-frame messages, one in-flight message per routing id
#[derive(Debug, Default)]
pub struct Reassembler {
    partial: HashMap<u32, PartialMessage>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one physical frame; returns a complete logical frame when one is ready
    pub fn push(&mut self, can: &CanFrame) -> Result<Option<Frame>, FrameError> {
        let first = *can.data.first().ok_or(FrameError::Empty)?;
        let payload = &can.data[1..];

        match first & 0xF0 {
            pci::SINGLE_FRAME => {
                let declared = (first & 0x0F) as usize;
                if declared == 0 {
                    return Err(FrameError::InvalidPci(first));
                }
                if declared > payload.len() {
                    return Err(FrameError::Truncated {
                        sid: payload.first().copied(),
                        declared,
                        available: payload.len(),
                    });
                }
                Ok(Some(Frame::from_routing_id(can.id, &payload[..declared])))
            }
            pci::FIRST_FRAME => {
                let len_low = *payload.first().ok_or(FrameError::Truncated {
                    sid: None,
                    declared: 1,
                    available: 0,
                })?;
                let expected_len = (((first & 0x0F) as usize) << 8) | len_low as usize;
                let body = &payload[1..];
                if expected_len <= SINGLE_FRAME_CAPACITY {
                    return Err(FrameError::InvalidPci(first));
                }
                self.partial.insert(
                    can.id,
                    PartialMessage {
                        expected_len,
                        next_seq: 1,
                        data: body.to_vec(),
                    },
                );
                Ok(None)
            }
            pci::CONSECUTIVE_FRAME => {
                let seq = first & 0x0F;
                let message = self
                    .partial
                    .get_mut(&can.id)
                    .ok_or(FrameError::UnexpectedConsecutive(can.id))?;

                if seq != message.next_seq {
                    let expected = message.next_seq;
                    self.partial.remove(&can.id);
                    return Err(FrameError::SequenceMismatch { expected, got: seq });
                }

                message.data.extend_from_slice(payload);
                message.next_seq = (message.next_seq + 1) & 0x0F;

                if message.data.len() >= message.expected_len {
                    if let Some(mut done) = self.partial.remove(&can.id) {
                        done.data.truncate(done.expected_len);
                        return Ok(Some(Frame::from_routing_id(can.id, done.data)));
                    }
                }
                Ok(None)
            }
            _ => Err(FrameError::InvalidPci(first)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_negative_reply_swaps_routing_id() {
        let request = Frame::new(0xFA, 0x10, vec![0x22, 0xF1, 0x90]);
        let reply = request.negative_reply(0x22, NegativeResponseCode::SecurityAccessDenied);

        assert_eq!(reply.routing_id(), 0x10FA);
        let wire = reply.to_can_frames().unwrap();
        assert_eq!(wire, vec![CanFrame::new(0x10FA, vec![0x03, 0x7F, 0x22, 0x33])]);
    }

    #[test]
    fn test_single_frame_carries_pci_length() {
        let frames = encode(0xFA10, &[0x27, 0x01]).unwrap();
        assert_eq!(frames, vec![CanFrame::new(0xFA10, vec![0x02, 0x27, 0x01])]);
    }

    #[test]
    fn test_multi_frame_segmentation_layout() {
        // 9-byte DTC report: first frame carries 6 bytes, one consecutive frame the rest
        let data = [0x59, 0x02, 0x24, 0x01, 0x90, 0x24, 0x01, 0x96, 0x24];
        let frames = encode(0x10FA, &data).unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(
            frames[0].data,
            vec![0x10, 0x09, 0x59, 0x02, 0x24, 0x01, 0x90, 0x24]
        );
        assert_eq!(frames[1].data, vec![0x21, 0x01, 0x96, 0x24]);
    }

    #[test]
    fn test_reassembler_rebuilds_long_message() {
        let data: Vec<u8> = (0..40u8).collect();
        let frames = encode(0x1110, &data).unwrap();
        let mut reassembler = Reassembler::new();

        let mut result = None;
        for frame in &frames {
            result = reassembler.push(frame).unwrap();
        }
        let message = result.expect("message complete");
        assert_eq!(message.sender, 0x11);
        assert_eq!(message.receiver, 0x10);
        assert_eq!(message.data, data);
    }

    #[test]
    fn test_sequence_wraps_after_fifteen() {
        let data = vec![0xAB; 6 + 7 * 17];
        let frames = encode(0x1011, &data).unwrap();
        assert_eq!(frames[15].data[0], 0x2F);
        assert_eq!(frames[16].data[0], 0x20);
        assert_eq!(frames[17].data[0], 0x21);
    }

    #[test]
    fn test_truncated_single_frame_reports_sid() {
        let mut reassembler = Reassembler::new();
        let err = reassembler
            .push(&CanFrame::new(0xFA10, vec![0x04, 0x3E, 0x00]))
            .unwrap_err();
        assert_eq!(
            err,
            FrameError::Truncated {
                sid: Some(0x3E),
                declared: 4,
                available: 2
            }
        );
    }

    #[test]
    fn test_consecutive_without_first_is_rejected() {
        let mut reassembler = Reassembler::new();
        let err = reassembler
            .push(&CanFrame::new(0xFA10, vec![0x21, 0x00]))
            .unwrap_err();
        assert_eq!(err, FrameError::UnexpectedConsecutive(0xFA10));
    }

    #[test]
    fn test_out_of_order_consecutive_drops_message() {
        let data: Vec<u8> = (0..20u8).collect();
        let frames = encode(0xFA11, &data).unwrap();
        let mut reassembler = Reassembler::new();

        reassembler.push(&frames[0]).unwrap();
        let err = reassembler.push(&frames[2]).unwrap_err();
        assert_eq!(err, FrameError::SequenceMismatch { expected: 1, got: 2 });
        // The partial message is gone
        assert!(reassembler.push(&frames[1]).is_err());
    }

    #[test]
    fn test_oversized_message_is_rejected() {
        let data = vec![0u8; MAX_MESSAGE_LEN + 1];
        assert_eq!(
            encode(0x10FA, &data),
            Err(FrameError::TooLong {
                len: MAX_MESSAGE_LEN + 1
            })
        );
    }
}
