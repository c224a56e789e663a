//! RTCM 3 frame extraction and decoding.
//!
//! RTCM 3 frame format:
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │ Byte 0:     Preamble (0xD3)                          │
//! │ Byte 1:     [7:2] Reserved                           │
//! │             [1:0] Payload length high bits           │
//! │ Byte 2:     Payload length low byte (0..=1023)       │
//! ├──────────────────────────────────────────────────────┤
//! │ Payload (first 12 bits = message number)             │
//! ├──────────────────────────────────────────────────────┤
//! │ 3 bytes:    CRC-24Q over header + payload            │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! The transport guarantees byte order but not alignment at read-call
//! boundaries, so [`extractor`] resynchronizes on garbage and holds partial
//! frames until more bytes arrive. [`decoder`] turns validated frames into
//! typed messages.

pub mod decoder;
pub mod extractor;

use bytes::Bytes;

/// RTCM 3 frame preamble byte.
pub const PREAMBLE: u8 = 0xD3;

/// Frame header size (preamble + 10-bit length).
pub const HEADER_LEN: usize = 3;

/// Trailing CRC-24Q size.
pub const CRC_LEN: usize = 3;

/// Maximum payload size expressible in the 10-bit length field.
pub const MAX_PAYLOAD_LEN: usize = 1023;

/// One complete, CRC-validated RTCM frame as extracted from the stream.
///
/// Holds the full wire bytes (header + payload + CRC); accessors expose the
/// payload and the 12-bit message number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    data: Bytes,
}

impl RawFrame {
    /// Wrap already-validated frame bytes.
    ///
    /// Callers outside the extractor are expected to pass bytes that have
    /// passed the CRC check; no re-validation happens here.
    pub fn new(data: Bytes) -> Self {
        RawFrame { data }
    }

    /// Full wire bytes, including header and CRC.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Frame payload, without header and CRC.
    pub fn payload(&self) -> &[u8] {
        &self.data[HEADER_LEN..self.data.len() - CRC_LEN]
    }

    /// The 12-bit RTCM message number from the head of the payload, or
    /// `None` for a payload too short to carry one. Zero-length payloads
    /// are CRC-valid on the wire, so this cannot assume two bytes exist.
    pub fn message_type(&self) -> Option<u16> {
        let p = self.payload();
        if p.len() < 2 {
            return None;
        }
        Some((u16::from(p[0]) << 4) | (u16::from(p[1]) >> 4))
    }

    /// Total size on the wire.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
