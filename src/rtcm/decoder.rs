//! Frame decoder collaborator.
//!
//! Turns a validated [`RawFrame`] into a [`DecodedMessage`]: the numeric
//! message type plus, for MSM observation messages, the constellation and
//! the satellite PRNs present in the message's DF394 satellite mask.
//! The statistics aggregator accumulates the resulting identifiers; it never
//! parses payloads itself.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::RawFrame;

/// GNSS constellations distinguished by MSM message decades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Constellation {
    Gps,
    Glonass,
    Galileo,
    Sbas,
    Qzss,
    BeiDou,
}

impl Constellation {
    pub const ALL: [Constellation; 6] = [
        Constellation::Gps,
        Constellation::Glonass,
        Constellation::Galileo,
        Constellation::Sbas,
        Constellation::Qzss,
        Constellation::BeiDou,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Constellation::Gps => "GPS",
            Constellation::Glonass => "GLONASS",
            Constellation::Galileo => "Galileo",
            Constellation::Sbas => "SBAS",
            Constellation::Qzss => "QZSS",
            Constellation::BeiDou => "BeiDou",
        }
    }
}

impl std::fmt::Display for Constellation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Satellite identifiers carried by one observation message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SatelliteInfo {
    pub constellation: Constellation,
    /// PRNs present in the satellite mask. A set: the same satellite may
    /// appear in many frames and must not be double-counted downstream.
    pub prns: BTreeSet<u8>,
}

/// A decoded frame: numeric type plus optional satellite content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    pub msg_type: u16,
    /// Present only for MSM messages; `None` for station-info and other
    /// non-observation types.
    pub satellites: Option<SatelliteInfo>,
}

/// Decoding failures. These surface only in diagnostic telemetry; a frame
/// that fails to decode is never a session-level error.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("payload too short for a message number")]
    MissingMessageNumber,

    #[error("MSM payload truncated reading {context}")]
    Truncated { context: &'static str },
}

/// Decodes complete frames into typed messages.
pub trait FrameDecoder: Send + Sync {
    fn decode(&self, frame: &RawFrame) -> Result<DecodedMessage, DecodeError>;
}

/// Default decoder: message number for everything, satellite masks for MSM.
#[derive(Debug, Default, Clone, Copy)]
pub struct MsmDecoder;

// MSM header layout after the 12-bit message number: station id (12),
// GNSS epoch time (30), multiple-message flag (1), IODS (3), reserved (7),
// clock steering (2), external clock (2), smoothing (1), smoothing
// interval (3). DF394 (64-bit satellite mask) follows at payload bit 73.
const DF394_OFFSET_BITS: usize = 73;
const DF394_LEN_BITS: usize = 64;

impl FrameDecoder for MsmDecoder {
    fn decode(&self, frame: &RawFrame) -> Result<DecodedMessage, DecodeError> {
        let payload = frame.payload();
        let Some(msg_type) = frame.message_type() else {
            return Err(DecodeError::MissingMessageNumber);
        };

        let Some(constellation) = msm_constellation(msg_type) else {
            return Ok(DecodedMessage { msg_type, satellites: None });
        };

        let mask = read_bits(payload, DF394_OFFSET_BITS, DF394_LEN_BITS)
            .ok_or(DecodeError::Truncated { context: "DF394 satellite mask" })?;

        // DF394 is MSB-first: bit 63 of the value corresponds to PRN 1.
        let mut prns = BTreeSet::new();
        for i in 0..DF394_LEN_BITS {
            if mask & (1 << (63 - i)) != 0 {
                prns.insert(i as u8 + 1);
            }
        }

        Ok(DecodedMessage { msg_type, satellites: Some(SatelliteInfo { constellation, prns }) })
    }
}

/// Constellation for an MSM message number, `None` for non-MSM types.
pub fn msm_constellation(msg_type: u16) -> Option<Constellation> {
    match msg_type {
        1071..=1077 => Some(Constellation::Gps),
        1081..=1087 => Some(Constellation::Glonass),
        1091..=1097 => Some(Constellation::Galileo),
        1101..=1107 => Some(Constellation::Sbas),
        1111..=1117 => Some(Constellation::Qzss),
        1121..=1127 => Some(Constellation::BeiDou),
        _ => None,
    }
}

/// Human-readable description of an RTCM message type.
pub fn message_description(msg_type: u16) -> String {
    if let Some(constellation) = msm_constellation(msg_type) {
        // MSM decades start at xxx1, so the level is the last digit.
        let level = msg_type % 10;
        let detail = match level {
            1 => "Compact pseudoranges",
            2 => "Compact phase ranges",
            3 => "Compact pseudoranges and phase ranges",
            4 => "Full pseudoranges and phase ranges",
            5 => "Full pseudoranges, phase ranges, phase range rate, and CNR",
            6 => "Full pseudoranges and CNR (high resolution)",
            _ => "Full pseudoranges, phase ranges, phase range rate, and CNR (high resolution)",
        };
        return format!("{constellation} MSM{level} - {detail}");
    }
    match msg_type {
        1005 => "Station coordinates (stationary RTK reference station)".to_string(),
        1006 => "Station coordinates with antenna height".to_string(),
        1007 => "Antenna descriptor".to_string(),
        1008 => "Antenna descriptor & serial number".to_string(),
        1033 => "Receiver and antenna descriptors".to_string(),
        _ => "RTCM correction data".to_string(),
    }
}

/// Read `len` bits starting at absolute bit offset `start`, MSB-first.
fn read_bits(data: &[u8], start: usize, len: usize) -> Option<u64> {
    debug_assert!(len <= 64);
    if data.len() * 8 < start + len {
        return None;
    }
    let mut value = 0u64;
    for bit in start..start + len {
        let b = (data[bit / 8] >> (7 - bit % 8)) & 1;
        value = (value << 1) | u64::from(b);
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtcm::extractor::encode_frame;
    use bytes::Bytes;

    /// Write `len` bits of `value` at bit offset `start`, MSB-first.
    fn write_bits(data: &mut [u8], start: usize, len: usize, value: u64) {
        for i in 0..len {
            let bit = start + i;
            if value & (1 << (len - 1 - i)) != 0 {
                data[bit / 8] |= 1 << (7 - bit % 8);
            }
        }
    }

    fn msm_frame(msg_type: u16, prns: &[u8]) -> RawFrame {
        let mut payload = vec![0u8; 24];
        write_bits(&mut payload, 0, 12, u64::from(msg_type));
        for &prn in prns {
            write_bits(&mut payload, DF394_OFFSET_BITS + usize::from(prn) - 1, 1, 1);
        }
        RawFrame::new(Bytes::from(encode_frame(&payload)))
    }

    #[test]
    fn msm_satellite_mask_decodes_to_prn_set() {
        let frame = msm_frame(1074, &[2, 5, 17, 32, 64]);
        let decoded = MsmDecoder.decode(&frame).unwrap();
        assert_eq!(decoded.msg_type, 1074);
        let sats = decoded.satellites.unwrap();
        assert_eq!(sats.constellation, Constellation::Gps);
        assert_eq!(sats.prns, BTreeSet::from([2, 5, 17, 32, 64]));
    }

    #[test]
    fn constellation_decade_mapping() {
        assert_eq!(msm_constellation(1077), Some(Constellation::Gps));
        assert_eq!(msm_constellation(1084), Some(Constellation::Glonass));
        assert_eq!(msm_constellation(1097), Some(Constellation::Galileo));
        assert_eq!(msm_constellation(1101), Some(Constellation::Sbas));
        assert_eq!(msm_constellation(1117), Some(Constellation::Qzss));
        assert_eq!(msm_constellation(1127), Some(Constellation::BeiDou));
        // Reserved numbers between decades are not MSM.
        assert_eq!(msm_constellation(1078), None);
        assert_eq!(msm_constellation(1080), None);
        assert_eq!(msm_constellation(1005), None);
    }

    #[test]
    fn non_msm_message_has_no_satellites() {
        let mut payload = vec![0u8; 19];
        write_bits(&mut payload, 0, 12, 1005);
        let frame = RawFrame::new(Bytes::from(encode_frame(&payload)));
        let decoded = MsmDecoder.decode(&frame).unwrap();
        assert_eq!(decoded.msg_type, 1005);
        assert!(decoded.satellites.is_none());
    }

    #[test]
    fn truncated_msm_payload_reports_decode_error() {
        // Valid frame whose payload is too short to hold the satellite mask.
        let mut payload = vec![0u8; 6];
        write_bits(&mut payload, 0, 12, 1074);
        let frame = RawFrame::new(Bytes::from(encode_frame(&payload)));
        assert_eq!(
            MsmDecoder.decode(&frame),
            Err(DecodeError::Truncated { context: "DF394 satellite mask" })
        );
    }

    #[test]
    fn descriptions_for_common_types() {
        assert_eq!(message_description(1074), "GPS MSM4 - Full pseudoranges and phase ranges");
        assert!(message_description(1087).starts_with("GLONASS MSM7"));
        assert!(message_description(1005).contains("Station coordinates"));
        assert_eq!(message_description(999), "RTCM correction data");
    }
}
