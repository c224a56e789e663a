//! Locates complete RTCM frames inside an accumulating byte buffer.
//!
//! [`scan`] is pure over its input: it emits every complete, CRC-valid frame
//! in arrival order and reports how many leading bytes are safe to discard.
//! A frame is only emitted once header, payload, and trailing CRC are fully
//! present; a CRC mismatch skips a single byte so the scanner can
//! resynchronize on a preamble hiding inside what looked like a frame.
//! Malformed fragments are counted in telemetry, never surfaced as errors.

use bytes::{Buf, Bytes, BytesMut};
use crc::Crc;

use super::{CRC_LEN, HEADER_LEN, PREAMBLE, RawFrame};

/// CRC-24Q as used by RTCM 3 (poly 0x864CFB, init 0, no reflection).
/// The catalog entry `CRC_24_LTE_A` carries exactly these parameters.
const CRC24Q: Crc<u32> = Crc::<u32>::new(&crc::CRC_24_LTE_A);

/// Diagnostic counters for discarded bytes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanTelemetry {
    /// Bytes skipped that were not part of any valid frame.
    pub garbage_bytes: u64,
    /// Preamble candidates rejected by the integrity check.
    pub crc_failures: u64,
}

/// Output of one [`scan`] pass.
#[derive(Debug)]
pub struct ScanResult {
    /// Complete frames, in arrival order.
    pub frames: Vec<RawFrame>,
    /// Bytes consumed from the front of the input. Everything before this
    /// offset has been either emitted as frames or discarded as garbage;
    /// bytes after it belong to a partial frame and must be retained.
    pub consumed: usize,
    pub telemetry: ScanTelemetry,
}

/// Scan `buf` for complete RTCM frames.
///
/// A buffer holding only a partial frame yields zero frames and leaves the
/// partial bytes unconsumed. Bytes are never reordered, duplicated, or
/// re-examined once consumed.
pub fn scan(buf: &[u8]) -> ScanResult {
    let mut frames = Vec::new();
    let mut telemetry = ScanTelemetry::default();
    let mut pos = 0;

    while pos < buf.len() {
        if buf[pos] != PREAMBLE {
            pos += 1;
            telemetry.garbage_bytes += 1;
            continue;
        }

        let rest = &buf[pos..];
        if rest.len() < HEADER_LEN {
            // Partial header; wait for more bytes.
            break;
        }

        let payload_len = (usize::from(rest[1] & 0x03) << 8) | usize::from(rest[2]);
        let frame_len = HEADER_LEN + payload_len + CRC_LEN;
        if rest.len() < frame_len {
            // Partial frame; wait for more bytes.
            break;
        }

        let body = &rest[..HEADER_LEN + payload_len];
        let wire_crc = (u32::from(rest[frame_len - 3]) << 16)
            | (u32::from(rest[frame_len - 2]) << 8)
            | u32::from(rest[frame_len - 1]);

        if CRC24Q.checksum(body) == wire_crc {
            frames.push(RawFrame::new(Bytes::copy_from_slice(&rest[..frame_len])));
            pos += frame_len;
        } else {
            // False sync: skip just the preamble byte and rescan from the
            // next byte, which may itself start a real frame.
            pos += 1;
            telemetry.crc_failures += 1;
        }
    }

    ScanResult { frames, consumed: pos, telemetry }
}

/// Per-session extractor over a [`BytesMut`] frame buffer.
///
/// Thin stateful wrapper around [`scan`]: advances the buffer past consumed
/// bytes and accumulates telemetry across calls.
#[derive(Debug, Default)]
pub struct FrameExtractor {
    telemetry: ScanTelemetry,
}

impl FrameExtractor {
    pub fn new() -> Self {
        FrameExtractor::default()
    }

    /// Extract all complete frames currently in `buf`, consuming them and any
    /// leading garbage. Partial trailing bytes remain for the next call.
    pub fn extract(&mut self, buf: &mut BytesMut) -> Vec<RawFrame> {
        let result = scan(buf);
        buf.advance(result.consumed);
        self.telemetry.garbage_bytes += result.telemetry.garbage_bytes;
        self.telemetry.crc_failures += result.telemetry.crc_failures;
        result.frames
    }

    /// Cumulative discard counters for this session.
    pub fn telemetry(&self) -> ScanTelemetry {
        self.telemetry
    }
}

/// Build a valid RTCM frame around `payload`. Used by tests and benches.
#[doc(hidden)]
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() <= super::MAX_PAYLOAD_LEN);
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + CRC_LEN);
    out.push(PREAMBLE);
    out.push((payload.len() >> 8) as u8 & 0x03);
    out.push((payload.len() & 0xff) as u8);
    out.extend_from_slice(payload);
    let crc = CRC24Q.checksum(&out);
    out.push((crc >> 16) as u8);
    out.push((crc >> 8) as u8);
    out.push(crc as u8);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg_payload(msg_type: u16, len: usize) -> Vec<u8> {
        let mut p = vec![0u8; len.max(2)];
        p[0] = (msg_type >> 4) as u8;
        p[1] = ((msg_type & 0x0f) as u8) << 4;
        p
    }

    #[test]
    fn single_frame_roundtrip() {
        let wire = encode_frame(&msg_payload(1005, 19));
        let result = scan(&wire);
        assert_eq!(result.frames.len(), 1);
        assert_eq!(result.consumed, wire.len());
        assert_eq!(result.frames[0].message_type(), Some(1005));
        assert_eq!(result.frames[0].as_bytes(), &wire[..]);
        assert_eq!(result.telemetry, ScanTelemetry::default());
    }

    #[test]
    fn leading_garbage_is_skipped() {
        let mut wire = vec![0x00, 0x7f, 0x42];
        wire.extend_from_slice(&encode_frame(&msg_payload(1074, 30)));
        let result = scan(&wire);
        assert_eq!(result.frames.len(), 1);
        assert_eq!(result.consumed, wire.len());
        assert_eq!(result.telemetry.garbage_bytes, 3);
    }

    #[test]
    fn partial_frame_left_unconsumed() {
        let frame_a = encode_frame(&msg_payload(1005, 19));
        let frame_b = encode_frame(&msg_payload(1074, 30));

        let mut wire = frame_a.clone();
        wire.extend_from_slice(&frame_b[..4]); // truncated header + 1 payload byte

        let result = scan(&wire);
        assert_eq!(result.frames.len(), 1);
        assert_eq!(result.consumed, frame_a.len());

        // Feeding the remaining bytes afterward completes the second frame.
        let mut buf = BytesMut::from(&wire[result.consumed..]);
        buf.extend_from_slice(&frame_b[4..]);
        let mut extractor = FrameExtractor::new();
        let frames = extractor.extract(&mut buf);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].message_type(), Some(1074));
        assert!(buf.is_empty());
    }

    #[test]
    fn corrupted_frame_resynchronizes_on_next() {
        let mut bad = encode_frame(&msg_payload(1005, 19));
        let good = encode_frame(&msg_payload(1084, 40));
        // Flip a payload byte so the CRC check fails.
        bad[5] ^= 0xff;
        let mut wire = bad;
        wire.extend_from_slice(&good);

        let result = scan(&wire);
        assert_eq!(result.frames.len(), 1);
        assert_eq!(result.frames[0].message_type(), Some(1084));
        assert_eq!(result.consumed, wire.len());
        assert!(result.telemetry.crc_failures >= 1);
    }

    #[test]
    fn preamble_inside_payload_does_not_split_frame() {
        let mut payload = msg_payload(1012, 25);
        for b in payload.iter_mut().skip(2) {
            *b = PREAMBLE;
        }
        let wire = encode_frame(&payload);
        let result = scan(&wire);
        assert_eq!(result.frames.len(), 1);
        assert_eq!(result.frames[0].payload(), &payload[..]);
    }

    #[test]
    fn empty_and_garbage_only_buffers() {
        assert_eq!(scan(&[]).frames.len(), 0);

        let garbage = [0x01u8, 0x02, 0x03, 0x04];
        let result = scan(&garbage);
        assert!(result.frames.is_empty());
        assert_eq!(result.consumed, garbage.len());
        assert_eq!(result.telemetry.garbage_bytes, 4);
    }

    #[test]
    fn extractor_accumulates_telemetry() {
        let mut extractor = FrameExtractor::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0xaa, 0xbb]);
        buf.extend_from_slice(&encode_frame(&msg_payload(1005, 19)));
        extractor.extract(&mut buf);
        buf.extend_from_slice(&[0xcc]);
        buf.extend_from_slice(&encode_frame(&msg_payload(1006, 21)));
        extractor.extract(&mut buf);
        assert_eq!(extractor.telemetry().garbage_bytes, 3);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_payload() -> impl Strategy<Value = Vec<u8>> {
            proptest::collection::vec(any::<u8>(), 2..64)
        }

        // Garbage bytes avoid the preamble value: a 0xD3 in garbage can
        // declare a length that swallows the following real frame into a
        // "partial frame" hold, which is correct streaming behavior but
        // breaks the complete-buffer accounting this property checks.
        fn arb_garbage() -> impl Strategy<Value = Vec<u8>> {
            proptest::collection::vec(0u8..=0xd2, 0..32)
        }

        proptest! {
            #[test]
            fn frames_interleaved_with_garbage_all_recovered(
                payloads in proptest::collection::vec(arb_payload(), 1..8),
                gaps in proptest::collection::vec(arb_garbage(), 9),
            ) {
                let mut wire = Vec::new();
                let mut expected = Vec::new();
                for (i, payload) in payloads.iter().enumerate() {
                    wire.extend_from_slice(&gaps[i]);
                    let frame = encode_frame(payload);
                    expected.push(frame.clone());
                    wire.extend_from_slice(&frame);
                }
                wire.extend_from_slice(&gaps[8]);

                let result = scan(&wire);
                prop_assert_eq!(result.frames.len(), payloads.len());
                for (frame, raw) in result.frames.iter().zip(&expected) {
                    prop_assert_eq!(frame.as_bytes(), &raw[..]);
                }
                prop_assert_eq!(result.consumed, wire.len());
            }

            #[test]
            fn chunked_delivery_preserves_frames(
                payloads in proptest::collection::vec(arb_payload(), 1..6),
                chunk_size in 1usize..16,
            ) {
                let mut wire = Vec::new();
                for payload in &payloads {
                    wire.extend_from_slice(&encode_frame(payload));
                }

                let mut extractor = FrameExtractor::new();
                let mut buf = BytesMut::new();
                let mut collected = Vec::new();
                for chunk in wire.chunks(chunk_size) {
                    buf.extend_from_slice(chunk);
                    collected.extend(extractor.extract(&mut buf));
                }

                prop_assert_eq!(collected.len(), payloads.len());
                for (frame, payload) in collected.iter().zip(&payloads) {
                    prop_assert_eq!(frame.payload(), &payload[..]);
                }
                prop_assert!(buf.is_empty());
            }
        }
    }
}
