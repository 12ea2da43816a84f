//! WebSocket framing for both protocol generations.
//!
//! The v7+ (IETF draft-17) decoder works over an accumulating buffer and
//! consumes exactly one frame per step: header, optional extended length,
//! optional mask key, payload. The legacy decoder handles the old
//! 0x00-led / 0xFF-terminated message stream, where a bad lead byte is a
//! fatal framing violation for the channel.

use bytes::{Buf, BytesMut};

pub const OPCODE_CONTINUATION: u8 = 0x0;
pub const OPCODE_TEXT: u8 = 0x1;
pub const OPCODE_BINARY: u8 = 0x2;
pub const OPCODE_CLOSE: u8 = 0x8;
pub const OPCODE_PING: u8 = 0x9;
pub const OPCODE_PONG: u8 = 0xa;

const FIN_BIT: u8 = 0x80;
const OPCODE_MASK: u8 = 0x0f;
const MASK_BIT: u8 = 0x80;
const LENGTH_MASK: u8 = 0x7f;

/// First escape value: the next 2 bytes carry a big-endian length.
const LENGTH_16: u8 = 126;
/// Second escape value: the next 8 bytes carry a big-endian length.
const LENGTH_64: u8 = 127;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: u8,
    pub fin: bool,
    pub payload: Vec<u8>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum FrameStep {
    /// The buffer does not yet hold a complete frame; nothing consumed.
    Incomplete,
    /// One frame decoded and consumed from the buffer, payload unmasked.
    Frame(Frame),
}

/// Decodes the next v7+ frame out of `buffer`, consuming it on success.
/// Partial frames leave the buffer untouched so the caller can retry once
/// more bytes arrive.
pub fn decode_frame(buffer: &mut BytesMut) -> FrameStep {
    if buffer.len() <= 2 {
        return FrameStep::Incomplete;
    }

    let fin = buffer[0] & FIN_BIT != 0;
    let opcode = buffer[0] & OPCODE_MASK;
    let masked = buffer[1] & MASK_BIT != 0;
    let base_len = buffer[1] & LENGTH_MASK;

    let mut offset = 2usize;
    let payload_len: u64 = match base_len {
        LENGTH_16 => {
            if buffer.len() < offset + 2 {
                return FrameStep::Incomplete;
            }
            let len = u16::from_be_bytes([buffer[offset], buffer[offset + 1]]) as u64;
            offset += 2;
            len
        }
        LENGTH_64 => {
            if buffer.len() < offset + 8 {
                return FrameStep::Incomplete;
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buffer[offset..offset + 8]);
            offset += 8;
            u64::from_be_bytes(raw)
        }
        len => len as u64,
    };

    let mask = if masked {
        if buffer.len() < offset + 4 {
            return FrameStep::Incomplete;
        }
        let key = [
            buffer[offset],
            buffer[offset + 1],
            buffer[offset + 2],
            buffer[offset + 3],
        ];
        offset += 4;
        Some(key)
    } else {
        None
    };

    // The declared length is client-controlled; the sum must not wrap.
    let Some(needed) = (offset as u64).checked_add(payload_len) else {
        return FrameStep::Incomplete;
    };
    if (buffer.len() as u64) < needed {
        return FrameStep::Incomplete;
    }

    let total = needed as usize;
    let mut frame = buffer.split_to(total);
    frame.advance(offset);
    let mut payload = frame.to_vec();
    if let Some(key) = mask {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= key[i % 4];
        }
    }

    FrameStep::Frame(Frame {
        opcode,
        fin,
        payload,
    })
}

/// Encodes one frame. Client-originated frames carry a mask key; the test
/// suites use this to play the browser side of the connection.
pub fn encode_frame(opcode: u8, fin: bool, mask: Option<[u8; 4]>, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 14);
    let mut first = opcode & OPCODE_MASK;
    if fin {
        first |= FIN_BIT;
    }
    out.push(first);

    let mask_bit = if mask.is_some() { MASK_BIT } else { 0 };
    if payload.len() < LENGTH_16 as usize {
        out.push(mask_bit | payload.len() as u8);
    } else if payload.len() <= u16::MAX as usize {
        out.push(mask_bit | LENGTH_16);
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    } else {
        out.push(mask_bit | LENGTH_64);
        out.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    }

    match mask {
        Some(key) => {
            out.extend_from_slice(&key);
            out.extend(payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
        }
        None => out.extend_from_slice(payload),
    }
    out
}

#[derive(Debug, PartialEq, Eq)]
pub enum LegacyStep {
    /// No complete message buffered yet; nothing consumed.
    Incomplete,
    /// One 0x00-led, 0xFF-terminated message consumed; delimiters stripped.
    Message(Vec<u8>),
    /// The next message does not start with 0x00. The channel is broken and
    /// must be torn down; the buffer contents are unusable.
    Violation,
}

pub fn decode_legacy(buffer: &mut BytesMut) -> LegacyStep {
    if buffer.is_empty() {
        return LegacyStep::Incomplete;
    }
    if buffer[0] != 0x00 {
        return LegacyStep::Violation;
    }
    let Some(end) = buffer.iter().position(|&b| b == 0xff) else {
        return LegacyStep::Incomplete;
    };
    let mut message = buffer.split_to(end + 1);
    message.advance(1);
    message.truncate(message.len() - 1);
    LegacyStep::Message(message.to_vec())
}

/// Wraps a message in legacy delimiters (test-side client plumbing).
pub fn encode_legacy_message(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 2);
    out.push(0x00);
    out.extend_from_slice(payload);
    out.push(0xff);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Vec<Frame> {
        let mut buffer = BytesMut::from(bytes);
        let mut frames = Vec::new();
        while let FrameStep::Frame(frame) = decode_frame(&mut buffer) {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn decodes_masked_text_frame() {
        // "m1,0" under mask key 0x01 0x02 0x03 0x04.
        let bytes = [
            0x81, 0x84, 0x01, 0x02, 0x03, 0x04,
            b'm' ^ 0x01, b'1' ^ 0x02, b',' ^ 0x03, b'0' ^ 0x04,
        ];
        let frames = decode_all(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].opcode, OPCODE_TEXT);
        assert!(frames[0].fin);
        assert_eq!(frames[0].payload, b"m1,0");
    }

    #[test]
    fn decode_is_invariant_under_split_points() {
        let mut whole = Vec::new();
        whole.extend(encode_frame(OPCODE_TEXT, true, Some([9, 8, 7, 6]), b"k1,2,3,65,0"));
        whole.extend(encode_frame(
            OPCODE_TEXT,
            true,
            Some([0xaa, 0xbb, 0xcc, 0xdd]),
            &vec![b'x'; 300],
        ));
        let expected = decode_all(&whole);
        assert_eq!(expected.len(), 2);

        for split in 0..=whole.len() {
            let mut buffer = BytesMut::new();
            let mut frames = Vec::new();
            buffer.extend_from_slice(&whole[..split]);
            while let FrameStep::Frame(frame) = decode_frame(&mut buffer) {
                frames.push(frame);
            }
            buffer.extend_from_slice(&whole[split..]);
            while let FrameStep::Frame(frame) = decode_frame(&mut buffer) {
                frames.push(frame);
            }
            assert_eq!(frames, expected, "split at {split}");
            assert!(buffer.is_empty());
        }
    }

    #[test]
    fn unmasks_payloads_of_any_length() {
        for len in 1..=9 {
            let payload: Vec<u8> = (0..len as u8).collect();
            let mut buffer = BytesMut::from(
                &encode_frame(OPCODE_TEXT, true, Some([0x5f, 0x21, 0x99, 0x03]), &payload)[..],
            );
            match decode_frame(&mut buffer) {
                FrameStep::Frame(frame) => assert_eq!(frame.payload, payload),
                other => panic!("length {len}: {other:?}"),
            }
        }
    }

    #[test]
    fn decodes_extended_lengths() {
        let two_byte = vec![7u8; 300];
        let mut buffer = BytesMut::from(&encode_frame(OPCODE_TEXT, true, None, &two_byte)[..]);
        assert_eq!(buffer[1] & LENGTH_MASK, LENGTH_16);
        match decode_frame(&mut buffer) {
            FrameStep::Frame(frame) => assert_eq!(frame.payload, two_byte),
            other => panic!("{other:?}"),
        }

        let eight_byte = vec![3u8; 70_000];
        let mut buffer = BytesMut::from(&encode_frame(OPCODE_TEXT, true, None, &eight_byte)[..]);
        assert_eq!(buffer[1] & LENGTH_MASK, LENGTH_64);
        match decode_frame(&mut buffer) {
            FrameStep::Frame(frame) => assert_eq!(frame.payload.len(), 70_000),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn consumes_exactly_one_frame() {
        let mut bytes = encode_frame(OPCODE_PING, true, Some([1, 1, 1, 1]), b"");
        bytes.extend(encode_frame(OPCODE_TEXT, true, Some([2, 2, 2, 2]), b"W1,0,5"));
        let mut buffer = BytesMut::from(&bytes[..]);

        match decode_frame(&mut buffer) {
            FrameStep::Frame(frame) => assert_eq!(frame.opcode, OPCODE_PING),
            other => panic!("{other:?}"),
        }
        match decode_frame(&mut buffer) {
            FrameStep::Frame(frame) => {
                assert_eq!(frame.opcode, OPCODE_TEXT);
                assert_eq!(frame.payload, b"W1,0,5");
            }
            other => panic!("{other:?}"),
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn short_buffers_are_left_untouched() {
        let full = encode_frame(OPCODE_TEXT, true, Some([4, 3, 2, 1]), b"m1,0,0,0,0,0,0,0,0");
        let mut buffer = BytesMut::from(&full[..full.len() - 1]);
        let before = buffer.clone();
        assert_eq!(decode_frame(&mut buffer), FrameStep::Incomplete);
        assert_eq!(buffer, before);
    }

    #[test]
    fn huge_declared_lengths_read_as_incomplete() {
        // Only the 14 header bytes (64-bit length escape plus mask key)
        // are on the wire; the declared payload never arrives. Lengths
        // near u64::MAX would wrap a naive offset + length sum.
        for declared in [1u64 << 40, u64::MAX - 5, u64::MAX] {
            let mut bytes = vec![FIN_BIT | OPCODE_TEXT, MASK_BIT | LENGTH_64];
            bytes.extend_from_slice(&declared.to_be_bytes());
            bytes.extend_from_slice(&[1, 2, 3, 4]);
            let mut buffer = BytesMut::from(&bytes[..]);
            let before = buffer.clone();
            assert_eq!(
                decode_frame(&mut buffer),
                FrameStep::Incomplete,
                "declared {declared:#x}"
            );
            assert_eq!(buffer, before, "declared {declared:#x}");
        }
    }

    #[test]
    fn legacy_stream_yields_delimited_messages() {
        let mut bytes = encode_legacy_message(b"m1,0,0,0,1,1,1,1,0");
        bytes.extend(encode_legacy_message(b"k2,0,0,65,0"));
        let mut buffer = BytesMut::from(&bytes[..]);

        assert_eq!(
            decode_legacy(&mut buffer),
            LegacyStep::Message(b"m1,0,0,0,1,1,1,1,0".to_vec())
        );
        assert_eq!(
            decode_legacy(&mut buffer),
            LegacyStep::Message(b"k2,0,0,65,0".to_vec())
        );
        assert_eq!(decode_legacy(&mut buffer), LegacyStep::Incomplete);
    }

    #[test]
    fn legacy_detects_bad_lead_byte() {
        let mut buffer = BytesMut::from(&b"\x00k1,0,0,65,0\xffjunk"[..]);
        assert_eq!(
            decode_legacy(&mut buffer),
            LegacyStep::Message(b"k1,0,0,65,0".to_vec())
        );
        assert_eq!(decode_legacy(&mut buffer), LegacyStep::Violation);
    }

    #[test]
    fn legacy_waits_for_terminator() {
        let mut buffer = BytesMut::from(&b"\x00m1,0"[..]);
        assert_eq!(decode_legacy(&mut buffer), LegacyStep::Incomplete);
        buffer.extend_from_slice(b",0,0,1,1,1,1,0\xff");
        assert_eq!(
            decode_legacy(&mut buffer),
            LegacyStep::Message(b"m1,0,0,0,1,1,1,1,0".to_vec())
        );
    }
}
