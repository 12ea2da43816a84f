//! Text wire format for client input messages.
//!
//! A message is one ASCII record: a single type tag byte, then
//! comma-separated decimal fields. The first two fields are always the
//! client serial and the client-side timestamp; the rest depend on the tag.
//! Numeric fields parse leniently: missing or malformed fields read as 0 so
//! a short message degrades instead of poisoning the stream.

use crate::protocol::{EventKind, InputEvent, InputMessage, KeyData, PointerData};

/// Maps raw client timestamps into the server's clock domain.
///
/// Client clocks are unrelated across reconnects, so the first nonzero
/// timestamp on a channel fixes an offset that lands it 5 seconds after the
/// newest time the server has seen. Later timestamps keep their relative
/// spacing. A raw time of 0 means "no timestamp" and reuses the newest
/// server time.
#[derive(Debug, Default)]
pub struct TimeNormalizer {
    seen_time: bool,
    time_base: i64,
}

/// Gap inserted between the last seen server time and the first timestamp
/// of a new channel, absorbing clock skew between reconnects.
const RECONNECT_TIME_GAP_MS: i64 = 5000;

impl TimeNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn normalize(&mut self, raw: i64, last_seen_time: u64) -> u64 {
        if raw == 0 {
            return last_seen_time;
        }
        if !self.seen_time {
            self.seen_time = true;
            self.time_base = raw - (last_seen_time as i64 + RECONNECT_TIME_GAP_MS);
        }
        (raw - self.time_base) as u64
    }
}

/// Parses one message and advances the channel clock. Returns the parsed
/// message (with its normalized, truncated timestamp) and the new
/// last-seen server time.
pub fn parse_message(
    bytes: &[u8],
    clock: &mut TimeNormalizer,
    last_seen_time: u64,
) -> (InputMessage, u64) {
    let mut fields = FieldCursor::new(bytes);
    let tag = fields.tag();
    let serial = fields.next() as u32;
    let raw_time = fields.next();

    let time = clock.normalize(raw_time, last_seen_time);

    let event = match EventKind::from_tag(tag) {
        Some(EventKind::Enter) => InputEvent::Enter {
            pointer: parse_pointer_data(&mut fields),
            mode: fields.next() as i32,
        },
        Some(EventKind::Leave) => InputEvent::Leave {
            pointer: parse_pointer_data(&mut fields),
            mode: fields.next() as i32,
        },
        Some(EventKind::PointerMove) => InputEvent::PointerMove {
            pointer: parse_pointer_data(&mut fields),
        },
        Some(EventKind::ButtonPress) => InputEvent::ButtonPress {
            pointer: parse_pointer_data(&mut fields),
            button: fields.next() as u32,
        },
        Some(EventKind::ButtonRelease) => InputEvent::ButtonRelease {
            pointer: parse_pointer_data(&mut fields),
            button: fields.next() as u32,
        },
        Some(EventKind::Scroll) => InputEvent::Scroll {
            pointer: parse_pointer_data(&mut fields),
            dir: fields.next() as i32,
        },
        Some(EventKind::KeyPress) => InputEvent::KeyPress {
            key: parse_key_data(&mut fields),
        },
        Some(EventKind::KeyRelease) => InputEvent::KeyRelease {
            key: parse_key_data(&mut fields),
        },
        Some(EventKind::GrabNotify) => InputEvent::GrabNotify {
            status: fields.next() as i32,
        },
        Some(EventKind::UngrabNotify) => InputEvent::UngrabNotify {
            status: fields.next() as i32,
        },
        Some(EventKind::ConfigureNotify) => InputEvent::ConfigureNotify {
            surface: fields.next() as u32,
            x: fields.next() as i32,
            y: fields.next() as i32,
            width: fields.next() as i32,
            height: fields.next() as i32,
        },
        Some(EventKind::DeleteNotify) => InputEvent::DeleteNotify {
            surface: fields.next() as u32,
        },
        Some(EventKind::ScreenSizeChanged) => InputEvent::ScreenSizeChanged {
            width: fields.next() as i32,
            height: fields.next() as i32,
        },
        None => {
            tracing::warn!(tag = %(tag as char), "unknown input command");
            InputEvent::Unknown { tag }
        }
    };

    let message = InputMessage {
        serial,
        time: time as u32,
        event,
    };
    (message, time)
}

fn parse_pointer_data(fields: &mut FieldCursor<'_>) -> PointerData {
    PointerData {
        mouse_surface: fields.next() as u32,
        event_surface: fields.next() as u32,
        root_x: fields.next() as i32,
        root_y: fields.next() as i32,
        win_x: fields.next() as i32,
        win_y: fields.next() as i32,
        state: fields.next() as u32,
    }
}

fn parse_key_data(fields: &mut FieldCursor<'_>) -> KeyData {
    KeyData {
        mouse_surface: fields.next() as u32,
        keysym: fields.next() as u32,
        state: fields.next() as u32,
    }
}

/// Walks the comma-separated decimal fields of a message.
struct FieldCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> FieldCursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Consumes the leading type tag. An empty message yields tag 0, which
    /// no event kind matches.
    fn tag(&mut self) -> u8 {
        match self.bytes.first() {
            Some(&tag) => {
                self.pos = 1;
                tag
            }
            None => 0,
        }
    }

    /// Reads the next decimal field (optional sign), then steps over a
    /// single trailing comma. Anything unparsable reads as 0.
    fn next(&mut self) -> i64 {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        let mut negative = false;
        if let Some(&sign) = self.bytes.get(self.pos) {
            if sign == b'-' || sign == b'+' {
                negative = sign == b'-';
                self.pos += 1;
            }
        }
        let mut value: i64 = 0;
        while let Some(&digit) = self.bytes.get(self.pos) {
            if !digit.is_ascii_digit() {
                break;
            }
            value = value.wrapping_mul(10).wrapping_add((digit - b'0') as i64);
            self.pos += 1;
        }
        if self.bytes.get(self.pos) == Some(&b',') {
            self.pos += 1;
        }
        if negative { -value } else { value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> InputMessage {
        let mut clock = TimeNormalizer::new();
        parse_message(text.as_bytes(), &mut clock, 1).0
    }

    #[test]
    fn parses_pointer_move() {
        let msg = parse("m100,0,5,7,103,104,53,54,16");
        assert_eq!(msg.serial, 100);
        assert_eq!(msg.time, 1);
        assert_eq!(
            msg.event,
            InputEvent::PointerMove {
                pointer: PointerData {
                    mouse_surface: 5,
                    event_surface: 7,
                    root_x: 103,
                    root_y: 104,
                    win_x: 53,
                    win_y: 54,
                    state: 16,
                },
            }
        );
    }

    #[test]
    fn parses_trailing_payload_fields() {
        let press = parse("b2,0,5,5,10,10,3,3,0,1");
        match press.event {
            InputEvent::ButtonPress { pointer, button } => {
                assert_eq!(pointer.mouse_surface, 5);
                assert_eq!(pointer.state, 0);
                assert_eq!(button, 1);
            }
            other => panic!("unexpected event {other:?}"),
        }

        let enter = parse("e9,0,2,2,1,1,1,1,0,4");
        match enter.event {
            InputEvent::Enter { mode, .. } => assert_eq!(mode, 4),
            other => panic!("unexpected event {other:?}"),
        }

        let scroll = parse("s3,0,2,2,1,1,1,1,0,1");
        match scroll.event {
            InputEvent::Scroll { dir, .. } => assert_eq!(dir, 1),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn parses_key_and_notify_messages() {
        assert_eq!(
            parse("k10,0,3,65,4").event,
            InputEvent::KeyPress {
                key: KeyData {
                    mouse_surface: 3,
                    keysym: 65,
                    state: 4,
                },
            }
        );
        assert_eq!(
            parse("w7,0,3,10,-20,300,200").event,
            InputEvent::ConfigureNotify {
                surface: 3,
                x: 10,
                y: -20,
                width: 300,
                height: 200,
            }
        );
        assert_eq!(parse("W4,0,9").event, InputEvent::DeleteNotify { surface: 9 });
        assert_eq!(
            parse("d1,0,1280,720").event,
            InputEvent::ScreenSizeChanged {
                width: 1280,
                height: 720,
            }
        );
        assert_eq!(parse("g5,0,3").event, InputEvent::GrabNotify { status: 3 });
    }

    #[test]
    fn unknown_tag_is_preserved() {
        let msg = parse("z17,0");
        assert_eq!(msg.serial, 17);
        assert_eq!(msg.event, InputEvent::Unknown { tag: b'z' });
    }

    #[test]
    fn short_messages_read_missing_fields_as_zero() {
        let msg = parse("m42,0");
        assert_eq!(msg.serial, 42);
        assert_eq!(
            msg.event,
            InputEvent::PointerMove {
                pointer: PointerData::default(),
            }
        );
    }

    #[test]
    fn first_timestamp_lands_five_seconds_after_last_seen() {
        let mut clock = TimeNormalizer::new();
        let last_seen = 1u64;

        let (msg, t1) = parse_message(b"m1,10000,0,0,0,0,0,0,0", &mut clock, last_seen);
        assert_eq!(t1, last_seen + 5000);
        assert_eq!(msg.time, 5001);

        // Relative spacing is preserved once the base is fixed.
        let (msg, t2) = parse_message(b"m2,10010,0,0,0,0,0,0,0", &mut clock, t1);
        assert_eq!(t2, t1 + 10);
        assert_eq!(msg.time, 5011);

        // Zero means "no timestamp": reuse the newest time.
        let (msg, t3) = parse_message(b"m3,0,0,0,0,0,0,0,0", &mut clock, t2);
        assert_eq!(t3, t2);
        assert_eq!(msg.time, 5011);
    }

    #[test]
    fn zero_timestamps_do_not_fix_the_base() {
        let mut clock = TimeNormalizer::new();
        let (_, t1) = parse_message(b"k1,0,0,65,0", &mut clock, 100);
        assert_eq!(t1, 100);
        // The base is set by the first nonzero time, not the first message.
        let (_, t2) = parse_message(b"k2,70000,0,65,0", &mut clock, t1);
        assert_eq!(t2, 100 + 5000);
    }
}
