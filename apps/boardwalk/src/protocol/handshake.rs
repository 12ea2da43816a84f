//! HTTP request interpretation and WebSocket upgrade negotiation.
//!
//! Two client generations are supported. Newer browsers send a single
//! `Sec-WebSocket-Key` and get a SHA-1 based accept token back (IETF
//! draft-17). Older ones send the hixie-76 pair of space-and-digit keys
//! plus an 8-byte nonce after the head, and get a 16-byte MD5 digest as the
//! response body. Everything here is pure: the connection layer feeds the
//! accumulated request head in and writes the rendered responses out.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use md5::Md5;
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::protocol::{
    HANDSHAKE_GUID, PATH_CLIENT_HTML, PATH_CLIENT_JS, PATH_ROOT, PATH_SOCKET, PATH_SOCKET_BIN,
    PROTOCOL_NAME,
};

/// What a finished request head asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    ClientHtml,
    ClientJs,
    Socket { binary: bool },
    NotFound,
    /// Anything that is not a GET.
    NotImplemented,
}

/// Classifies a complete request head (newline-joined lines). Only the
/// request line matters here; query strings are ignored for routing.
pub fn classify_request(head: &str) -> Route {
    let Some(rest) = head.strip_prefix("GET ") else {
        return Route::NotImplemented;
    };
    let rest = rest.trim_start_matches(' ');
    let end = rest
        .find(|c| c == ' ' || c == '\n')
        .unwrap_or(rest.len());
    let mut path = &rest[..end];
    if let Some(query) = path.find('?') {
        path = &path[..query];
    }

    if path == PATH_CLIENT_HTML || path == PATH_ROOT {
        Route::ClientHtml
    } else if path == PATH_CLIENT_JS {
        Route::ClientJs
    } else if path == PATH_SOCKET {
        Route::Socket { binary: false }
    } else if path == PATH_SOCKET_BIN {
        Route::Socket { binary: true }
    } else {
        Route::NotFound
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UpgradeError {
    #[error("upgrade request without origin or host")]
    MissingHeaders,
    #[error("malformed legacy security keys")]
    BadLegacyKeys,
}

/// The negotiated upgrade, before any response bytes are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeOffer {
    pub kind: UpgradeKind,
    pub origin: String,
    pub host: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeKind {
    /// IETF draft-17 and later; carries the computed accept token.
    V7Plus { accept: String },
    /// hixie-76; the challenge still needs the 8-byte nonce from the body.
    Legacy { key1: u32, key2: u32 },
}

/// Extracts the upgrade parameters from a request head. Header names match
/// exactly (no case folding) with one optional space after the colon, the
/// same tolerance the clients were built against.
pub fn parse_upgrade(head: &str) -> Result<UpgradeOffer, UpgradeError> {
    let mut key_v7: Option<&str> = None;
    let mut key1: Option<u32> = None;
    let mut key2: Option<u32> = None;
    let mut num_key1 = 0usize;
    let mut num_key2 = 0usize;
    let mut origin: Option<&str> = None;
    let mut host: Option<&str> = None;

    for line in head.split('\n') {
        if let Some(value) = header_value(line, "Sec-WebSocket-Key1") {
            key1 = legacy_key_value(value);
            num_key1 += 1;
        } else if let Some(value) = header_value(line, "Sec-WebSocket-Key2") {
            key2 = legacy_key_value(value);
            num_key2 += 1;
        } else if let Some(value) = header_value(line, "Sec-WebSocket-Key") {
            key_v7 = Some(value);
        } else if let Some(value) = header_value(line, "Origin") {
            origin = Some(value);
        } else if let Some(value) = header_value(line, "Host") {
            host = Some(value);
        } else if let Some(value) = header_value(line, "Sec-WebSocket-Origin") {
            origin = Some(value);
        }
    }

    let (Some(origin), Some(host)) = (origin, host) else {
        return Err(UpgradeError::MissingHeaders);
    };

    let kind = if let Some(key) = key_v7 {
        UpgradeKind::V7Plus {
            accept: accept_token(key),
        }
    } else {
        if num_key1 != 1 || num_key2 != 1 {
            return Err(UpgradeError::BadLegacyKeys);
        }
        match (key1, key2) {
            (Some(key1), Some(key2)) => UpgradeKind::Legacy { key1, key2 },
            _ => return Err(UpgradeError::BadLegacyKeys),
        }
    };

    Ok(UpgradeOffer {
        kind,
        origin: origin.to_string(),
        host: host.to_string(),
    })
}

fn header_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(name)?;
    let rest = rest.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// base64(SHA-1(key ++ GUID)), the draft-17 accept token.
pub fn accept_token(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(HANDSHAKE_GUID.as_bytes());
    BASE64_STANDARD.encode(hasher.finalize())
}

/// Decodes one hixie-76 key header: the embedded decimal digits divided by
/// the number of spaces. A key without spaces is malformed (the division
/// is meaningless), as is one whose digits it has none of.
pub fn legacy_key_value(value: &str) -> Option<u32> {
    let mut number: u64 = 0;
    let mut spaces: u64 = 0;
    for c in value.chars() {
        if let Some(digit) = c.to_digit(10) {
            number = number.wrapping_mul(10).wrapping_add(digit as u64);
        } else if c == ' ' {
            spaces += 1;
        }
    }
    if spaces == 0 {
        return None;
    }
    Some((number / spaces) as u32)
}

/// MD5 over key1, key2 (big-endian words) and the 8-byte nonce the client
/// sends after its request head.
pub fn legacy_challenge(key1: u32, key2: u32, nonce: &[u8; 8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(key1.to_be_bytes());
    hasher.update(key2.to_be_bytes());
    hasher.update(nonce);
    hasher.finalize().into()
}

pub fn v7_response(accept: &str, origin: &str, host: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\
         Sec-WebSocket-Origin: {origin}\r\n\
         Sec-WebSocket-Location: ws://{host}{PATH_SOCKET}\r\n\
         Sec-WebSocket-Protocol: {PROTOCOL_NAME}\r\n\
         \r\n"
    )
}

/// Legacy 101 head; the 16-byte challenge digest follows as the body.
pub fn legacy_response(origin: &str, host: &str) -> String {
    format!(
        "HTTP/1.1 101 WebSocket Protocol Handshake\r\n\
         Upgrade: WebSocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Origin: {origin}\r\n\
         Sec-WebSocket-Location: ws://{host}{PATH_SOCKET}\r\n\
         Sec-WebSocket-Protocol: {PROTOCOL_NAME}\r\n\
         \r\n"
    )
}

pub fn error_response(code: u16, reason: &str) -> String {
    format!(
        "HTTP/1.0 {code} {reason}\r\n\r\n\
         <html><head><title>{code} {reason}</title></head>\
         <body>{reason}</body></html>"
    )
}

pub fn data_response_head(content_type: &str, len: usize) -> String {
    format!(
        "HTTP/1.0 200 OK\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {len}\r\n\
         \r\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const V7_HEAD: &str = "GET /socket HTTP/1.1\n\
                           Host: localhost:8080\n\
                           Origin: http://localhost:8080\n\
                           Sec-WebSocket-Key: x3JJHMbDL1EzLkh9GBhXDw==\n";

    #[test]
    fn accept_token_matches_draft_vector() {
        assert_eq!(
            accept_token("x3JJHMbDL1EzLkh9GBhXDw=="),
            "HSmrc0sMlYUkAGmm5OPpG2HaGWk="
        );
    }

    #[test]
    fn classifies_request_paths() {
        assert_eq!(classify_request("GET / HTTP/1.0\n"), Route::ClientHtml);
        assert_eq!(
            classify_request("GET /client.html HTTP/1.1\n"),
            Route::ClientHtml
        );
        assert_eq!(classify_request("GET /broadway.js HTTP/1.1\n"), Route::ClientJs);
        assert_eq!(
            classify_request("GET /socket HTTP/1.1\n"),
            Route::Socket { binary: false }
        );
        assert_eq!(
            classify_request("GET /socket-bin HTTP/1.1\n"),
            Route::Socket { binary: true }
        );
        assert_eq!(classify_request("GET /missing HTTP/1.1\n"), Route::NotFound);
        assert_eq!(classify_request("POST / HTTP/1.1\n"), Route::NotImplemented);
    }

    #[test]
    fn query_strings_do_not_affect_routing() {
        assert_eq!(classify_request("GET /?session=9 HTTP/1.1\n"), Route::ClientHtml);
        assert_eq!(
            classify_request("GET /socket?retry=1 HTTP/1.1\n"),
            Route::Socket { binary: false }
        );
    }

    #[test]
    fn parses_v7_upgrade() {
        let offer = parse_upgrade(V7_HEAD).unwrap();
        assert_eq!(offer.origin, "http://localhost:8080");
        assert_eq!(offer.host, "localhost:8080");
        assert_eq!(
            offer.kind,
            UpgradeKind::V7Plus {
                accept: "HSmrc0sMlYUkAGmm5OPpG2HaGWk=".to_string(),
            }
        );
    }

    #[test]
    fn upgrade_requires_origin_and_host() {
        let head = "GET /socket HTTP/1.1\nSec-WebSocket-Key: abc\n";
        assert_eq!(parse_upgrade(head), Err(UpgradeError::MissingHeaders));

        // Header names do not case-fold.
        let head = "GET /socket HTTP/1.1\nhost: x\norigin: y\nSec-WebSocket-Key: abc\n";
        assert_eq!(parse_upgrade(head), Err(UpgradeError::MissingHeaders));
    }

    #[test]
    fn sec_websocket_origin_is_accepted_too() {
        let head = "GET /socket HTTP/1.1\n\
                    Host: h\n\
                    Sec-WebSocket-Origin: o\n\
                    Sec-WebSocket-Key: abc\n";
        let offer = parse_upgrade(head).unwrap();
        assert_eq!(offer.origin, "o");
    }

    #[test]
    fn decodes_legacy_keys() {
        // Digits concatenate, then divide by the space count.
        assert_eq!(legacy_key_value("10 00"), Some(1000));
        assert_eq!(legacy_key_value("4 0 0 0"), Some(1333));
        assert_eq!(legacy_key_value("P4 0q0 t0"), Some(2000));
        assert_eq!(legacy_key_value("no digits here"), Some(0));
        // No spaces: the division has no meaning.
        assert_eq!(legacy_key_value("1000"), None);
    }

    #[test]
    fn parses_legacy_upgrade() {
        let head = "GET /socket HTTP/1.1\n\
                    Host: h\n\
                    Origin: o\n\
                    Sec-WebSocket-Key1: 10 00\n\
                    Sec-WebSocket-Key2: 40 0 0\n";
        let offer = parse_upgrade(head).unwrap();
        assert_eq!(
            offer.kind,
            UpgradeKind::Legacy {
                key1: 1000,
                key2: 2000,
            }
        );
    }

    #[test]
    fn legacy_requires_exactly_one_of_each_key() {
        let head = "GET /socket HTTP/1.1\nHost: h\nOrigin: o\nSec-WebSocket-Key1: 1 0\n";
        assert_eq!(parse_upgrade(head), Err(UpgradeError::BadLegacyKeys));

        let head = "GET /socket HTTP/1.1\n\
                    Host: h\n\
                    Origin: o\n\
                    Sec-WebSocket-Key1: 1 0\n\
                    Sec-WebSocket-Key1: 2 0\n\
                    Sec-WebSocket-Key2: 3 0\n";
        assert_eq!(parse_upgrade(head), Err(UpgradeError::BadLegacyKeys));
    }

    #[test]
    fn zero_space_key_is_malformed() {
        let head = "GET /socket HTTP/1.1\n\
                    Host: h\n\
                    Origin: o\n\
                    Sec-WebSocket-Key1: 12345\n\
                    Sec-WebSocket-Key2: 40 0 0\n";
        assert_eq!(parse_upgrade(head), Err(UpgradeError::BadLegacyKeys));
    }

    #[test]
    fn legacy_challenge_is_deterministic() {
        assert_eq!(
            legacy_challenge(1000, 2000, b"01234567"),
            [
                0x57, 0xdf, 0xcc, 0x69, 0xf4, 0x23, 0xb5, 0xe3, 0x9b, 0x00, 0x9b, 0xcb, 0x0c,
                0x1c, 0x79, 0x74,
            ]
        );
        assert_eq!(
            legacy_challenge(0x1234_5678, 0x9abc_def0, &[0, 1, 2, 3, 4, 5, 6, 7]),
            [
                0x72, 0x7d, 0x90, 0x82, 0x49, 0x96, 0x5e, 0xfc, 0xbe, 0xac, 0xbd, 0x3b, 0xac,
                0x9d, 0xcc, 0x30,
            ]
        );
    }

    #[test]
    fn renders_switching_protocols_responses() {
        let v7 = v7_response("TOKEN", "http://o", "h:8080");
        assert!(v7.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(v7.contains("Sec-WebSocket-Accept: TOKEN\r\n"));
        assert!(v7.contains("Sec-WebSocket-Location: ws://h:8080/socket\r\n"));
        assert!(v7.contains("Sec-WebSocket-Protocol: broadway\r\n"));
        assert!(v7.ends_with("\r\n\r\n"));

        let legacy = legacy_response("http://o", "h:8080");
        assert!(legacy.starts_with("HTTP/1.1 101 WebSocket Protocol Handshake\r\n"));
        assert!(!legacy.contains("Sec-WebSocket-Accept"));
        assert!(legacy.ends_with("\r\n\r\n"));
    }

    #[test]
    fn renders_plain_http_responses() {
        assert_eq!(
            error_response(404, "File not found"),
            "HTTP/1.0 404 File not found\r\n\r\n\
             <html><head><title>404 File not found</title></head>\
             <body>File not found</body></html>"
        );
        assert_eq!(
            data_response_head("text/html", 12),
            "HTTP/1.0 200 OK\r\nContent-Type: text/html\r\nContent-Length: 12\r\n\r\n"
        );
    }
}
