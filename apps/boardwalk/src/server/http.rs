//! Plain-HTTP front door: request-head accumulation, the two static
//! assets, and the switch into websocket mode.
//!
//! One task runs per accepted connection. It collects header lines until
//! the blank terminator, answers asset requests directly, and for the
//! socket routes performs the upgrade handshake before handing the stream
//! halves to the session layer. Bytes the client pipelined behind its
//! handshake stay in the read-ahead buffer and seed the input accumulator.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::output::{ProtocolVariant, WireFormat};
use crate::protocol::MAX_REQUEST_BYTES;
use crate::protocol::handshake::{self, Route, UpgradeKind};

use super::{DisplayServer, input};

pub(crate) async fn handle_connection(server: DisplayServer, mut stream: TcpStream) {
    let mut readahead = BytesMut::with_capacity(1024);
    let head = match read_request_head(&mut stream, &mut readahead).await {
        HeadState::Complete(head) => head,
        HeadState::TooLong => {
            send_error(&mut stream, 400, "Request too long").await;
            return;
        }
        HeadState::Disconnected => {
            debug!("connection closed before the request head completed");
            return;
        }
    };
    trace!(%head, "request head");

    match handshake::classify_request(&head) {
        Route::ClientHtml => {
            let assets = server.assets();
            send_data(&mut stream, "text/html", assets.html()).await;
        }
        Route::ClientJs => {
            let assets = server.assets();
            send_data(&mut stream, "text/javascript", assets.js()).await;
        }
        Route::Socket { binary } => upgrade(server, stream, readahead, &head, binary).await,
        Route::NotFound => send_error(&mut stream, 404, "File not found").await,
        Route::NotImplemented => send_error(&mut stream, 501, "Only GET implemented").await,
    }
}

enum HeadState {
    Complete(String),
    TooLong,
    Disconnected,
}

/// Accumulates header lines until the empty terminator line, leaving
/// whatever follows the head in `readahead`. Lines may end in LF or CRLF.
async fn read_request_head(stream: &mut TcpStream, readahead: &mut BytesMut) -> HeadState {
    let mut head = String::new();
    let mut chunk = [0u8; 1024];
    loop {
        while let Some(line) = take_line(readahead) {
            if line.is_empty() {
                return HeadState::Complete(head);
            }
            if head.len() > MAX_REQUEST_BYTES {
                return HeadState::TooLong;
            }
            head.push_str(&line);
            head.push('\n');
        }
        match stream.read(&mut chunk).await {
            Ok(0) => return HeadState::Disconnected,
            Ok(n) => readahead.extend_from_slice(&chunk[..n]),
            Err(error) => {
                debug!(%error, "request read failed");
                return HeadState::Disconnected;
            }
        }
    }
}

/// Splits one LF-terminated line off the front of the buffer, dropping the
/// line ending.
fn take_line(buffer: &mut BytesMut) -> Option<String> {
    let end = buffer.iter().position(|&b| b == b'\n')?;
    let line = buffer.split_to(end + 1);
    let mut line = &line[..end];
    if let Some(stripped) = line.strip_suffix(b"\r") {
        line = stripped;
    }
    Some(String::from_utf8_lossy(line).into_owned())
}

async fn upgrade(
    server: DisplayServer,
    mut stream: TcpStream,
    mut readahead: BytesMut,
    head: &str,
    binary: bool,
) {
    let offer = match handshake::parse_upgrade(head) {
        Ok(offer) => offer,
        Err(error) => {
            debug!(%error, "websocket upgrade rejected");
            send_error(&mut stream, 400, "Bad websocket request").await;
            return;
        }
    };

    let variant = match offer.kind {
        UpgradeKind::V7Plus { ref accept } => {
            let response = handshake::v7_response(accept, &offer.origin, &offer.host);
            if !write_or_log(&mut stream, response.as_bytes()).await {
                return;
            }
            ProtocolVariant::V7Plus
        }
        UpgradeKind::Legacy { key1, key2 } => {
            // The hixie-76 nonce follows the head; part of it may already
            // sit in the read-ahead.
            let Some(nonce) = read_nonce(&mut stream, &mut readahead).await else {
                send_error(&mut stream, 400, "Bad websocket request").await;
                return;
            };
            let digest = handshake::legacy_challenge(key1, key2, &nonce);
            let response = handshake::legacy_response(&offer.origin, &offer.host);
            if !write_or_log(&mut stream, response.as_bytes()).await {
                return;
            }
            if !write_or_log(&mut stream, &digest).await {
                return;
            }
            ProtocolVariant::Legacy
        }
    };

    if let Err(error) = stream.set_nodelay(true) {
        debug!(%error, "TCP_NODELAY not set on upgraded socket");
    }

    let format = WireFormat { variant, binary };
    debug!(?format, "websocket client attached");

    let (read_half, write_half) = stream.into_split();
    let generation = server.begin_session(write_half, &readahead, format);
    let reader = tokio::task::spawn_local(input::reader_loop(server.clone(), read_half, generation));
    server.register_reader(generation, reader.abort_handle());
    // Frames the client sent on the heels of its handshake are already in
    // the accumulator; parse them now instead of waiting for more bytes.
    server.ingest_input(generation, &[]);
}

/// Reads the 8 challenge bytes the legacy client sends after its head,
/// honoring bytes already buffered.
async fn read_nonce(stream: &mut TcpStream, readahead: &mut BytesMut) -> Option<[u8; 8]> {
    let mut nonce = [0u8; 8];
    let buffered = readahead.len().min(nonce.len());
    nonce[..buffered].copy_from_slice(&readahead[..buffered]);
    readahead.advance(buffered);
    match stream.read_exact(&mut nonce[buffered..]).await {
        Ok(_) => Some(nonce),
        Err(error) => {
            debug!(%error, "legacy nonce read failed");
            None
        }
    }
}

async fn send_error(stream: &mut TcpStream, code: u16, reason: &str) {
    debug!(code, reason, "rejecting request");
    let response = handshake::error_response(code, reason);
    write_or_log(stream, response.as_bytes()).await;
}

async fn send_data(stream: &mut TcpStream, content_type: &str, body: &Bytes) {
    let head = handshake::data_response_head(content_type, body.len());
    if write_or_log(stream, head.as_bytes()).await {
        write_or_log(stream, body).await;
    }
}

async fn write_or_log(stream: &mut TcpStream, bytes: &[u8]) -> bool {
    match stream.write_all(bytes).await {
        Ok(()) => true,
        Err(error) => {
            debug!(%error, "response write failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_line_handles_both_endings() {
        let mut buffer = BytesMut::from(&b"GET / HTTP/1.1\r\nHost: x\npartial"[..]);
        assert_eq!(take_line(&mut buffer).as_deref(), Some("GET / HTTP/1.1"));
        assert_eq!(take_line(&mut buffer).as_deref(), Some("Host: x"));
        assert_eq!(take_line(&mut buffer), None);
        assert_eq!(&buffer[..], b"partial");
    }

    #[test]
    fn take_line_yields_empty_terminator() {
        let mut buffer = BytesMut::from(&b"\r\nbody"[..]);
        assert_eq!(take_line(&mut buffer).as_deref(), Some(""));
        assert_eq!(&buffer[..], b"body");
    }
}
