//! The input half of a session: byte accumulation and the reader task.
//!
//! Framing and parsing live in `protocol`; the pass that drains the
//! accumulator into the pending queue is on `ServerState` so it can touch
//! the pointer state and the output channel (pings answer with pongs).

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use crate::output::WireFormat;
use crate::protocol::wire::TimeNormalizer;

use super::DisplayServer;

pub(crate) const READ_CHUNK: usize = 1024;

/// One live input connection.
pub(crate) struct InputChannel {
    pub(crate) buffer: BytesMut,
    pub(crate) format: WireFormat,
    pub(crate) clock: TimeNormalizer,
    /// Distinguishes this channel from any replacement, so a stale reader
    /// task cannot feed a newer channel's buffer.
    pub(crate) generation: u64,
    pub(crate) abort: Option<AbortHandle>,
}

impl InputChannel {
    pub(crate) fn new(format: WireFormat, generation: u64, seed: &[u8]) -> Self {
        let mut buffer = BytesMut::with_capacity(READ_CHUNK.max(seed.len()));
        buffer.extend_from_slice(seed);
        Self {
            buffer,
            format,
            clock: TimeNormalizer::new(),
            generation,
            abort: None,
        }
    }
}

impl Drop for InputChannel {
    fn drop(&mut self) {
        if let Some(abort) = self.abort.take() {
            abort.abort();
        }
    }
}

/// Pumps socket bytes into the server until EOF, a read error, or the
/// channel is replaced under us.
pub(crate) async fn reader_loop(
    server: DisplayServer,
    mut read_half: OwnedReadHalf,
    generation: u64,
) {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match read_half.read(&mut chunk).await {
            Ok(0) => {
                debug!(generation, "input stream closed by peer");
                server.input_closed(generation, None);
                return;
            }
            Ok(n) => {
                trace!(generation, bytes = n, "input chunk");
                if !server.ingest_input(generation, &chunk[..n]) {
                    return;
                }
            }
            Err(error) => {
                server.input_closed(generation, Some(error));
                return;
            }
        }
    }
}
