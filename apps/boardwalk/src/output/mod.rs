//! The output side of a session: a command sink the server keeps
//! consistent with its surface model.
//!
//! Serialization onto the wire lives behind [`DisplayOutput`]; the server
//! only cares about call ordering, serial numbering and flush results. A
//! factory builds a fresh sink per accepted connection, seeded with the
//! serial counter carried over from the previous connection.

use tokio::net::tcp::OwnedWriteHalf;

use crate::model::{Rect, SurfaceId};

pub mod mock;
pub mod trace;

/// Which handshake generation a connection negotiated. Fixed for the
/// lifetime of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVariant {
    Legacy,
    V7Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireFormat {
    pub variant: ProtocolVariant,
    /// Binary framing was requested via the alternate upgrade path.
    pub binary: bool,
}

/// Write half of an upgraded connection, handed to the output factory.
///
/// A sink that does not write (tracing, tests) still keeps the half alive
/// so the peer does not see the stream close.
pub struct OutputConnection {
    stream: Option<OwnedWriteHalf>,
}

impl OutputConnection {
    pub fn new(stream: OwnedWriteHalf) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    /// A connection with no socket behind it.
    pub fn detached() -> Self {
        Self { stream: None }
    }

    pub fn into_stream(self) -> Option<OwnedWriteHalf> {
        self.stream
    }
}

/// Display command stream toward one connected client.
///
/// Every command consumes one serial; `next_serial` reports the serial the
/// next command will take. `flush` pushes buffered bytes and reports
/// whether the connection is still usable; the server reacts to a failed
/// flush by snapshotting the serial and dropping the sink.
pub trait DisplayOutput {
    fn create_surface(
        &mut self,
        id: SurfaceId,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        is_temp: bool,
    );
    fn destroy_surface(&mut self, id: SurfaceId);
    fn show_surface(&mut self, id: SurfaceId);
    fn hide_surface(&mut self, id: SurfaceId);
    fn set_transient_for(&mut self, id: SurfaceId, parent: SurfaceId);
    #[allow(clippy::too_many_arguments)]
    fn move_resize_surface(
        &mut self,
        id: SurfaceId,
        with_move: bool,
        x: i32,
        y: i32,
        with_resize: bool,
        width: i32,
        height: i32,
    );
    /// Full-color upload; used for the first sync of a surface.
    #[allow(clippy::too_many_arguments)]
    fn put_rgb(
        &mut self,
        id: SurfaceId,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        stride: i32,
        data: &[u8],
    );
    /// Alpha-keyed delta upload; transparent pixels mean "unchanged".
    #[allow(clippy::too_many_arguments)]
    fn put_rgba(
        &mut self,
        id: SurfaceId,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        stride: i32,
        data: &[u8],
    );
    fn copy_rectangles(&mut self, id: SurfaceId, rects: &[Rect], dx: i32, dy: i32);
    fn grab_pointer(&mut self, id: SurfaceId, owner_events: bool);
    /// Returns the serial of the ungrab command itself.
    fn ungrab_pointer(&mut self) -> u32;
    fn pong(&mut self);
    fn flush(&mut self) -> bool;
    fn next_serial(&self) -> u32;
}

/// Builds the output sink for a freshly upgraded connection.
pub trait OutputFactory {
    fn create(
        &self,
        connection: OutputConnection,
        start_serial: u32,
        format: WireFormat,
    ) -> Box<dyn DisplayOutput>;
}
