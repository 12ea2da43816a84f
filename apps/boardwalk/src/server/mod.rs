//! The display server context: surface model, input queue, pointer state,
//! and the two per-client channels (input stream, output command sink).
//!
//! Everything lives behind one `Rc<RefCell<_>>` shared by local tasks on a
//! current-thread runtime. No operation holds the borrow across an await
//! or across a callback into the embedder, so sink implementations may
//! re-enter server operations freely.
//!
//! Channel lifecycles are independent: the input stream can die (framing
//! violation, EOF) while the output sink keeps accepting commands, and the
//! output sink can be dropped (flush failure) while input keeps arriving.
//! A new handshake replaces both and replays the surface population.

mod http;
mod input;
pub mod pointer;
pub mod registry;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::rc::Rc;

use bytes::Bytes;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tracing::{debug, info, trace, warn};

use crate::model::{PixelBuffer, Rect, SurfaceId};
use crate::output::{
    DisplayOutput, OutputConnection, OutputFactory, ProtocolVariant, WireFormat,
};
use crate::protocol::ws::{self, FrameStep, LegacyStep};
use crate::protocol::{EventKind, InputMessage, wire};
use crate::telemetry;

use input::InputChannel;
pub use pointer::{GrabStatus, PointerGrab, PointerState};
pub use registry::{ROOT_HEIGHT, ROOT_ID, ROOT_WIDTH, SurfaceRegistry};

/// Where dispatched input messages land. Implementations must not block;
/// they may call back into [`DisplayServer`] operations.
pub trait EventSink {
    fn got_event(&self, message: &InputMessage);
}

/// The client bundle served over plain HTTP alongside the socket routes.
#[derive(Clone)]
pub struct StaticAssets {
    html: Bytes,
    js: Bytes,
}

impl StaticAssets {
    pub fn new(html: impl Into<Bytes>, js: impl Into<Bytes>) -> Self {
        Self {
            html: html.into(),
            js: js.into(),
        }
    }

    /// Stand-in pages for running without a client bundle on disk.
    pub fn placeholder() -> Self {
        Self::new(
            &b"<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>boardwalk</title></head>\n<body><p>No client bundle installed; point --client-html and --client-js at one.</p></body>\n</html>\n"[..],
            &b"console.log(\"boardwalk: no client bundle installed\");\n"[..],
        )
    }

    pub fn html(&self) -> &Bytes {
        &self.html
    }

    pub fn js(&self) -> &Bytes {
        &self.js
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind display listener on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("display listener failed")]
    Accept(#[source] std::io::Error),
}

/// Pointer position as reported to the embedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerSnapshot {
    pub surface: SurfaceId,
    pub root_x: i32,
    pub root_y: i32,
    pub state: u32,
}

struct ServerState {
    registry: SurfaceRegistry,
    pointer: PointerState,
    output: Option<Box<dyn DisplayOutput>>,
    input: Option<InputChannel>,
    pending: VecDeque<InputMessage>,
    /// Next serial handed out while no output channel is live; refreshed
    /// from the sink whenever one is dropped.
    saved_serial: u32,
    /// Newest normalized client time. Starts at 1 so a zero timestamp can
    /// never masquerade as it.
    last_seen_time: u64,
    next_generation: u64,
    dispatch_scheduled: bool,
    /// While nonzero, the dispatch pass leaves the queue alone so reply
    /// waiters can scan it.
    dispatch_holds: u32,
    input_activity: Rc<Notify>,
    factory: Box<dyn OutputFactory>,
    events: Rc<dyn EventSink>,
    assets: StaticAssets,
}

impl ServerState {
    fn new(assets: StaticAssets, factory: Box<dyn OutputFactory>, events: Rc<dyn EventSink>) -> Self {
        Self {
            registry: SurfaceRegistry::new(),
            pointer: PointerState::new(),
            output: None,
            input: None,
            pending: VecDeque::new(),
            saved_serial: 1,
            last_seen_time: 1,
            next_generation: 0,
            dispatch_scheduled: false,
            dispatch_holds: 0,
            input_activity: Rc::new(Notify::new()),
            factory,
            events,
            assets,
        }
    }

    fn next_serial(&self) -> u32 {
        match self.output.as_ref() {
            Some(output) => output.next_serial(),
            None => self.saved_serial,
        }
    }

    /// Flushes the output sink; a failed flush means the connection is
    /// gone, so the serial counter is snapshotted and the sink dropped.
    fn flush_output(&mut self) {
        let broken = match self.output.as_mut() {
            Some(output) => !output.flush(),
            None => false,
        };
        if broken {
            if let Some(output) = self.output.take() {
                self.saved_serial = output.next_serial();
                debug!(saved_serial = self.saved_serial, "output flush failed, channel dropped");
            }
        }
    }

    fn attach_input(&mut self, format: WireFormat, seed: &[u8]) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        // Replacing the channel aborts any previous reader task.
        self.input = Some(InputChannel::new(format, generation, seed));
        self.input_activity.notify_waiters();
        generation
    }

    fn teardown_input(&mut self) {
        self.input = None;
        self.input_activity.notify_waiters();
    }

    fn attach_output(&mut self, connection: OutputConnection, format: WireFormat) {
        if let Some(output) = self.output.take() {
            self.saved_serial = output.next_serial();
        }
        let output = self.factory.create(connection, self.saved_serial, format);
        self.output = Some(output);
        self.resync_surfaces();
        if let Some(grab) = self.pointer.grab {
            if let Some(output) = self.output.as_mut() {
                output.grab_pointer(grab.surface, grab.owner_events);
            }
        }
    }

    /// Replays the whole surface population into a fresh output channel:
    /// first every surface is created, then anything that may reference
    /// another surface (transient links, visibility, content).
    fn resync_surfaces(&mut self) {
        let Some(mut output) = self.output.take() else {
            return;
        };
        let ids = self.registry.ordered_ids();
        for &id in &ids {
            if let Some(surface) = self.registry.get_mut(id) {
                surface.last_synced = false;
                output.create_surface(
                    surface.id,
                    surface.x,
                    surface.y,
                    surface.width,
                    surface.height,
                    surface.is_temp,
                );
            }
        }
        for &id in &ids {
            if let Some(surface) = self.registry.get_mut(id) {
                if let Some(parent) = surface.transient_for {
                    output.set_transient_for(surface.id, parent);
                }
                if surface.visible {
                    output.show_surface(surface.id);
                    if let Some(buffer) = surface.last_buffer.as_ref() {
                        output.put_rgb(
                            surface.id,
                            0,
                            0,
                            buffer.width(),
                            buffer.height(),
                            buffer.stride(),
                            buffer.as_bytes(),
                        );
                        surface.last_synced = true;
                    }
                }
            }
        }
        self.output = Some(output);
        self.flush_output();
    }

    /// Drains the accumulator into parsed messages. Runs until the buffer
    /// has no complete unit left or the channel tears itself down.
    fn parse_buffered_input(&mut self) {
        loop {
            let Some(channel) = self.input.as_mut() else {
                return;
            };
            match channel.format.variant {
                ProtocolVariant::V7Plus => match ws::decode_frame(&mut channel.buffer) {
                    FrameStep::Incomplete => return,
                    FrameStep::Frame(frame) => self.handle_frame(frame),
                },
                ProtocolVariant::Legacy => match ws::decode_legacy(&mut channel.buffer) {
                    LegacyStep::Incomplete => return,
                    LegacyStep::Message(payload) => self.queue_message(&payload),
                    LegacyStep::Violation => {
                        warn!("legacy framing violation, dropping input channel");
                        self.teardown_input();
                        return;
                    }
                },
            }
        }
    }

    fn handle_frame(&mut self, frame: ws::Frame) {
        match frame.opcode {
            ws::OPCODE_TEXT if frame.fin => self.queue_message(&frame.payload),
            ws::OPCODE_TEXT => debug!("fragmented text frame dropped"),
            // Hang around anyway; the peer closing the socket ends us.
            ws::OPCODE_CLOSE => {}
            ws::OPCODE_PING => {
                if let Some(output) = self.output.as_mut() {
                    output.pong();
                }
            }
            ws::OPCODE_PONG => {}
            opcode => warn!(opcode, "unsupported frame type, dropping frame"),
        }
    }

    fn queue_message(&mut self, payload: &[u8]) {
        if tracing::enabled!(tracing::Level::TRACE) {
            trace!(dump = %telemetry::hexdump(payload), "input message");
        }
        let last_seen = self.last_seen_time;
        let Some(channel) = self.input.as_mut() else {
            return;
        };
        let (message, time) = wire::parse_message(payload, &mut channel.clock, last_seen);
        self.last_seen_time = time;
        if let Some(pointer) = message.event.pointer() {
            self.pointer.update_future(pointer);
        }
        self.pending.push_back(message);
    }
}

/// Handle onto the shared server; cheap to clone into tasks and sinks.
#[derive(Clone)]
pub struct DisplayServer {
    state: Rc<RefCell<ServerState>>,
}

impl DisplayServer {
    pub fn new(
        assets: StaticAssets,
        factory: Box<dyn OutputFactory>,
        events: Rc<dyn EventSink>,
    ) -> Self {
        Self {
            state: Rc::new(RefCell::new(ServerState::new(assets, factory, events))),
        }
    }

    pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
        TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })
    }

    /// Accepts and serves connections until the listener fails. Must run
    /// inside a `LocalSet`.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "display server listening");
        }
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "connection accepted");
                    tokio::task::spawn_local(http::handle_connection(self.clone(), stream));
                }
                Err(error) => {
                    warn!(%error, "listener accept failed");
                    return Err(ServerError::Accept(error));
                }
            }
        }
    }

    /// Allocates a surface and announces it to a connected client.
    pub fn create_surface(
        &self,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        is_temp: bool,
    ) -> SurfaceId {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let id = state.registry.allocate(x, y, width, height, is_temp);
        if let Some(output) = state.output.as_mut() {
            output.create_surface(id, x, y, width, height, is_temp);
        }
        debug!(id, width, height, is_temp, "surface created");
        id
    }

    /// Destroys a surface, dropping any pointer or grab references to it.
    pub fn destroy_surface(&self, id: SurfaceId) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        state.pointer.forget_surface(id);
        if let Some(output) = state.output.as_mut() {
            output.destroy_surface(id);
        }
        state.registry.remove(id);
        debug!(id, "surface destroyed");
    }

    /// Returns whether the command reached a client.
    pub fn show_surface(&self, id: SurfaceId) -> bool {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let Some(surface) = state.registry.get_mut(id) else {
            return false;
        };
        surface.visible = true;
        match state.output.as_mut() {
            Some(output) => {
                output.show_surface(id);
                true
            }
            None => false,
        }
    }

    pub fn hide_surface(&self, id: SurfaceId) -> bool {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let Some(surface) = state.registry.get_mut(id) else {
            return false;
        };
        surface.visible = false;
        state.pointer.leave_surface(id);
        match state.output.as_mut() {
            Some(output) => {
                output.hide_surface(id);
                true
            }
            None => false,
        }
    }

    /// Records the transient parent. `None` clears the link locally; only
    /// set links are sent to the client.
    pub fn set_transient_for(&self, id: SurfaceId, parent: Option<SurfaceId>) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let Some(surface) = state.registry.get_mut(id) else {
            return;
        };
        surface.transient_for = parent;
        if let Some(parent) = parent {
            if state.output.is_some() {
                if let Some(output) = state.output.as_mut() {
                    output.set_transient_for(id, parent);
                }
                state.flush_output();
            }
        }
    }

    pub fn move_resize_surface(
        &self,
        id: SurfaceId,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    ) -> bool {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let Some(surface) = state.registry.get_mut(id) else {
            return false;
        };
        let with_move = x != surface.x || y != surface.y;
        let with_resize = width != surface.width || height != surface.height;
        surface.x = x;
        surface.y = y;
        surface.width = width;
        surface.height = height;

        // A resize reallocates the cache with the old content at the
        // origin, clipped to the new bounds.
        if with_resize {
            if let Some(old) = surface.last_buffer.take() {
                let mut resized = PixelBuffer::new(width, height);
                resized.composite_from(&old);
                surface.last_buffer = Some(resized);
            }
        }

        match state.output.as_mut() {
            Some(output) => {
                output.move_resize_surface(id, with_move, x, y, with_resize, width, height);
                true
            }
            None => false,
        }
    }

    /// Pushes a frame of content. The first sync after a (re)connect sends
    /// the full frame; later syncs send a sparse overlay where unchanged
    /// pixels are fully transparent. The frame is then cached for diffing
    /// and replay.
    pub fn update_surface(&self, id: SurfaceId, content: &PixelBuffer) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let Some(surface) = state.registry.get_mut(id) else {
            return;
        };
        let mut cache = surface
            .last_buffer
            .take()
            .unwrap_or_else(|| PixelBuffer::new(surface.width, surface.height));

        if let Some(output) = state.output.as_mut() {
            if surface.last_synced {
                content.diff_into(&mut cache);
                output.put_rgba(
                    id,
                    0,
                    0,
                    cache.width(),
                    cache.height(),
                    cache.stride(),
                    cache.as_bytes(),
                );
            } else {
                surface.last_synced = true;
                output.put_rgb(
                    id,
                    0,
                    0,
                    content.width(),
                    content.height(),
                    content.stride(),
                    content.as_bytes(),
                );
            }
        }

        cache.composite_from(content);
        surface.last_buffer = Some(cache);
    }

    /// Shifts already-synced regions by (dx, dy), in the cache and on the
    /// client. Only possible once content has been synced to a live client.
    pub fn translate_surface(&self, id: SurfaceId, rects: &[Rect], dx: i32, dy: i32) -> bool {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let Some(surface) = state.registry.get_mut(id) else {
            return false;
        };
        if !surface.last_synced {
            return false;
        }
        let Some(output) = state.output.as_mut() else {
            return false;
        };
        if let Some(buffer) = surface.last_buffer.as_mut() {
            buffer.copy_rects(rects, dx, dy);
        }
        output.copy_rectangles(id, rects, dx, dy);
        true
    }

    /// Requests the exclusive pointer grab. A request stamped with a
    /// nonzero time strictly older than the held grab loses; zero means
    /// "now" and is stamped with the newest seen client time.
    pub fn grab_pointer(&self, id: SurfaceId, owner_events: bool, time: u32) -> GrabStatus {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        if state.pointer.grab_blocks(time) {
            return GrabStatus::AlreadyGrabbed;
        }
        let time = if time == 0 {
            state.last_seen_time as u32
        } else {
            time
        };
        state.pointer.grab = Some(PointerGrab {
            surface: id,
            owner_events,
            time,
        });
        if state.output.is_some() {
            if let Some(output) = state.output.as_mut() {
                output.grab_pointer(id, owner_events);
            }
            state.flush_output();
        }
        GrabStatus::Success
    }

    /// Releases the grab, subject to the same time arbitration. Returns the
    /// serial of the release command, or 0 when the request lost.
    pub fn ungrab_pointer(&self, time: u32) -> u32 {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        if state.pointer.grab_blocks(time) {
            return 0;
        }
        let serial = match state.output.as_mut() {
            Some(output) => {
                let serial = output.ungrab_pointer();
                state.flush_output();
                serial
            }
            None => state.saved_serial,
        };
        state.pointer.grab = None;
        serial
    }

    /// Live pointer position when a client is connected (parse-time view),
    /// else the last dispatched state.
    pub fn query_pointer(&self) -> PointerSnapshot {
        let state = self.state.borrow();
        if state.output.is_some() {
            PointerSnapshot {
                surface: state.pointer.future_mouse_in_surface,
                root_x: state.pointer.future_root_x,
                root_y: state.pointer.future_root_y,
                state: state.pointer.future_state,
            }
        } else {
            PointerSnapshot {
                surface: state.pointer.mouse_in_surface,
                root_x: state.pointer.last_x,
                root_y: state.pointer.last_y,
                state: state.pointer.last_state,
            }
        }
    }

    pub fn last_seen_time(&self) -> u32 {
        self.state.borrow().last_seen_time as u32
    }

    pub fn next_serial(&self) -> u32 {
        self.state.borrow().next_serial()
    }

    pub fn has_client(&self) -> bool {
        self.state.borrow().output.is_some()
    }

    pub fn input_connected(&self) -> bool {
        self.state.borrow().input.is_some()
    }

    pub fn flush(&self) {
        self.state.borrow_mut().flush_output();
    }

    /// True if any queued, not yet dispatched message matches one of the
    /// given kinds.
    pub fn lookahead_event(&self, kinds: &[EventKind]) -> bool {
        let state = self.state.borrow();
        state
            .pending
            .iter()
            .any(|message| matches!(message.kind(), Some(kind) if kinds.contains(&kind)))
    }

    /// Waits for the queued reply matching (kind, serial), holding the
    /// dispatch pass off the queue while scanning. Returns `None` when no
    /// input channel is connected or it dies while waiting. May be called
    /// from within a sink callback.
    pub async fn wait_for_reply(
        &self,
        kind: EventKind,
        serial: u32,
        remove: bool,
    ) -> Option<InputMessage> {
        self.flush();
        let activity = {
            let mut state = self.state.borrow_mut();
            if state.input.is_none() {
                return None;
            }
            state.dispatch_holds += 1;
            state.input_activity.clone()
        };
        let result = loop {
            {
                let mut state = self.state.borrow_mut();
                if let Some(pos) = state
                    .pending
                    .iter()
                    .position(|m| m.kind() == Some(kind) && m.serial == serial)
                {
                    break if remove {
                        state.pending.remove(pos)
                    } else {
                        state.pending.get(pos).copied()
                    };
                }
                if state.input.is_none() {
                    break None;
                }
            }
            // Single-threaded: nothing can notify between releasing the
            // borrow above and this await, so a wakeup cannot be missed.
            activity.notified().await;
        };
        self.state.borrow_mut().dispatch_holds -= 1;
        self.schedule_dispatch();
        result
    }

    /// Drains the pending queue into the event sink, one message at a
    /// time. The state borrow is released around each sink call.
    fn process_pending(&self) {
        let events = self.state.borrow().events.clone();
        loop {
            let message = {
                let mut state = self.state.borrow_mut();
                if state.dispatch_holds > 0 {
                    return;
                }
                let Some(message) = state.pending.pop_front() else {
                    return;
                };
                state.pointer.update_dispatched(&message.event);
                message
            };
            events.got_event(&message);
        }
    }

    /// Queues a dispatch pass on the local executor. At most one is in
    /// flight at a time.
    fn schedule_dispatch(&self) {
        {
            let mut state = self.state.borrow_mut();
            if state.dispatch_scheduled {
                return;
            }
            state.dispatch_scheduled = true;
        }
        let server = self.clone();
        tokio::task::spawn_local(async move {
            server.state.borrow_mut().dispatch_scheduled = false;
            server.process_pending();
        });
    }

    /// Feeds bytes from the reader task into the channel of the matching
    /// generation. Returns false once the reader should stop.
    pub(crate) fn ingest_input(&self, generation: u64, bytes: &[u8]) -> bool {
        let (alive, held) = {
            let mut state = self.state.borrow_mut();
            match state.input.as_mut() {
                Some(channel) if channel.generation == generation => {
                    channel.buffer.extend_from_slice(bytes);
                }
                _ => return false,
            }
            state.parse_buffered_input();
            let alive =
                matches!(state.input.as_ref(), Some(channel) if channel.generation == generation);
            (alive, state.dispatch_holds > 0)
        };
        self.notify_activity();
        if held {
            self.schedule_dispatch();
        } else {
            self.process_pending();
        }
        alive
    }

    pub(crate) fn input_closed(&self, generation: u64, error: Option<std::io::Error>) {
        let mut state = self.state.borrow_mut();
        let current =
            matches!(state.input.as_ref(), Some(channel) if channel.generation == generation);
        if !current {
            return;
        }
        if let Some(error) = error {
            debug!(%error, "input read failed");
        }
        state.teardown_input();
    }

    /// Installs both channels for a freshly upgraded connection. Input is
    /// bound before output so the resync happens with the new generation
    /// in place; the caller primes the first parse afterwards.
    pub(crate) fn begin_session(
        &self,
        write_half: OwnedWriteHalf,
        seed: &[u8],
        format: WireFormat,
    ) -> u64 {
        let mut state = self.state.borrow_mut();
        let generation = state.attach_input(format, seed);
        state.attach_output(OutputConnection::new(write_half), format);
        generation
    }

    pub(crate) fn register_reader(&self, generation: u64, abort: AbortHandle) {
        let mut state = self.state.borrow_mut();
        if let Some(channel) = state.input.as_mut() {
            if channel.generation == generation {
                channel.abort = Some(abort);
                return;
            }
        }
        // The channel was already replaced; stop the orphan reader.
        abort.abort();
    }

    fn notify_activity(&self) {
        self.state.borrow().input_activity.notify_waiters();
    }

    pub(crate) fn assets(&self) -> StaticAssets {
        self.state.borrow().assets.clone()
    }
}
