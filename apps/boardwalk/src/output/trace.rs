//! Development collaborators: an output sink and an event sink that log
//! what they are handed. The dev binary runs with these so the whole
//! pipeline can be watched without a real renderer attached.

use tracing::{debug, info};

use crate::model::{Rect, SurfaceId};
use crate::output::{
    DisplayOutput, OutputConnection, OutputFactory, WireFormat,
};
use crate::protocol::InputMessage;
use crate::server::EventSink;

pub struct TraceOutput {
    // Held so the peer's socket stays open even though nothing is written.
    _connection: OutputConnection,
    serial: u32,
}

impl TraceOutput {
    fn command(&mut self, name: &str, detail: &str) -> u32 {
        let serial = self.serial;
        self.serial += 1;
        debug!(target: "boardwalk::output", serial, %name, %detail, "output command");
        serial
    }
}

impl DisplayOutput for TraceOutput {
    fn create_surface(
        &mut self,
        id: SurfaceId,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        is_temp: bool,
    ) {
        self.command(
            "create_surface",
            &format!("id={id} geo={x},{y} {width}x{height} temp={is_temp}"),
        );
    }

    fn destroy_surface(&mut self, id: SurfaceId) {
        self.command("destroy_surface", &format!("id={id}"));
    }

    fn show_surface(&mut self, id: SurfaceId) {
        self.command("show_surface", &format!("id={id}"));
    }

    fn hide_surface(&mut self, id: SurfaceId) {
        self.command("hide_surface", &format!("id={id}"));
    }

    fn set_transient_for(&mut self, id: SurfaceId, parent: SurfaceId) {
        self.command("set_transient_for", &format!("id={id} parent={parent}"));
    }

    fn move_resize_surface(
        &mut self,
        id: SurfaceId,
        with_move: bool,
        x: i32,
        y: i32,
        with_resize: bool,
        width: i32,
        height: i32,
    ) {
        self.command(
            "move_resize_surface",
            &format!(
                "id={id} move={with_move} pos={x},{y} resize={with_resize} size={width}x{height}"
            ),
        );
    }

    fn put_rgb(
        &mut self,
        id: SurfaceId,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        stride: i32,
        data: &[u8],
    ) {
        self.command(
            "put_rgb",
            &format!(
                "id={id} at={x},{y} {width}x{height} stride={stride} bytes={}",
                data.len()
            ),
        );
    }

    fn put_rgba(
        &mut self,
        id: SurfaceId,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        stride: i32,
        data: &[u8],
    ) {
        self.command(
            "put_rgba",
            &format!(
                "id={id} at={x},{y} {width}x{height} stride={stride} bytes={}",
                data.len()
            ),
        );
    }

    fn copy_rectangles(&mut self, id: SurfaceId, rects: &[Rect], dx: i32, dy: i32) {
        self.command(
            "copy_rectangles",
            &format!("id={id} rects={} delta={dx},{dy}", rects.len()),
        );
    }

    fn grab_pointer(&mut self, id: SurfaceId, owner_events: bool) {
        self.command("grab_pointer", &format!("id={id} owner_events={owner_events}"));
    }

    fn ungrab_pointer(&mut self) -> u32 {
        self.command("ungrab_pointer", "")
    }

    fn pong(&mut self) {
        self.command("pong", "");
    }

    fn flush(&mut self) -> bool {
        true
    }

    fn next_serial(&self) -> u32 {
        self.serial
    }
}

pub struct TraceOutputFactory;

impl OutputFactory for TraceOutputFactory {
    fn create(
        &self,
        connection: OutputConnection,
        start_serial: u32,
        format: WireFormat,
    ) -> Box<dyn DisplayOutput> {
        info!(
            target: "boardwalk::output",
            start_serial,
            ?format,
            "client connected, logging output commands"
        );
        Box::new(TraceOutput {
            _connection: connection,
            serial: start_serial,
        })
    }
}

/// Logs every dispatched input message.
pub struct TraceEventSink;

impl EventSink for TraceEventSink {
    fn got_event(&self, message: &InputMessage) {
        info!(
            target: "boardwalk::events",
            serial = message.serial,
            time = message.time,
            event = ?message.event,
            "input event"
        );
    }
}
