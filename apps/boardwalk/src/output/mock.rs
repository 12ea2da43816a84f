//! Recording collaborators for tests: an output sink that keeps every
//! command it was handed, and an event sink that collects dispatched
//! messages. Both hand out cheap handles onto shared state, matching the
//! single-threaded server model.

use std::cell::RefCell;
use std::rc::Rc;

use tokio::sync::Notify;

use crate::model::{Rect, SurfaceId};
use crate::output::{DisplayOutput, OutputConnection, OutputFactory, WireFormat};
use crate::protocol::InputMessage;
use crate::server::EventSink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputCommand {
    CreateSurface {
        id: SurfaceId,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        is_temp: bool,
    },
    DestroySurface {
        id: SurfaceId,
    },
    ShowSurface {
        id: SurfaceId,
    },
    HideSurface {
        id: SurfaceId,
    },
    SetTransientFor {
        id: SurfaceId,
        parent: SurfaceId,
    },
    MoveResizeSurface {
        id: SurfaceId,
        with_move: bool,
        x: i32,
        y: i32,
        with_resize: bool,
        width: i32,
        height: i32,
    },
    PutRgb {
        id: SurfaceId,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        stride: i32,
        data: Vec<u8>,
    },
    PutRgba {
        id: SurfaceId,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        stride: i32,
        data: Vec<u8>,
    },
    CopyRectangles {
        id: SurfaceId,
        rects: Vec<Rect>,
        dx: i32,
        dy: i32,
    },
    GrabPointer {
        id: SurfaceId,
        owner_events: bool,
    },
    UngrabPointer,
    Pong,
}

#[derive(Debug)]
struct RecordingState {
    commands: Vec<OutputCommand>,
    serial: u32,
    start_serial: u32,
    format: WireFormat,
    flush_ok: bool,
    flushes: u32,
}

/// Test-side view of one recorded output channel. Stays valid after the
/// server drops the sink itself.
#[derive(Clone)]
pub struct RecordingHandle {
    state: Rc<RefCell<RecordingState>>,
}

impl RecordingHandle {
    pub fn commands(&self) -> Vec<OutputCommand> {
        self.state.borrow().commands.clone()
    }

    pub fn clear(&self) {
        self.state.borrow_mut().commands.clear();
    }

    pub fn next_serial(&self) -> u32 {
        self.state.borrow().serial
    }

    pub fn start_serial(&self) -> u32 {
        self.state.borrow().start_serial
    }

    pub fn format(&self) -> WireFormat {
        self.state.borrow().format
    }

    pub fn flushes(&self) -> u32 {
        self.state.borrow().flushes
    }

    /// Makes every later flush report a dead connection.
    pub fn break_connection(&self) {
        self.state.borrow_mut().flush_ok = false;
    }
}

pub struct RecordingOutput {
    // Kept so the peer does not observe a closed stream mid-test.
    _connection: OutputConnection,
    state: Rc<RefCell<RecordingState>>,
}

impl RecordingOutput {
    fn record(&mut self, command: OutputCommand) -> u32 {
        let mut state = self.state.borrow_mut();
        let serial = state.serial;
        state.serial += 1;
        state.commands.push(command);
        serial
    }
}

impl DisplayOutput for RecordingOutput {
    fn create_surface(
        &mut self,
        id: SurfaceId,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        is_temp: bool,
    ) {
        self.record(OutputCommand::CreateSurface {
            id,
            x,
            y,
            width,
            height,
            is_temp,
        });
    }

    fn destroy_surface(&mut self, id: SurfaceId) {
        self.record(OutputCommand::DestroySurface { id });
    }

    fn show_surface(&mut self, id: SurfaceId) {
        self.record(OutputCommand::ShowSurface { id });
    }

    fn hide_surface(&mut self, id: SurfaceId) {
        self.record(OutputCommand::HideSurface { id });
    }

    fn set_transient_for(&mut self, id: SurfaceId, parent: SurfaceId) {
        self.record(OutputCommand::SetTransientFor { id, parent });
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
        self.record(OutputCommand::MoveResizeSurface {
            id,
            with_move,
            x,
            y,
            with_resize,
            width,
            height,
        });
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
        self.record(OutputCommand::PutRgb {
            id,
            x,
            y,
            width,
            height,
            stride,
            data: data.to_vec(),
        });
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
        self.record(OutputCommand::PutRgba {
            id,
            x,
            y,
            width,
            height,
            stride,
            data: data.to_vec(),
        });
    }

    fn copy_rectangles(&mut self, id: SurfaceId, rects: &[Rect], dx: i32, dy: i32) {
        self.record(OutputCommand::CopyRectangles {
            id,
            rects: rects.to_vec(),
            dx,
            dy,
        });
    }

    fn grab_pointer(&mut self, id: SurfaceId, owner_events: bool) {
        self.record(OutputCommand::GrabPointer { id, owner_events });
    }

    fn ungrab_pointer(&mut self) -> u32 {
        self.record(OutputCommand::UngrabPointer)
    }

    fn pong(&mut self) {
        self.record(OutputCommand::Pong);
    }

    fn flush(&mut self) -> bool {
        let mut state = self.state.borrow_mut();
        state.flushes += 1;
        state.flush_ok
    }

    fn next_serial(&self) -> u32 {
        self.state.borrow().serial
    }
}

/// Factory that records every channel it creates.
#[derive(Default)]
pub struct RecordingFactory {
    outputs: Rc<RefCell<Vec<RecordingHandle>>>,
}

impl RecordingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles for all channels created so far, oldest first.
    pub fn outputs(&self) -> Vec<RecordingHandle> {
        self.outputs.borrow().clone()
    }

    pub fn latest(&self) -> Option<RecordingHandle> {
        self.outputs.borrow().last().cloned()
    }

    /// A view that stays usable after the factory moves into the server.
    pub fn watcher(&self) -> RecordingFactoryWatcher {
        RecordingFactoryWatcher {
            outputs: self.outputs.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RecordingFactoryWatcher {
    outputs: Rc<RefCell<Vec<RecordingHandle>>>,
}

impl RecordingFactoryWatcher {
    pub fn outputs(&self) -> Vec<RecordingHandle> {
        self.outputs.borrow().clone()
    }

    pub fn latest(&self) -> Option<RecordingHandle> {
        self.outputs.borrow().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.outputs.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.borrow().is_empty()
    }
}

impl OutputFactory for RecordingFactory {
    fn create(
        &self,
        connection: OutputConnection,
        start_serial: u32,
        format: WireFormat,
    ) -> Box<dyn DisplayOutput> {
        let state = Rc::new(RefCell::new(RecordingState {
            commands: Vec::new(),
            serial: start_serial,
            start_serial,
            format,
            flush_ok: true,
            flushes: 0,
        }));
        self.outputs.borrow_mut().push(RecordingHandle {
            state: state.clone(),
        });
        Box::new(RecordingOutput {
            _connection: connection,
            state,
        })
    }
}

/// Event sink that stores messages and wakes anything waiting on them.
#[derive(Clone, Default)]
pub struct CollectingSink {
    events: Rc<RefCell<Vec<InputMessage>>>,
    notify: Rc<Notify>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<InputMessage> {
        self.events.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }

    /// Waits until at least `count` events have been dispatched.
    pub async fn wait_for(&self, count: usize) {
        loop {
            if self.events.borrow().len() >= count {
                return;
            }
            let notified = self.notify.notified();
            if self.events.borrow().len() >= count {
                return;
            }
            notified.await;
        }
    }
}

impl EventSink for CollectingSink {
    fn got_event(&self, message: &InputMessage) {
        self.events.borrow_mut().push(*message);
        self.notify.notify_waiters();
    }
}
