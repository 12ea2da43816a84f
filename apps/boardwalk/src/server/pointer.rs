//! Pointer and grab state.
//!
//! Two views of the pointer are kept. The dispatched view (`last_*`,
//! `mouse_in_surface`) advances only as events are handed to the embedder,
//! so queries between dispatches see a consistent past. The future view
//! advances at parse time and answers live position queries while input
//! is still queued.

use crate::model::SurfaceId;
use crate::protocol::{InputEvent, PointerData};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabStatus {
    Success,
    AlreadyGrabbed,
}

#[derive(Debug, Clone, Copy)]
pub struct PointerGrab {
    pub surface: SurfaceId,
    pub owner_events: bool,
    pub time: u32,
}

#[derive(Debug, Default)]
pub struct PointerState {
    pub last_x: i32,
    pub last_y: i32,
    pub last_state: u32,
    /// Surface the pointer logically occupies, as of the last dispatched
    /// crossing event. Zero when over no toplevel.
    pub mouse_in_surface: SurfaceId,
    /// Surface the pointer is physically over, ignoring grabs.
    pub real_mouse_in_surface: SurfaceId,
    pub future_root_x: i32,
    pub future_root_y: i32,
    pub future_state: u32,
    pub future_mouse_in_surface: SurfaceId,
    pub grab: Option<PointerGrab>,
}

impl PointerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse-time update from a freshly decoded pointer payload.
    pub fn update_future(&mut self, pointer: &PointerData) {
        self.future_root_x = pointer.root_x;
        self.future_root_y = pointer.root_y;
        self.future_state = pointer.state;
        self.future_mouse_in_surface = pointer.mouse_surface;
    }

    /// Dispatch-time update, applied just before an event reaches the
    /// embedder.
    pub fn update_dispatched(&mut self, event: &InputEvent) {
        match event {
            InputEvent::Enter { pointer, .. } => {
                self.track(pointer);
                self.mouse_in_surface = pointer.event_surface;
            }
            InputEvent::Leave { pointer, .. } => {
                self.track(pointer);
                self.mouse_in_surface = 0;
            }
            InputEvent::PointerMove { pointer }
            | InputEvent::ButtonPress { pointer, .. }
            | InputEvent::ButtonRelease { pointer, .. }
            | InputEvent::Scroll { pointer, .. } => {
                self.track(pointer);
            }
            InputEvent::KeyPress { key } | InputEvent::KeyRelease { key } => {
                self.last_state = key.state;
            }
            InputEvent::GrabNotify { .. }
            | InputEvent::UngrabNotify { .. }
            | InputEvent::ConfigureNotify { .. }
            | InputEvent::DeleteNotify { .. }
            | InputEvent::ScreenSizeChanged { .. }
            | InputEvent::Unknown { .. } => {}
        }
    }

    fn track(&mut self, pointer: &PointerData) {
        self.last_x = pointer.root_x;
        self.last_y = pointer.root_y;
        self.last_state = pointer.state;
        self.real_mouse_in_surface = pointer.mouse_surface;
    }

    /// True when an existing grab outranks a request stamped `time`.
    /// A zero timestamp never loses.
    pub fn grab_blocks(&self, time: u32) -> bool {
        matches!(self.grab, Some(grab) if time != 0 && grab.time > time)
    }

    /// Forget a hidden surface as the pointer occupant.
    pub fn leave_surface(&mut self, id: SurfaceId) {
        if self.mouse_in_surface == id {
            self.mouse_in_surface = 0;
        }
    }

    /// Drop every reference to a destroyed surface.
    pub fn forget_surface(&mut self, id: SurfaceId) {
        self.leave_surface(id);
        if matches!(self.grab, Some(grab) if grab.surface == id) {
            self.grab = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::KeyData;

    fn pointer_at(surface: SurfaceId, x: i32, y: i32) -> PointerData {
        PointerData {
            mouse_surface: surface,
            event_surface: surface,
            root_x: x,
            root_y: y,
            win_x: x,
            win_y: y,
            state: 0x10,
        }
    }

    #[test]
    fn crossing_events_move_the_dispatched_view() {
        let mut state = PointerState::new();
        state.update_dispatched(&InputEvent::Enter {
            pointer: pointer_at(3, 100, 50),
            mode: 0,
        });
        assert_eq!(state.mouse_in_surface, 3);
        assert_eq!((state.last_x, state.last_y), (100, 50));

        state.update_dispatched(&InputEvent::Leave {
            pointer: pointer_at(3, 120, 60),
            mode: 0,
        });
        assert_eq!(state.mouse_in_surface, 0);
        assert_eq!(state.real_mouse_in_surface, 3);
    }

    #[test]
    fn key_events_only_touch_modifier_state() {
        let mut state = PointerState::new();
        state.last_x = 7;
        state.update_dispatched(&InputEvent::KeyPress {
            key: KeyData {
                mouse_surface: 9,
                keysym: 0x61,
                state: 0x4,
            },
        });
        assert_eq!(state.last_state, 0x4);
        assert_eq!(state.last_x, 7);
        assert_eq!(state.mouse_in_surface, 0);
    }

    #[test]
    fn newer_grab_blocks_older_request() {
        let mut state = PointerState::new();
        state.grab = Some(PointerGrab {
            surface: 2,
            owner_events: false,
            time: 500,
        });
        assert!(state.grab_blocks(400));
        assert!(!state.grab_blocks(500));
        assert!(!state.grab_blocks(600));
        // Zero means "now" and always proceeds.
        assert!(!state.grab_blocks(0));
    }

    #[test]
    fn forget_surface_clears_grab_and_occupancy() {
        let mut state = PointerState::new();
        state.mouse_in_surface = 4;
        state.grab = Some(PointerGrab {
            surface: 4,
            owner_events: true,
            time: 10,
        });
        state.forget_surface(4);
        assert_eq!(state.mouse_in_surface, 0);
        assert!(state.grab.is_none());
    }
}
