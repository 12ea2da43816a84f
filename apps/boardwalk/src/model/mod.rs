pub mod buffer;

pub use buffer::PixelBuffer;

pub type SurfaceId = u32;

/// Axis-aligned rectangle in surface coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Server-side record of one client-visible window.
///
/// `last_buffer` holds the pixels most recently pushed to the client, so a
/// later update can be sent as a delta and a reconnecting client can be
/// replayed the current content. `last_synced` says whether the client has
/// received any pixels for this surface since it (re)connected.
#[derive(Debug)]
pub struct Surface {
    pub id: SurfaceId,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub is_temp: bool,
    pub visible: bool,
    pub transient_for: Option<SurfaceId>,
    pub last_synced: bool,
    pub last_buffer: Option<PixelBuffer>,
}

impl Surface {
    pub fn new(id: SurfaceId, x: i32, y: i32, width: i32, height: i32, is_temp: bool) -> Self {
        Self {
            id,
            x,
            y,
            width,
            height,
            is_temp,
            visible: false,
            transient_for: None,
            last_synced: false,
            last_buffer: None,
        }
    }
}
