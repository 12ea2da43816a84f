pub mod handshake;
pub mod wire;
pub mod ws;

/// Subprotocol name announced in both handshake generations.
pub const PROTOCOL_NAME: &str = "broadway";

/// Fixed GUID appended to `Sec-WebSocket-Key` for the v7+ accept token.
pub const HANDSHAKE_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

pub const PATH_ROOT: &str = "/";
pub const PATH_CLIENT_HTML: &str = "/client.html";
pub const PATH_CLIENT_JS: &str = "/broadway.js";
pub const PATH_SOCKET: &str = "/socket";
pub const PATH_SOCKET_BIN: &str = "/socket-bin";

/// Request heads larger than this are rejected outright.
pub const MAX_REQUEST_BYTES: usize = 5 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventKind {
    Enter = b'e',
    Leave = b'l',
    PointerMove = b'm',
    ButtonPress = b'b',
    ButtonRelease = b'B',
    Scroll = b's',
    KeyPress = b'k',
    KeyRelease = b'K',
    GrabNotify = b'g',
    UngrabNotify = b'u',
    ConfigureNotify = b'w',
    DeleteNotify = b'W',
    ScreenSizeChanged = b'd',
}

impl EventKind {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'e' => Some(Self::Enter),
            b'l' => Some(Self::Leave),
            b'm' => Some(Self::PointerMove),
            b'b' => Some(Self::ButtonPress),
            b'B' => Some(Self::ButtonRelease),
            b's' => Some(Self::Scroll),
            b'k' => Some(Self::KeyPress),
            b'K' => Some(Self::KeyRelease),
            b'g' => Some(Self::GrabNotify),
            b'u' => Some(Self::UngrabNotify),
            b'w' => Some(Self::ConfigureNotify),
            b'W' => Some(Self::DeleteNotify),
            b'd' => Some(Self::ScreenSizeChanged),
            _ => None,
        }
    }
}

/// Shared payload of every pointer-bearing event. Window ids are the
/// client's echo of ids the server allocated; 0 means "no window".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PointerData {
    pub mouse_surface: u32,
    pub event_surface: u32,
    pub root_x: i32,
    pub root_y: i32,
    pub win_x: i32,
    pub win_y: i32,
    pub state: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyData {
    pub mouse_surface: u32,
    pub keysym: u32,
    pub state: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Enter { pointer: PointerData, mode: i32 },
    Leave { pointer: PointerData, mode: i32 },
    PointerMove { pointer: PointerData },
    ButtonPress { pointer: PointerData, button: u32 },
    ButtonRelease { pointer: PointerData, button: u32 },
    Scroll { pointer: PointerData, dir: i32 },
    KeyPress { key: KeyData },
    KeyRelease { key: KeyData },
    GrabNotify { status: i32 },
    UngrabNotify { status: i32 },
    ConfigureNotify { surface: u32, x: i32, y: i32, width: i32, height: i32 },
    DeleteNotify { surface: u32 },
    ScreenSizeChanged { width: i32, height: i32 },
    /// Tag the parser did not recognize. Kept in the queue so serial
    /// bookkeeping stays intact; consumers are expected to skip it.
    Unknown { tag: u8 },
}

impl InputEvent {
    pub fn kind(&self) -> Option<EventKind> {
        match self {
            InputEvent::Enter { .. } => Some(EventKind::Enter),
            InputEvent::Leave { .. } => Some(EventKind::Leave),
            InputEvent::PointerMove { .. } => Some(EventKind::PointerMove),
            InputEvent::ButtonPress { .. } => Some(EventKind::ButtonPress),
            InputEvent::ButtonRelease { .. } => Some(EventKind::ButtonRelease),
            InputEvent::Scroll { .. } => Some(EventKind::Scroll),
            InputEvent::KeyPress { .. } => Some(EventKind::KeyPress),
            InputEvent::KeyRelease { .. } => Some(EventKind::KeyRelease),
            InputEvent::GrabNotify { .. } => Some(EventKind::GrabNotify),
            InputEvent::UngrabNotify { .. } => Some(EventKind::UngrabNotify),
            InputEvent::ConfigureNotify { .. } => Some(EventKind::ConfigureNotify),
            InputEvent::DeleteNotify { .. } => Some(EventKind::DeleteNotify),
            InputEvent::ScreenSizeChanged { .. } => Some(EventKind::ScreenSizeChanged),
            InputEvent::Unknown { .. } => None,
        }
    }

    pub fn pointer(&self) -> Option<&PointerData> {
        match self {
            InputEvent::Enter { pointer, .. }
            | InputEvent::Leave { pointer, .. }
            | InputEvent::PointerMove { pointer }
            | InputEvent::ButtonPress { pointer, .. }
            | InputEvent::ButtonRelease { pointer, .. }
            | InputEvent::Scroll { pointer, .. } => Some(pointer),
            _ => None,
        }
    }
}

/// One fully parsed input message. `time` has already been normalized into
/// the server's clock domain by the owning channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputMessage {
    pub serial: u32,
    pub time: u32,
    pub event: InputEvent,
}

impl InputMessage {
    pub fn kind(&self) -> Option<EventKind> {
        self.event.kind()
    }
}
