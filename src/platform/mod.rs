use std::path::Path;
use std::time::Duration;

/// Opaque top-level window handle as reported by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub isize);

/// Coordinate relative to a window's client area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientPoint {
    pub x: i32,
    pub y: i32,
}

impl ClientPoint {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Virtual-key code understood by the target client's message loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualKey(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowMode {
    Restore,
    Minimize,
}

#[derive(Debug, thiserror::Error)]
pub enum AutomationError {
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
    #[error("process {0} not found")]
    ProcessNotFound(u32),
    #[error("window {0:?} is gone")]
    WindowGone(WindowHandle),
    #[error("{op} failed: {message}")]
    Os { op: &'static str, message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Process and window operations the connection state machine drives the
/// game client with. Each OS provides its own `NativeAutomation` so the
/// orchestrator stays free of `#[cfg]` blocks.
///
/// All methods are short, non-blocking OS calls. Anything that waits is done
/// by the caller with `tokio::time::sleep` between calls.
pub trait Automation: Send + Sync {
    /// Spawn `exe` with `args` passed verbatim as the command line tail.
    /// Returns the new process id.
    fn launch(&self, exe: &Path, args: &str) -> Result<u32, AutomationError>;

    fn is_process_alive(&self, pid: u32) -> bool;

    /// Terminate the process identified by `pid`.
    fn kill_process(&self, pid: u32) -> Result<(), AutomationError>;

    /// Wait until the process is ready for input, at most `timeout`.
    /// Returns false on timeout or when the platform has no such notion.
    fn wait_for_input_idle(&self, pid: u32, timeout: Duration) -> bool;

    /// First visible top-level window owned by `pid`.
    fn find_window(&self, pid: u32) -> Option<WindowHandle>;

    fn is_window(&self, window: WindowHandle) -> bool;

    fn foreground_window(&self) -> Option<WindowHandle>;

    /// Ask the OS to bring `window` to the foreground. Success of the request
    /// does not imply focus was granted; callers re-check `foreground_window`.
    fn set_foreground(&self, window: WindowHandle) -> Result<(), AutomationError>;

    fn show_window(&self, window: WindowHandle, mode: ShowMode) -> Result<(), AutomationError>;

    /// Post a left-button double click at a client-relative point.
    fn double_click(&self, window: WindowHandle, at: ClientPoint) -> Result<(), AutomationError>;

    /// Post a keydown/keyup pair for `key`.
    fn press_key(&self, window: WindowHandle, key: VirtualKey) -> Result<(), AutomationError>;

    /// Read the color of a single client-area pixel.
    fn sample_pixel(&self, window: WindowHandle, at: ClientPoint) -> Result<Rgb, AutomationError>;

    fn client_to_screen(
        &self,
        window: WindowHandle,
        at: ClientPoint,
    ) -> Result<(i32, i32), AutomationError>;
}

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::NativeAutomation;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::NativeAutomation;

#[cfg(test)]
pub mod fake;
