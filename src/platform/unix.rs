use std::path::Path;
use std::time::Duration;

use super::{Automation, AutomationError, ClientPoint, Rgb, ShowMode, VirtualKey, WindowHandle};

/// Process control works; everything window related reports `Unsupported`
/// because the target client only ships for Windows.
pub struct NativeAutomation;

impl Automation for NativeAutomation {
    fn launch(&self, exe: &Path, args: &str) -> Result<u32, AutomationError> {
        let mut child = std::process::Command::new(exe)
            .args(args.split(' ').filter(|part| !part.is_empty()))
            .stdin(std::process::Stdio::null())
            .spawn()?;
        let pid = child.id();
        // Reap in the background so a dead client never lingers as a zombie
        // that `kill -0` would still report as alive.
        std::thread::spawn(move || {
            let _ = child.wait();
        });
        Ok(pid)
    }

    fn is_process_alive(&self, pid: u32) -> bool {
        if pid == 0 {
            return false;
        }
        std::process::Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    fn kill_process(&self, pid: u32) -> Result<(), AutomationError> {
        let out = std::process::Command::new("kill")
            .arg("-15")
            .arg(pid.to_string())
            .output()?;
        if out.status.success() {
            Ok(())
        } else {
            Err(AutomationError::ProcessNotFound(pid))
        }
    }

    fn wait_for_input_idle(&self, _pid: u32, _timeout: Duration) -> bool {
        false
    }

    fn find_window(&self, _pid: u32) -> Option<WindowHandle> {
        None
    }

    fn is_window(&self, _window: WindowHandle) -> bool {
        false
    }

    fn foreground_window(&self) -> Option<WindowHandle> {
        None
    }

    fn set_foreground(&self, _window: WindowHandle) -> Result<(), AutomationError> {
        Err(AutomationError::Unsupported("set_foreground"))
    }

    fn show_window(&self, _window: WindowHandle, _mode: ShowMode) -> Result<(), AutomationError> {
        Err(AutomationError::Unsupported("show_window"))
    }

    fn double_click(&self, _window: WindowHandle, _at: ClientPoint) -> Result<(), AutomationError> {
        Err(AutomationError::Unsupported("double_click"))
    }

    fn press_key(&self, _window: WindowHandle, _key: VirtualKey) -> Result<(), AutomationError> {
        Err(AutomationError::Unsupported("press_key"))
    }

    fn sample_pixel(&self, _window: WindowHandle, _at: ClientPoint) -> Result<Rgb, AutomationError> {
        Err(AutomationError::Unsupported("sample_pixel"))
    }

    fn client_to_screen(
        &self,
        _window: WindowHandle,
        _at: ClientPoint,
    ) -> Result<(i32, i32), AutomationError> {
        Err(AutomationError::Unsupported("client_to_screen"))
    }
}
