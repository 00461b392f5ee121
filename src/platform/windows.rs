use std::os::windows::process::CommandExt;
use std::path::Path;
use std::time::Duration;

use windows::Win32::Foundation::{CloseHandle, HANDLE, HWND, LPARAM, POINT, STILL_ACTIVE, WPARAM};
use windows::Win32::Graphics::Gdi::{ClientToScreen, CLR_INVALID, GetDC, GetPixel, ReleaseDC};
use windows::Win32::System::SystemServices::MK_LBUTTON;
use windows::Win32::System::Threading::{
    GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_SYNCHRONIZE,
    PROCESS_TERMINATE, TerminateProcess,
};
use windows::Win32::UI::Input::KeyboardAndMouse::{MAPVK_VK_TO_VSC, MapVirtualKeyW};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetForegroundWindow, GetWindowThreadProcessId, IsWindow, IsWindowVisible,
    PostMessageW, SW_MINIMIZE, SW_RESTORE, SetForegroundWindow, ShowWindow,
    WM_KEYDOWN, WM_KEYUP, WM_LBUTTONDBLCLK, WM_LBUTTONDOWN, WM_LBUTTONUP, WaitForInputIdle,
};
use windows::core::BOOL;

use super::{Automation, AutomationError, ClientPoint, Rgb, ShowMode, VirtualKey, WindowHandle};

const WAIT_OBJECT_0: u32 = 0;

pub struct NativeAutomation;

fn hwnd(window: WindowHandle) -> HWND {
    HWND(window.0 as *mut _)
}

fn os_error(op: &'static str, err: windows::core::Error) -> AutomationError {
    AutomationError::Os {
        op,
        message: err.message(),
    }
}

fn client_lparam(at: ClientPoint) -> LPARAM {
    LPARAM((((at.y & 0xFFFF) << 16) | (at.x & 0xFFFF)) as isize)
}

/// `COLORREF` is laid out 0x00BBGGRR.
fn colorref_rgb(raw: u32) -> Rgb {
    Rgb::new(
        (raw & 0xFF) as u8,
        ((raw >> 8) & 0xFF) as u8,
        ((raw >> 16) & 0xFF) as u8,
    )
}

/// Owned process handle closed on drop.
struct ProcessHandle(HANDLE);

impl ProcessHandle {
    fn open(pid: u32, access: windows::Win32::System::Threading::PROCESS_ACCESS_RIGHTS) -> Option<Self> {
        unsafe { OpenProcess(access, false, pid).ok().map(Self) }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

struct WindowSearch {
    pid: u32,
    found: Option<HWND>,
}

unsafe extern "system" fn find_window_cb(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let search = unsafe { &mut *(lparam.0 as *mut WindowSearch) };
    let mut owner: u32 = 0;
    unsafe { GetWindowThreadProcessId(hwnd, Some(&mut owner as *mut u32)) };
    if owner == search.pid && unsafe { IsWindowVisible(hwnd) }.as_bool() {
        search.found = Some(hwnd);
        return BOOL(0);
    }
    BOOL(1)
}

impl Automation for NativeAutomation {
    fn launch(&self, exe: &Path, args: &str) -> Result<u32, AutomationError> {
        let mut cmd = std::process::Command::new(exe);
        // The client parses its own command line positionally, so the tail is
        // handed over untouched instead of being re-quoted per argument.
        cmd.raw_arg(args);
        if let Some(dir) = exe.parent() {
            cmd.current_dir(dir);
        }
        let mut child = cmd.spawn()?;
        let pid = child.id();
        std::thread::spawn(move || {
            let _ = child.wait();
        });
        Ok(pid)
    }

    fn is_process_alive(&self, pid: u32) -> bool {
        if pid == 0 {
            return false;
        }
        let Some(handle) = ProcessHandle::open(pid, PROCESS_QUERY_LIMITED_INFORMATION) else {
            return false;
        };
        let mut code: u32 = 0;
        unsafe { GetExitCodeProcess(handle.0, &mut code) }.is_ok()
            && code == STILL_ACTIVE.0 as u32
    }

    fn kill_process(&self, pid: u32) -> Result<(), AutomationError> {
        let handle = ProcessHandle::open(pid, PROCESS_TERMINATE)
            .ok_or(AutomationError::ProcessNotFound(pid))?;
        unsafe { TerminateProcess(handle.0, 1) }.map_err(|e| os_error("TerminateProcess", e))
    }

    fn wait_for_input_idle(&self, pid: u32, timeout: Duration) -> bool {
        let Some(handle) = ProcessHandle::open(
            pid,
            PROCESS_QUERY_LIMITED_INFORMATION | PROCESS_SYNCHRONIZE,
        ) else {
            return false;
        };
        let millis = timeout.as_millis().min(u32::MAX as u128) as u32;
        unsafe { WaitForInputIdle(handle.0, millis) == WAIT_OBJECT_0 }
    }

    fn find_window(&self, pid: u32) -> Option<WindowHandle> {
        let mut search = WindowSearch { pid, found: None };
        unsafe {
            let _ = EnumWindows(
                Some(find_window_cb),
                LPARAM(&mut search as *mut WindowSearch as isize),
            );
        }
        search.found.map(|h| WindowHandle(h.0 as isize))
    }

    fn is_window(&self, window: WindowHandle) -> bool {
        unsafe { IsWindow(Some(hwnd(window))) }.as_bool()
    }

    fn foreground_window(&self) -> Option<WindowHandle> {
        let h = unsafe { GetForegroundWindow() };
        if h.0.is_null() {
            None
        } else {
            Some(WindowHandle(h.0 as isize))
        }
    }

    fn set_foreground(&self, window: WindowHandle) -> Result<(), AutomationError> {
        if unsafe { SetForegroundWindow(hwnd(window)) }.as_bool() {
            Ok(())
        } else {
            Err(AutomationError::Os {
                op: "SetForegroundWindow",
                message: "request refused".to_string(),
            })
        }
    }

    fn show_window(&self, window: WindowHandle, mode: ShowMode) -> Result<(), AutomationError> {
        let cmd = match mode {
            ShowMode::Restore => SW_RESTORE,
            ShowMode::Minimize => SW_MINIMIZE,
        };
        unsafe {
            let _ = ShowWindow(hwnd(window), cmd);
        }
        Ok(())
    }

    fn double_click(&self, window: WindowHandle, at: ClientPoint) -> Result<(), AutomationError> {
        let target = Some(hwnd(window));
        let pos = client_lparam(at);
        let down = WPARAM(MK_LBUTTON.0 as usize);
        unsafe {
            PostMessageW(target, WM_LBUTTONDOWN, down, pos)
                .map_err(|e| os_error("PostMessageW", e))?;
            PostMessageW(target, WM_LBUTTONUP, WPARAM(0), pos)
                .map_err(|e| os_error("PostMessageW", e))?;
            PostMessageW(target, WM_LBUTTONDBLCLK, down, pos)
                .map_err(|e| os_error("PostMessageW", e))?;
            PostMessageW(target, WM_LBUTTONUP, WPARAM(0), pos)
                .map_err(|e| os_error("PostMessageW", e))?;
        }
        Ok(())
    }

    fn press_key(&self, window: WindowHandle, key: VirtualKey) -> Result<(), AutomationError> {
        let target = Some(hwnd(window));
        let scan = unsafe { MapVirtualKeyW(key.0 as u32, MAPVK_VK_TO_VSC) } as isize;
        let down_flags = LPARAM(1 | (scan << 16));
        let up_flags = LPARAM(1 | (scan << 16) | (1 << 30) | (1 << 31));
        unsafe {
            PostMessageW(target, WM_KEYDOWN, WPARAM(key.0 as usize), down_flags)
                .map_err(|e| os_error("PostMessageW", e))?;
            PostMessageW(target, WM_KEYUP, WPARAM(key.0 as usize), up_flags)
                .map_err(|e| os_error("PostMessageW", e))?;
        }
        Ok(())
    }

    fn sample_pixel(&self, window: WindowHandle, at: ClientPoint) -> Result<Rgb, AutomationError> {
        let target = hwnd(window);
        unsafe {
            let dc = GetDC(Some(target));
            if dc.is_invalid() {
                return Err(AutomationError::WindowGone(window));
            }
            let color = GetPixel(dc, at.x, at.y);
            ReleaseDC(Some(target), dc);
            if color.0 == CLR_INVALID {
                return Err(AutomationError::Os {
                    op: "GetPixel",
                    message: format!("({}, {}) outside clip region", at.x, at.y),
                });
            }
            Ok(colorref_rgb(color.0))
        }
    }

    fn client_to_screen(
        &self,
        window: WindowHandle,
        at: ClientPoint,
    ) -> Result<(i32, i32), AutomationError> {
        let mut point = POINT { x: at.x, y: at.y };
        if unsafe { ClientToScreen(hwnd(window), &mut point) }.as_bool() {
            Ok((point.x, point.y))
        } else {
            Err(AutomationError::WindowGone(window))
        }
    }
}
