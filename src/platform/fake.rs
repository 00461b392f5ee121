//! Scripted in-memory client used by the state machine tests.
//!
//! Every launched "process" owns one window whose pixels are painted with the
//! nominal probe colors of the screen it is currently on. Double-clicking the
//! expected spot advances it to the next screen; pressing the toggle key on
//! the map screen finishes the sequence.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use super::{Automation, AutomationError, ClientPoint, Rgb, ShowMode, VirtualKey, WindowHandle};
use crate::core::connection::probes::{
    AUTOMATION_TOGGLE_KEY, CHARACTER_SELECT, CHARACTER_SLOT, MAP_LOADED, SERVER_ENTRY,
    SERVER_SELECT, ScreenSignature,
};

const SCREENS: [ScreenSignature; 3] = [SERVER_SELECT, CHARACTER_SELECT, MAP_LOADED];
const BLANK: Rgb = Rgb::new(128, 128, 128);

/// Knobs applied to every process the fake launches.
#[derive(Debug, Clone, Default)]
pub struct FakePlan {
    /// `find_window` answers `None` this many times per process.
    pub window_delay: u32,
    /// `set_foreground` never takes effect.
    pub refuse_focus: bool,
    /// The process dies once its window reaches this screen index.
    pub exit_on_screen: Option<usize>,
    pub fail_launch: bool,
    pub panic_on_sample: bool,
    /// Screens never render; every probe reads blank.
    pub stall: bool,
    /// `kill_process` fails as if access were denied.
    pub refuse_kill: bool,
    /// `show_window` fails for live windows.
    pub refuse_show: bool,
}

#[derive(Debug)]
struct FakeProcess {
    alive: bool,
    window_lookups: u32,
    window_shown: bool,
    screen: usize,
    toggled: bool,
}

#[derive(Debug, Default)]
struct FakeState {
    plan: FakePlan,
    next_pid: u32,
    processes: HashMap<u32, FakeProcess>,
    foreground: Option<WindowHandle>,
    launches: Vec<(PathBuf, String)>,
    clicks: Vec<(WindowHandle, ClientPoint)>,
    keys: Vec<(WindowHandle, VirtualKey)>,
    kills: Vec<u32>,
}

#[derive(Debug, Default)]
pub struct FakeAutomation {
    state: Mutex<FakeState>,
}

fn window_of(pid: u32) -> WindowHandle {
    WindowHandle(pid as isize)
}

fn pid_of(window: WindowHandle) -> u32 {
    window.0 as u32
}

impl FakeAutomation {
    pub fn new(plan: FakePlan) -> Self {
        Self {
            state: Mutex::new(FakeState {
                plan,
                next_pid: 1000,
                ..FakeState::default()
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_plan(&self, plan: FakePlan) {
        self.state().plan = plan;
    }

    /// Register a running process that has no window, as a leftover client
    /// would look.
    pub fn spawn_detached(&self) -> u32 {
        let mut state = self.state();
        state.next_pid += 1;
        let pid = state.next_pid;
        state.processes.insert(
            pid,
            FakeProcess {
                alive: true,
                window_lookups: 0,
                window_shown: false,
                screen: 0,
                toggled: false,
            },
        );
        pid
    }

    /// Simulate the client crashing.
    pub fn crash(&self, pid: u32) {
        if let Some(p) = self.state().processes.get_mut(&pid) {
            p.alive = false;
        }
    }

    pub fn launches(&self) -> Vec<(PathBuf, String)> {
        self.state().launches.clone()
    }

    pub fn clicks(&self) -> Vec<(WindowHandle, ClientPoint)> {
        self.state().clicks.clone()
    }

    pub fn keys(&self) -> Vec<(WindowHandle, VirtualKey)> {
        self.state().keys.clone()
    }

    pub fn kills(&self) -> Vec<u32> {
        self.state().kills.clone()
    }

    pub fn is_toggled(&self, pid: u32) -> bool {
        self.state().processes.get(&pid).is_some_and(|p| p.toggled)
    }
}

impl FakeState {
    fn live_window(&mut self, window: WindowHandle) -> Result<&mut FakeProcess, AutomationError> {
        match self.processes.get_mut(&pid_of(window)) {
            Some(p) if p.alive && p.window_shown => Ok(p),
            _ => Err(AutomationError::WindowGone(window)),
        }
    }
}

impl Automation for FakeAutomation {
    fn launch(&self, exe: &Path, args: &str) -> Result<u32, AutomationError> {
        let mut state = self.state();
        if state.plan.fail_launch {
            return Err(AutomationError::Os {
                op: "launch",
                message: "scripted launch failure".to_string(),
            });
        }
        state.launches.push((exe.to_path_buf(), args.to_string()));
        state.next_pid += 1;
        let pid = state.next_pid;
        state.processes.insert(
            pid,
            FakeProcess {
                alive: true,
                window_lookups: 0,
                window_shown: false,
                screen: 0,
                toggled: false,
            },
        );
        Ok(pid)
    }

    fn is_process_alive(&self, pid: u32) -> bool {
        let mut state = self.state();
        let exit_on = state.plan.exit_on_screen;
        match state.processes.get_mut(&pid) {
            Some(p) => {
                if p.alive && p.window_shown && exit_on == Some(p.screen) {
                    p.alive = false;
                }
                p.alive
            }
            None => false,
        }
    }

    fn kill_process(&self, pid: u32) -> Result<(), AutomationError> {
        let mut state = self.state();
        if state.plan.refuse_kill {
            return Err(AutomationError::Os {
                op: "kill",
                message: "access denied".to_string(),
            });
        }
        match state.processes.get_mut(&pid) {
            Some(p) if p.alive => {
                p.alive = false;
                state.kills.push(pid);
                Ok(())
            }
            _ => Err(AutomationError::ProcessNotFound(pid)),
        }
    }

    fn wait_for_input_idle(&self, pid: u32, _timeout: Duration) -> bool {
        self.state().processes.get(&pid).is_some_and(|p| p.alive)
    }

    fn find_window(&self, pid: u32) -> Option<WindowHandle> {
        let mut state = self.state();
        let delay = state.plan.window_delay;
        let p = state.processes.get_mut(&pid)?;
        if !p.alive {
            return None;
        }
        if p.window_lookups < delay {
            p.window_lookups += 1;
            return None;
        }
        p.window_shown = true;
        Some(window_of(pid))
    }

    fn is_window(&self, window: WindowHandle) -> bool {
        self.state().live_window(window).is_ok()
    }

    fn foreground_window(&self) -> Option<WindowHandle> {
        self.state().foreground
    }

    fn set_foreground(&self, window: WindowHandle) -> Result<(), AutomationError> {
        let mut state = self.state();
        state.live_window(window)?;
        if !state.plan.refuse_focus {
            state.foreground = Some(window);
        }
        Ok(())
    }

    fn show_window(&self, window: WindowHandle, _mode: ShowMode) -> Result<(), AutomationError> {
        let mut state = self.state();
        let refuse = state.plan.refuse_show;
        state.live_window(window)?;
        if refuse {
            return Err(AutomationError::Os {
                op: "show",
                message: "request refused".to_string(),
            });
        }
        Ok(())
    }

    fn double_click(&self, window: WindowHandle, at: ClientPoint) -> Result<(), AutomationError> {
        let mut state = self.state();
        state.clicks.push((window, at));
        let p = state.live_window(window)?;
        let expected = match p.screen {
            0 => Some(SERVER_ENTRY),
            1 => Some(CHARACTER_SLOT),
            _ => None,
        };
        if expected == Some(at) {
            p.screen += 1;
        }
        Ok(())
    }

    fn press_key(&self, window: WindowHandle, key: VirtualKey) -> Result<(), AutomationError> {
        let mut state = self.state();
        state.keys.push((window, key));
        let p = state.live_window(window)?;
        if p.screen == 2 && key == AUTOMATION_TOGGLE_KEY {
            p.toggled = true;
        }
        Ok(())
    }

    fn sample_pixel(&self, window: WindowHandle, at: ClientPoint) -> Result<Rgb, AutomationError> {
        let mut state = self.state();
        if state.plan.panic_on_sample {
            drop(state);
            panic!("scripted sampling panic");
        }
        let stall = state.plan.stall;
        let p = state.live_window(window)?;
        if stall {
            return Ok(BLANK);
        }
        Ok(SCREENS[p.screen.min(SCREENS.len() - 1)]
            .probe_at(at)
            .map(|probe| probe.nominal())
            .unwrap_or(BLANK))
    }

    fn client_to_screen(
        &self,
        window: WindowHandle,
        at: ClientPoint,
    ) -> Result<(i32, i32), AutomationError> {
        self.state().live_window(window)?;
        Ok((at.x + 100, at.y + 100))
    }
}
