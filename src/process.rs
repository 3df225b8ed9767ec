//! Starting and stopping companion tools.
//!
//! Starts are fire-and-forget: the child is spawned detached and never
//! awaited, so a slow launcher cannot stall a mode switch. Stops request
//! termination and wait a bounded 5 seconds per matched process for it to
//! exit; there is no further escalation, a stubborn process is logged and
//! left alone.

use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use sysinfo::{Pid, System};
use tracing::{debug, warn};

use crate::config::{Mode, ToolsConfig};

/// Bounded wait for a terminated process to exit.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-executable result of a start pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A process with the executable's base name is already running.
    AlreadyRunning,
    /// The executable does not exist on disk.
    NotFound,
    /// The OS rejected the launch.
    Failed(String),
}

/// Per-name result of a stop pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// Termination was requested but the process outlived [`STOP_TIMEOUT`].
    TimedOut,
    /// No matching process was running.
    NotRunning,
    /// The OS rejected at least one termination request.
    Failed(String),
}

/// Ordered outcomes of one start pass, one entry per configured executable.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StartReport {
    pub entries: Vec<(String, StartOutcome)>,
}

impl StartReport {
    pub fn failures(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter_map(|(path, outcome)| match outcome {
                StartOutcome::Failed(reason) => Some(format!("{path}: {reason}")),
                _ => None,
            })
            .collect()
    }

    pub fn started(&self) -> usize {
        self.entries
            .iter()
            .filter(|(_, o)| *o == StartOutcome::Started)
            .count()
    }
}

/// Ordered outcomes of one stop pass, one entry per configured process name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StopReport {
    pub entries: Vec<(String, StopOutcome)>,
}

impl StopReport {
    pub fn failures(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter_map(|(name, outcome)| match outcome {
                StopOutcome::Failed(reason) => Some(format!("{name}: {reason}")),
                StopOutcome::TimedOut => Some(format!("{name}: still running after timeout")),
                _ => None,
            })
            .collect()
    }

    pub fn stopped(&self) -> usize {
        self.entries
            .iter()
            .filter(|(_, o)| *o == StopOutcome::Stopped)
            .count()
    }
}

/// OS surface the tool manager drives. The real implementation uses sysinfo
/// and std::process; tests substitute a recorder.
pub trait ProcessControl {
    /// Whether any running process matches `name` (case-insensitive, a
    /// trailing `.exe` on either side is ignored).
    fn is_running(&mut self, name: &str) -> bool;

    /// Launch `path` detached. Fire-and-forget: no handle, no exit code.
    fn spawn_detached(&mut self, path: &Path) -> Result<(), String>;

    /// Terminate every process matching `name`, waiting up to
    /// [`STOP_TIMEOUT`] per process for it to exit.
    fn stop_by_name(&mut self, name: &str) -> StopOutcome;
}

/// Case-insensitive process-name comparison that ignores a trailing `.exe`,
/// so config entries written either way match the same processes.
pub fn process_name_matches(running: &str, target: &str) -> bool {
    strip_exe(running).eq_ignore_ascii_case(strip_exe(target))
}

fn strip_exe(name: &str) -> &str {
    if name.len() >= 4 {
        if let Some(suffix) = name.get(name.len() - 4..) {
            if suffix.eq_ignore_ascii_case(".exe") {
                return &name[..name.len() - 4];
            }
        }
    }
    name
}

/// Starts and stops tool sets with common vs mode-specific granularity.
pub struct ToolManager<P: ProcessControl> {
    control: P,
}

impl<P: ProcessControl> ToolManager<P> {
    pub fn new(control: P) -> Self {
        ToolManager { control }
    }

    pub fn control(&self) -> &P {
        &self.control
    }

    /// Start each executable in order. Missing files and already-running
    /// processes are skipped; one failure never aborts the remaining entries.
    pub fn start_all(&mut self, paths: &[String]) -> StartReport {
        let mut report = StartReport::default();

        for path_str in paths {
            let path = Path::new(path_str);
            let outcome = if !path.exists() {
                debug!(path = %path_str, "executable not found, skipping");
                StartOutcome::NotFound
            } else {
                let base = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path_str.clone());

                if self.control.is_running(&base) {
                    debug!(process = %base, "already running, skipping");
                    StartOutcome::AlreadyRunning
                } else {
                    match self.control.spawn_detached(path) {
                        Ok(()) => {
                            debug!(process = %base, "started");
                            StartOutcome::Started
                        }
                        Err(reason) => {
                            warn!(path = %path_str, %reason, "failed to start");
                            StartOutcome::Failed(reason)
                        }
                    }
                }
            };

            report.entries.push((path_str.clone(), outcome));
        }

        report
    }

    /// Stop each named process in order; one failure never aborts the rest.
    pub fn stop_all(&mut self, names: &[String]) -> StopReport {
        let mut report = StopReport::default();

        for name in names {
            let outcome = self.control.stop_by_name(name);
            if let StopOutcome::Failed(reason) = &outcome {
                warn!(process = %name, %reason, "failed to stop");
            }
            report.entries.push((name.clone(), outcome));
        }

        report
    }

    /// Start the common set plus `mode`'s set.
    pub fn start_tools(&mut self, tools: &ToolsConfig, mode: Mode) -> StartReport {
        let mut paths = tools.common.on_start.clone();
        paths.extend(tools.for_mode(mode).on_start.iter().cloned());
        self.start_all(&paths)
    }

    /// Stop the common set plus `mode`'s set.
    pub fn stop_tools(&mut self, tools: &ToolsConfig, mode: Mode) -> StopReport {
        let mut names = tools.common.on_stop.clone();
        names.extend(tools.for_mode(mode).on_stop.iter().cloned());
        self.stop_all(&names)
    }

    /// Start only `mode`'s exclusive set; common tools stay untouched. Used
    /// when transitioning into a mode.
    pub fn start_mode_specific(&mut self, tools: &ToolsConfig, mode: Mode) -> StartReport {
        self.start_all(&tools.for_mode(mode).on_start)
    }

    /// Stop only `mode`'s exclusive set; common tools stay untouched. Used
    /// when transitioning out of a mode.
    pub fn stop_mode_specific(&mut self, tools: &ToolsConfig, mode: Mode) -> StopReport {
        self.stop_all(&tools.for_mode(mode).on_stop)
    }
}

/// Real process control backed by sysinfo.
pub struct SystemProcesses {
    system: System,
}

impl SystemProcesses {
    pub fn new() -> Self {
        SystemProcesses {
            system: System::new(),
        }
    }

    fn wait_for_exit(&mut self, pid: Pid, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.system.refresh_processes();
            if !self.system.processes().contains_key(&pid) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(100));
        }
    }
}

impl Default for SystemProcesses {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessControl for SystemProcesses {
    fn is_running(&mut self, name: &str) -> bool {
        self.system.refresh_processes();
        self.system
            .processes()
            .values()
            .any(|p| process_name_matches(p.name(), name))
    }

    fn spawn_detached(&mut self, path: &Path) -> Result<(), String> {
        let mut command = Command::new(path);
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                command.current_dir(dir);
            }
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // The child handle is dropped on purpose; starts are not awaited.
        command.spawn().map(|_| ()).map_err(|e| e.to_string())
    }

    fn stop_by_name(&mut self, name: &str) -> StopOutcome {
        self.system.refresh_processes();

        let pids: Vec<Pid> = self
            .system
            .processes()
            .iter()
            .filter(|(_, p)| process_name_matches(p.name(), name))
            .map(|(pid, _)| *pid)
            .collect();

        if pids.is_empty() {
            return StopOutcome::NotRunning;
        }

        let mut rejected = 0usize;
        let mut timed_out = 0usize;

        for pid in pids {
            let Some(process) = self.system.processes().get(&pid) else {
                continue; // exited between refresh and kill
            };

            if !process.kill() {
                rejected += 1;
                warn!(process = %name, pid = %pid, "termination request rejected");
                continue;
            }

            if !self.wait_for_exit(pid, STOP_TIMEOUT) {
                timed_out += 1;
                warn!(process = %name, pid = %pid, "did not exit within timeout");
            }
        }

        if rejected > 0 {
            StopOutcome::Failed(format!("{rejected} termination request(s) rejected"))
        } else if timed_out > 0 {
            StopOutcome::TimedOut
        } else {
            StopOutcome::Stopped
        }
    }
}
