//! ACR remote-monitor control: put CUDs on the control room's large (LM) and
//! small (SM) monitors, find and place their windows, and take them down again.
//!
//! Each monitor has three bookkeeping PVs under `<pv_root>:<monitor>`:
//! `DISPLAY` (CUD description), `PID` and `WINDOWID`. External programs
//! (`wmctrl`, `kill`) run through a [`CommandRunner`] so they can be swapped out.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{CudConfig, MonitorsConfig};
use crate::error::RemoteError;
use crate::launch::Launcher;
use crate::pv::{PvSource, PvValue, PvWriter};

pub const WINDOW_TITLE_PREFIX: &str = "FACET-II CUD: ";

// ─────────────────────────────────────────────────────────────────────────────
// External commands
// ─────────────────────────────────────────────────────────────────────────────

/// Runs an external program to completion and returns its stdout.
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[String], env: &[(String, String)]) -> Result<String, RemoteError>;
}

/// Runs programs on the local host.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String], env: &[(String, String)]) -> Result<String, RemoteError> {
        let out = Command::new(program)
            .args(args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .output()?;
        if out.status.success() {
            Ok(String::from_utf8_lossy(&out.stdout).into_owned())
        } else {
            Err(RemoteError::CommandFailed {
                command: format!("{} {}", program, args.join(" ")),
                reason: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            })
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Names and geometry
// ─────────────────────────────────────────────────────────────────────────────

pub fn display_pv(cfg: &MonitorsConfig, monitor: &str) -> String {
    format!("{}:{}:DISPLAY", cfg.pv_root, monitor)
}

pub fn pid_pv(cfg: &MonitorsConfig, monitor: &str) -> String {
    format!("{}:{}:PID", cfg.pv_root, monitor)
}

pub fn window_id_pv(cfg: &MonitorsConfig, monitor: &str) -> String {
    format!("{}:{}:WINDOWID", cfg.pv_root, monitor)
}

/// Horizontal offset of a monitor inside its multi-head display:
/// `L`/`A` first head, `R`/`B` second, `C` third, `D` fourth.
pub fn x_offset(cfg: &MonitorsConfig, monitor: &str) -> Result<u32, RemoteError> {
    let head = match monitor.chars().last() {
        Some('L' | 'A') => 0,
        Some('R' | 'B') => 1,
        Some('C') => 2,
        Some('D') => 3,
        _ => return Err(RemoteError::UnknownMonitor(monitor.to_string())),
    };
    Ok(head * cfg.width)
}

pub fn wmctrl_list_args() -> Vec<String> {
    vec!["-lpG".to_string()]
}

pub fn reposition_args(window_id: &str, x: u32, width: u32, height: u32) -> Vec<String> {
    vec![
        "-i".to_string(),
        "-r".to_string(),
        window_id.to_string(),
        "-e".to_string(),
        format!("0,{x},0,{width},{height}"),
    ]
}

pub fn fullscreen_args(window_id: &str) -> Vec<String> {
    vec![
        "-i".to_string(),
        "-r".to_string(),
        window_id.to_string(),
        "-b".to_string(),
        "add,fullscreen".to_string(),
    ]
}

/// Window id of the first `wmctrl -lpG` line containing `title`.
pub fn find_window_id(wmctrl_output: &str, title: &str) -> Option<String> {
    wmctrl_output
        .lines()
        .find(|l| l.contains(title))
        .and_then(|l| l.split_whitespace().next())
        .map(str::to_string)
}

/// Per-monitor default CUD ids from `monitor,cud_id` lines; `#` starts a comment line.
pub fn parse_defaults(text: &str) -> Result<BTreeMap<String, String>, RemoteError> {
    let mut defaults = BTreeMap::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split(',').map(str::trim);
        match (fields.next(), fields.next()) {
            (Some(m), Some(c)) if !m.is_empty() && !c.is_empty() => {
                defaults.insert(m.to_string(), c.to_string());
            }
            _ => {
                return Err(RemoteError::MalformedDefaults {
                    line: i + 1,
                    text: line.to_string(),
                })
            }
        }
    }
    Ok(defaults)
}

pub fn load_defaults(path: &Path) -> Result<BTreeMap<String, String>, RemoteError> {
    parse_defaults(&std::fs::read_to_string(path)?)
}

// ─────────────────────────────────────────────────────────────────────────────
// Remote control
// ─────────────────────────────────────────────────────────────────────────────

pub struct RemoteControl<'a, R: CommandRunner> {
    cfg: &'a CudConfig,
    runner: R,
    source: &'a dyn PvSource,
    writer: &'a dyn PvWriter,
    poll_interval: Duration,
    poll_attempts: usize,
}

impl<'a, R: CommandRunner> RemoteControl<'a, R> {
    pub fn new(cfg: &'a CudConfig, runner: R, source: &'a dyn PvSource, writer: &'a dyn PvWriter) -> Self {
        Self {
            cfg,
            runner,
            source,
            writer,
            poll_interval: Duration::from_millis(500),
            poll_attempts: 60,
        }
    }

    /// How often and how many times to look for a freshly launched window.
    pub fn with_window_polling(mut self, interval: Duration, attempts: usize) -> Self {
        self.poll_interval = interval;
        self.poll_attempts = attempts.max(1);
        self
    }

    fn monitors(&self) -> &MonitorsConfig {
        &self.cfg.monitors
    }

    pub fn is_known(&self, monitor: &str) -> bool {
        let m = self.monitors();
        m.large.iter().chain(&m.small).any(|n| n == monitor)
    }

    fn check_known(&self, monitor: &str) -> Result<(), RemoteError> {
        if self.is_known(monitor) {
            Ok(())
        } else {
            Err(RemoteError::UnknownMonitor(monitor.to_string()))
        }
    }

    /// X display of a monitor, from the sunray mapping file named by the
    /// first four letters of the monitor (`lm21` for `LM21L`).
    pub fn display_name(&self, monitor: &str) -> Result<String, RemoteError> {
        let stem: String = monitor.to_lowercase().chars().take(4).collect();
        let text = std::fs::read_to_string(self.monitors().sunray_dir.join(stem))?;
        Ok(format!("{}0", text.trim()))
    }

    /// Kill whatever runs on `monitor` and clear its bookkeeping PVs.
    pub fn kill_monitor(&self, monitor: &str) -> Result<(), RemoteError> {
        self.check_known(monitor)?;
        let m = self.monitors();
        let pid = match self.source.get(&pid_pv(m, monitor)) {
            Ok(u) => u.value,
            Err(e) => {
                debug!(monitor, error = %e, "no PID recorded");
                return Ok(());
            }
        };
        if !pid.is_set() {
            return Ok(());
        }
        let pid = match &pid {
            PvValue::Scalar(v) => format!("{}", *v as i64),
            PvValue::Text(s) => s.trim().to_string(),
            PvValue::Array(_) => return Ok(()),
        };
        if let Err(e) = self.runner.run("kill", &["-9".to_string(), pid.clone()], &[]) {
            info!(monitor, pid = %pid, error = %e, "nothing running");
        }
        for pv in [display_pv(m, monitor), pid_pv(m, monitor), window_id_pv(m, monitor)] {
            self.writer.put(&pv, PvValue::Text(String::new()))?;
        }
        info!(monitor, "monitor cleared");
        Ok(())
    }

    /// Launch `cud_id` on `monitor`, wait for its window, move it onto the
    /// right head, fullscreen it and record it in the monitor PVs.
    pub fn send_to_monitor(&self, monitor: &str, cud_id: &str, launcher: &Launcher<'_>) -> Result<(), RemoteError> {
        self.check_known(monitor)?;
        let display = self.display_name(monitor)?;
        let env = vec![("DISPLAY".to_string(), display.clone())];
        let mut cmd = launcher.command_for(cud_id)?;
        cmd.env("DISPLAY", &display);
        let child = cmd.spawn().map_err(|source| crate::error::LaunchError::Spawn {
            command: crate::launch::command_line(&cmd),
            source,
        })?;

        let desc = self.cfg.cud_desc(cud_id).unwrap_or(cud_id).to_string();
        let window_id = self.wait_for_window(&desc, &env)?;
        let m = self.monitors();
        let x = x_offset(m, monitor)?;
        for args in [reposition_args(&window_id, x, m.width, m.height), fullscreen_args(&window_id)] {
            self.runner.run("wmctrl", &args, &env)?;
        }

        self.writer.put(&display_pv(m, monitor), PvValue::Text(desc.clone()))?;
        self.writer.put(&pid_pv(m, monitor), PvValue::Text(child.id().to_string()))?;
        self.writer.put(&window_id_pv(m, monitor), PvValue::Text(window_id.clone()))?;
        info!(monitor, cud = cud_id, pid = child.id(), window = %window_id, "CUD sent to monitor");
        Ok(())
    }

    /// Look for a window titled `FACET-II CUD: <desc>`, or just `<desc>`.
    pub fn wait_for_window(&self, desc: &str, env: &[(String, String)]) -> Result<String, RemoteError> {
        let full_title = format!("{WINDOW_TITLE_PREFIX}{desc}");
        for attempt in 0..self.poll_attempts {
            if attempt > 0 {
                thread::sleep(self.poll_interval);
            }
            let listing = match self.runner.run("wmctrl", &wmctrl_list_args(), env) {
                Ok(out) => out,
                Err(e) => {
                    warn!(error = %e, "wmctrl listing failed");
                    continue;
                }
            };
            if let Some(id) = find_window_id(&listing, &full_title).or_else(|| find_window_id(&listing, desc)) {
                return Ok(id);
            }
        }
        Err(RemoteError::WindowNotFound(desc.to_string()))
    }

    /// Kill every monitor in `monitors`, continuing past failures. Returns the failures.
    pub fn kill_monitors(&self, monitors: &[String]) -> Vec<(String, RemoteError)> {
        monitors
            .iter()
            .filter_map(|m| self.kill_monitor(m).err().map(|e| (m.clone(), e)))
            .collect()
    }

    /// Send each monitor its default CUD, continuing past failures. Returns the failures.
    pub fn launch_defaults(
        &self,
        monitors: &[String],
        defaults: &BTreeMap<String, String>,
        launcher: &Launcher<'_>,
    ) -> Vec<(String, RemoteError)> {
        let mut failures = Vec::new();
        for m in monitors {
            let Some(cud) = defaults.get(m) else {
                debug!(monitor = %m, "no default CUD");
                continue;
            };
            if let Err(e) = self.send_to_monitor(m, cud, launcher) {
                warn!(monitor = %m, cud = %cud, error = %e, "launch failed");
                failures.push((m.clone(), e));
            }
        }
        failures
    }
}
