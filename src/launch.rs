//! Spawning CUDs as separate processes.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::{Child, Command};

use tracing::info;

use crate::config::{CudConfig, LaunchTarget};
use crate::error::LaunchError;

pub const INVALID_ARGS_TEXT: &str = "Invalid arguments provided.";

/// Builds and spawns the process behind each configured CUD.
pub struct Launcher<'a> {
    cfg: &'a CudConfig,
    exe: PathBuf,
    config_path: Option<PathBuf>,
}

impl<'a> Launcher<'a> {
    pub fn new(cfg: &'a CudConfig) -> Self {
        let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("cud-launcher"));
        Self {
            cfg,
            exe,
            config_path: None,
        }
    }

    /// Executable re-invoked for native orbit screens.
    pub fn with_exe<P: Into<PathBuf>>(mut self, exe: P) -> Self {
        self.exe = exe.into();
        self
    }

    /// Config file passed on to native orbit screens.
    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: Option<P>) -> Self {
        self.config_path = path.map(Into::into);
        self
    }

    pub fn cud_names(&self) -> &[String] {
        &self.cfg.cud_ids
    }

    /// The command that launches `id`, not yet spawned.
    pub fn command_for(&self, id: &str) -> Result<Command, LaunchError> {
        let target = self
            .cfg
            .launch_target(id)
            .ok_or_else(|| LaunchError::UnknownCud(id.to_string()))?;
        match target {
            LaunchTarget::Pydm(file) => {
                let mut words = self.cfg.paths.pydm_command.split_whitespace();
                let program = words
                    .next()
                    .ok_or_else(|| LaunchError::BadCommand(self.cfg.paths.pydm_command.clone()))?;
                let mut cmd = Command::new(program);
                cmd.args(words).arg(self.cfg.paths.repo_root.join(file));
                Ok(cmd)
            }
            LaunchTarget::Command(line) => {
                if line.trim().is_empty() {
                    return Err(LaunchError::BadCommand(line));
                }
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(line);
                Ok(cmd)
            }
            LaunchTarget::Orbit(_) => {
                let mut cmd = Command::new(&self.exe);
                if let Some(path) = &self.config_path {
                    cmd.arg("--config").arg(path);
                }
                cmd.arg("--screen").arg(id);
                Ok(cmd)
            }
        }
    }

    /// Spawn `id` without waiting for it.
    pub fn run_cud(&self, id: &str) -> Result<Child, LaunchError> {
        let mut cmd = self.command_for(id)?;
        let line = command_line(&cmd);
        info!(cud = id, command = %line, "launching CUD");
        cmd.spawn().map_err(|source| LaunchError::Spawn { command: line, source })
    }

    /// Usage text listing every CUD.
    pub fn usage(&self) -> String {
        let mut out = String::from("Usage:\n  $ cud-launcher [CUD_NAME]\n  where [CUD_NAME] is one of:\n");
        for name in &self.cfg.cud_ids {
            let _ = writeln!(out, "  * {name}");
        }
        out
    }
}

/// Space-joined program and arguments, for logs and errors.
pub fn command_line(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|s| s.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

