//! `cud-launcher`: spawn FACET-II CUDs, or run a native orbit screen in-process.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use facet_cud::launch::{Launcher, INVALID_ARGS_TEXT};
use facet_cud::remote::{load_defaults, RemoteControl, SystemRunner};
use facet_cud::{CudApp, CudConfig, PvBus};

#[derive(Parser, Debug)]
#[command(name = "cud-launcher", about = "Launch FACET-II CUDs")]
struct Cli {
    /// CUD to launch
    cud: Option<String>,

    /// YAML configuration (defaults to the built-in one)
    #[arg(long)]
    config: Option<PathBuf>,

    /// List every CUD and exit
    #[arg(long)]
    list: bool,

    /// Run the native orbit screen of this CUD in this process
    #[arg(long, value_name = "CUD_NAME")]
    screen: Option<String>,

    /// Feed the orbit screen from a simulated beam
    #[arg(long, requires = "screen")]
    simulate: bool,

    /// Put the CUD on this ACR monitor instead of the local display
    #[arg(long, value_name = "MONITOR", requires = "cud")]
    monitor: Option<String>,

    /// Kill whatever runs on these ACR monitors
    #[arg(long, value_name = "MONITOR", num_args = 1..)]
    kill: Vec<String>,

    /// Send every ACR monitor its default CUD from the defaults file
    #[arg(long)]
    defaults: bool,
}

/// Monitor bookkeeping for `--monitor`, `--kill` and `--defaults`.
fn remote(cli: &Cli, cfg: &CudConfig, launcher: &Launcher<'_>) -> ExitCode {
    let bus = PvBus::new();
    let remote = RemoteControl::new(cfg, SystemRunner, &bus, &bus);
    let mut failures = remote.kill_monitors(&cli.kill);

    if let (Some(monitor), Some(cud)) = (&cli.monitor, &cli.cud) {
        if let Err(e) = remote.send_to_monitor(monitor, cud, launcher) {
            failures.push((monitor.clone(), e));
        }
    }
    if cli.defaults {
        match load_defaults(&cfg.defaults_file()) {
            Ok(defaults) => {
                let monitors: Vec<String> = cfg.monitors.large.iter().chain(&cfg.monitors.small).cloned().collect();
                failures.extend(remote.launch_defaults(&monitors, &defaults, launcher));
            }
            Err(e) => {
                error!(path = %cfg.defaults_file().display(), error = %e, "cannot read monitor defaults");
                return ExitCode::FAILURE;
            }
        }
    }

    for (monitor, e) in &failures {
        error!(monitor = %monitor, error = %e, "monitor command failed");
    }
    if failures.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => CudConfig::load(path),
        None => CudConfig::builtin(),
    };
    let cfg = match cfg {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    let launcher = Launcher::new(&cfg).with_config_path(cli.config.clone());

    if cli.list {
        for id in launcher.cud_names() {
            println!("{id}\t{}", cfg.cud_desc(id).unwrap_or(""));
        }
        return ExitCode::SUCCESS;
    }

    if cli.monitor.is_some() || !cli.kill.is_empty() || cli.defaults {
        return remote(&cli, &cfg, &launcher);
    }

    if let Some(id) = &cli.screen {
        let app = match CudApp::from_config(&cfg, id, cli.simulate) {
            Ok(app) => app,
            Err(e) => {
                error!(cud = %id, error = %e, "cannot open orbit screen");
                return ExitCode::FAILURE;
            }
        };
        return match facet_cud::run_orbit_screen(app) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!(error = %e, "window closed with an error");
                ExitCode::FAILURE
            }
        };
    }

    let Some(target) = cli.cud else {
        println!("{INVALID_ARGS_TEXT}");
        println!("{}", launcher.usage());
        return ExitCode::FAILURE;
    };
    println!(" -> Launching FACET-II {target} CUD");
    match launcher.run_cud(&target) {
        Ok(child) => {
            info!(cud = %target, pid = child.id(), "CUD started");
            ExitCode::SUCCESS
        }
        Err(facet_cud::error::LaunchError::UnknownCud(_)) => {
            println!("{INVALID_ARGS_TEXT}");
            println!("{}", launcher.usage());
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(cud = %target, error = %e, "launch failed");
            ExitCode::FAILURE
        }
    }
}
