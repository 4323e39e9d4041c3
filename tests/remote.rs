use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use facet_cud::config::{CudConfig, MonitorsConfig};
use facet_cud::error::RemoteError;
use facet_cud::pv::{PvBus, PvSource, PvValue, NO_ALARM};
use facet_cud::remote::{
    display_pv, find_window_id, fullscreen_args, parse_defaults, pid_pv, reposition_args, window_id_pv, x_offset,
    CommandRunner, RemoteControl,
};

const WMCTRL: &str = "\
0x03a00007  0 4242   0    0    1920 1080 acr-lm21 FACET-II CUD: Sector 20
0x03c00004  0 4300   1920 0    1920 1080 acr-lm21 Injector
";

type Calls = Rc<RefCell<Vec<(String, Vec<String>)>>>;

#[derive(Clone, Default)]
struct MockRunner {
    calls: Calls,
    listing: String,
}

impl CommandRunner for MockRunner {
    fn run(&self, program: &str, args: &[String], _env: &[(String, String)]) -> Result<String, RemoteError> {
        self.calls.borrow_mut().push((program.to_string(), args.to_vec()));
        if program == "wmctrl" {
            Ok(self.listing.clone())
        } else {
            Err(RemoteError::CommandFailed {
                command: program.to_string(),
                reason: "no such process".to_string(),
            })
        }
    }
}

#[test]
fn monitor_pv_names() {
    let m = MonitorsConfig::default();
    assert_eq!(display_pv(&m, "LM21L"), "CUD:ACR0:LM21L:DISPLAY");
    assert_eq!(pid_pv(&m, "SM22C"), "CUD:ACR0:SM22C:PID");
    assert_eq!(window_id_pv(&m, "LM20R"), "CUD:ACR0:LM20R:WINDOWID");
}

#[test]
fn heads_map_to_offsets() {
    let m = MonitorsConfig::default();
    assert_eq!(x_offset(&m, "LM21L").unwrap(), 0);
    assert_eq!(x_offset(&m, "LM21R").unwrap(), 1920);
    assert_eq!(x_offset(&m, "SM24C").unwrap(), 3840);
    assert_eq!(x_offset(&m, "SM24D").unwrap(), 5760);
    assert!(matches!(x_offset(&m, "LM21"), Err(RemoteError::UnknownMonitor(_))));
}

#[test]
fn wmctrl_arguments() {
    assert_eq!(reposition_args("0x1", 1920, 1920, 1080), vec!["-i", "-r", "0x1", "-e", "0,1920,0,1920,1080"]);
    assert_eq!(fullscreen_args("0x1"), vec!["-i", "-r", "0x1", "-b", "add,fullscreen"]);
}

#[test]
fn window_lookup_by_title() {
    assert_eq!(find_window_id(WMCTRL, "FACET-II CUD: Sector 20").as_deref(), Some("0x03a00007"));
    assert_eq!(find_window_id(WMCTRL, "Injector").as_deref(), Some("0x03c00004"));
    assert_eq!(find_window_id(WMCTRL, "Linac"), None);
}

#[test]
fn defaults_file_parsing() {
    let d = parse_defaults("# monitor,cud\nLM21L, S20\n\nSM22A,injector\n").unwrap();
    assert_eq!(d.get("LM21L").map(String::as_str), Some("S20"));
    assert_eq!(d.get("SM22A").map(String::as_str), Some("injector"));
    assert_eq!(d.len(), 2);
    assert!(matches!(
        parse_defaults("LM21L\n"),
        Err(RemoteError::MalformedDefaults { line: 1, .. })
    ));
}

#[test]
fn kill_clears_monitor_pvs() {
    let cfg = CudConfig::default();
    let bus = PvBus::new();
    bus.publish("CUD:ACR0:LM21L:PID", PvValue::Text("4242".into()), NO_ALARM);
    bus.publish("CUD:ACR0:LM21L:DISPLAY", PvValue::Text("Sector 20".into()), NO_ALARM);
    let runner = MockRunner::default();
    let remote = RemoteControl::new(&cfg, runner.clone(), &bus, &bus);

    // A failing kill (process already gone) still clears the PVs.
    remote.kill_monitor("LM21L").unwrap();
    assert_eq!(
        runner.calls.borrow().as_slice(),
        &[("kill".to_string(), vec!["-9".to_string(), "4242".to_string()])]
    );
    for pv in ["CUD:ACR0:LM21L:PID", "CUD:ACR0:LM21L:DISPLAY", "CUD:ACR0:LM21L:WINDOWID"] {
        assert_eq!(bus.get(pv).unwrap().value, PvValue::Text(String::new()));
    }

    // Nothing recorded any more: nothing to kill.
    remote.kill_monitor("LM21L").unwrap();
    assert_eq!(runner.calls.borrow().len(), 1);
}

#[test]
fn unknown_monitors_are_rejected() {
    let cfg = CudConfig::default();
    let bus = PvBus::new();
    let remote = RemoteControl::new(&cfg, MockRunner::default(), &bus, &bus);
    assert!(!remote.is_known("LM99L"));
    assert!(matches!(remote.kill_monitor("LM99L"), Err(RemoteError::UnknownMonitor(_))));

    let failures = remote.kill_monitors(&["LM20L".to_string(), "LM99L".to_string()]);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "LM99L");
}

#[test]
fn window_search_prefers_full_title() {
    let cfg = CudConfig::default();
    let bus = PvBus::new();
    let runner = MockRunner {
        listing: WMCTRL.to_string(),
        ..MockRunner::default()
    };
    let remote = RemoteControl::new(&cfg, runner.clone(), &bus, &bus).with_window_polling(Duration::ZERO, 2);
    assert_eq!(remote.wait_for_window("Sector 20", &[]).unwrap(), "0x03a00007");
    assert_eq!(remote.wait_for_window("Injector", &[]).unwrap(), "0x03c00004");
    assert!(matches!(
        remote.wait_for_window("Linac", &[]),
        Err(RemoteError::WindowNotFound(_))
    ));
    // Two lookups that hit on the first try, then two failed attempts.
    assert_eq!(runner.calls.borrow().len(), 4);
}

#[test]
fn display_names_come_from_sunray_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("lm21"), "acr-lm21:\n").unwrap();
    let mut cfg = CudConfig::default();
    cfg.monitors.sunray_dir = dir.path().to_path_buf();
    let bus = PvBus::new();
    let remote = RemoteControl::new(&cfg, MockRunner::default(), &bus, &bus);
    assert_eq!(remote.display_name("LM21R").unwrap(), "acr-lm21:0");
    assert!(matches!(remote.display_name("SM20A"), Err(RemoteError::Io(_))));
}

#[test]
fn defaults_skip_monitors_without_a_cud() {
    let cfg = CudConfig::default();
    let bus = PvBus::new();
    let runner = MockRunner::default();
    let remote = RemoteControl::new(&cfg, runner.clone(), &bus, &bus);
    let launcher = facet_cud::launch::Launcher::new(&cfg);
    let defaults = parse_defaults("LM99L,S20\n").unwrap();

    let failures = remote.launch_defaults(&["LM20L".to_string(), "LM99L".to_string()], &defaults, &launcher);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "LM99L");
    assert!(matches!(failures[0].1, RemoteError::UnknownMonitor(_)));
    assert!(runner.calls.borrow().is_empty());
}
