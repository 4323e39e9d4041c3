use std::path::PathBuf;

use facet_cud::config::{CudConfig, LaunchTarget};
use facet_cud::error::ConfigError;
use facet_cud::orbit::{Axis, OrbitModel};
use facet_cud::refs::{ReferenceKind, DEFAULT_REF_UPDATE_PV};

const SMALL: &str = r#"
cud_ids: [inj, linac, net]
cuds:
  inj: { desc: Injector, orbit: injector }
  linac: { desc: Linac, pydm: linac/main.py }
  net: { desc: Network, command: "echo hi" }
paths:
  repo_root: /opt/cud
orbits:
  injector:
    title: IN10 orbit
    reference: orbit_inj
    draw_rate_hz: 10
    views:
      - { axis: x }
      - { axis: tmit }
    bpms:
      - { name: "BPMS:IN10:221", z: 1001.0 }
      - { name: "BPMS:IN10:731", z: 1019.0 }
      - { name: "BPMS:LI11:333", z: 1049.0, source: scp }
energy_bpms: ["BPMS:IN10:731"]
"#;

#[test]
fn builtin_config_is_valid() {
    let cfg = CudConfig::builtin().unwrap();
    assert_eq!(cfg.cud_ids.len(), 14);
    assert_eq!(cfg.cud_desc("S20"), Some("Sector 20"));
    assert_eq!(cfg.cud_id_for_desc("Sector 20"), Some("S20"));
    assert_eq!(cfg.ref_update_pv.0, DEFAULT_REF_UPDATE_PV);

    let s20 = cfg.build_orbit("s20").unwrap();
    assert_eq!(s20.len(), 19);
    assert!(s20.bpm("BPMS:LI20:2050").unwrap().is_energy_bpm);
    assert_eq!(s20.bpm("BPMS:LI20:3156").unwrap().pv_address(Axis::X), "LI20:BPMS:3156:X57");
    assert_eq!(
        cfg.orbit("s20").unwrap().image_ref_kinds("s20").unwrap(),
        vec![ReferenceKind::ImgSyag, ReferenceKind::ImgDtotr2]
    );
    assert_eq!(cfg.build_orbit("injector").unwrap().len(), 20);
}

#[test]
fn every_description_maps_back_to_its_id() {
    let cfg = CudConfig::builtin().unwrap();
    for id in &cfg.cud_ids {
        let desc = cfg.cud_desc(id).unwrap();
        assert_eq!(cfg.cud_id_for_desc(desc), Some(id.as_str()));
    }
}

#[test]
fn launch_targets_and_paths() {
    let cfg = CudConfig::from_yaml_str(SMALL).unwrap();
    assert_eq!(cfg.launch_target("inj"), Some(LaunchTarget::Orbit("injector".to_string())));
    assert_eq!(cfg.launch_target("linac"), Some(LaunchTarget::Pydm("linac/main.py".to_string())));
    assert_eq!(cfg.launch_target("net"), Some(LaunchTarget::Command("echo hi".to_string())));
    assert_eq!(cfg.launch_target("nope"), None);
    assert_eq!(cfg.refs_dir(), PathBuf::from("/opt/cud/beam_refs"));
    assert_eq!(cfg.defaults_file(), PathBuf::from("/opt/cud/core/defaults.csv"));
    assert_eq!(cfg.monitors.large.len(), 10);
}

#[test]
fn orbit_settings_fill_view_defaults() {
    let cfg = CudConfig::from_yaml_str(SMALL).unwrap();
    let oc = cfg.orbit("injector").unwrap();
    assert_eq!(oc.reference_kind("injector").unwrap(), Some(ReferenceKind::OrbitInj));

    let views = oc.view_options("injector").unwrap();
    assert_eq!(views.len(), 2);
    assert_eq!(views[0].axis, Axis::X);
    assert_eq!((views[0].ymin, views[0].ymax), (-1.0, 1.0));
    assert_eq!(views[0].units, "mm");
    assert_eq!(views[1].axis, Axis::Tmit);
    assert_eq!((views[1].ymin, views[1].ymax), (0.0, 1.4e10));
    assert_eq!(views[1].label, "TMIT");
    assert!((views[1].draw_interval.as_secs_f64() - 0.1).abs() < 1e-9);

    let orbit = cfg.build_orbit("injector").unwrap();
    assert_eq!(orbit.name(), "IN10 orbit");
    assert!(orbit.bpm("BPMS:IN10:731").unwrap().is_energy_bpm);
    assert_eq!(orbit.bpm("BPMS:LI11:333").unwrap().pv_address(Axis::Y), "LI11:BPMS:333:Y57");
    assert_eq!(orbit.bpm("BPMS:IN10:221").unwrap().pv_address(Axis::Y), "BPMS:IN10:221:YTH");
}

#[test]
fn load_reads_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cud.yaml");
    std::fs::write(&path, SMALL).unwrap();
    let cfg = CudConfig::load(&path).unwrap();
    assert_eq!(cfg.cud_ids, vec!["inj", "linac", "net"]);
    assert!(matches!(
        CudConfig::load(&dir.path().join("missing.yaml")),
        Err(ConfigError::Io { .. })
    ));
}

#[test]
fn listed_cud_without_entry_is_rejected() {
    let err = CudConfig::from_yaml_str("cud_ids: [ghost]\n").unwrap_err();
    assert!(matches!(err, ConfigError::MissingCud(id) if id == "ghost"));
}

#[test]
fn cud_with_two_targets_is_rejected() {
    let yaml = "cud_ids: [x]\ncuds:\n  x: { desc: X, pydm: a.py, command: b }\n";
    assert!(matches!(
        CudConfig::from_yaml_str(yaml),
        Err(ConfigError::InvalidSetting { .. })
    ));
}

#[test]
fn orbit_screen_needs_its_orbit() {
    let yaml = "cud_ids: [x]\ncuds:\n  x: { desc: X, orbit: nowhere }\n";
    assert!(matches!(
        CudConfig::from_yaml_str(yaml),
        Err(ConfigError::UnknownOrbit { orbit, .. }) if orbit == "nowhere"
    ));
}

#[test]
fn bad_orbit_definitions_are_rejected() {
    let unordered = "orbits:\n  o:\n    bpms:\n      - { name: \"A:B:2\", z: 2.0 }\n      - { name: \"A:B:1\", z: 1.0 }\n";
    assert!(matches!(CudConfig::from_yaml_str(unordered), Err(ConfigError::Orbit { .. })));

    let image_ref = "orbits:\n  o:\n    reference: img_SYAG\n";
    assert!(matches!(CudConfig::from_yaml_str(image_ref), Err(ConfigError::InvalidSetting { .. })));

    let bad_axis = "orbits:\n  o:\n    views: [{ axis: q }]\n";
    assert!(matches!(CudConfig::from_yaml_str(bad_axis), Err(ConfigError::InvalidSetting { .. })));

    let inverted = "orbits:\n  o:\n    views: [{ axis: x, ymin: 1.0, ymax: -1.0 }]\n";
    assert!(matches!(CudConfig::from_yaml_str(inverted), Err(ConfigError::InvalidSetting { .. })));

    assert!(matches!(CudConfig::from_yaml_str("cud_ids: ["), Err(ConfigError::Yaml(_))));
}

#[test]
fn draw_rate_must_give_a_usable_interval() {
    for rate in ["1.0e-300", "0.0", "-5.0", ".nan"] {
        let yaml = format!("orbits:\n  o:\n    draw_rate_hz: {rate}\n");
        assert!(
            matches!(
                CudConfig::from_yaml_str(&yaml),
                Err(ConfigError::InvalidSetting { ref key, .. }) if key == "orbits.o.draw_rate_hz"
            ),
            "rate {rate}"
        );
    }
    let cfg = CudConfig::from_yaml_str("orbits:\n  o:\n    draw_rate_hz: 1.0e300\n").unwrap();
    assert_eq!(cfg.orbit("o").unwrap().view_options("o").unwrap()[0].draw_interval, std::time::Duration::ZERO);
}
