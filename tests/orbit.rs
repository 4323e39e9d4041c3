use facet_cud::error::OrbitError;
use facet_cud::orbit::{Axis, Bpm, Orbit, OrbitModel};
use facet_cud::pv::{PvBus, PvValue, INVALID_ALARM, MINOR_ALARM, NO_ALARM};

fn bpm(name: &str, z: f64, x: f64, y: f64, tmit: f64) -> Bpm {
    let mut b = Bpm::epics(name, z, "TH");
    b.update(Axis::X, x, NO_ALARM);
    b.update(Axis::Y, y, NO_ALARM);
    b.update(Axis::Tmit, tmit, NO_ALARM);
    b
}

fn three_bpm_orbit() -> Orbit {
    Orbit::from_bpms(
        "test",
        [
            bpm("BPMS:LI20:2050", 1880.0, 1.0, 0.5, 1e10),
            bpm("BPMS:LI20:2445", 1900.0, -1.0, 0.5, 1e10),
            bpm("BPMS:LI21:101", 1950.0, 3.0, -0.5, 1e10),
        ],
    )
    .unwrap()
}

#[test]
fn count_and_extent_follow_bpms() {
    let orbit = three_bpm_orbit();
    assert_eq!(orbit.len(), 3);
    assert_eq!(orbit.zmin(), Some(1880.0));
    assert_eq!(orbit.zmax(), Some(1950.0));
    assert_eq!(orbit.names(), vec!["BPMS:LI20:2050", "BPMS:LI20:2445", "BPMS:LI21:101"]);
}

#[test]
fn empty_orbit_has_no_extent() {
    let orbit = Orbit::new("empty");
    assert!(orbit.is_empty());
    assert_eq!(orbit.zmin(), None);
    assert_eq!(orbit.rms(Axis::X), None);
}

#[test]
fn append_rejects_duplicates_and_upstream_bpms() {
    let mut orbit = three_bpm_orbit();
    assert!(orbit.append(Bpm::new("BPMS:LI20:2050", 2000.0)).is_err());
    assert!(orbit.append(Bpm::new("BPMS:LI21:201", 1000.0)).is_err());
    assert_eq!(orbit.len(), 3);
    orbit.append(Bpm::new("BPMS:LI21:201", 1950.0)).unwrap();
    assert_eq!(orbit.len(), 4);
}

#[test]
fn non_finite_z_is_rejected() {
    let err = Orbit::from_bpms(
        "o",
        [Bpm::new("A:B:1", 10.0), Bpm::new("A:B:2", f64::NAN), Bpm::new("A:B:3", 5.0)],
    )
    .unwrap_err();
    assert!(matches!(err, OrbitError::NonFiniteZ { ref name, .. } if name == "A:B:2"));

    let mut orbit = three_bpm_orbit();
    assert!(matches!(
        orbit.append(Bpm::new("BPMS:LI21:201", f64::INFINITY)),
        Err(OrbitError::NonFiniteZ { .. })
    ));
    assert_eq!(orbit.len(), 3);
    assert_eq!(orbit.zmax(), Some(1950.0));
}

#[test]
fn rms_over_good_bpms() {
    let orbit = three_bpm_orbit();
    let expected = ((1.0 + 1.0 + 9.0) / 3.0_f64).sqrt();
    assert!((orbit.rms(Axis::X).unwrap() - expected).abs() < 1e-12);
    assert!((orbit.rms(Axis::Y).unwrap() - 0.5).abs() < 1e-12);
}

#[test]
fn rms_skips_faulted_bpms_only_when_ignoring() {
    let mut orbit = three_bpm_orbit();
    orbit.bpm_mut("BPMS:LI21:101").unwrap().update(Axis::X, 3.0, MINOR_ALARM);
    assert!((orbit.rms(Axis::X).unwrap() - 1.0).abs() < 1e-12);

    let mut keep = three_bpm_orbit().with_ignore_bad_bpms(false);
    keep.bpm_mut("BPMS:LI21:101").unwrap().update(Axis::X, 3.0, MINOR_ALARM);
    let expected = (11.0_f64 / 3.0).sqrt();
    assert!((keep.rms(Axis::X).unwrap() - expected).abs() < 1e-12);
}

#[test]
fn nan_reading_is_kept_as_fault() {
    let mut b = Bpm::new("BPMS:IN10:221", 1.0);
    b.update(Axis::X, f64::NAN, NO_ALARM);
    assert!(b.value(Axis::X).is_nan());
    assert_eq!(b.severity(Axis::X), INVALID_ALARM);
    assert!(!b.is_ok(Axis::X));
}

#[test]
fn poll_applies_bus_updates() {
    let bus = PvBus::new();
    let mut orbit = Orbit::from_bpms("inj", [Bpm::epics("BPMS:IN10:221", 1001.0, "TH")]).unwrap();
    orbit.connect(&bus);
    assert!(orbit.is_connected());
    assert_eq!(bus.subscriber_count("BPMS:IN10:221:XTH"), 1);

    bus.publish("BPMS:IN10:221:XTH", PvValue::Scalar(0.25), NO_ALARM);
    bus.publish("BPMS:IN10:221:YTH", PvValue::Scalar(-0.5), MINOR_ALARM);
    let before = orbit.generation();
    assert_eq!(orbit.poll(), 2);
    assert_eq!(orbit.generation(), before + 1);

    let b = orbit.bpm("BPMS:IN10:221").unwrap();
    assert_eq!(b.value(Axis::X), 0.25);
    assert_eq!(b.severity(Axis::Y), MINOR_ALARM);
    assert_eq!(orbit.poll(), 0);
}

#[test]
fn connect_delivers_latest_value_first() {
    let bus = PvBus::new();
    bus.publish("BPMS:IN10:221:TMITTH", PvValue::Scalar(2e9), NO_ALARM);
    let mut orbit = Orbit::from_bpms("inj", [Bpm::epics("BPMS:IN10:221", 1001.0, "TH")]).unwrap();
    orbit.connect(&bus);
    orbit.poll();
    assert_eq!(orbit.bpm("BPMS:IN10:221").unwrap().value(Axis::Tmit), 2e9);
}

#[test]
fn sector_ticks_mark_first_bpm_of_each_sector() {
    let orbit = three_bpm_orbit();
    let ticks = orbit.sector_locations();
    let labels: Vec<&str> = ticks.iter().map(|t| t.label.as_str()).collect();
    assert_eq!(labels, vec!["LI20", "LI21"]);
    assert_eq!(ticks[0].z, 1880.0);
    assert_eq!(ticks[1].z, 1950.0);
}

#[test]
fn save_latest_once_per_generation() {
    let mut orbit = three_bpm_orbit();
    orbit.save_latest();
    orbit.save_latest();
    assert_eq!(orbit.bpm("BPMS:LI20:2050").unwrap().history(Axis::X).len(), 1);

    orbit.touch();
    orbit.save_latest();
    assert_eq!(orbit.bpm("BPMS:LI20:2050").unwrap().history(Axis::X).len(), 2);
    let rms = orbit.rolling_rms(Axis::X);
    assert_eq!(rms[1], Some(1.0));
}

#[test]
fn history_is_bounded_and_skips_faults() {
    let mut b = bpm("BPMS:IN10:221", 0.0, 2.0, 0.0, 1.0).with_history_len(3);
    for _ in 0..5 {
        b.save_latest();
    }
    assert_eq!(b.history(Axis::X).len(), 3);
    b.update(Axis::X, 1.0, MINOR_ALARM);
    b.save_latest();
    assert_eq!(b.history(Axis::X).iter().copied().collect::<Vec<_>>(), vec![2.0, 2.0, 2.0]);
    assert_eq!(b.rms(Axis::X), Some(2.0));
}

#[test]
fn snapshot_is_detached() {
    let bus = PvBus::new();
    let mut orbit = three_bpm_orbit();
    orbit.connect(&bus);
    let snap = orbit.snapshot();
    assert!(!snap.is_connected());
    assert_eq!(snap.names(), orbit.names());
    assert_eq!(snap.bpm("BPMS:LI21:101").unwrap().value(Axis::X), 3.0);
}
