use std::cell::RefCell;
use std::rc::Rc;

use facet_cud::error::OrbitError;
use facet_cud::orbit::{Axis, Bpm, DiffOrbit, Orbit, OrbitModel};
use facet_cud::pv::{MAJOR_ALARM, NO_ALARM};

fn orbit(values: &[(&str, f64, f64)]) -> Orbit {
    let bpms = values.iter().map(|(name, z, x)| {
        let mut b = Bpm::new(*name, *z);
        b.update(Axis::X, *x, NO_ALARM);
        b.update(Axis::Y, 2.0 * x, NO_ALARM);
        b.update(Axis::Tmit, 1e10, NO_ALARM);
        b
    });
    Orbit::from_bpms("s20", bpms).unwrap()
}

#[test]
fn readings_are_live_minus_reference() {
    let live = Rc::new(RefCell::new(orbit(&[("BPMS:LI20:2050", 1.0, 0.5), ("BPMS:LI20:3156", 2.0, -0.25)])));
    let reference = orbit(&[("BPMS:LI20:2050", 1.0, 0.25), ("BPMS:LI20:3156", 2.0, 0.25)]);
    let diff = DiffOrbit::new(live.clone(), reference).unwrap();

    let r = diff.bpm("BPMS:LI20:3156").unwrap();
    assert_eq!(r.value(Axis::X), -0.5);
    assert_eq!(r.value(Axis::Y), -1.0);
    assert_eq!(r.value(Axis::Tmit), 0.0);
    assert_eq!(diff.len(), 2);
    assert_eq!(diff.zmax(), Some(2.0));
    assert!(diff.fit_data().is_none());

    live.borrow_mut()
        .bpm_mut("BPMS:LI20:2050")
        .unwrap()
        .update(Axis::X, 1.25, NO_ALARM);
    assert_eq!(diff.bpm("BPMS:LI20:2050").unwrap().value(Axis::X), 1.0);
}

#[test]
fn fault_on_either_side_marks_diff_faulted() {
    let live = Rc::new(RefCell::new(orbit(&[("BPMS:LI20:2050", 1.0, 0.5), ("BPMS:LI20:3156", 2.0, 0.5)])));
    let mut reference = orbit(&[("BPMS:LI20:2050", 1.0, 0.0), ("BPMS:LI20:3156", 2.0, 0.0)]);
    reference
        .bpm_mut("BPMS:LI20:3156")
        .unwrap()
        .update(Axis::X, 0.0, MAJOR_ALARM);
    let diff = DiffOrbit::new(live, reference).unwrap();
    assert_eq!(diff.bpm("BPMS:LI20:3156").unwrap().severity(Axis::X), MAJOR_ALARM);
    // Faulted BPM is left out of the RMS.
    assert_eq!(diff.rms(Axis::X), Some(0.5));
}

#[test]
fn mismatched_bpm_sets_are_rejected() {
    let live = Rc::new(RefCell::new(orbit(&[("BPMS:LI20:2050", 1.0, 0.0), ("BPMS:LI20:3156", 2.0, 0.0)])));
    let reference = orbit(&[("BPMS:LI20:2050", 1.0, 0.0), ("BPMS:LI20:3265", 3.0, 0.0)]);
    match DiffOrbit::new(live, reference) {
        Err(OrbitError::BpmMismatch { missing, extra }) => {
            assert_eq!(missing, vec!["BPMS:LI20:3156".to_string()]);
            assert_eq!(extra, vec!["BPMS:LI20:3265".to_string()]);
        }
        other => panic!("expected mismatch, got {other:?}"),
    }
}

#[test]
fn save_latest_follows_live_generation() {
    let live = Rc::new(RefCell::new(orbit(&[("BPMS:LI20:2050", 1.0, 0.5)])));
    let reference = orbit(&[("BPMS:LI20:2050", 1.0, 0.0)]);
    let mut diff = DiffOrbit::new(live.clone(), reference).unwrap();
    diff.save_latest();
    diff.save_latest();
    assert_eq!(diff.rolling_rms(Axis::X), vec![Some(0.5)]);

    live.borrow_mut()
        .bpm_mut("BPMS:LI20:2050")
        .unwrap()
        .update(Axis::X, -0.5, NO_ALARM);
    live.borrow_mut().touch();
    diff.save_latest();
    assert_eq!(diff.rolling_rms(Axis::X), vec![Some(0.5)]);
    assert_eq!(live.borrow().bpm("BPMS:LI20:2050").unwrap().history(Axis::X).len(), 0);
}
