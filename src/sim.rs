//! Simulated BPM feed: publishes a slowly drifting betatron-like orbit onto a
//! [`PvBus`] from a background thread.

use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::debug;

use crate::orbit::{Axis, Orbit};
use crate::pv::{PvBus, PvValue, INVALID_ALARM, NO_ALARM};

#[derive(Clone, Debug)]
struct SimBpm {
    z: f64,
    addresses: [String; 3],
}

/// Parameters of the simulated beam.
#[derive(Clone, Debug, PartialEq)]
pub struct SimSettings {
    pub rate_hz: f64,
    /// Peak X/Y offset in mm.
    pub amplitude: f64,
    /// Betatron wavelength along z in meters.
    pub wavelength: f64,
    pub tmit: f64,
    /// Every `fault_every` frames one BPM reports no beam; 0 disables faults.
    pub fault_every: u64,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            rate_hz: 10.0,
            amplitude: 0.3,
            wavelength: 25.0,
            tmit: 1.0e10,
            fault_every: 50,
        }
    }
}

/// Values one BPM reports in frame `n`: `[x, y, tmit]` and whether it is faulted.
pub fn sim_frame(settings: &SimSettings, n: u64, index: usize, count: usize, z: f64) -> ([f64; 3], bool) {
    let t = n as f64 / settings.rate_hz.max(f64::EPSILON);
    let k = 2.0 * PI / settings.wavelength;
    let x = settings.amplitude * (k * z + 0.4 * t).sin() + 0.02 * (7.3 * t + index as f64).sin();
    let y = 0.6 * settings.amplitude * (k * z + 0.25 * t + 1.1).cos() + 0.02 * (5.1 * t - index as f64).cos();
    let tmit = settings.tmit * (1.0 + 0.02 * (0.9 * t).sin());
    let faulted = settings.fault_every > 0 && count > 0 && (n / settings.fault_every) as usize % count == index
        && n % settings.fault_every < settings.fault_every / 5;
    ([x, y, tmit], faulted)
}

/// Handle of a running simulated feed; dropping it stops the thread.
pub struct SimulatedFeed {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SimulatedFeed {
    /// Start publishing readings for every BPM of `orbit` onto `bus`.
    pub fn spawn(bus: PvBus, orbit: &Orbit, settings: SimSettings) -> Self {
        let bpms: Vec<SimBpm> = orbit
            .iter()
            .map(|b| SimBpm {
                z: b.z,
                addresses: Axis::ALL.map(|a| b.pv_address(a)),
            })
            .collect();
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let dt = Duration::from_secs_f64(1.0 / settings.rate_hz.max(0.1));
        debug!(bpms = bpms.len(), rate_hz = settings.rate_hz, "starting simulated BPM feed");
        let handle = std::thread::spawn(move || {
            let mut n: u64 = 0;
            while !flag.load(Ordering::Relaxed) {
                for (i, bpm) in bpms.iter().enumerate() {
                    let (values, faulted) = sim_frame(&settings, n, i, bpms.len(), bpm.z);
                    for (addr, v) in bpm.addresses.iter().zip(values) {
                        if faulted {
                            bus.publish(addr, PvValue::Scalar(f64::NAN), INVALID_ALARM);
                        } else {
                            bus.publish(addr, PvValue::Scalar(v), NO_ALARM);
                        }
                    }
                }
                n = n.wrapping_add(1);
                std::thread::sleep(dt);
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for SimulatedFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orbit::{Bpm, OrbitModel};
    use crate::pv::PvSource;

    #[test]
    fn frames_stay_within_amplitude() {
        let s = SimSettings::default();
        for n in 0..200 {
            let ([x, y, tmit], _) = sim_frame(&s, n, 3, 10, 1900.0 + n as f64);
            assert!(x.abs() <= s.amplitude + 0.02 + 1e-12);
            assert!(y.abs() <= 0.6 * s.amplitude + 0.02 + 1e-12);
            assert!((tmit / s.tmit - 1.0).abs() <= 0.02 + 1e-12);
        }
    }

    #[test]
    fn faults_rotate_through_bpms() {
        let s = SimSettings {
            fault_every: 10,
            ..SimSettings::default()
        };
        let faulted = |n: u64| (0..3).filter(|&i| sim_frame(&s, n, i, 3, 0.0).1).collect::<Vec<_>>();
        assert_eq!(faulted(0), vec![0]);
        assert_eq!(faulted(1), vec![0]);
        assert!(faulted(2).is_empty());
        assert_eq!(faulted(10), vec![1]);
        assert_eq!(faulted(20), vec![2]);
        assert_eq!(faulted(30), vec![0]);

        let quiet = SimSettings {
            fault_every: 0,
            ..SimSettings::default()
        };
        assert!(!sim_frame(&quiet, 0, 0, 3, 0.0).1);
    }

    #[test]
    fn feed_publishes_every_axis() {
        let bus = PvBus::new();
        let mut orbit = Orbit::new("sim");
        orbit.append(Bpm::epics("BPMS:IN10:221", 1001.0, "TH")).unwrap();
        let rx = bus.subscribe("BPMS:IN10:221:TMITTH");
        let mut feed = SimulatedFeed::spawn(
            bus.clone(),
            &orbit,
            SimSettings {
                rate_hz: 100.0,
                fault_every: 0,
                ..SimSettings::default()
            },
        );
        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        feed.stop();
        assert!(first.value.as_f64().unwrap() > 0.0);
        assert!(bus.get("BPMS:IN10:221:XTH").is_ok());
        assert_eq!(orbit.len(), 1);
    }
}
