//! Live-minus-reference orbit view.

use std::collections::{HashSet, VecDeque};

use crate::error::OrbitError;
use crate::pv::NO_ALARM;

use super::{rms_of, Axis, BpmReading, FitData, Orbit, OrbitModel, SharedOrbit};

/// Read-only difference of a live orbit and a reference snapshot.
///
/// Readings are `live - reference` per axis. A BPM counts as faulted on an axis
/// when either side is. Name, z and the energy flag come from the live BPM.
pub struct DiffOrbit {
    name: String,
    live: SharedOrbit,
    reference: Orbit,
    history: Vec<[VecDeque<f64>; 3]>,
    history_len: usize,
    saved_generation: Option<u64>,
}

impl DiffOrbit {
    /// Pair `live` with `reference`. Both must hold exactly the same BPM names.
    pub fn new(live: SharedOrbit, reference: Orbit) -> Result<Self, OrbitError> {
        let (name, len, history_len) = {
            let l = live.borrow();
            let live_names: HashSet<&str> = l.iter().map(|b| b.name.as_str()).collect();
            let ref_names: HashSet<&str> = reference.iter().map(|b| b.name.as_str()).collect();
            let mut missing: Vec<String> = l
                .iter()
                .filter(|b| !ref_names.contains(b.name.as_str()))
                .map(|b| b.name.clone())
                .collect();
            let mut extra: Vec<String> = reference
                .iter()
                .filter(|b| !live_names.contains(b.name.as_str()))
                .map(|b| b.name.clone())
                .collect();
            if !missing.is_empty() || !extra.is_empty() {
                missing.sort();
                extra.sort();
                return Err(OrbitError::BpmMismatch { missing, extra });
            }
            let history_len = l.iter().next().map_or(super::DEFAULT_HISTORY_LEN, |b| b.history_len());
            (format!("{} - reference", l.name()), l.len(), history_len)
        };
        Ok(Self {
            name,
            live,
            reference,
            history: vec![Default::default(); len],
            history_len,
            saved_generation: None,
        })
    }

    pub fn live(&self) -> &SharedOrbit {
        &self.live
    }

    pub fn reference(&self) -> &Orbit {
        &self.reference
    }

    /// Difference reading for one BPM.
    pub fn bpm(&self, name: &str) -> Option<BpmReading> {
        let live = self.live.borrow();
        let (i, l) = live.iter().enumerate().find(|(_, b)| b.name == name)?;
        let r = self.reference.bpm(name)?;
        Some(self.diff_reading(i, l, r))
    }

    fn diff_reading(&self, i: usize, l: &super::Bpm, r: &super::Bpm) -> BpmReading {
        let hist = self.history.get(i);
        BpmReading {
            name: l.name.clone(),
            z: l.z,
            is_energy_bpm: l.is_energy_bpm,
            values: Axis::ALL.map(|a| l.value(a) - r.value(a)),
            severity: Axis::ALL.map(|a| l.severity(a).max(r.severity(a))),
            rms: Axis::ALL.map(|a| hist.and_then(|h| rms_of(h[a.index()].iter().copied()))),
        }
    }
}

impl OrbitModel for DiffOrbit {
    fn name(&self) -> &str {
        &self.name
    }

    fn readings(&self) -> Vec<BpmReading> {
        let live = self.live.borrow();
        live.iter()
            .enumerate()
            .filter_map(|(i, l)| self.reference.bpm(&l.name).map(|r| self.diff_reading(i, l, r)))
            .collect()
    }

    fn ignore_bad_bpms(&self) -> bool {
        self.live.borrow().ignore_bad_bpms
    }

    /// A trajectory fit of a difference orbit is not defined.
    fn fit_data(&self) -> Option<FitData> {
        None
    }

    fn save_latest(&mut self) {
        let generation = self.live.borrow().generation();
        if self.saved_generation == Some(generation) {
            return;
        }
        let readings = self.readings();
        // The live orbit may have grown since the diff was built.
        self.history.resize(readings.len(), Default::default());
        for (h, r) in self.history.iter_mut().zip(&readings) {
            for axis in Axis::ALL {
                if r.severity(axis) != NO_ALARM {
                    continue;
                }
                let q = &mut h[axis.index()];
                q.push_back(r.value(axis));
                if q.len() > self.history_len {
                    q.pop_front();
                }
            }
        }
        self.saved_generation = Some(generation);
    }
}

impl std::fmt::Debug for DiffOrbit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffOrbit")
            .field("name", &self.name)
            .field("reference", &self.reference.name())
            .finish()
    }
}

