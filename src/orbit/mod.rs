//! Orbit model: an ordered set of BPM readings along one beamline segment.
//!
//! - [`Orbit`] owns its BPMs, subscribes them to the control system and keeps
//!   rolling history for RMS statistics.
//! - [`DiffOrbit`] is a read-only view of a live orbit minus a reference snapshot.
//! - [`OrbitModel`] is the read contract both satisfy; views only ever see that.
//! - [`OrbitHandle`] is the shared, identity-compared handle a view binds to.

mod bpm;
mod diff;
pub mod matfile;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::mpsc::{Receiver, TryRecvError};

use tracing::{debug, warn};

use crate::error::OrbitError;
use crate::pv::{PvSource, PvUpdate, Severity, NO_ALARM};

pub use bpm::{Axis, Bpm, BpmSource, DEFAULT_HISTORY_LEN};
pub use diff::DiffOrbit;

pub(crate) use bpm::rms_of;

#[cfg(feature = "pv_trace")]
macro_rules! pv_trace { ($($arg:tt)*) => { tracing::trace!($($arg)*); } }
#[cfg(not(feature = "pv_trace"))]
macro_rules! pv_trace { ($($arg:tt)*) => {}; }

/// Externally computed trajectory fit, sampled along z.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FitData {
    pub zs: Vec<f64>,
    pub xpos: Vec<f64>,
    pub ypos: Vec<f64>,
}

impl FitData {
    /// Fit curve for `axis` as `[z, value]` points. There is no fit for TMIT.
    pub fn curve(&self, axis: Axis) -> Option<Vec<[f64; 2]>> {
        let ys = match axis {
            Axis::X => &self.xpos,
            Axis::Y => &self.ypos,
            Axis::Tmit => return None,
        };
        Some(self.zs.iter().zip(ys).map(|(&z, &y)| [z, y]).collect())
    }
}

/// A labelled position on the z axis.
#[derive(Debug, Clone, PartialEq)]
pub struct SectorTick {
    pub z: f64,
    pub label: String,
}

/// Point-in-time copy of one BPM as seen through an [`OrbitModel`].
#[derive(Debug, Clone, PartialEq)]
pub struct BpmReading {
    pub name: String,
    pub z: f64,
    pub is_energy_bpm: bool,
    pub values: [f64; 3],
    pub severity: [Severity; 3],
    /// RMS over saved history per axis.
    pub rms: [Option<f64>; 3],
}

impl BpmReading {
    pub fn value(&self, axis: Axis) -> f64 {
        self.values[axis.index()]
    }

    pub fn severity(&self, axis: Axis) -> Severity {
        self.severity[axis.index()]
    }

    pub fn rms(&self, axis: Axis) -> Option<f64> {
        self.rms[axis.index()]
    }

    /// Unit number, the last field of the device name.
    pub fn unit(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }
}

impl From<&Bpm> for BpmReading {
    fn from(b: &Bpm) -> Self {
        Self {
            name: b.name.clone(),
            z: b.z,
            is_energy_bpm: b.is_energy_bpm,
            values: Axis::ALL.map(|a| b.value(a)),
            severity: Axis::ALL.map(|a| b.severity(a)),
            rms: Axis::ALL.map(|a| b.rms(a)),
        }
    }
}

/// Read contract shared by live and diff orbits.
pub trait OrbitModel {
    fn name(&self) -> &str;

    /// Current readings in beamline order.
    fn readings(&self) -> Vec<BpmReading>;

    /// Whether faulted BPMs are left out of aggregate statistics.
    fn ignore_bad_bpms(&self) -> bool;

    fn fit_data(&self) -> Option<FitData>;

    /// Snapshot current readings into rolling history.
    fn save_latest(&mut self);

    fn len(&self) -> usize {
        self.readings().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn names(&self) -> Vec<String> {
        self.readings().into_iter().map(|r| r.name).collect()
    }

    fn z_vals(&self) -> Vec<f64> {
        self.readings().iter().map(|r| r.z).collect()
    }

    fn zmin(&self) -> Option<f64> {
        self.readings().first().map(|r| r.z)
    }

    fn zmax(&self) -> Option<f64> {
        self.readings().last().map(|r| r.z)
    }

    /// Population RMS of the current readings on `axis`.
    ///
    /// With [`ignore_bad_bpms`](OrbitModel::ignore_bad_bpms) set, BPMs with a nonzero
    /// severity on `axis` are left out; otherwise their readings count, even NaN ones.
    fn rms(&self, axis: Axis) -> Option<f64> {
        let ignore = self.ignore_bad_bpms();
        let readings = self.readings();
        rms_of(
            readings
                .iter()
                .filter(|r| !ignore || r.severity(axis) == NO_ALARM)
                .map(|r| r.value(axis)),
        )
    }

    /// Per-BPM RMS over saved history, in beamline order.
    fn rolling_rms(&self, axis: Axis) -> Vec<Option<f64>> {
        self.readings().iter().map(|r| r.rms(axis)).collect()
    }

    /// One tick per sector, at the first BPM of each sector.
    fn sector_locations(&self) -> Vec<SectorTick> {
        sector_ticks(&self.readings())
    }
}

pub(crate) fn sector_ticks(readings: &[BpmReading]) -> Vec<SectorTick> {
    let mut ticks: Vec<SectorTick> = Vec::new();
    for r in readings {
        let sector = r.name.split(':').nth(1).unwrap_or("");
        if ticks.last().map(|t| t.label.as_str()) != Some(sector) {
            ticks.push(SectorTick {
                z: r.z,
                label: sector.to_string(),
            });
        }
    }
    ticks
}

struct Subscription {
    bpm: usize,
    axis: Axis,
    rx: Receiver<PvUpdate>,
}

/// An ordered set of BPMs along one beamline segment.
pub struct Orbit {
    name: String,
    bpms: Vec<Bpm>,
    index: HashMap<String, usize>,
    pub ignore_bad_bpms: bool,
    fit_data: Option<FitData>,
    subscriptions: Vec<Subscription>,
    generation: u64,
    saved_generation: Option<u64>,
}

impl Orbit {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            bpms: Vec::new(),
            index: HashMap::new(),
            ignore_bad_bpms: true,
            fit_data: None,
            subscriptions: Vec::new(),
            generation: 0,
            saved_generation: None,
        }
    }

    pub fn with_ignore_bad_bpms(mut self, ignore: bool) -> Self {
        self.ignore_bad_bpms = ignore;
        self
    }

    /// Build an orbit from BPMs given in beamline order.
    pub fn from_bpms<S, I>(name: S, bpms: I) -> Result<Self, OrbitError>
    where
        S: Into<String>,
        I: IntoIterator<Item = Bpm>,
    {
        let mut orbit = Self::new(name);
        for bpm in bpms {
            orbit.append(bpm)?;
        }
        Ok(orbit)
    }

    pub fn set_name<S: Into<String>>(&mut self, name: S) {
        self.name = name.into();
    }

    /// Append a BPM downstream of the current last one.
    pub fn append(&mut self, bpm: Bpm) -> Result<(), OrbitError> {
        if self.index.contains_key(&bpm.name) {
            return Err(OrbitError::DuplicateBpm(bpm.name));
        }
        if !bpm.z.is_finite() {
            return Err(OrbitError::NonFiniteZ { name: bpm.name, z: bpm.z });
        }
        if let Some(last) = self.bpms.last() {
            if bpm.z < last.z {
                return Err(OrbitError::NonMonotonicZ {
                    name: bpm.name,
                    z: bpm.z,
                    previous: last.z,
                });
            }
        }
        self.index.insert(bpm.name.clone(), self.bpms.len());
        self.bpms.push(bpm);
        Ok(())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Bpm> {
        self.bpms.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Bpm> {
        self.bpms.iter_mut()
    }

    pub fn bpm(&self, name: &str) -> Option<&Bpm> {
        self.index.get(name).map(|&i| &self.bpms[i])
    }

    pub fn bpm_mut(&mut self, name: &str) -> Option<&mut Bpm> {
        match self.index.get(name) {
            Some(&i) => Some(&mut self.bpms[i]),
            None => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Subscribe every BPM axis to `source`, replacing any earlier subscriptions.
    ///
    /// Values are not guaranteed to be available when this returns; they are
    /// applied by [`poll`](Orbit::poll).
    pub fn connect(&mut self, source: &dyn PvSource) {
        self.subscriptions.clear();
        for (i, bpm) in self.bpms.iter().enumerate() {
            for axis in Axis::ALL {
                let rx = source.subscribe(&bpm.pv_address(axis));
                self.subscriptions.push(Subscription { bpm: i, axis, rx });
            }
        }
        debug!(
            orbit = %self.name,
            channels = self.subscriptions.len(),
            "orbit connected"
        );
    }

    pub fn is_connected(&self) -> bool {
        !self.subscriptions.is_empty()
    }

    /// Apply every pending PV update. Returns how many were applied.
    pub fn poll(&mut self) -> usize {
        let mut applied = 0usize;
        let mut dropped = 0usize;
        let bpms = &mut self.bpms;
        self.subscriptions.retain(|sub| loop {
            match sub.rx.try_recv() {
                Ok(update) => {
                    let value = update.value.as_f64().unwrap_or(f64::NAN);
                    pv_trace!(address = %update.address, value, severity = update.severity, "pv update");
                    bpms[sub.bpm].update(sub.axis, value, update.severity);
                    applied += 1;
                }
                Err(TryRecvError::Empty) => break true,
                Err(TryRecvError::Disconnected) => {
                    dropped += 1;
                    break false;
                }
            }
        });
        if dropped > 0 {
            warn!(orbit = %self.name, dropped, "PV subscriptions disconnected");
        }
        if applied > 0 {
            self.generation += 1;
        }
        applied
    }

    /// Counter bumped whenever new readings were applied.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Mark the readings as changed outside of [`poll`](Orbit::poll).
    pub fn touch(&mut self) {
        self.generation += 1;
    }

    pub fn set_history_len(&mut self, len: usize) {
        for bpm in self.bpms.iter_mut() {
            bpm.set_history_len(len);
        }
    }

    pub fn clear_history(&mut self) {
        for bpm in self.bpms.iter_mut() {
            bpm.clear_history();
        }
        self.saved_generation = None;
    }

    pub fn set_fit_data(&mut self, fit: Option<FitData>) {
        self.fit_data = fit;
    }

    /// Detached copy of the current readings: same BPMs, no subscriptions.
    pub fn snapshot(&self) -> Orbit {
        Orbit {
            name: self.name.clone(),
            bpms: self.bpms.clone(),
            index: self.index.clone(),
            ignore_bad_bpms: self.ignore_bad_bpms,
            fit_data: self.fit_data.clone(),
            subscriptions: Vec::new(),
            generation: self.generation,
            saved_generation: self.saved_generation,
        }
    }
}

impl OrbitModel for Orbit {
    fn name(&self) -> &str {
        &self.name
    }

    fn readings(&self) -> Vec<BpmReading> {
        self.bpms.iter().map(BpmReading::from).collect()
    }

    fn ignore_bad_bpms(&self) -> bool {
        self.ignore_bad_bpms
    }

    fn fit_data(&self) -> Option<FitData> {
        self.fit_data.clone()
    }

    /// Saves at most once per generation, so several views sharing this orbit
    /// do not push the same frame twice.
    fn save_latest(&mut self) {
        if self.saved_generation == Some(self.generation) {
            return;
        }
        for bpm in self.bpms.iter_mut() {
            bpm.save_latest();
        }
        self.saved_generation = Some(self.generation);
    }

    fn len(&self) -> usize {
        self.bpms.len()
    }

    fn names(&self) -> Vec<String> {
        self.bpms.iter().map(|b| b.name.clone()).collect()
    }

    fn z_vals(&self) -> Vec<f64> {
        self.bpms.iter().map(|b| b.z).collect()
    }

    fn zmin(&self) -> Option<f64> {
        self.bpms.first().map(|b| b.z)
    }

    fn zmax(&self) -> Option<f64> {
        self.bpms.last().map(|b| b.z)
    }

    fn rolling_rms(&self, axis: Axis) -> Vec<Option<f64>> {
        self.bpms.iter().map(|b| b.rms(axis)).collect()
    }
}

impl std::fmt::Debug for Orbit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orbit")
            .field("name", &self.name)
            .field("bpms", &self.bpms.len())
            .field("connected", &self.is_connected())
            .field("generation", &self.generation)
            .finish()
    }
}

impl<'a> IntoIterator for &'a Orbit {
    type Item = &'a Bpm;
    type IntoIter = std::slice::Iter<'a, Bpm>;

    fn into_iter(self) -> Self::IntoIter {
        self.bpms.iter()
    }
}

pub type SharedOrbit = Rc<RefCell<Orbit>>;
pub type SharedDiffOrbit = Rc<RefCell<DiffOrbit>>;

/// Shared handle to whatever a view is drawing: the live orbit or a diff.
#[derive(Clone)]
pub enum OrbitHandle {
    Live(SharedOrbit),
    Diff(SharedDiffOrbit),
}

impl OrbitHandle {
    pub fn live(orbit: Orbit) -> Self {
        OrbitHandle::Live(Rc::new(RefCell::new(orbit)))
    }

    pub fn diff(diff: DiffOrbit) -> Self {
        OrbitHandle::Diff(Rc::new(RefCell::new(diff)))
    }

    pub fn is_diff(&self) -> bool {
        matches!(self, OrbitHandle::Diff(_))
    }

    /// Identity comparison: two handles to the same orbit.
    pub fn ptr_eq(&self, other: &OrbitHandle) -> bool {
        match (self, other) {
            (OrbitHandle::Live(a), OrbitHandle::Live(b)) => Rc::ptr_eq(a, b),
            (OrbitHandle::Diff(a), OrbitHandle::Diff(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&dyn OrbitModel) -> R) -> R {
        match self {
            OrbitHandle::Live(o) => f(&*o.borrow()),
            OrbitHandle::Diff(d) => f(&*d.borrow()),
        }
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut dyn OrbitModel) -> R) -> R {
        match self {
            OrbitHandle::Live(o) => f(&mut *o.borrow_mut()),
            OrbitHandle::Diff(d) => f(&mut *d.borrow_mut()),
        }
    }
}

impl From<SharedOrbit> for OrbitHandle {
    fn from(o: SharedOrbit) -> Self {
        OrbitHandle::Live(o)
    }
}

impl std::fmt::Debug for OrbitHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_diff() { "Diff" } else { "Live" };
        self.with(|o| write!(f, "OrbitHandle::{}({:?}, {} BPMs)", kind, o.name(), o.len()))
    }
}
