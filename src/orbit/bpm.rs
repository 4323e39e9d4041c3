//! A single beam position monitor and the axes it reports.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use crate::error::OrbitError;
use crate::pv::{Severity, INVALID_ALARM, NO_ALARM};

/// Default number of saved readings kept per BPM axis for rolling statistics.
pub const DEFAULT_HISTORY_LEN: usize = 120;

/// A BPM reading axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Axis {
    X,
    Y,
    Tmit,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Tmit];

    pub fn as_str(&self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Tmit => "tmit",
        }
    }

    /// Field name used in PV addresses (`...:X57`, `...:TMITTH`).
    pub fn pv_field(&self) -> &'static str {
        match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Tmit => "TMIT",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Tmit => 2,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Axis {
    type Err = OrbitError;

    /// ```
    /// # use facet_cud::orbit::Axis;
    /// assert_eq!("TMIT".parse::<Axis>().unwrap(), Axis::Tmit);
    /// assert!("z".parse::<Axis>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "x" => Ok(Axis::X),
            "y" => Ok(Axis::Y),
            "tmit" => Ok(Axis::Tmit),
            _ => Err(OrbitError::InvalidAxis(s.to_string())),
        }
    }
}

/// Where a BPM's readings come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BpmSource {
    /// EPICS BPM read through a beam-synchronous event definition (`TH`, `57`, ...).
    Epics { edef: String },
    /// SLC-era BPM read through the SCP bridge; names are `<area>:<prim>:<unit>`.
    Scp { suffix: String },
}

impl Default for BpmSource {
    fn default() -> Self {
        BpmSource::Epics {
            edef: String::new(),
        }
    }
}

/// One beam position monitor: identity, position along the beamline and the
/// latest reading on each axis.
#[derive(Debug, Clone)]
pub struct Bpm {
    pub name: String,
    /// Longitudinal position along the beamline in meters.
    pub z: f64,
    pub is_energy_bpm: bool,
    pub source: BpmSource,
    values: [f64; 3],
    severity: [Severity; 3],
    history: [VecDeque<f64>; 3],
    history_len: usize,
}

impl Bpm {
    /// A BPM with no readings yet. Every axis starts out invalid until its first update.
    pub fn new<S: Into<String>>(name: S, z: f64) -> Self {
        Self {
            name: name.into(),
            z,
            is_energy_bpm: false,
            source: BpmSource::default(),
            values: [f64::NAN; 3],
            severity: [INVALID_ALARM; 3],
            history: Default::default(),
            history_len: DEFAULT_HISTORY_LEN,
        }
    }

    pub fn epics<S: Into<String>>(name: S, z: f64, edef: &str) -> Self {
        Self {
            source: BpmSource::Epics {
                edef: edef.to_string(),
            },
            ..Self::new(name, z)
        }
    }

    pub fn scp<S: Into<String>>(name: S, z: f64, suffix: &str) -> Self {
        Self {
            source: BpmSource::Scp {
                suffix: suffix.to_string(),
            },
            ..Self::new(name, z)
        }
    }

    pub fn with_energy_flag(mut self, is_energy_bpm: bool) -> Self {
        self.is_energy_bpm = is_energy_bpm;
        self
    }

    pub fn with_history_len(mut self, len: usize) -> Self {
        self.set_history_len(len);
        self
    }

    /// Latest reading on `axis` (NaN until the first update).
    pub fn value(&self, axis: Axis) -> f64 {
        self.values[axis.index()]
    }

    pub fn severity(&self, axis: Axis) -> Severity {
        self.severity[axis.index()]
    }

    pub fn is_ok(&self, axis: Axis) -> bool {
        self.severity(axis) == NO_ALARM
    }

    /// Store a new reading. A non-finite value is kept as a fault and never rejected.
    pub fn update(&mut self, axis: Axis, value: f64, severity: Severity) {
        let i = axis.index();
        self.values[i] = value;
        self.severity[i] = if value.is_finite() {
            severity
        } else {
            severity.max(INVALID_ALARM)
        };
    }

    /// Control-system address of the reading on `axis`.
    ///
    /// ```
    /// # use facet_cud::orbit::{Axis, Bpm};
    /// assert_eq!(Bpm::epics("BPMS:IN10:221", 0.0, "TH").pv_address(Axis::Tmit), "BPMS:IN10:221:TMITTH");
    /// assert_eq!(Bpm::scp("BPMS:LI20:2445", 0.0, "57").pv_address(Axis::X), "LI20:BPMS:2445:X57");
    /// ```
    pub fn pv_address(&self, axis: Axis) -> String {
        match &self.source {
            BpmSource::Epics { edef } => format!("{}:{}{}", self.name, axis.pv_field(), edef),
            BpmSource::Scp { suffix } => {
                let mut parts: Vec<&str> = self.name.split(':').collect();
                if parts.len() >= 2 {
                    parts.swap(0, 1);
                }
                format!("{}:{}{}", parts.join(":"), axis.pv_field(), suffix)
            }
        }
    }

    /// Sector field of the device name (`LI20` for `BPMS:LI20:2050`).
    pub fn sector(&self) -> Option<&str> {
        self.name.split(':').nth(1)
    }

    /// Unit number, the last field of the device name.
    pub fn unit(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }

    pub fn history_len(&self) -> usize {
        self.history_len
    }

    pub fn set_history_len(&mut self, len: usize) {
        self.history_len = len.max(1);
        for h in self.history.iter_mut() {
            while h.len() > self.history_len {
                h.pop_front();
            }
        }
    }

    /// Push the current readings into the rolling history. Faulted axes are skipped.
    pub fn save_latest(&mut self) {
        for axis in Axis::ALL {
            let i = axis.index();
            if self.severity[i] != NO_ALARM {
                continue;
            }
            let h = &mut self.history[i];
            h.push_back(self.values[i]);
            if h.len() > self.history_len {
                h.pop_front();
            }
        }
    }

    pub fn history(&self, axis: Axis) -> &VecDeque<f64> {
        &self.history[axis.index()]
    }

    pub fn clear_history(&mut self) {
        for h in self.history.iter_mut() {
            h.clear();
        }
    }

    /// RMS of the saved readings on `axis`; `None` before anything was saved.
    pub fn rms(&self, axis: Axis) -> Option<f64> {
        rms_of(self.history(axis).iter().copied())
    }
}

/// Population RMS, `sqrt(mean(v²))`. `None` for an empty input.
pub(crate) fn rms_of(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (n, sum_sq) = values.fold((0usize, 0.0f64), |(n, s), v| (n + 1, s + v * v));
    (n > 0).then(|| (sum_sq / n as f64).sqrt())
}
