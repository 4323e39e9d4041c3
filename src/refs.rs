//! Beam reference bookkeeping.
//!
//! References live as files in one directory:
//! - `ref_<kind>_<YYYYmmddHHMMSS>.mat` for orbit snapshots,
//! - `ref_<kind>_<YYYYmmddHHMMSS>.png` for camera images,
//! - `current_refs.csv`, one `kind,path` line per kind, `NOTSET` when unset.
//!
//! Every change to `current_refs.csv` pulses the update flag PV (1 then 0) so
//! open screens reload their references.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{NaiveDateTime, TimeZone};
use image::{ImageBuffer, Luma};
use tracing::{debug, info, warn};

use crate::error::ReferenceError;
use crate::orbit::Orbit;
use crate::pv::{PvSource, PvValue, PvWriter};

pub const CURRENT_REFS_FILE: &str = "current_refs.csv";
pub const NOTSET: &str = "NOTSET";
pub const NO_REFERENCE_TEXT: &str = "NO REFERENCE SET";
pub const DATE_FMT_READABLE: &str = "%d-%b-%Y %H:%M";
pub const DATE_FMT_TIMESTAMP: &str = "%Y%m%d%H%M%S";
pub const DEFAULT_REF_UPDATE_PV: &str = "SIOC:SYS1:ML03:AO976";

/// The kinds of beam reference a CUD can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReferenceKind {
    ImgSyag,
    ImgDtotr2,
    OrbitInj,
    OrbitS20,
}

impl ReferenceKind {
    pub const ALL: [ReferenceKind; 4] = [
        ReferenceKind::ImgSyag,
        ReferenceKind::ImgDtotr2,
        ReferenceKind::OrbitInj,
        ReferenceKind::OrbitS20,
    ];

    /// Key used in `current_refs.csv` and in reference filenames.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::ImgSyag => "img_SYAG",
            ReferenceKind::ImgDtotr2 => "img_DTOTR2",
            ReferenceKind::OrbitInj => "orbit_inj",
            ReferenceKind::OrbitS20 => "orbit_s20",
        }
    }

    pub fn is_orbit(&self) -> bool {
        matches!(self, ReferenceKind::OrbitInj | ReferenceKind::OrbitS20)
    }

    pub fn extension(&self) -> &'static str {
        if self.is_orbit() {
            "mat"
        } else {
            "png"
        }
    }

    /// Camera PV prefix for image references.
    pub fn camera_prefix(&self) -> Option<&'static str> {
        match self {
            ReferenceKind::ImgSyag => Some("CAMR:LI20:100"),
            ReferenceKind::ImgDtotr2 => Some("CAMR:LI20:107"),
            _ => None,
        }
    }

    /// ```
    /// # use facet_cud::refs::ReferenceKind;
    /// assert_eq!(ReferenceKind::OrbitS20.file_name("20230401120000"), "ref_orbit_s20_20230401120000.mat");
    /// ```
    pub fn file_name(&self, ts: &str) -> String {
        format!("ref_{}_{}.{}", self.as_str(), ts, self.extension())
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferenceKind {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        ReferenceKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ReferenceError::UnknownKind(s.to_string()))
    }
}

/// One entry of `current_refs.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RefEntry {
    #[default]
    NotSet,
    Path(PathBuf),
}

impl RefEntry {
    fn parse(s: &str) -> Self {
        match s.trim() {
            "" | NOTSET => RefEntry::NotSet,
            p => RefEntry::Path(PathBuf::from(p)),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            RefEntry::NotSet => None,
            RefEntry::Path(p) => Some(p),
        }
    }

    /// Operator-facing timestamp text for this entry.
    pub fn readable_ts(&self) -> Result<String, ReferenceError> {
        ts_from_ref_fname(&self.to_string())
    }
}

impl fmt::Display for RefEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefEntry::NotSet => f.write_str(NOTSET),
            RefEntry::Path(p) => write!(f, "{}", p.display()),
        }
    }
}

/// Parsed `current_refs.csv`. Kinds absent from the file read as [`RefEntry::NotSet`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CurrentRefs {
    entries: BTreeMap<ReferenceKind, RefEntry>,
}

impl CurrentRefs {
    pub fn get(&self, kind: ReferenceKind) -> &RefEntry {
        static UNSET: RefEntry = RefEntry::NotSet;
        self.entries.get(&kind).unwrap_or(&UNSET)
    }

    pub fn set(&mut self, kind: ReferenceKind, entry: RefEntry) {
        self.entries.insert(kind, entry);
    }

    pub fn iter(&self) -> impl Iterator<Item = (ReferenceKind, &RefEntry)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    pub fn parse(text: &str) -> Result<Self, ReferenceError> {
        let mut refs = CurrentRefs::default();
        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (kind, value) = line.split_once(',').ok_or_else(|| ReferenceError::MalformedIndex {
                line: i + 1,
                text: line.to_string(),
            })?;
            refs.set(kind.parse()?, RefEntry::parse(value));
        }
        Ok(refs)
    }

    /// CSV text with every known kind, in declaration order.
    pub fn to_csv(&self) -> String {
        ReferenceKind::ALL
            .iter()
            .map(|k| format!("{},{}\n", k, self.get(*k)))
            .collect()
    }
}

/// Timestamp text of a reference filename (or path), `NOTSET` included.
///
/// ```
/// # use facet_cud::refs::ts_from_ref_fname;
/// assert_eq!(ts_from_ref_fname("ref_orbit_s20_20230401120000.mat").unwrap(), "01-Apr-2023 12:00");
/// assert_eq!(ts_from_ref_fname("NOTSET").unwrap(), "NO REFERENCE SET");
/// ```
pub fn ts_from_ref_fname(fname: &str) -> Result<String, ReferenceError> {
    let last = fname.rsplit('_').next().unwrap_or(fname);
    let ts = last.split('.').next().unwrap_or(last);
    readable_ts(ts)
}

/// Turn a `YYYYmmddHHMMSS` filename timestamp back into `dd-Mon-YYYY HH:MM`.
pub fn readable_ts(ts: &str) -> Result<String, ReferenceError> {
    if ts == NOTSET {
        return Ok(NO_REFERENCE_TEXT.to_string());
    }
    let t = NaiveDateTime::parse_from_str(ts, DATE_FMT_TIMESTAMP)
        .map_err(|_| ReferenceError::BadTimestamp(ts.to_string()))?;
    Ok(t.format(DATE_FMT_READABLE).to_string())
}

/// Reads and updates the reference directory.
#[derive(Debug, Clone)]
pub struct BeamRefStore {
    dir: PathBuf,
    update_pv: String,
    flag_pulse: Duration,
}

impl BeamRefStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            update_pv: DEFAULT_REF_UPDATE_PV.to_string(),
            flag_pulse: Duration::from_millis(500),
        }
    }

    pub fn with_update_pv<S: Into<String>>(mut self, pv: S) -> Self {
        self.update_pv = pv.into();
        self
    }

    /// How long the update flag stays at 1 before being reset.
    pub fn with_flag_pulse(mut self, pulse: Duration) -> Self {
        self.flag_pulse = pulse;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn update_pv(&self) -> &str {
        &self.update_pv
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join(CURRENT_REFS_FILE)
    }

    /// Read `current_refs.csv`. A missing file means nothing is set.
    pub fn read_current_refs(&self) -> Result<CurrentRefs, ReferenceError> {
        let path = self.index_path();
        match fs::read_to_string(&path) {
            Ok(text) => CurrentRefs::parse(&text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no current refs file yet");
                Ok(CurrentRefs::default())
            }
            Err(source) => Err(ReferenceError::Io { path, source }),
        }
    }

    /// Point `kind` at `entry`, rewrite the index and pulse the update flag.
    pub fn update_current_refs(
        &self,
        kind: ReferenceKind,
        entry: RefEntry,
        pv: &dyn PvWriter,
    ) -> Result<(), ReferenceError> {
        let mut refs = self.read_current_refs()?;
        refs.set(kind, entry);
        self.write_current_refs(&refs)?;
        info!(kind = %kind, entry = %refs.get(kind), "reference updated");
        self.pulse_update_flag(pv)
    }

    /// Unset the reference of `kind`.
    pub fn clear(&self, kind: ReferenceKind, pv: &dyn PvWriter) -> Result<(), ReferenceError> {
        self.update_current_refs(kind, RefEntry::NotSet, pv)
    }

    /// Snapshot `orbit` as the new reference of an orbit kind. Returns the readable timestamp.
    pub fn set_orbit_reference<Tz: TimeZone>(
        &self,
        kind: ReferenceKind,
        orbit: &Orbit,
        now: chrono::DateTime<Tz>,
        pv: &dyn PvWriter,
    ) -> Result<String, ReferenceError>
    where
        Tz::Offset: fmt::Display,
    {
        if !kind.is_orbit() {
            return Err(ReferenceError::Capture(format!("{kind} is not an orbit reference")));
        }
        let path = self.dir.join(kind.file_name(&now.format(DATE_FMT_TIMESTAMP).to_string()));
        self.ensure_dir()?;
        orbit
            .write_matlab_file(&path)
            .map_err(|source| ReferenceError::Save {
                path: path.clone(),
                source,
            })?;
        self.update_current_refs(kind, RefEntry::Path(path), pv)?;
        Ok(now.format(DATE_FMT_READABLE).to_string())
    }

    /// Capture `n_avg` frames of the camera behind an image kind, average them
    /// and save a 16-bit grayscale PNG. Returns the readable timestamp.
    pub fn set_image_reference<Tz: TimeZone>(
        &self,
        kind: ReferenceKind,
        source: &dyn PvSource,
        n_avg: usize,
        now: chrono::DateTime<Tz>,
        pv: &dyn PvWriter,
    ) -> Result<String, ReferenceError>
    where
        Tz::Offset: fmt::Display,
    {
        let prefix = kind
            .camera_prefix()
            .ok_or_else(|| ReferenceError::Capture(format!("{kind} is not an image reference")))?;
        let frame = capture_frame(source, prefix, n_avg.max(1))?;
        let path = self.dir.join(kind.file_name(&now.format(DATE_FMT_TIMESTAMP).to_string()));
        self.ensure_dir()?;
        frame.save(&path)?;
        info!(kind = %kind, path = %path.display(), width = frame.width(), height = frame.height(), "image reference saved");
        self.update_current_refs(kind, RefEntry::Path(path), pv)?;
        Ok(now.format(DATE_FMT_READABLE).to_string())
    }

    /// Load the orbit reference of `kind`, `None` when it is not set.
    pub fn load_orbit(&self, kind: ReferenceKind) -> Result<Option<Orbit>, ReferenceError> {
        let refs = self.read_current_refs()?;
        match refs.get(kind).path() {
            None => Ok(None),
            Some(path) => Orbit::from_matlab_file(path)
                .map(Some)
                .map_err(|source| ReferenceError::Load {
                    path: path.to_path_buf(),
                    source,
                }),
        }
    }

    fn write_current_refs(&self, refs: &CurrentRefs) -> Result<(), ReferenceError> {
        self.ensure_dir()?;
        let path = self.index_path();
        let tmp = path.with_extension("csv.tmp");
        fs::write(&tmp, refs.to_csv())
            .and_then(|_| fs::rename(&tmp, &path))
            .map_err(|source| ReferenceError::Io { path, source })
    }

    fn ensure_dir(&self) -> Result<(), ReferenceError> {
        fs::create_dir_all(&self.dir).map_err(|source| ReferenceError::Io {
            path: self.dir.clone(),
            source,
        })
    }

    fn pulse_update_flag(&self, pv: &dyn PvWriter) -> Result<(), ReferenceError> {
        pv.put(&self.update_pv, PvValue::Scalar(1.0))?;
        if !self.flag_pulse.is_zero() {
            std::thread::sleep(self.flag_pulse);
        }
        pv.put(&self.update_pv, PvValue::Scalar(0.0))?;
        Ok(())
    }
}

type GrayFrame = ImageBuffer<Luma<u16>, Vec<u16>>;

fn capture_frame(source: &dyn PvSource, prefix: &str, n_avg: usize) -> Result<GrayFrame, ReferenceError> {
    let width_pv = format!("{prefix}:Image:ArraySize0_RBV");
    let data_pv = format!("{prefix}:Image:ArrayData");
    let width = source
        .get(&width_pv)?
        .value
        .as_f64()
        .filter(|w| w.is_finite() && *w >= 1.0)
        .ok_or_else(|| ReferenceError::Capture(format!("{width_pv} has no usable width")))? as usize;

    let mut sum: Vec<f64> = Vec::new();
    for _ in 0..n_avg {
        let update = source.get(&data_pv)?;
        let frame = update
            .value
            .as_array()
            .ok_or_else(|| ReferenceError::Capture(format!("{data_pv} is not an array")))?;
        if sum.is_empty() {
            sum = vec![0.0; frame.len()];
        }
        if frame.len() != sum.len() {
            return Err(ReferenceError::Capture(format!(
                "frame size changed from {} to {} while averaging",
                sum.len(),
                frame.len()
            )));
        }
        for (s, v) in sum.iter_mut().zip(frame) {
            *s += v;
        }
    }

    let height = sum.len() / width;
    if height == 0 {
        return Err(ReferenceError::Capture(format!(
            "{data_pv} holds {} pixels, less than one row of {width}",
            sum.len()
        )));
    }
    if sum.len() % width != 0 {
        warn!(pixels = sum.len(), width, "image data is not a whole number of rows; truncating");
    }
    let pixels: Vec<u16> = sum[..width * height]
        .iter()
        .map(|s| (s / n_avg as f64).round().clamp(0.0, u16::MAX as f64) as u16)
        .collect();
    GrayFrame::from_raw(width as u32, height as u32, pixels)
        .ok_or_else(|| ReferenceError::Capture("image buffer size mismatch".to_string()))
}
