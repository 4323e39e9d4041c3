//! CUD configuration: which displays exist, how to launch them, the orbit
//! definitions behind the native orbit screens, and site paths.
//!
//! Loaded once at startup from YAML and passed explicitly; nothing reads it
//! through a global.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::orbit::{Axis, Bpm, Orbit, DEFAULT_HISTORY_LEN};
use crate::refs::{ReferenceKind, DEFAULT_REF_UPDATE_PV};
use crate::view::OrbitViewOptions;

/// Configuration shipped with the crate.
pub const BUILTIN_CONFIG: &str = include_str!("../config/cud.yaml");

// ─────────────────────────────────────────────────────────────────────────────
// Top level
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CudConfig {
    /// Every launchable CUD, in menu order.
    pub cud_ids: Vec<String>,
    pub cuds: BTreeMap<String, CudEntry>,
    pub orbits: BTreeMap<String, OrbitConfig>,
    /// BPMs used for energy measurement; drawn in their own color.
    pub energy_bpms: Vec<String>,
    pub paths: PathsConfig,
    pub monitors: MonitorsConfig,
    pub ref_update_pv: RefUpdatePv,
}

/// Reference update flag PV name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefUpdatePv(pub String);

impl Default for RefUpdatePv {
    fn default() -> Self {
        Self(DEFAULT_REF_UPDATE_PV.to_string())
    }
}

impl CudConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg = Self::from_yaml_str(&text)?;
        debug!(path = %path.display(), cuds = cfg.cud_ids.len(), orbits = cfg.orbits.len(), "config loaded");
        Ok(cfg)
    }

    /// Parse and validate.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: CudConfig = serde_yaml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_yaml_str(BUILTIN_CONFIG)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for id in &self.cud_ids {
            let entry = self
                .cuds
                .get(id)
                .ok_or_else(|| ConfigError::MissingCud(id.clone()))?;
            if let LaunchTarget::Orbit(orbit) = entry.launch_target(id)? {
                if !self.orbits.contains_key(&orbit) {
                    return Err(ConfigError::UnknownOrbit {
                        cud: id.clone(),
                        orbit,
                    });
                }
            }
        }
        for (name, orbit) in &self.orbits {
            orbit.validate(name)?;
            self.build_orbit(name)?;
        }
        Ok(())
    }

    pub fn cud_desc(&self, id: &str) -> Option<&str> {
        self.cuds.get(id).map(|c| c.desc.as_str())
    }

    /// Reverse of [`cud_desc`](Self::cud_desc), restricted to listed CUDs.
    pub fn cud_id_for_desc(&self, desc: &str) -> Option<&str> {
        self.cud_ids
            .iter()
            .find(|id| self.cud_desc(id) == Some(desc))
            .map(String::as_str)
    }

    pub fn launch_target(&self, id: &str) -> Option<LaunchTarget> {
        if !self.cud_ids.iter().any(|c| c == id) {
            return None;
        }
        self.cuds.get(id)?.launch_target(id).ok()
    }

    pub fn orbit(&self, name: &str) -> Option<&OrbitConfig> {
        self.orbits.get(name)
    }

    pub fn is_energy_bpm(&self, name: &str) -> bool {
        self.energy_bpms.iter().any(|b| b == name)
    }

    /// Build the orbit `name` with every BPM in configured order.
    pub fn build_orbit(&self, name: &str) -> Result<Orbit, ConfigError> {
        let oc = self.orbits.get(name).ok_or_else(|| ConfigError::UnknownOrbit {
            cud: String::new(),
            orbit: name.to_string(),
        })?;
        let mut orbit = Orbit::new(oc.title.clone()).with_ignore_bad_bpms(oc.ignore_bad_bpms);
        for b in &oc.bpms {
            let bpm = match b.source {
                BpmSourceKind::Epics => Bpm::epics(b.name.clone(), b.z, &oc.edef),
                BpmSourceKind::Scp => Bpm::scp(b.name.clone(), b.z, &oc.scp_suffix),
            }
            .with_energy_flag(self.is_energy_bpm(&b.name))
            .with_history_len(oc.history);
            orbit.append(bpm).map_err(|source| ConfigError::Orbit {
                orbit: name.to_string(),
                source,
            })?;
        }
        Ok(orbit)
    }

    /// Directory holding beam references and `current_refs.csv`.
    pub fn refs_dir(&self) -> PathBuf {
        self.paths.repo_root.join(&self.paths.refs_dir)
    }

    pub fn defaults_file(&self) -> PathBuf {
        self.paths.repo_root.join(&self.monitors.defaults_file)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CUD entries
// ─────────────────────────────────────────────────────────────────────────────

/// One launchable display. Exactly one of `pydm`, `command` or `orbit` is set.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CudEntry {
    /// Human-readable name; also the window title suffix.
    pub desc: String,
    /// Display file relative to the repo root, opened with the pydm command.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pydm: Option<String>,
    /// Arbitrary shell command.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Native orbit screen backed by `orbits.<name>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orbit: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LaunchTarget {
    Pydm(String),
    Command(String),
    Orbit(String),
}

impl CudEntry {
    pub fn launch_target(&self, id: &str) -> Result<LaunchTarget, ConfigError> {
        match (&self.pydm, &self.command, &self.orbit) {
            (Some(p), None, None) => Ok(LaunchTarget::Pydm(p.clone())),
            (None, Some(c), None) => Ok(LaunchTarget::Command(c.clone())),
            (None, None, Some(o)) => Ok(LaunchTarget::Orbit(o.clone())),
            _ => Err(ConfigError::InvalidSetting {
                key: format!("cuds.{id}"),
                reason: "exactly one of 'pydm', 'command' or 'orbit' must be set".to_string(),
            }),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Orbits
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BpmSourceKind {
    #[default]
    Epics,
    Scp,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BpmConfig {
    pub name: String,
    /// Position along the beamline in meters.
    pub z: f64,
    #[serde(default)]
    pub source: BpmSourceKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    pub axis: String,
    pub label: Option<String>,
    pub units: Option<String>,
    pub ymin: Option<f64>,
    pub ymax: Option<f64>,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            axis: "x".to_string(),
            label: None,
            units: None,
            ymin: None,
            ymax: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrbitConfig {
    /// Orbit name shown as the plot title.
    pub title: String,
    /// Window title of the screen.
    pub window_title: String,
    /// Reference kind this orbit diffs against (`orbit_inj`, `orbit_s20`).
    pub reference: Option<String>,
    /// Image references whose timestamps the screen also shows.
    pub image_refs: Vec<String>,
    pub ignore_bad_bpms: bool,
    /// Beam-synchronous acquisition suffix for EPICS BPMs.
    pub edef: String,
    /// Suffix for SCP BPMs.
    pub scp_suffix: String,
    /// Rolling history length for RMS.
    pub history: usize,
    pub draw_rate_hz: f64,
    /// Default X/Y half-range in mm.
    pub position_scale: f64,
    /// Default TMIT range upper bound.
    pub tmit_max: f64,
    pub views: Vec<ViewConfig>,
    pub bpms: Vec<BpmConfig>,
}

impl Default for OrbitConfig {
    fn default() -> Self {
        Self {
            title: String::new(),
            window_title: String::new(),
            reference: None,
            image_refs: Vec::new(),
            ignore_bad_bpms: true,
            edef: "TH".to_string(),
            scp_suffix: "57".to_string(),
            history: DEFAULT_HISTORY_LEN,
            draw_rate_hz: 60.0,
            position_scale: 1.0,
            tmit_max: 1.4e10,
            views: vec![
                ViewConfig {
                    axis: "x".to_string(),
                    ..ViewConfig::default()
                },
                ViewConfig {
                    axis: "y".to_string(),
                    ..ViewConfig::default()
                },
            ],
            bpms: Vec::new(),
        }
    }
}

impl OrbitConfig {
    fn invalid(name: &str, key: &str, reason: impl Into<String>) -> ConfigError {
        ConfigError::InvalidSetting {
            key: format!("orbits.{name}.{key}"),
            reason: reason.into(),
        }
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.history == 0 {
            return Err(Self::invalid(name, "history", "must be at least 1"));
        }
        if !(self.draw_rate_hz.is_finite() && self.draw_rate_hz > 0.0) {
            return Err(Self::invalid(name, "draw_rate_hz", "must be positive"));
        }
        self.reference_kind(name)?;
        self.image_ref_kinds(name)?;
        self.view_options(name)?;
        Ok(())
    }

    pub fn reference_kind(&self, name: &str) -> Result<Option<ReferenceKind>, ConfigError> {
        let Some(r) = &self.reference else {
            return Ok(None);
        };
        let kind: ReferenceKind = r
            .parse()
            .map_err(|e: crate::error::ReferenceError| Self::invalid(name, "reference", e.to_string()))?;
        if !kind.is_orbit() {
            return Err(Self::invalid(name, "reference", format!("{kind} is not an orbit reference")));
        }
        Ok(Some(kind))
    }

    pub fn image_ref_kinds(&self, name: &str) -> Result<Vec<ReferenceKind>, ConfigError> {
        self.image_refs
            .iter()
            .map(|r| {
                r.parse::<ReferenceKind>()
                    .map_err(|e| Self::invalid(name, "image_refs", e.to_string()))
            })
            .collect()
    }

    /// Options for each configured view, with axis-dependent defaults filled in.
    pub fn view_options(&self, name: &str) -> Result<Vec<OrbitViewOptions>, ConfigError> {
        let interval = std::time::Duration::try_from_secs_f64(1.0 / self.draw_rate_hz)
            .map_err(|e| Self::invalid(name, "draw_rate_hz", e.to_string()))?;
        self.views
            .iter()
            .map(|v| {
                let axis: Axis = v
                    .axis
                    .parse()
                    .map_err(|e: crate::error::OrbitError| Self::invalid(name, "views.axis", e.to_string()))?;
                let (dmin, dmax, dunits) = match axis {
                    Axis::Tmit => (0.0, self.tmit_max, ""),
                    _ => (-self.position_scale, self.position_scale, "mm"),
                };
                let ymin = v.ymin.unwrap_or(dmin);
                let ymax = v.ymax.unwrap_or(dmax);
                if !(ymin < ymax) {
                    return Err(Self::invalid(name, "views", format!("ymin {ymin} must be below ymax {ymax}")));
                }
                Ok(OrbitViewOptions {
                    axis,
                    ymin,
                    ymax,
                    label: v.label.clone().unwrap_or_else(|| axis.pv_field().to_string()),
                    units: v.units.clone().unwrap_or_else(|| dunits.to_string()),
                    draw_interval: interval,
                    ..OrbitViewOptions::default()
                })
            })
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Paths and monitors
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root of the display tree; pydm targets are relative to it.
    pub repo_root: PathBuf,
    /// Reference directory, relative to `repo_root` unless absolute.
    pub refs_dir: PathBuf,
    /// Command prefix for pydm displays.
    pub pydm_command: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            repo_root: PathBuf::from("."),
            refs_dir: PathBuf::from("beam_refs"),
            pydm_command: "pydm --hide-nav-bar --hide-menu-bar --hide-status-bar".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorsConfig {
    pub large: Vec<String>,
    pub small: Vec<String>,
    /// Per-monitor default CUDs, relative to `repo_root`.
    pub defaults_file: PathBuf,
    /// Directory mapping monitor stems to X display names.
    pub sunray_dir: PathBuf,
    /// PV prefix of the per-monitor display bookkeeping PVs.
    pub pv_root: String,
    pub width: u32,
    pub height: u32,
}

impl Default for MonitorsConfig {
    fn default() -> Self {
        let names = |v: &[&str]| v.iter().map(|s| s.to_string()).collect();
        Self {
            large: names(&[
                "LM20L", "LM20R", "LM21L", "LM21R", "LM22L", "LM22R", "LM23L", "LM23R", "LM24L", "LM24R",
            ]),
            small: names(&[
                "SM20A", "SM20B", "SM20C", "SM20D", "SM22A", "SM22B", "SM22C", "SM22D", "SM24A", "SM24B",
                "SM24C", "SM24D", "SM26A", "SM26B", "SM26C", "SM26D", "SM28A", "SM28B", "SM28C", "SM28D",
            ]),
            defaults_file: PathBuf::from("core/defaults.csv"),
            sunray_dir: PathBuf::from("/usr/local/admin/sunray"),
            pv_root: "CUD:ACR0".to_string(),
            width: 1920,
            height: 1080,
        }
    }
}
