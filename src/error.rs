//! Error types for the orbit model, reference files, configuration and launching.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Structural errors raised by the orbit model.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrbitError {
    /// Two orbits compared in a diff do not hold the same BPMs.
    #[error("BPM sets differ (missing from reference: {missing:?}, extra in reference: {extra:?})")]
    BpmMismatch {
        missing: Vec<String>,
        extra: Vec<String>,
    },

    /// A BPM with this name is already part of the orbit.
    #[error("duplicate BPM '{0}'")]
    DuplicateBpm(String),

    /// Appending this BPM would break the non-decreasing z ordering.
    #[error("BPM '{name}' at z={z} lies upstream of the previous BPM at z={previous}")]
    NonMonotonicZ { name: String, z: f64, previous: f64 },

    /// A BPM position that is NaN or infinite.
    #[error("BPM '{name}' has non-finite z={z}")]
    NonFiniteZ { name: String, z: f64 },

    /// An axis name other than x, y or tmit.
    #[error("axis must be 'x', 'y', or 'tmit' (got '{0}')")]
    InvalidAxis(String),
}

/// Errors from reading or writing MAT-file orbit snapshots.
#[derive(Error, Debug)]
pub enum MatFileError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file does not start with a Level 5 MAT-file header.
    #[error("not a Level 5 MAT-file: {0}")]
    BadHeader(String),

    /// The file uses a feature this reader does not handle (compression, big-endian, ...).
    #[error("unsupported MAT-file content: {0}")]
    Unsupported(String),

    /// A data element is truncated or malformed.
    #[error("corrupt data element: {0}")]
    Corrupt(String),

    /// A variable the orbit snapshot layout requires is absent.
    #[error("missing variable '{0}'")]
    MissingVariable(String),

    /// Variables have inconsistent shapes or types.
    #[error("bad variable '{name}': {reason}")]
    BadVariable { name: String, reason: String },

    #[error(transparent)]
    Orbit(#[from] OrbitError),
}

/// Errors from the beam reference bookkeeping.
#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An unknown reference type key.
    #[error("unknown reference type '{0}'")]
    UnknownKind(String),

    /// A malformed line in `current_refs.csv`.
    #[error("malformed line {line} in current refs file: '{text}'")]
    MalformedIndex { line: usize, text: String },

    /// A reference filename whose timestamp cannot be parsed.
    #[error("bad reference timestamp '{0}'")]
    BadTimestamp(String),

    /// The reference snapshot itself failed to load.
    #[error("failed to load reference {path:?}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: MatFileError,
    },

    /// The reference holds a different set of BPMs than the live orbit.
    #[error("reference {path:?} does not match the live orbit: {source}")]
    Incompatible {
        path: PathBuf,
        #[source]
        source: OrbitError,
    },

    /// Writing a reference snapshot failed.
    #[error("failed to save reference {path:?}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: MatFileError,
    },

    /// Capturing a camera image for an image reference failed.
    #[error("image capture failed: {0}")]
    Capture(String),

    #[error("failed to write image reference: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Pv(#[from] PvError),
}

/// Errors raised by the process-variable layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PvError {
    /// The PV layer is gone (bus dropped).
    #[error("PV layer disconnected")]
    Disconnected,

    /// A put was rejected.
    #[error("put to '{address}' failed: {reason}")]
    PutFailed { address: String, reason: String },

    /// No value is available for the address.
    #[error("no value for '{0}'")]
    NoValue(String),
}

/// Errors from loading and validating the CUD configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A CUD listed in `cud_ids` has no entry.
    #[error("CUD '{0}' is listed but has no entry")]
    MissingCud(String),

    /// A screen references an orbit that is not defined.
    #[error("CUD '{cud}' refers to undefined orbit '{orbit}'")]
    UnknownOrbit { cud: String, orbit: String },

    /// An orbit definition is invalid.
    #[error("orbit '{orbit}': {source}")]
    Orbit {
        orbit: String,
        #[source]
        source: OrbitError,
    },

    /// A value is out of range or inconsistent.
    #[error("invalid setting '{key}': {reason}")]
    InvalidSetting { key: String, reason: String },
}

/// Errors from launching CUDs.
#[derive(Error, Debug)]
pub enum LaunchError {
    /// The requested CUD id does not exist.
    #[error("unknown CUD '{0}'")]
    UnknownCud(String),

    /// The launch command could not be split into arguments.
    #[error("bad launch command '{0}'")]
    BadCommand(String),

    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// Errors from the ACR remote-monitor control.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// The monitor name is not a known LM/SM.
    #[error("unknown monitor '{0}'")]
    UnknownMonitor(String),

    /// An external command exited unsuccessfully.
    #[error("command '{command}' failed: {reason}")]
    CommandFailed { command: String, reason: String },

    /// The launched display never appeared to the window manager.
    #[error("display '{0}' was not visible to the window manager in time")]
    WindowNotFound(String),

    #[error("malformed defaults line {line}: '{text}'")]
    MalformedDefaults { line: usize, text: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Pv(#[from] PvError),
}

/// Crate-level error.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Orbit(#[from] OrbitError),
    #[error(transparent)]
    MatFile(#[from] MatFileError),
    #[error(transparent)]
    Reference(#[from] ReferenceError),
    #[error(transparent)]
    Pv(#[from] PvError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("UI error: {0}")]
    Ui(String),
}

pub type Result<T> = std::result::Result<T, Error>;
