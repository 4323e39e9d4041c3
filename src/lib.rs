//! FACET-II CUD orbit displays.
//!
//! - `orbit`: BPMs, orbits, live-minus-reference diffs and MAT-file snapshots
//! - `pv`: the subscribe/put contract of the control system and an in-process bus
//! - `refs`: beam reference files and `current_refs.csv`
//! - `view` / `ui`: the time-driven orbit renderer and its egui_plot painting
//! - `screen`: one orbit CUD with its reference/diff workflow
//! - `config`: YAML configuration of CUDs, orbits, paths and monitors
//! - `launch` / `remote`: spawning CUDs locally and on the ACR monitors
//! - `app`: the native eframe window
//! - `sim`: a simulated BPM feed

pub mod app;
pub mod config;
pub mod error;
pub mod launch;
pub mod orbit;
pub mod pv;
pub mod refs;
pub mod remote;
pub mod screen;
pub mod sim;
pub mod ui;
pub mod view;

pub use app::{run_orbit_screen, CudApp};
pub use config::CudConfig;
pub use error::{Error, Result};
pub use orbit::{Axis, Bpm, DiffOrbit, Orbit, OrbitHandle, OrbitModel};
pub use pv::{PvBus, PvSource, PvUpdate, PvValue, PvWriter};
pub use refs::{BeamRefStore, ReferenceKind};
pub use screen::{OrbitScreen, RefFailurePolicy};
pub use view::{OrbitView, OrbitViewOptions, RmsMode};
