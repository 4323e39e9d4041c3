//! Native orbit CUD window.
//!
//! | Sub-module   | Responsibility |
//! | ------------ | -------------- |
//! | [`cud_app`]  | [`CudApp`]: per-frame PV polling, draw ticks and the eframe integration |
//! | [`toolbar`]  | Reference, overlay and range controls plus the status bar |
//! | [`run`]      | [`run_orbit_screen()`] entry point and icon loading |

mod cud_app;
mod run;
mod toolbar;

pub use cud_app::CudApp;
pub use run::run_orbit_screen;
