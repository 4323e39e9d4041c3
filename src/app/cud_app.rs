use std::time::{Duration, Instant};

use eframe::egui;
use tracing::{info, warn};

use crate::config::{CudConfig, LaunchTarget};
use crate::error::{Error, LaunchError};
use crate::pv::PvBus;
use crate::refs::BeamRefStore;
use crate::screen::{OrbitScreen, OrbitScreenConfig, RefFailurePolicy};
use crate::sim::{SimSettings, SimulatedFeed};

/// Longest pause between repaints when no draw timer is due sooner.
const MAX_REPAINT_INTERVAL: Duration = Duration::from_millis(100);

/// The orbit CUD application: one [`OrbitScreen`] fed from a [`PvBus`].
pub struct CudApp {
    pub(super) screen: OrbitScreen,
    pub(super) bus: PvBus,
    pub(super) window_title: String,
    _sim: Option<SimulatedFeed>,
}

impl CudApp {
    pub fn new(screen: OrbitScreen, bus: PvBus, window_title: String) -> Self {
        Self {
            screen,
            bus,
            window_title,
            _sim: None,
        }
    }

    /// Build the native screen of CUD `cud_id`. With `simulate` a synthetic BPM
    /// feed publishes onto the bus.
    pub fn from_config(cfg: &CudConfig, cud_id: &str, simulate: bool) -> Result<Self, Error> {
        let orbit_name = match cfg.launch_target(cud_id) {
            Some(LaunchTarget::Orbit(name)) => name,
            Some(_) => return Err(Error::Ui(format!("CUD '{cud_id}' is not a native orbit screen"))),
            None => return Err(LaunchError::UnknownCud(cud_id.to_string()).into()),
        };
        let oc = cfg
            .orbit(&orbit_name)
            .ok_or_else(|| Error::Ui(format!("orbit '{orbit_name}' is not configured")))?;
        let orbit = cfg.build_orbit(&orbit_name)?;
        let screen_cfg = OrbitScreenConfig {
            title: oc.title.clone(),
            ref_kind: oc.reference_kind(&orbit_name)?,
            label_kinds: oc.image_ref_kinds(&orbit_name)?,
            views: oc.view_options(&orbit_name)?,
            policy: RefFailurePolicy::default(),
        };
        // The bus delivers both edges of the pulse, so no hold time is needed in-process.
        let store = BeamRefStore::new(cfg.refs_dir())
            .with_update_pv(cfg.ref_update_pv.0.clone())
            .with_flag_pulse(Duration::ZERO);
        let window_title = if oc.window_title.is_empty() {
            format!("FACET-II CUD: {}", cfg.cud_desc(cud_id).unwrap_or(cud_id))
        } else {
            oc.window_title.clone()
        };

        let mut screen = OrbitScreen::new(orbit, store, screen_cfg);
        let bus = PvBus::new();
        let sim = if simulate {
            let feed = SimulatedFeed::spawn(bus.clone(), &screen.live().borrow(), SimSettings::default());
            Some(feed)
        } else {
            warn!("no simulated feed; BPM values arrive only from publishers on the in-process bus");
            None
        };
        screen.connect(&bus);
        if let Err(e) = screen.on_reference_updated() {
            warn!(error = %e, "initial reference could not be applied");
        }
        info!(cud = cud_id, orbit = %orbit_name, simulate, "orbit screen ready");
        Ok(Self {
            screen,
            bus,
            window_title,
            _sim: sim,
        })
    }

    pub fn screen(&self) -> &OrbitScreen {
        &self.screen
    }

    pub fn window_title(&self) -> &str {
        &self.window_title
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// eframe integration
// ─────────────────────────────────────────────────────────────────────────────

impl eframe::App for CudApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.screen.poll();
        let now = Instant::now();
        self.screen.tick(now);

        egui::TopBottomPanel::top("cud_toolbar").show(ctx, |ui| {
            self.toolbar(ui);
        });
        egui::TopBottomPanel::bottom("cud_status").show(ctx, |ui| {
            self.status_bar(ui);
        });
        egui::CentralPanel::default().show(ctx, |ui| {
            let n = self.screen.views().len().max(1) as f32;
            let spacing = ui.spacing().item_spacing.y;
            let height = ((ui.available_height() - spacing * (n - 1.0)) / n).max(50.0);
            for (i, view) in self.screen.views_mut().iter_mut().enumerate() {
                view.show(ui, &format!("orbit_view_{i}"), height);
            }
        });

        let next = self
            .screen
            .views()
            .iter()
            .filter_map(|v| v.time_until_redraw(now))
            .min()
            .unwrap_or(MAX_REPAINT_INTERVAL)
            .min(MAX_REPAINT_INTERVAL);
        ctx.request_repaint_after(next);
    }
}
