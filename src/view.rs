//! Orbit renderer state.
//!
//! [`OrbitView`] maps one orbit onto one axis as plot primitives: a vertical
//! line per BPM from zero to its reading, an optional fit curve, an optional
//! RMS overlay, a zero axis line and sector ticks. Painting those primitives
//! with egui_plot lives in [`crate::ui`]; this module is toolkit-free apart
//! from colors.
//!
//! Lifecycle is `Detached -> Stopped -> Running -> Stopped`:
//! - [`OrbitView::set_orbit`] stops the draw timer, drops every primitive of
//!   the previous orbit, rebinds and restarts the timer.
//! - [`OrbitView::tick`] redraws only when the timer is running and due, so
//!   the render cadence is independent of how fast PV updates arrive.

use std::time::{Duration, Instant};

use egui::Color32;
use tracing::debug;

use crate::orbit::{Axis, BpmReading, OrbitHandle, SectorTick};

/// Default redraw interval (60 Hz).
pub const DEFAULT_DRAW_INTERVAL: Duration = Duration::from_micros(1_000_000 / 60);
/// Margin added on each side of the orbit extent for the X limits.
pub const X_MARGIN_FRACTION: f64 = 0.02;
/// The Y range may zoom out to this multiple of the configured range.
pub const Y_LIMIT_FACTOR: f64 = 10.0;
/// Smallest allowed Y span.
pub const MIN_Y_SPAN: f64 = 0.04;

// ─────────────────────────────────────────────────────────────────────────────
// Modes and styles
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RmsMode {
    #[default]
    Off,
    /// Rolling RMS per BPM as a curve filled down to zero.
    FilledLine,
    /// BPM lines show the rolling RMS instead of the reading.
    Bars,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewState {
    Detached,
    Stopped,
    Running,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BpmStyle {
    Normal,
    EnergyBpm,
    NoBeam,
}

impl BpmStyle {
    pub fn for_reading(r: &BpmReading, axis: Axis) -> Self {
        if r.severity(axis) != 0 {
            BpmStyle::NoBeam
        } else if r.is_energy_bpm {
            BpmStyle::EnergyBpm
        } else {
            BpmStyle::Normal
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrbitPalette {
    pub bpm: Color32,
    pub energy_bpm: Color32,
    pub no_beam: Color32,
    pub fit: Color32,
    pub rms_line: Color32,
    pub axis: Color32,
    pub bpm_width: f32,
}

impl Default for OrbitPalette {
    fn default() -> Self {
        Self {
            bpm: Color32::from_rgb(0, 255, 0),
            energy_bpm: Color32::from_rgb(100, 200, 255),
            no_beam: Color32::from_rgb(255, 80, 80),
            fit: Color32::WHITE,
            rms_line: Color32::from_rgb(170, 170, 255),
            axis: Color32::WHITE,
            bpm_width: 2.0,
        }
    }
}

impl OrbitPalette {
    pub fn color_for(&self, style: BpmStyle) -> Color32 {
        match style {
            BpmStyle::Normal => self.bpm,
            BpmStyle::EnergyBpm => self.energy_bpm,
            BpmStyle::NoBeam => self.no_beam,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Draw timer
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed-interval timer driven by the caller's clock.
#[derive(Clone, Debug)]
pub struct DrawTimer {
    interval: Duration,
    running: bool,
    last_fire: Option<Instant>,
}

impl DrawTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            running: false,
            last_fire: None,
        }
    }

    /// Start; the next check fires immediately.
    pub fn start(&mut self) {
        self.running = true;
        self.last_fire = None;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// `true` if running and at least one interval passed since the last fire.
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        if !self.running {
            return false;
        }
        let due = self
            .last_fire
            .is_none_or(|last| now.saturating_duration_since(last) >= self.interval);
        if due {
            self.last_fire = Some(now);
        }
        due
    }

    /// Time left until the next fire, `None` when stopped.
    pub fn time_until_due(&self, now: Instant) -> Option<Duration> {
        if !self.running {
            return None;
        }
        Some(match self.last_fire {
            None => Duration::ZERO,
            Some(last) => self.interval.saturating_sub(now.saturating_duration_since(last)),
        })
    }
}

impl Default for DrawTimer {
    fn default() -> Self {
        Self::new(DEFAULT_DRAW_INTERVAL)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ranges
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AxisRange {
    pub min: f64,
    pub max: f64,
}

impl AxisRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    pub fn center(&self) -> f64 {
        0.5 * (self.min + self.max)
    }

    /// Fit `self` inside `limits` keeping the span when possible, never narrower than `min_span`.
    pub fn clamped(self, limits: AxisRange, min_span: f64) -> AxisRange {
        let span = self.span().max(min_span).min(limits.span());
        let mut min = self.center() - 0.5 * span;
        let mut max = min + span;
        if min < limits.min {
            min = limits.min;
            max = min + span;
        }
        if max > limits.max {
            max = limits.max;
            min = max - span;
        }
        AxisRange { min, max }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewRange {
    pub x: AxisRange,
    pub y: AxisRange,
}

// ─────────────────────────────────────────────────────────────────────────────
// Primitives
// ─────────────────────────────────────────────────────────────────────────────

/// One BPM drawn as a vertical segment `(x1, y1) -> (x2, y2)`.
#[derive(Clone, Debug, PartialEq)]
pub struct BpmLine {
    pub name: String,
    pub line: [f64; 4],
    pub style: BpmStyle,
}

impl BpmLine {
    fn at(z: f64, y: f64) -> [f64; 4] {
        [z, 0.0, z, if y.is_finite() { y } else { 0.0 }]
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SectorTicks {
    pub major: Vec<SectorTick>,
    pub minor: Vec<SectorTick>,
}

// ─────────────────────────────────────────────────────────────────────────────
// OrbitView
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct OrbitViewOptions {
    pub axis: Axis,
    pub ymin: f64,
    pub ymax: f64,
    pub label: String,
    pub units: String,
    pub use_sector_ticks: bool,
    /// Show the orbit name above the plot.
    pub show_title: bool,
    pub draw_interval: Duration,
    /// Views sharing a group id pan and zoom together on that axis.
    pub x_link: Option<String>,
    pub y_link: Option<String>,
}

impl Default for OrbitViewOptions {
    fn default() -> Self {
        Self {
            axis: Axis::X,
            ymin: -1.0,
            ymax: 1.0,
            label: "X".to_string(),
            units: "mm".to_string(),
            use_sector_ticks: true,
            show_title: false,
            draw_interval: DEFAULT_DRAW_INTERVAL,
            x_link: None,
            y_link: None,
        }
    }
}

pub struct OrbitView {
    opts: OrbitViewOptions,
    orbit: Option<OrbitHandle>,
    timer: DrawTimer,
    palette: OrbitPalette,
    rms_mode: RmsMode,
    display_fit: bool,
    lines: Vec<BpmLine>,
    fit_curve: Option<Vec<[f64; 2]>>,
    rms_curve: Option<Vec<[f64; 2]>>,
    axis_line: Option<[f64; 4]>,
    ticks: SectorTicks,
    title: Option<String>,
    range: ViewRange,
    x_limits: AxisRange,
    needs_initial_range: bool,
    range_changed: bool,
    redraws: u64,
}

impl OrbitView {
    pub fn new(opts: OrbitViewOptions) -> Self {
        let y = AxisRange::new(opts.ymin, opts.ymax);
        let x = AxisRange::new(0.0, 1.0);
        Self {
            timer: DrawTimer::new(opts.draw_interval),
            opts,
            orbit: None,
            palette: OrbitPalette::default(),
            rms_mode: RmsMode::Off,
            display_fit: false,
            lines: Vec::new(),
            fit_curve: None,
            rms_curve: None,
            axis_line: None,
            ticks: SectorTicks::default(),
            title: None,
            range: ViewRange { x, y },
            x_limits: x,
            needs_initial_range: true,
            range_changed: true,
            redraws: 0,
        }
    }

    /// A view bound to `orbit` and running.
    pub fn with_orbit(opts: OrbitViewOptions, orbit: OrbitHandle) -> Self {
        let mut view = Self::new(opts);
        view.set_orbit(orbit, true);
        view
    }

    pub fn options(&self) -> &OrbitViewOptions {
        &self.opts
    }

    pub fn axis(&self) -> Axis {
        self.opts.axis
    }

    pub fn state(&self) -> ViewState {
        match (&self.orbit, self.timer.is_running()) {
            (None, _) => ViewState::Detached,
            (Some(_), false) => ViewState::Stopped,
            (Some(_), true) => ViewState::Running,
        }
    }

    pub fn orbit(&self) -> Option<&OrbitHandle> {
        self.orbit.as_ref()
    }

    /// Bind to `orbit`. Binding the orbit that is already bound does nothing.
    pub fn set_orbit(&mut self, orbit: OrbitHandle, reset_range: bool) {
        if self.orbit.as_ref().is_some_and(|o| o.ptr_eq(&orbit)) {
            return;
        }
        self.clear_orbit();
        debug!(axis = %self.opts.axis, orbit = ?orbit, "binding orbit view");
        self.orbit = Some(orbit);
        self.rebuild();
        if reset_range || self.needs_initial_range {
            self.reset_range();
            self.needs_initial_range = false;
        }
        self.timer.start();
    }

    /// Stop drawing and drop every primitive belonging to the bound orbit.
    pub fn clear_orbit(&mut self) {
        self.timer.stop();
        if self.orbit.take().is_none() {
            return;
        }
        self.lines.clear();
        self.fit_curve = None;
        if self.rms_curve.is_some() {
            self.rms_curve = Some(Vec::new());
        }
        self.axis_line = None;
        self.ticks = SectorTicks::default();
        self.title = None;
    }

    /// Idempotent.
    pub fn stop(&mut self) {
        self.timer.stop();
    }

    /// Resume drawing. Does nothing while detached.
    pub fn start(&mut self) {
        if self.orbit.is_some() && !self.timer.is_running() {
            self.timer.start();
        }
    }

    pub fn set_draw_interval(&mut self, interval: Duration) {
        self.opts.draw_interval = interval;
        self.timer.set_interval(interval);
    }

    pub fn time_until_redraw(&self, now: Instant) -> Option<Duration> {
        self.timer.time_until_due(now)
    }

    /// Redraw if the timer is due. Returns whether a redraw happened.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.timer.fire_if_due(now) {
            self.redraw();
            true
        } else {
            false
        }
    }

    fn rebuild(&mut self) {
        let Some(orbit) = &self.orbit else {
            return;
        };
        let axis = self.opts.axis;
        let (name, readings, zmin, zmax, sectors) = orbit.with(|o| {
            (
                o.name().to_string(),
                o.readings(),
                o.zmin().unwrap_or(0.0),
                o.zmax().unwrap_or(0.0),
                o.sector_locations(),
            )
        });
        let margin = X_MARGIN_FRACTION * (zmax - zmin);
        self.x_limits = if margin > 0.0 {
            AxisRange::new(zmin - margin, zmax + margin)
        } else {
            AxisRange::new(zmin - 1.0, zmax + 1.0)
        };
        self.axis_line = Some([zmin, 0.0, zmax, 0.0]);
        self.title = (self.opts.show_title && !name.is_empty()).then_some(name);
        self.lines = readings
            .iter()
            .map(|r| BpmLine {
                name: r.name.clone(),
                line: BpmLine::at(r.z, 0.0),
                style: BpmStyle::for_reading(r, axis),
            })
            .collect();
        self.ticks = if self.opts.use_sector_ticks {
            SectorTicks {
                major: sectors,
                minor: readings
                    .iter()
                    .map(|r| SectorTick {
                        z: r.z,
                        label: r.unit().to_string(),
                    })
                    .collect(),
            }
        } else {
            SectorTicks::default()
        };
    }

    /// Refresh every primitive from the bound orbit.
    pub fn redraw(&mut self) {
        let Some(orbit) = self.orbit.clone() else {
            return;
        };
        let axis = self.opts.axis;
        if self.rms_mode != RmsMode::Off {
            orbit.with_mut(|o| o.save_latest());
        }
        let readings = orbit.with(|o| o.readings());
        if readings.len() != self.lines.len() {
            self.rebuild();
        }
        let bars = self.rms_mode == RmsMode::Bars;
        for (line, r) in self.lines.iter_mut().zip(&readings) {
            let y = if bars {
                r.rms(axis).unwrap_or(0.0)
            } else {
                r.value(axis)
            };
            line.line = BpmLine::at(r.z, y);
            line.style = BpmStyle::for_reading(r, axis);
        }
        if self.rms_mode == RmsMode::FilledLine {
            self.rms_curve = Some(
                readings
                    .iter()
                    .map(|r| [r.z, r.rms(axis).unwrap_or(0.0)])
                    .collect(),
            );
        }
        self.update_fit(&orbit);
        self.redraws += 1;
    }

    fn update_fit(&mut self, orbit: &OrbitHandle) {
        self.fit_curve = if self.display_fit {
            orbit.with(|o| o.fit_data()).and_then(|f| f.curve(self.opts.axis))
        } else {
            None
        };
    }

    pub fn redraw_count(&self) -> u64 {
        self.redraws
    }

    // ── overlays ────────────────────────────────────────────────────────────

    pub fn rms_mode(&self) -> RmsMode {
        self.rms_mode
    }

    pub fn set_rms_mode(&mut self, mode: RmsMode) {
        self.rms_mode = mode;
        self.rms_curve = match mode {
            RmsMode::FilledLine => Some(Vec::new()),
            RmsMode::Off | RmsMode::Bars => None,
        };
    }

    pub fn display_fit(&self) -> bool {
        self.display_fit
    }

    pub fn set_display_fit(&mut self, enabled: bool) {
        self.display_fit = enabled;
        if let Some(orbit) = self.orbit.clone() {
            self.update_fit(&orbit);
        } else {
            self.fit_curve = None;
        }
    }

    // ── primitives ──────────────────────────────────────────────────────────

    pub fn lines(&self) -> &[BpmLine] {
        &self.lines
    }

    pub fn fit_curve(&self) -> Option<&[[f64; 2]]> {
        self.fit_curve.as_deref()
    }

    pub fn rms_curve(&self) -> Option<&[[f64; 2]]> {
        self.rms_curve.as_deref()
    }

    pub fn axis_line(&self) -> Option<[f64; 4]> {
        self.axis_line
    }

    pub fn ticks(&self) -> &SectorTicks {
        &self.ticks
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Axis label with units, e.g. `X (mm)`.
    pub fn y_label(&self) -> String {
        if self.opts.units.is_empty() {
            self.opts.label.clone()
        } else {
            format!("{} ({})", self.opts.label, self.opts.units)
        }
    }

    // ── styling ─────────────────────────────────────────────────────────────

    pub fn palette(&self) -> &OrbitPalette {
        &self.palette
    }

    pub fn set_palette(&mut self, palette: OrbitPalette) {
        self.palette = palette;
    }

    pub fn set_bpm_color(&mut self, color: Color32) {
        self.palette.bpm = color;
    }

    pub fn set_x_link<S: Into<String>>(&mut self, group: Option<S>) {
        self.opts.x_link = group.map(Into::into);
    }

    pub fn set_y_link<S: Into<String>>(&mut self, group: Option<S>) {
        self.opts.y_link = group.map(Into::into);
    }

    // ── range ───────────────────────────────────────────────────────────────

    pub fn range(&self) -> ViewRange {
        self.range
    }

    pub fn x_limits(&self) -> AxisRange {
        self.x_limits
    }

    pub fn y_limits(&self) -> AxisRange {
        let a = Y_LIMIT_FACTOR * self.opts.ymin;
        let b = Y_LIMIT_FACTOR * self.opts.ymax;
        AxisRange::new(a.min(b), a.max(b))
    }

    /// X to the orbit extent with margin, Y to the configured range.
    pub fn reset_range(&mut self) {
        self.range = ViewRange {
            x: self.x_limits,
            y: AxisRange::new(self.opts.ymin, self.opts.ymax).clamped(self.y_limits(), MIN_Y_SPAN),
        };
        self.range_changed = true;
    }

    /// Apply a range, e.g. from user pan/zoom, clamped to the limits.
    pub fn set_range(&mut self, range: ViewRange) {
        let clamped = ViewRange {
            x: range.x.clamped(self.x_limits, 0.0),
            y: range.y.clamped(self.y_limits(), MIN_Y_SPAN),
        };
        if clamped != range {
            self.range_changed = true;
        }
        self.range = clamped;
    }

    /// Scale the Y span around its center; `factor > 1` zooms out.
    pub fn zoom_y(&mut self, factor: f64) {
        if !(factor.is_finite() && factor > 0.0) {
            return;
        }
        let y = self.range.y;
        let span = y.span() * factor;
        let c = y.center();
        self.range.y = AxisRange::new(c - 0.5 * span, c + 0.5 * span).clamped(self.y_limits(), MIN_Y_SPAN);
        self.range_changed = true;
    }

    /// `true` once after the range was changed programmatically.
    pub fn take_range_changed(&mut self) -> bool {
        std::mem::take(&mut self.range_changed)
    }
}
