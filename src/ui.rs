//! egui_plot painting of [`OrbitView`] primitives.

use egui::Ui;
use egui_plot::{GridInput, GridMark, Line, Plot};

use crate::orbit::SectorTick;
use crate::view::{AxisRange, OrbitView, ViewRange};

/// Wheel zoom sensitivity per scroll point.
const SCROLL_ZOOM: f64 = 0.001;

fn tick_label(ticks: &[SectorTick], value: f64, tol: f64) -> Option<&str> {
    ticks
        .iter()
        .find(|t| (t.z - value).abs() <= tol)
        .map(|t| t.label.as_str())
}

/// Smallest spacing between neighbouring ticks; egui_plot uses it to fade labels.
fn min_spacing(ticks: &[SectorTick], fallback: f64) -> f64 {
    ticks
        .windows(2)
        .map(|w| w[1].z - w[0].z)
        .filter(|d| *d > 0.0)
        .fold(f64::INFINITY, f64::min)
        .min(fallback)
        .max(f64::EPSILON)
}

impl OrbitView {
    /// Paint this view into `ui` with the given height and feed user pan/zoom back
    /// into the clamped view range.
    pub fn show(&mut self, ui: &mut Ui, id: &str, height: f32) {
        if let Some(title) = self.title() {
            ui.label(egui::RichText::new(title).strong());
        }

        let push_range = self.take_range_changed();
        let range = self.range();
        let major = self.ticks().major.clone();
        let minor = self.ticks().minor.clone();
        let x_span = self.x_limits().span().abs().max(1.0);
        let major_step = x_span;
        let minor_step = min_spacing(&minor, x_span);
        let label_tol = 1e-6 * x_span;

        let mut plot = Plot::new(id)
            .height(height)
            .allow_scroll(false)
            .allow_zoom(false)
            .allow_boxed_zoom(false)
            .allow_double_click_reset(false)
            .show_x(false)
            .y_axis_label(self.y_label());

        if !major.is_empty() {
            let spacer_major = major.clone();
            let spacer_minor = minor.clone();
            plot = plot
                .x_grid_spacer(move |_input: GridInput| {
                    let mut marks: Vec<GridMark> = spacer_minor
                        .iter()
                        .map(|t| GridMark {
                            value: t.z,
                            step_size: minor_step,
                        })
                        .collect();
                    marks.extend(spacer_major.iter().map(|t| GridMark {
                        value: t.z,
                        step_size: major_step,
                    }));
                    marks
                })
                .x_axis_formatter(move |mark, _range| {
                    tick_label(&major, mark.value, label_tol)
                        .or_else(|| tick_label(&minor, mark.value, label_tol))
                        .unwrap_or_default()
                        .to_string()
                });
        }

        let opts = self.options();
        match (&opts.x_link, &opts.y_link) {
            (Some(x), Some(y)) if x == y => plot = plot.link_axis(x.clone(), egui::Vec2b::new(true, true)),
            (Some(x), _) => plot = plot.link_axis(x.clone(), egui::Vec2b::new(true, false)),
            (None, Some(y)) => plot = plot.link_axis(y.clone(), egui::Vec2b::new(false, true)),
            (None, None) => {}
        }

        let this = &*self;
        let resp = plot.show(ui, |plot_ui| {
            if push_range {
                plot_ui.set_plot_bounds_x(range.x.min..=range.x.max);
                plot_ui.set_plot_bounds_y(range.y.min..=range.y.max);
            }
            let palette = this.palette();
            if let Some([x1, y1, x2, y2]) = this.axis_line() {
                plot_ui.line(Line::new("axis", vec![[x1, y1], [x2, y2]]).color(palette.axis).width(1.0));
            }
            if let Some(rms) = this.rms_curve() {
                if !rms.is_empty() {
                    plot_ui.line(
                        Line::new("rms", rms.to_vec())
                            .color(palette.rms_line)
                            .width(1.0)
                            .fill(0.0),
                    );
                }
            }
            for l in this.lines() {
                let [x1, y1, x2, y2] = l.line;
                plot_ui.line(
                    Line::new(l.name.as_str(), vec![[x1, y1], [x2, y2]])
                        .color(palette.color_for(l.style))
                        .width(palette.bpm_width),
                );
            }
            if let Some(fit) = this.fit_curve() {
                plot_ui.line(Line::new("fit", fit.to_vec()).color(palette.fit).width(1.5));
            }
            plot_ui.plot_bounds()
        });

        if resp.response.double_clicked() {
            self.reset_range();
            return;
        }
        let b = resp.inner;
        self.set_range(ViewRange {
            x: AxisRange::new(b.min()[0], b.max()[0]),
            y: AxisRange::new(b.min()[1], b.max()[1]),
        });
        if resp.response.hovered() {
            let dy = ui.input(|i| i.raw_scroll_delta.y) as f64;
            if dy != 0.0 {
                self.zoom_y(1.0 - dy * SCROLL_ZOOM);
            }
        }
    }
}
