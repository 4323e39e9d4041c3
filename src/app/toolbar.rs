use chrono::Local;
use eframe::egui;
use egui_phosphor::regular::{ARROW_COUNTER_CLOCKWISE, CAMERA, FOLDER_OPEN, PULSE, TRASH};
use tracing::warn;

use crate::orbit::OrbitModel;
use crate::view::RmsMode;

use super::CudApp;

impl CudApp {
    pub(super) fn toolbar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.heading(self.screen.title());
            ui.separator();

            if let Some(kind) = self.screen.ref_kind() {
                if ui
                    .button(format!("{CAMERA} Take reference"))
                    .on_hover_text("Save the current live orbit as the new reference")
                    .clicked()
                {
                    let snapshot = self.screen.live().borrow().snapshot();
                    if let Err(e) = self
                        .screen
                        .store()
                        .set_orbit_reference(kind, &snapshot, Local::now(), &self.bus)
                    {
                        warn!(error = %e, "taking reference failed");
                    }
                }
                if ui.button(format!("{TRASH} Clear reference")).clicked() {
                    if let Err(e) = self.screen.store().clear(kind, &self.bus) {
                        warn!(error = %e, "clearing reference failed");
                    }
                }
            }

            if ui
                .button(format!("{FOLDER_OPEN} Load…"))
                .on_hover_text("Diff against an orbit snapshot file")
                .clicked()
            {
                if let Some(path) = rfd::FileDialog::new()
                    .set_directory(self.screen.store().dir())
                    .add_filter("MAT-file", &["mat"])
                    .pick_file()
                {
                    // Failures are reported on the status bar.
                    let _ = self.screen.load_reference(&path);
                }
            }
            if self.screen.is_showing_diff() && ui.button(format!("{PULSE} Live")).clicked() {
                self.screen.show_live();
            }

            ui.separator();
            let mut mode = self.screen.views().first().map(|v| v.rms_mode()).unwrap_or_default();
            let before = mode;
            egui::ComboBox::from_id_salt("rms_mode")
                .selected_text(rms_mode_label(mode))
                .show_ui(ui, |ui| {
                    for m in [RmsMode::Off, RmsMode::FilledLine, RmsMode::Bars] {
                        ui.selectable_value(&mut mode, m, rms_mode_label(m));
                    }
                });
            if mode != before {
                for v in self.screen.views_mut() {
                    v.set_rms_mode(mode);
                }
            }

            let mut fit = self.screen.views().first().is_some_and(|v| v.display_fit());
            if ui.checkbox(&mut fit, "Fit").changed() {
                for v in self.screen.views_mut() {
                    v.set_display_fit(fit);
                }
            }

            if ui
                .button(ARROW_COUNTER_CLOCKWISE)
                .on_hover_text("Reset range")
                .clicked()
            {
                for v in self.screen.views_mut() {
                    v.reset_range();
                }
            }
        });
    }

    pub(super) fn status_bar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            for kind in self.screen.label_kinds() {
                let text = self.screen.ref_label(*kind).unwrap_or("…");
                ui.label(format!("{kind}: {text}"));
                ui.separator();
            }
            let shown = if self.screen.is_showing_diff() {
                "live - reference"
            } else {
                "live"
            };
            ui.label(shown);
            if let Some(rms) = self.screen.live().borrow().rms(crate::orbit::Axis::X) {
                ui.separator();
                ui.label(format!("x rms {rms:.3} mm"));
            }
            if let Some(msg) = self.screen.last_status() {
                ui.separator();
                ui.label(msg);
            }
        });
    }
}

fn rms_mode_label(mode: RmsMode) -> &'static str {
    match mode {
        RmsMode::Off => "RMS off",
        RmsMode::FilledLine => "RMS line",
        RmsMode::Bars => "RMS bars",
    }
}
