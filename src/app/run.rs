//! Entry point for running an orbit CUD as a native window.

use eframe::egui;

use super::CudApp;

/// Window icon, rendered from SVG at startup.
const ICON_SVG: &[u8] = include_bytes!("../../icon.svg");

/// Open `app` in a native window and block until it is closed.
pub fn run_orbit_screen(app: CudApp) -> eframe::Result<()> {
    let title = app.window_title().to_string();
    let mut viewport = egui::ViewportBuilder::default()
        .with_title(title.clone())
        .with_inner_size(egui::vec2(1920.0, 1080.0));
    if let Some(icon) = load_app_icon_svg(ICON_SVG) {
        viewport = viewport.with_icon(icon);
    }
    let opts = eframe::NativeOptions {
        viewport,
        ..Default::default()
    };

    eframe::run_native(
        &title,
        opts,
        Box::new(|cc| {
            let mut fonts = egui::FontDefinitions::default();
            egui_phosphor::add_to_fonts(&mut fonts, egui_phosphor::Variant::Regular);
            cc.egui_ctx.set_fonts(fonts);
            cc.egui_ctx.set_visuals(egui::Visuals::dark());
            Ok(Box::new(app))
        }),
    )
}

/// Render SVG bytes to an [`egui::IconData`]; `None` if they cannot be parsed.
fn load_app_icon_svg(data: &[u8]) -> Option<egui::IconData> {
    let opt = usvg::Options::default();
    let tree = usvg::Tree::from_data(data, &opt).ok()?;
    let size = tree.size().to_int_size();
    if size.width() == 0 || size.height() == 0 {
        return None;
    }
    let mut pixmap = tiny_skia::Pixmap::new(size.width(), size.height())?;
    resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());
    Some(egui::IconData {
        rgba: pixmap.take(),
        width: size.width(),
        height: size.height(),
    })
}
