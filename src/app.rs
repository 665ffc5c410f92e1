use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use eframe::egui;

use crate::config::{clamp_zoom, Args, PersistedState, ReaderConfig, APP_KEY};
use crate::events;
use crate::loader::ContentLoader;
use crate::navigation::NavigationData;
use crate::rewrite::RewriteOptions;
use crate::source::{self, ContentSource};
use crate::toc::TocPanel;
use crate::viewer::ContentViewer;

const APP_NAME: &str = "EPUB Reader";

pub struct ReaderApp {
    toc: TocPanel,
    viewer: ContentViewer,
    toc_file: Option<PathBuf>,
    dark_mode: bool,
    zoom_level: f32,
    show_toc: bool,
    error_message: Option<String>,
    is_dragging: bool,
}

impl ReaderApp {
    pub fn new(cc: &eframe::CreationContext<'_>, args: Args) -> Self {
        // Load persisted state
        let persisted: PersistedState = cc
            .storage
            .and_then(|s| eframe::get_value(s, APP_KEY))
            .unwrap_or_default();

        let config = ReaderConfig::resolve(args, persisted);
        let system_dark = cc.egui_ctx.style().visuals.dark_mode;
        Self::with_config(config, cc.egui_ctx.clone(), system_dark)
    }

    /// Wire the tree, the viewer and the loader together and show the start path.
    pub fn with_config(config: ReaderConfig, ctx: egui::Context, system_dark: bool) -> Self {
        let (sender, receiver) = events::channel();

        let content_source: Arc<dyn ContentSource> = Arc::from(source::from_location(&config.content));
        let options = RewriteOptions {
            sanitize: !config.trust_content,
        };
        if config.trust_content {
            log::warn!("Content sanitization disabled; chapters are displayed as served");
        }
        let loader = ContentLoader::new(content_source, options).with_repaint(move || ctx.request_repaint());

        let mut app = Self {
            toc: TocPanel::new(&NavigationData::default(), config.prefix.clone(), sender.clone()),
            viewer: ContentViewer::new(loader, sender, receiver),
            toc_file: None,
            // Use persisted dark_mode, or fall back to system default
            dark_mode: config.dark_mode.unwrap_or(system_dark),
            zoom_level: config.zoom_level,
            show_toc: config.show_toc,
            error_message: None,
            is_dragging: false,
        };

        if let Some(path) = &config.toc_file {
            app.load_navigation(path);
        }

        app.viewer.navigate(&config.start_path);
        if config.watch {
            app.viewer.set_watch_enabled(true);
        }

        app
    }

    fn load_navigation(&mut self, path: &Path) {
        match NavigationData::load(path) {
            Ok(data) => {
                self.toc.set_data(&data);
                self.toc_file = Some(path.to_path_buf());
                self.error_message = None;
            }
            Err(e) => {
                log::error!("Failed to load navigation file {:?}: {}", path, e);
                self.error_message = Some(format!("Failed to load navigation {}: {}", path.display(), e));
            }
        }
    }

    fn open_navigation_dialog(&mut self) {
        if let Some(path) = rfd::FileDialog::new()
            .add_filter("Navigation", &["json"])
            .add_filter("All Files", &["*"])
            .pick_file()
        {
            self.load_navigation(&path);
        }
    }

    fn window_title(&self) -> String {
        window_title(self.viewer.document_title(), self.viewer.content_path())
    }

    fn toggle_watch(&mut self) {
        if !self.viewer.can_watch() {
            self.error_message = Some("Live reload is only available for local book directories".to_string());
            return;
        }
        let watching = self.viewer.is_watching();
        self.viewer.set_watch_enabled(!watching);
    }

    fn zoom_by(&mut self, delta: f32) {
        self.zoom_level = clamp_zoom(self.zoom_level + delta);
    }
}

fn window_title(document_title: Option<&str>, content_path: Option<&str>) -> String {
    let name = document_title.or_else(|| {
        content_path
            .map(crate::rewrite::strip_fragment)
            .and_then(|path| path.rsplit('/').next())
            .filter(|name| !name.is_empty())
    });
    match name {
        Some(name) => format!("{} - {}", name, APP_NAME),
        None => APP_NAME.to_string(),
    }
}

fn is_navigation_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

impl eframe::App for ReaderApp {
    fn save(&mut self, storage: &mut dyn eframe::Storage) {
        let state = PersistedState {
            dark_mode: Some(self.dark_mode),
            zoom_level: Some(self.zoom_level),
            show_toc: Some(self.show_toc),
            last_path: self.viewer.content_path().map(str::to_string),
            toc_file: self.toc_file.clone(),
        };
        eframe::set_value(storage, APP_KEY, &state);
    }

    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // Navigation requests, finished loads and chapter file changes
        self.viewer.poll();
        if let Some(error) = self.viewer.take_watch_error() {
            self.error_message = Some(error);
        }

        // Request periodic repaints when watching is enabled
        if self.viewer.is_watching() {
            ctx.request_repaint_after(Duration::from_millis(100));
        }

        // Apply theme and style settings
        ctx.set_visuals(if self.dark_mode {
            egui::Visuals::dark()
        } else {
            egui::Visuals::light()
        });
        ctx.style_mut(|style| {
            style.url_in_tooltip = true;
        });

        ctx.set_zoom_factor(self.zoom_level);
        ctx.send_viewport_cmd(egui::ViewportCommand::Title(self.window_title()));

        // Handle keyboard shortcuts
        let mut open_dialog = false;
        let mut toggle_watch = false;
        let mut toggle_dark = false;
        let mut toggle_toc = false;
        let mut reload = false;
        let mut quit_app = false;
        let mut zoom_delta: f32 = 0.0;
        let mut go_back = false;
        let mut go_forward = false;

        ctx.input(|i| {
            // Ctrl+O: Open navigation file
            if i.modifiers.ctrl && !i.modifiers.shift && i.key_pressed(egui::Key::O) {
                open_dialog = true;
            }
            // Ctrl+Shift+O: Toggle table of contents
            if i.modifiers.ctrl && i.modifiers.shift && i.key_pressed(egui::Key::O) {
                toggle_toc = true;
            }
            // Ctrl+W: Toggle live reload
            if i.modifiers.ctrl && i.key_pressed(egui::Key::W) {
                toggle_watch = true;
            }
            // F5 or Ctrl+R: Reload chapter
            if i.key_pressed(egui::Key::F5) || (i.modifiers.ctrl && i.key_pressed(egui::Key::R)) {
                reload = true;
            }
            // Alt+Left: Go back in history
            if i.modifiers.alt && i.key_pressed(egui::Key::ArrowLeft) {
                go_back = true;
            }
            // Alt+Right: Go forward in history
            if i.modifiers.alt && i.key_pressed(egui::Key::ArrowRight) {
                go_forward = true;
            }
            // Ctrl+D: Toggle dark mode
            if i.modifiers.ctrl && i.key_pressed(egui::Key::D) {
                toggle_dark = true;
            }
            // Ctrl+Q: Quit
            if i.modifiers.ctrl && i.key_pressed(egui::Key::Q) {
                quit_app = true;
            }
            // Ctrl+Plus or Ctrl+=: Zoom in
            if i.modifiers.ctrl && (i.key_pressed(egui::Key::Plus) || i.key_pressed(egui::Key::Equals)) {
                zoom_delta = 0.1;
            }
            // Ctrl+Minus: Zoom out
            if i.modifiers.ctrl && i.key_pressed(egui::Key::Minus) {
                zoom_delta = -0.1;
            }
            // Ctrl+0: Reset zoom
            if i.modifiers.ctrl && i.key_pressed(egui::Key::Num0) {
                zoom_delta = 1.0 - self.zoom_level;
            }
            // Ctrl + scroll wheel for zoom
            if i.modifiers.ctrl && i.raw_scroll_delta.y != 0.0 {
                zoom_delta = if i.raw_scroll_delta.y > 0.0 { 0.1 } else { -0.1 };
            }
        });

        if zoom_delta != 0.0 {
            self.zoom_by(zoom_delta);
        }
        if open_dialog {
            self.open_navigation_dialog();
        }
        if toggle_watch {
            self.toggle_watch();
        }
        if reload {
            self.viewer.reload();
        }
        if toggle_dark {
            self.dark_mode = !self.dark_mode;
        }
        if toggle_toc {
            self.show_toc = !self.show_toc;
        }
        if quit_app {
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
        }
        if go_back {
            self.viewer.navigate_back();
        }
        if go_forward {
            self.viewer.navigate_forward();
        }

        // Handle drag and drop
        self.is_dragging = false;
        let dropped: Vec<PathBuf> = ctx.input(|i| {
            self.is_dragging = !i.raw.hovered_files.is_empty();
            i.raw.dropped_files.iter().filter_map(|file| file.path.clone()).collect()
        });
        for path in dropped {
            if is_navigation_file(&path) {
                self.load_navigation(&path);
            } else {
                self.error_message =
                    Some("Unsupported file type. Please drop a navigation file (.json)".to_string());
            }
        }

        // Menu bar
        egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
            egui::MenuBar::new().ui(ui, |ui| {
                ui.menu_button("File", |ui| {
                    if ui
                        .add(egui::Button::new("Open Navigation...").shortcut_text("Ctrl+O"))
                        .clicked()
                    {
                        self.open_navigation_dialog();
                        ui.close();
                    }

                    let can_reload = self.viewer.content_path().is_some();
                    if ui
                        .add_enabled(can_reload, egui::Button::new("Reload").shortcut_text("F5"))
                        .clicked()
                    {
                        self.viewer.reload();
                        ui.close();
                    }

                    ui.separator();

                    let is_watching = self.viewer.is_watching();
                    let watch_text = if is_watching { "✓ Watch Chapter" } else { "Watch Chapter" };
                    if ui
                        .add_enabled(
                            self.viewer.can_watch(),
                            egui::Button::new(watch_text).shortcut_text("Ctrl+W"),
                        )
                        .clicked()
                    {
                        self.toggle_watch();
                        ui.close();
                    }

                    ui.separator();

                    if ui.add(egui::Button::new("Quit").shortcut_text("Ctrl+Q")).clicked() {
                        ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                        ui.close();
                    }
                });

                ui.menu_button("Navigate", |ui| {
                    let can_back = self.viewer.can_go_back();
                    if ui
                        .add_enabled(can_back, egui::Button::new("← Back").shortcut_text("Alt+←"))
                        .clicked()
                    {
                        self.viewer.navigate_back();
                        ui.close();
                    }

                    let can_forward = self.viewer.can_go_forward();
                    if ui
                        .add_enabled(can_forward, egui::Button::new("→ Forward").shortcut_text("Alt+→"))
                        .clicked()
                    {
                        self.viewer.navigate_forward();
                        ui.close();
                    }
                });

                ui.menu_button("View", |ui| {
                    let theme_text = if self.dark_mode { "☀ Light Mode" } else { "🌙 Dark Mode" };
                    if ui.add(egui::Button::new(theme_text).shortcut_text("Ctrl+D")).clicked() {
                        self.dark_mode = !self.dark_mode;
                        ui.close();
                    }

                    let toc_text = if self.show_toc {
                        "✓ Show Contents"
                    } else {
                        "Show Contents"
                    };
                    if ui.add(egui::Button::new(toc_text).shortcut_text("Ctrl+Shift+O")).clicked() {
                        self.show_toc = !self.show_toc;
                        ui.close();
                    }
                    if ui.add_enabled(!self.toc.is_empty(), egui::Button::new("Expand All")).clicked() {
                        self.toc.expand_all();
                        ui.close();
                    }
                    if ui.add_enabled(self.toc.has_expanded(), egui::Button::new("Collapse All")).clicked() {
                        self.toc.collapse_all();
                        ui.close();
                    }

                    ui.separator();

                    if ui.add(egui::Button::new("Zoom In").shortcut_text("Ctrl++")).clicked() {
                        self.zoom_by(0.1);
                        ui.close();
                    }
                    if ui.add(egui::Button::new("Zoom Out").shortcut_text("Ctrl+-")).clicked() {
                        self.zoom_by(-0.1);
                        ui.close();
                    }
                    if ui.add(egui::Button::new("Reset Zoom").shortcut_text("Ctrl+0")).clicked() {
                        self.zoom_level = 1.0;
                        ui.close();
                    }
                });

                // Show current content path on the right
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    if (self.zoom_level - 1.0).abs() > 0.01 {
                        ui.label(
                            egui::RichText::new(format!("{}%", (self.zoom_level * 100.0).round() as i32))
                                .small()
                                .color(ui.visuals().weak_text_color()),
                        );
                        ui.separator();
                    }

                    if self.viewer.is_loading() {
                        ui.spinner();
                        ui.separator();
                    }

                    if self.viewer.is_watching() {
                        ui.label(egui::RichText::new("● LIVE").color(egui::Color32::from_rgb(100, 200, 100)));
                        ui.separator();
                    }

                    if let Some(path) = self.viewer.content_path() {
                        ui.label(
                            egui::RichText::new(path)
                                .small()
                                .color(ui.visuals().weak_text_color()),
                        )
                        .on_hover_text(self.viewer.source_description());
                    }
                });
            });
        });

        // Table of contents sidebar (left side)
        if self.show_toc && !self.toc.is_empty() {
            let current_path = self.viewer.content_path().map(str::to_string);
            let toc = &mut self.toc;
            egui::SidePanel::left("toc")
                .resizable(true)
                .default_width(240.0)
                .min_width(140.0)
                .max_width(420.0)
                .show(ctx, |ui| {
                    ui.add_space(4.0);
                    ui.horizontal(|ui| {
                        ui.set_max_width(ui.available_width());
                        ui.add_space(6.0);
                        let title = if toc.title().is_empty() { "Contents" } else { toc.title() };
                        ui.add(egui::Label::new(egui::RichText::new(title).heading()).truncate());
                    });
                    ui.separator();
                    egui::ScrollArea::vertical()
                        .scroll_bar_visibility(egui::scroll_area::ScrollBarVisibility::AlwaysHidden)
                        .scroll_source(
                            egui::scroll_area::ScrollSource::SCROLL_BAR
                                | egui::scroll_area::ScrollSource::MOUSE_WHEEL,
                        )
                        .show(ui, |ui| {
                            toc.show(ui, current_path.as_deref());
                        });
                });
        }

        // Main content panel
        let mut clear_error = false;
        egui::CentralPanel::default().show(ctx, |ui| {
            if let Some(error) = &self.error_message {
                let error_text = error.clone();
                ui.horizontal(|ui| {
                    ui.label(egui::RichText::new("⚠").color(egui::Color32::from_rgb(255, 200, 100)));
                    ui.label(egui::RichText::new(&error_text).color(egui::Color32::from_rgb(255, 200, 100)));
                    if ui.small_button("✕").clicked() {
                        clear_error = true;
                    }
                });
                ui.separator();
            }

            self.viewer.show(ui);
        });
        if clear_error {
            self.error_message = None;
        }

        // Drag and drop overlay
        if self.is_dragging {
            let screen_rect = ctx.available_rect();
            let painter = ctx.layer_painter(egui::LayerId::new(
                egui::Order::Foreground,
                egui::Id::new("drop_overlay"),
            ));

            painter.rect_filled(
                screen_rect,
                0.0,
                egui::Color32::from_rgba_unmultiplied(0, 0, 0, 180),
            );

            painter.text(
                screen_rect.center(),
                egui::Align2::CENTER_CENTER,
                "Drop navigation file here",
                egui::FontId::proportional(24.0),
                egui::Color32::WHITE,
            );
        }
    }
}
