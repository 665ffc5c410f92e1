//! Content pane: drains navigation requests, shows the loaded chapter and
//! turns clicks on internal links back into navigation requests.

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

use eframe::egui;
use egui_commonmark::{CommonMarkCache, CommonMarkViewer};
use notify::RecommendedWatcher;
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind, Debouncer};

use crate::events::{NavReceiver, NavSender};
use crate::loader::{ContentLoader, LoadState, ERROR_MESSAGE};

const MAX_WATCHER_RETRIES: u32 = 3;

type WatchEvents = Result<Vec<notify_debouncer_mini::DebouncedEvent>, notify::Error>;

pub struct ContentViewer {
    loader: ContentLoader,
    receiver: NavReceiver,
    sender: NavSender,
    cache: CommonMarkCache,
    /// Path the markdown cache was last prepared for.
    shown_path: Option<String>,
    // Navigation history
    history_back: Vec<String>,
    history_forward: Vec<String>,
    // Chapter file watcher state
    watch_enabled: bool,
    watcher: Option<Debouncer<RecommendedWatcher>>,
    watcher_rx: Option<Receiver<WatchEvents>>,
    watched_file: Option<PathBuf>,
    watcher_retry_count: u32,
    /// Last watcher problem, for the status banner.
    watch_error: Option<String>,
}

impl ContentViewer {
    pub fn new(loader: ContentLoader, sender: NavSender, receiver: NavReceiver) -> Self {
        Self {
            loader,
            receiver,
            sender,
            cache: CommonMarkCache::default(),
            shown_path: None,
            history_back: Vec::new(),
            history_forward: Vec::new(),
            watch_enabled: false,
            watcher: None,
            watcher_rx: None,
            watched_file: None,
            watcher_retry_count: 0,
            watch_error: None,
        }
    }

    pub fn state(&self) -> &LoadState {
        self.loader.state()
    }

    pub fn content_path(&self) -> Option<&str> {
        self.loader.content_path()
    }

    pub fn is_loading(&self) -> bool {
        self.loader.is_loading()
    }

    pub fn document_title(&self) -> Option<&str> {
        match self.loader.state() {
            LoadState::Displayed(page) => page.rendered.title.as_deref(),
            _ => None,
        }
    }

    pub fn source_description(&self) -> String {
        self.loader.source().describe()
    }

    pub fn take_watch_error(&mut self) -> Option<String> {
        self.watch_error.take()
    }

    /// Navigate to `path`, recording the current path in history.
    pub fn navigate(&mut self, path: &str) {
        if let Some(current) = self.loader.content_path() {
            if current != path {
                self.history_back.push(current.to_string());
                // Clear forward history on new navigation
                self.history_forward.clear();
            }
        }
        self.loader.load(path);
    }

    pub fn navigate_back(&mut self) {
        if let Some(prev_path) = self.history_back.pop() {
            if let Some(current) = self.loader.content_path() {
                self.history_forward.push(current.to_string());
            }
            log::info!("Navigating back to: {}", prev_path);
            self.loader.load(&prev_path);
        }
    }

    pub fn navigate_forward(&mut self) {
        if let Some(next_path) = self.history_forward.pop() {
            if let Some(current) = self.loader.content_path() {
                self.history_back.push(current.to_string());
            }
            log::info!("Navigating forward to: {}", next_path);
            self.loader.load(&next_path);
        }
    }

    pub fn can_go_back(&self) -> bool {
        !self.history_back.is_empty()
    }

    pub fn can_go_forward(&self) -> bool {
        !self.history_forward.is_empty()
    }

    pub fn reload(&mut self) {
        self.loader.reload();
    }

    /// Handle a clicked link hook: internal links go back through the
    /// navigation channel, fragment-only links stay on the page.
    pub fn follow_link(&self, link: &str) {
        if link.starts_with('#') {
            log::debug!("Ignoring anchor-only link: {}", link);
            return;
        }
        self.sender.dispatch(link);
    }

    /// Process pending navigation requests, finished loads and file changes.
    /// Call once per frame before [`ContentViewer::show`].
    pub fn poll(&mut self) {
        if let Some(change) = self.receiver.latest() {
            self.navigate(&change.path);
        }

        if self.loader.poll() {
            self.prepare_page();
        }

        if self.check_file_changes() {
            self.reload();
        }
    }

    /// Reset the markdown cache and register link hooks for a new page.
    fn prepare_page(&mut self) {
        let LoadState::Displayed(page) = self.loader.state() else {
            self.shown_path = None;
            return;
        };

        self.cache = CommonMarkCache::default();
        for hook in &page.rendered.link_hooks {
            self.cache.add_link_hook(hook);
        }
        let path = page.path.clone();
        self.shown_path = Some(path);

        if self.watch_enabled {
            self.start_watching();
        }
    }

    /// Check link hooks after rendering and return a clicked one
    fn check_link_hooks(&self) -> Option<String> {
        let LoadState::Displayed(page) = self.loader.state() else {
            return None;
        };
        page.rendered
            .link_hooks
            .iter()
            .find(|link| self.cache.get_link_hook(link) == Some(true))
            .cloned()
    }

    pub fn show(&mut self, ui: &mut egui::Ui) {
        match self.loader.state() {
            LoadState::Idle => {
                ui.centered_and_justified(|ui| {
                    ui.label(
                        egui::RichText::new("Select a chapter from the table of contents")
                            .color(ui.visuals().weak_text_color()),
                    );
                });
            }
            LoadState::Loading { .. } => {
                ui.centered_and_justified(|ui| {
                    ui.horizontal(|ui| {
                        ui.spinner();
                        ui.label(
                            egui::RichText::new("Loading...")
                                .size(18.0)
                                .color(ui.visuals().weak_text_color()),
                        );
                    });
                });
            }
            LoadState::Failed { path, .. } => {
                ui.vertical_centered(|ui| {
                    ui.add_space(20.0);
                    ui.label(egui::RichText::new(ERROR_MESSAGE).color(egui::Color32::RED));
                    ui.label(
                        egui::RichText::new(path.as_str())
                            .small()
                            .color(ui.visuals().weak_text_color()),
                    );
                });
            }
            LoadState::Displayed(page) => {
                egui::ScrollArea::vertical()
                    .id_salt(&page.path)
                    .auto_shrink([false, false])
                    .show(ui, |ui| {
                        ui.vertical_centered(|ui| {
                            ui.set_max_width(800.0);
                            CommonMarkViewer::new()
                                .max_image_width(Some(800))
                                .indentation_spaces(2)
                                .show_alt_text_on_hover(true)
                                .syntax_theme_dark("base16-ocean.dark")
                                .syntax_theme_light("base16-ocean.light")
                                .line_height(1.5)
                                .paragraph_spacing(1.5)
                                .heading_spacing_above(2.0)
                                .heading_spacing_below(0.5)
                                .show(ui, &mut self.cache, &page.rendered.markdown);
                        });
                    });
            }
        }

        self.dispatch_clicked_link();
    }

    /// Follow the link hook clicked during the last frame, if any.
    fn dispatch_clicked_link(&self) {
        if let Some(clicked_link) = self.check_link_hooks() {
            self.follow_link(&clicked_link);
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    /// Live reload is only possible for chapters backed by a local file.
    pub fn can_watch(&self) -> bool {
        self.loader
            .content_path()
            .and_then(|path| self.loader.source().local_path(path))
            .is_some()
    }

    pub fn set_watch_enabled(&mut self, enabled: bool) {
        self.watch_enabled = enabled;
        if enabled {
            self.start_watching();
        } else {
            self.stop_watching();
        }
    }

    fn start_watching(&mut self) {
        // Stop any existing watcher first
        self.stop_watching();

        let Some(file_path) = self
            .loader
            .content_path()
            .and_then(|path| self.loader.source().local_path(path))
        else {
            log::warn!("Cannot start watching: current chapter is not a local file");
            return;
        };

        let (tx, rx) = mpsc::channel();

        match new_debouncer(Duration::from_millis(200), tx) {
            Ok(mut debouncer) => {
                if let Err(e) = debouncer
                    .watcher()
                    .watch(&file_path, notify::RecursiveMode::NonRecursive)
                {
                    log::error!("Failed to watch file {:?}: {}", file_path, e);
                    self.watch_error = Some(format!("Failed to watch file: {}", e));
                    return;
                }

                log::info!("Started watching file: {:?}", file_path);
                self.watcher = Some(debouncer);
                self.watcher_rx = Some(rx);
                self.watched_file = Some(file_path);
                self.watcher_retry_count = 0;
            }
            Err(e) => {
                log::error!("Failed to create file watcher: {}", e);
                self.watch_error = Some(format!("Failed to create file watcher: {}", e));
            }
        }
    }

    fn stop_watching(&mut self) {
        if self.watcher.is_some() {
            log::info!("Stopped watching file {:?}", self.watched_file);
        }
        self.watcher = None;
        self.watcher_rx = None;
        self.watched_file = None;
    }

    fn check_file_changes(&mut self) -> bool {
        let Some(rx) = &self.watcher_rx else {
            // If watching was enabled but watcher is gone, try to recover
            if self.watch_enabled
                && self.shown_path.is_some()
                && self.watcher_retry_count < MAX_WATCHER_RETRIES
            {
                self.watcher_retry_count += 1;
                log::info!("Attempting to recover file watcher (attempt {})", self.watcher_retry_count);
                self.start_watching();
            }
            return false;
        };

        let mut needs_reload = false;

        // Non-blocking check for file change events
        let results: Vec<WatchEvents> = rx.try_iter().collect();
        for result in results {
            match result {
                Ok(events) => {
                    self.watcher_retry_count = 0;
                    for event in events {
                        if event.kind == DebouncedEventKind::Any {
                            log::debug!("Chapter change detected: {:?}", event.path);
                            needs_reload = true;
                        }
                    }
                }
                Err(e) => {
                    log::error!("File watcher error: {}", e);
                    self.watcher = None;
                    self.watcher_rx = None;

                    if self.watcher_retry_count < MAX_WATCHER_RETRIES {
                        self.watcher_retry_count += 1;
                        log::info!("Attempting watcher recovery (attempt {})", self.watcher_retry_count);
                        self.start_watching();
                        if self.watcher.is_none() {
                            self.watch_error = Some(format!(
                                "File watcher error (retry {}): {}",
                                self.watcher_retry_count, e
                            ));
                        }
                    } else {
                        self.watch_error = Some(format!(
                            "File watcher failed after {} retries: {}",
                            MAX_WATCHER_RETRIES, e
                        ));
                        self.watch_enabled = false;
                    }
                    return false;
                }
            }
        }

        needs_reload
    }
}
