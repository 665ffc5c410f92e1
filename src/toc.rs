//! Collapsible table-of-contents tree.

use eframe::egui;

use crate::events::NavSender;
use crate::navigation::{ExpansionState, NavNode, NavigationData};

/// Prefix joined to every menu `href`; hrefs are relative to this one root.
pub const DEFAULT_CONTENT_PREFIX: &str = "/OEBPS/";

const MAX_TITLE_CHARS: usize = 48;

pub struct TocPanel {
    title: String,
    nodes: Vec<NavNode>,
    expansion: ExpansionState,
    prefix: String,
    sender: NavSender,
}

impl TocPanel {
    pub fn new(data: &NavigationData, prefix: impl Into<String>, sender: NavSender) -> Self {
        Self {
            title: data.title.clone(),
            nodes: data.nodes(),
            expansion: ExpansionState::default(),
            prefix: prefix.into(),
            sender,
        }
    }

    /// Swap in new navigation data; expansion state starts over.
    pub fn set_data(&mut self, data: &NavigationData) {
        self.title = data.title.clone();
        self.nodes = data.nodes();
        self.expansion.clear();
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Content path a menu `href` navigates to.
    pub fn target_path(&self, href: &str) -> String {
        format!("{}{}", self.prefix, href)
    }

    /// Broadcast a navigation request for a linked node.
    pub fn activate(&self, href: &str) {
        log::debug!("Navigation link clicked: {}", href);
        self.sender.dispatch(self.target_path(href));
    }

    pub fn toggle(&mut self, key: &str) -> bool {
        self.expansion.toggle(key)
    }

    pub fn is_expanded(&self, key: &str) -> bool {
        self.expansion.is_expanded(key)
    }

    pub fn expand_all(&mut self) {
        self.expansion.expand_all(&self.nodes);
    }

    pub fn collapse_all(&mut self) {
        log::debug!("Collapsing {} open entries", self.expansion.len());
        self.expansion.clear();
    }

    pub fn has_expanded(&self) -> bool {
        !self.expansion.is_empty()
    }

    /// Draw the tree. `current_path` highlights the node being displayed.
    pub fn show(&mut self, ui: &mut egui::Ui, current_path: Option<&str>) {
        // Only handle clicks when not dragging (avoids accidental clicks during panel resize)
        let is_dragging = ui.ctx().input(|i| i.pointer.any_down());

        let mut clicked_href: Option<String> = None;
        let mut toggled_key: Option<String> = None;

        for (index, node) in self.nodes.iter().enumerate() {
            self.show_node(ui, node, index, current_path, &mut clicked_href, &mut toggled_key);
        }

        if is_dragging {
            return;
        }
        if let Some(key) = toggled_key {
            self.toggle(&key);
        }
        if let Some(href) = clicked_href {
            self.activate(&href);
        }
    }

    fn show_node(
        &self,
        ui: &mut egui::Ui,
        node: &NavNode,
        index: usize,
        current_path: Option<&str>,
        clicked_href: &mut Option<String>,
        toggled_key: &mut Option<String>,
    ) {
        let key = node.key(index);
        let expanded = self.is_expanded(&key);
        let display_text = truncate_title(node.title());

        ui.horizontal(|ui| {
            match node.href() {
                Some(href) => {
                    let selected = current_path == Some(self.target_path(href).as_str());
                    let response = ui.selectable_label(selected, display_text).on_hover_text(href);
                    if response.clicked() {
                        *clicked_href = Some(href.to_string());
                    }
                }
                None => {
                    ui.label(display_text);
                }
            }

            if !node.children().is_empty() {
                let chevron = if expanded { "▼" } else { "▶" };
                if ui.small_button(chevron).clicked() {
                    *toggled_key = Some(key.clone());
                }
            }
        });

        if expanded && !node.children().is_empty() {
            ui.indent(egui::Id::new(("toc", &key)), |ui| {
                for (child_index, child) in node.children().iter().enumerate() {
                    self.show_node(ui, child, child_index, current_path, clicked_href, toggled_key);
                }
            });
        }
    }
}

fn truncate_title(title: &str) -> String {
    if title.chars().count() > MAX_TITLE_CHARS {
        let head: String = title.chars().take(MAX_TITLE_CHARS - 3).collect();
        format!("{}...", head)
    } else {
        title.to_string()
    }
}
