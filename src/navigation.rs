//! Table-of-contents data: the JSON wire shape and the typed tree built from it.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::NavigationError;

/// Menu entry as authored in the navigation JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MenuItem {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<MenuItem>>,
}

/// Root of the navigation JSON: a heading plus the top-level entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NavigationData {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub items: Vec<MenuItem>,
}

impl NavigationData {
    pub fn from_json(json: &str) -> Result<Self, NavigationError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, NavigationError> {
        let json = fs::read_to_string(path)?;
        let data = Self::from_json(&json)?;
        log::info!("Loaded navigation {:?} ({} top-level items)", path, data.items.len());
        Ok(data)
    }

    /// Typed tree in authored order.
    pub fn nodes(&self) -> Vec<NavNode> {
        self.items.iter().cloned().map(NavNode::from).collect()
    }
}

/// Typed navigation node.
///
/// A branch may still carry its own link (EPUB tables of contents commonly
/// link section headings), but its children are never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavNode {
    Leaf {
        title: String,
        href: String,
    },
    Branch {
        title: String,
        href: Option<String>,
        children: Vec<NavNode>,
    },
    Label {
        title: String,
    },
}

impl From<MenuItem> for NavNode {
    fn from(item: MenuItem) -> Self {
        let href = item.href.filter(|h| !h.is_empty());
        let children: Vec<NavNode> = item
            .children
            .unwrap_or_default()
            .into_iter()
            .map(NavNode::from)
            .collect();

        match (href, children.is_empty()) {
            (href, false) => NavNode::Branch {
                title: item.title,
                href,
                children,
            },
            (Some(href), true) => NavNode::Leaf {
                title: item.title,
                href,
            },
            (None, true) => NavNode::Label { title: item.title },
        }
    }
}

impl NavNode {
    pub fn title(&self) -> &str {
        match self {
            NavNode::Leaf { title, .. } | NavNode::Branch { title, .. } | NavNode::Label { title } => {
                title
            }
        }
    }

    pub fn href(&self) -> Option<&str> {
        match self {
            NavNode::Leaf { href, .. } => Some(href),
            NavNode::Branch { href, .. } => href.as_deref(),
            NavNode::Label { .. } => None,
        }
    }

    pub fn children(&self) -> &[NavNode] {
        match self {
            NavNode::Branch { children, .. } => children,
            _ => &[],
        }
    }

    /// UI-state key: `title-href`, or `title-index` for nodes without a link.
    /// Two siblings sharing both parts collide.
    pub fn key(&self, sibling_index: usize) -> String {
        match self.href() {
            Some(href) => format!("{}-{}", self.title(), href),
            None => format!("{}-{}", self.title(), sibling_index),
        }
    }
}

/// Keys of the branches that are currently open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpansionState {
    open: HashSet<String>,
}

impl ExpansionState {
    /// Flip membership of `key`; returns whether it is open afterwards.
    pub fn toggle(&mut self, key: &str) -> bool {
        if self.open.remove(key) {
            false
        } else {
            self.open.insert(key.to_string());
            true
        }
    }

    pub fn is_expanded(&self, key: &str) -> bool {
        self.open.contains(key)
    }

    pub fn clear(&mut self) {
        self.open.clear();
    }

    /// Open every branch in `nodes`, recursively.
    pub fn expand_all(&mut self, nodes: &[NavNode]) {
        for (index, node) in nodes.iter().enumerate() {
            if let NavNode::Branch { children, .. } = node {
                self.open.insert(node.key(index));
                self.expand_all(children);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"{
        "title": "Cirugía General",
        "items": [
            { "title": "Intro", "href": "intro.xhtml" },
            { "title": "Parte I", "href": "p1.xhtml", "children": [
                { "title": "Capítulo 1", "href": "ch1.xhtml" },
                { "title": "Capítulo 2", "href": "ch2.xhtml", "children": [] }
            ]},
            { "title": "Apéndices", "children": [
                { "title": "Sin enlace" }
            ]}
        ]
    }"#;

    #[test]
    fn test_parse_navigation_json() {
        let data = NavigationData::from_json(SAMPLE).unwrap();
        assert_eq!(data.title, "Cirugía General");
        assert_eq!(data.items.len(), 3);
        assert_eq!(data.items[0].href.as_deref(), Some("intro.xhtml"));
        assert!(data.items[0].children.is_none());
    }

    #[test]
    fn test_nodes_are_typed() {
        let nodes = NavigationData::from_json(SAMPLE).unwrap().nodes();

        assert_eq!(
            nodes[0],
            NavNode::Leaf {
                title: "Intro".to_string(),
                href: "intro.xhtml".to_string()
            }
        );

        let NavNode::Branch { href, children, .. } = &nodes[1] else {
            panic!("expected branch, got {:?}", nodes[1]);
        };
        assert_eq!(href.as_deref(), Some("p1.xhtml"));
        // An empty children list is a leaf, not a branch
        assert!(matches!(children[1], NavNode::Leaf { .. }));

        let NavNode::Branch { href, children, .. } = &nodes[2] else {
            panic!("expected branch, got {:?}", nodes[2]);
        };
        assert!(href.is_none());
        assert_eq!(children[0], NavNode::Label { title: "Sin enlace".to_string() });
    }

    #[test]
    fn test_empty_href_is_label() {
        let node = NavNode::from(MenuItem {
            title: "Blank".to_string(),
            href: Some(String::new()),
            children: None,
        });
        assert_eq!(node, NavNode::Label { title: "Blank".to_string() });
        assert_eq!(node.href(), None);
    }

    #[test]
    fn test_missing_fields_render_nothing() {
        let data = NavigationData::from_json("{}").unwrap();
        assert!(data.title.is_empty());
        assert!(data.nodes().is_empty());
    }

    #[test]
    fn test_item_keys() {
        let nodes = NavigationData::from_json(SAMPLE).unwrap().nodes();
        assert_eq!(nodes[0].key(0), "Intro-intro.xhtml");
        assert_eq!(nodes[2].key(2), "Apéndices-2");
    }

    #[test]
    fn test_toggle_twice_restores_state() {
        let mut state = ExpansionState::default();
        state.toggle("Other-x.xhtml");
        let before = state.clone();

        assert!(state.toggle("Parte I-p1.xhtml"));
        assert!(state.is_expanded("Parte I-p1.xhtml"));
        assert!(!state.toggle("Parte I-p1.xhtml"));
        assert!(!state.is_expanded("Parte I-p1.xhtml"));

        assert_eq!(state, before);
    }

    #[test]
    fn test_expand_all_opens_nested_branches() {
        let nodes = NavigationData::from_json(SAMPLE).unwrap().nodes();
        let mut state = ExpansionState::default();
        state.expand_all(&nodes);
        assert_eq!(state.len(), 2);
        assert!(state.is_expanded("Parte I-p1.xhtml"));
        assert!(state.is_expanded("Apéndices-2"));
        state.clear();
        assert!(state.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        file.flush().unwrap();

        let data = NavigationData::load(file.path()).unwrap();
        assert_eq!(data.items.len(), 3);
    }

    #[test]
    fn test_load_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        file.flush().unwrap();

        let err = NavigationData::load(file.path()).unwrap_err();
        assert!(matches!(err, NavigationError::Json(_)));
    }
}
