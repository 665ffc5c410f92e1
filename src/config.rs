//! Command line arguments and state persisted between sessions.

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::toc::DEFAULT_CONTENT_PREFIX;

pub const APP_KEY: &str = "epub-reader-state";

/// Chapter shown when neither the command line nor a previous session names one.
pub const DEFAULT_START_PATH: &str = "/OEBPS/cg_cirugia-1.xhtml";

pub const MIN_ZOOM: f32 = 0.5;
pub const MAX_ZOOM: f32 = 3.0;

#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "epub-reader")]
#[command(about = "A reader for unpacked EPUB books", long_about = None)]
pub struct Args {
    /// Unpacked book directory or http(s) base URL
    #[arg(default_value = ".")]
    pub content: String,

    /// Navigation (table of contents) JSON file
    #[arg(long, value_name = "FILE")]
    pub toc: Option<PathBuf>,

    /// Content path to display first, e.g. /OEBPS/ch1.xhtml
    #[arg(long, value_name = "PATH")]
    pub start: Option<String>,

    /// Prefix joined to navigation hrefs
    #[arg(long, default_value = DEFAULT_CONTENT_PREFIX)]
    pub prefix: String,

    /// Enable live reload (watch the displayed chapter for changes)
    #[arg(short, long)]
    pub watch: bool,

    /// Display chapters without removing scripts and event handlers
    #[arg(long)]
    pub trust_content: bool,
}

/// Persisted state saved between sessions
#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq)]
pub struct PersistedState {
    pub dark_mode: Option<bool>,
    pub zoom_level: Option<f32>,
    pub show_toc: Option<bool>,
    pub last_path: Option<String>,
    pub toc_file: Option<PathBuf>,
}

/// Startup settings after merging the command line with the last session.
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderConfig {
    pub content: String,
    pub toc_file: Option<PathBuf>,
    pub start_path: String,
    pub prefix: String,
    pub watch: bool,
    pub trust_content: bool,
    pub dark_mode: Option<bool>,
    pub zoom_level: f32,
    pub show_toc: bool,
}

impl ReaderConfig {
    /// Command line wins over the persisted session, which wins over defaults.
    pub fn resolve(args: Args, persisted: PersistedState) -> Self {
        let start_path = args
            .start
            .or(persisted.last_path)
            .filter(|path| !path.is_empty())
            .unwrap_or_else(|| DEFAULT_START_PATH.to_string());

        Self {
            content: args.content,
            toc_file: args.toc.or(persisted.toc_file),
            start_path,
            prefix: args.prefix,
            watch: args.watch,
            trust_content: args.trust_content,
            // None means follow the system theme
            dark_mode: persisted.dark_mode,
            zoom_level: clamp_zoom(persisted.zoom_level.unwrap_or(1.0)),
            // TOC visible by default
            show_toc: persisted.show_toc.unwrap_or(true),
        }
    }
}

pub fn clamp_zoom(zoom: f32) -> f32 {
    if zoom.is_nan() {
        return 1.0;
    }
    zoom.clamp(MIN_ZOOM, MAX_ZOOM)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn args(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("epub-reader").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = ReaderConfig::resolve(args(&[]), PersistedState::default());
        assert_eq!(
            config,
            ReaderConfig {
                content: ".".to_string(),
                toc_file: None,
                start_path: DEFAULT_START_PATH.to_string(),
                prefix: "/OEBPS/".to_string(),
                watch: false,
                trust_content: false,
                dark_mode: None,
                zoom_level: 1.0,
                show_toc: true,
            }
        );
    }

    #[test]
    fn test_persisted_state_used_when_cli_silent() {
        let persisted = PersistedState {
            dark_mode: Some(true),
            zoom_level: Some(1.5),
            show_toc: Some(false),
            last_path: Some("/OEBPS/ch7.xhtml".to_string()),
            toc_file: Some(PathBuf::from("/books/toc.json")),
        };
        let config = ReaderConfig::resolve(args(&["/books/cirugia"]), persisted);

        assert_eq!(config.content, "/books/cirugia");
        assert_eq!(config.start_path, "/OEBPS/ch7.xhtml");
        assert_eq!(config.toc_file, Some(PathBuf::from("/books/toc.json")));
        assert_eq!(config.dark_mode, Some(true));
        assert_eq!(config.zoom_level, 1.5);
        assert!(!config.show_toc);
    }

    #[test]
    fn test_cli_overrides_persisted_state() {
        let persisted = PersistedState {
            last_path: Some("/OEBPS/ch7.xhtml".to_string()),
            toc_file: Some(PathBuf::from("/old/toc.json")),
            ..PersistedState::default()
        };
        let config = ReaderConfig::resolve(
            args(&[
                "http://localhost:8000",
                "--toc",
                "nav.json",
                "--start",
                "/Text/intro.xhtml",
                "--prefix",
                "/Text/",
                "--watch",
                "--trust-content",
            ]),
            persisted,
        );

        assert_eq!(config.content, "http://localhost:8000");
        assert_eq!(config.toc_file, Some(PathBuf::from("nav.json")));
        assert_eq!(config.start_path, "/Text/intro.xhtml");
        assert_eq!(config.prefix, "/Text/");
        assert!(config.watch);
        assert!(config.trust_content);
    }

    #[test]
    fn test_empty_persisted_path_falls_back_to_default() {
        let persisted = PersistedState {
            last_path: Some(String::new()),
            ..PersistedState::default()
        };
        let config = ReaderConfig::resolve(args(&[]), persisted);
        assert_eq!(config.start_path, DEFAULT_START_PATH);
    }

    #[test]
    fn test_zoom_is_clamped() {
        assert_eq!(clamp_zoom(0.1), MIN_ZOOM);
        assert_eq!(clamp_zoom(9.0), MAX_ZOOM);
        assert_eq!(clamp_zoom(1.2), 1.2);
        assert_eq!(clamp_zoom(f32::NAN), 1.0);
    }

    #[test]
    fn test_persisted_state_serde() {
        let state: PersistedState = serde_json::from_str(r#"{"dark_mode":false}"#).unwrap();
        assert_eq!(state.dark_mode, Some(false));
        assert!(state.last_path.is_none());
    }
}
