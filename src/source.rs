//! Where content paths are fetched from.
//!
//! A content path such as `/OEBPS/ch1.xhtml` is root-relative: it is resolved
//! against either an unpacked book directory or an HTTP origin serving it.

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use percent_encoding::percent_decode_str;
use ureq::Agent;

use crate::error::LoadError;
use crate::rewrite::strip_fragment;

pub trait ContentSource: Send + Sync {
    /// Fetch a content path as text. Non-success maps to [`LoadError::Status`].
    fn fetch(&self, path: &str) -> Result<String, LoadError>;

    /// URI the renderer can load a root-relative resource from.
    fn resource_uri(&self, path: &str) -> String;

    /// Local file backing a content path, if any (used for live reload).
    fn local_path(&self, _path: &str) -> Option<PathBuf> {
        None
    }

    /// Human readable origin for the status bar.
    fn describe(&self) -> String;
}

/// Pick a source from a CLI location: `http(s)://` URLs are served over
/// HTTP, anything else is a directory.
pub fn from_location(location: &str) -> Box<dyn ContentSource> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Box::new(HttpSource::new(location))
    } else {
        Box::new(DirSource::new(location))
    }
}

/// Unpacked book directory; the directory is the content root.
#[derive(Debug, Clone)]
pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = root.canonicalize().unwrap_or(root);
        Self { root }
    }

    /// File for a content path, or `None` if it would leave the root.
    pub fn resolve(&self, path: &str) -> Option<PathBuf> {
        let decoded = percent_decode_str(strip_fragment(path)).decode_utf8_lossy();
        let mut resolved = self.root.clone();
        let mut depth = 0usize;
        for component in Path::new(decoded.as_ref()).components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::ParentDir => {
                    if depth == 0 {
                        return None;
                    }
                    resolved.pop();
                    depth -= 1;
                }
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            }
        }
        Some(resolved)
    }
}

impl ContentSource for DirSource {
    fn fetch(&self, path: &str) -> Result<String, LoadError> {
        let Some(file) = self.resolve(path) else {
            log::warn!("Content path escapes the book root: {}", path);
            return Err(LoadError::Status {
                status: 404,
                url: path.to_string(),
            });
        };

        // Read as bytes to tolerate invalid UTF-8
        match fs::read(&file) {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => {
                let status = match e.kind() {
                    ErrorKind::NotFound => 404,
                    ErrorKind::PermissionDenied => 403,
                    _ => return Err(LoadError::Io(e)),
                };
                Err(LoadError::Status {
                    status,
                    url: file.display().to_string(),
                })
            }
        }
    }

    fn resource_uri(&self, path: &str) -> String {
        match self.resolve(path) {
            Some(file) => format!("file://{}", file.display()),
            None => path.to_string(),
        }
    }

    fn local_path(&self, path: &str) -> Option<PathBuf> {
        self.resolve(path)
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

/// HTTP origin serving the unpacked book.
pub struct HttpSource {
    agent: Agent,
    base_url: String,
}

impl HttpSource {
    pub fn new(base_url: &str) -> Self {
        let agent = Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .into();

        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    /// Absolute URL for a content path.
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

impl ContentSource for HttpSource {
    fn fetch(&self, path: &str) -> Result<String, LoadError> {
        let url = self.url_for(strip_fragment(path));
        log::debug!("GET {}", url);

        let response = self.agent.get(&url).call()?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(LoadError::Status { status, url });
        }

        Ok(response.into_body().read_to_string()?)
    }

    fn resource_uri(&self, path: &str) -> String {
        self.url_for(path)
    }

    fn describe(&self) -> String {
        self.base_url.clone()
    }
}
