//! Content loading state machine.
//!
//! `Idle -> Loading -> Displayed | Failed`. Every [`ContentLoader::load`]
//! moves to `Loading` and starts a worker thread; results come back over a
//! channel drained by [`ContentLoader::poll`]. Each load carries a generation
//! number and results of superseded loads are discarded, so the most recently
//! requested path is the one displayed.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use crate::error::LoadError;
use crate::markdown::{to_markdown, RenderedPage};
use crate::rewrite::{rewrite_document, RewriteOptions, RewrittenDocument};
use crate::source::ContentSource;

/// Shown in place of the chapter when a load fails.
pub const ERROR_MESSAGE: &str = "Error loading content";

/// A loaded, rewritten chapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub path: String,
    pub document: RewrittenDocument,
    pub rendered: RenderedPage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Loading { path: String },
    Displayed(Page),
    Failed { path: String, error: String },
}

type LoadResult = (u64, Result<Page, LoadError>);
type Repaint = Arc<dyn Fn() + Send + Sync>;

pub struct ContentLoader {
    source: Arc<dyn ContentSource>,
    options: RewriteOptions,
    state: LoadState,
    content_path: Option<String>,
    generation: u64,
    tx: Sender<LoadResult>,
    rx: Receiver<LoadResult>,
    repaint: Repaint,
}

impl ContentLoader {
    pub fn new(source: Arc<dyn ContentSource>, options: RewriteOptions) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            source,
            options,
            state: LoadState::Idle,
            content_path: None,
            generation: 0,
            tx,
            rx,
            repaint: Arc::new(|| {}),
        }
    }

    /// Called from the worker thread once a result is ready.
    pub fn with_repaint(mut self, repaint: impl Fn() + Send + Sync + 'static) -> Self {
        self.repaint = Arc::new(repaint);
        self
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    pub fn content_path(&self) -> Option<&str> {
        self.content_path.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state, LoadState::Loading { .. })
    }

    pub fn source(&self) -> &dyn ContentSource {
        self.source.as_ref()
    }

    /// Start loading `path`, superseding any load in flight.
    pub fn load(&mut self, path: &str) {
        self.generation += 1;
        let generation = self.generation;
        self.content_path = Some(path.to_string());
        self.state = LoadState::Loading {
            path: path.to_string(),
        };
        log::info!("Loading {} (generation {})", path, generation);

        let source = Arc::clone(&self.source);
        let options = self.options;
        let tx = self.tx.clone();
        let repaint = Arc::clone(&self.repaint);
        let owned_path = path.to_string();

        let spawned = thread::Builder::new()
            .name("content-loader".to_string())
            .spawn(move || {
                let result = load_page(source.as_ref(), &owned_path, &options);
                // Receiver is gone when the viewer was dropped; nothing to report to
                let _ = tx.send((generation, result));
                repaint();
            });

        if let Err(e) = spawned {
            log::error!("Failed to spawn content loader thread: {}", e);
            self.state = LoadState::Failed {
                path: path.to_string(),
                error: e.to_string(),
            };
        }
    }

    /// Load the current path again.
    pub fn reload(&mut self) {
        if let Some(path) = self.content_path.clone() {
            log::info!("Reloading {}", path);
            self.load(&path);
        }
    }

    /// Apply finished loads. Returns true when the state changed.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        while let Ok((generation, result)) = self.rx.try_recv() {
            if generation != self.generation {
                log::debug!(
                    "Discarding superseded load (generation {}, current {})",
                    generation,
                    self.generation
                );
                continue;
            }

            let path = self.content_path.clone().unwrap_or_default();
            self.state = match result {
                Ok(page) => {
                    log::info!(
                        "Displayed {} ({} internal links)",
                        page.path,
                        page.document.internal_links.len()
                    );
                    LoadState::Displayed(page)
                }
                Err(e) => {
                    let kind = if e.is_http_failure() {
                        "HTTP failure"
                    } else {
                        "transport/parse failure"
                    };
                    log::error!("Error loading content {} ({}): {:?}", path, kind, e);
                    LoadState::Failed {
                        path,
                        error: e.to_string(),
                    }
                }
            };
            changed = true;
        }
        changed
    }
}

/// Fetch, rewrite and convert one chapter.
pub fn load_page(
    source: &dyn ContentSource,
    path: &str,
    options: &RewriteOptions,
) -> Result<Page, LoadError> {
    let html = source.fetch(path)?;
    let document = rewrite_document(&html, path, options)?;
    let resolve = |resource: &str| source.resource_uri(resource);
    let rendered = to_markdown(&document.body, &resolve)?;
    Ok(Page {
        path: path.to_string(),
        document,
        rendered,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// In-memory origin; paths listed in `gated` block until released.
    #[derive(Default)]
    struct MockSource {
        pages: HashMap<String, Result<String, u16>>,
        gated: Option<(String, Mutex<Receiver<()>>)>,
    }

    impl MockSource {
        fn with_page(mut self, path: &str, html: &str) -> Self {
            self.pages.insert(path.to_string(), Ok(html.to_string()));
            self
        }

        fn with_status(mut self, path: &str, status: u16) -> Self {
            self.pages.insert(path.to_string(), Err(status));
            self
        }
    }

    impl ContentSource for MockSource {
        fn fetch(&self, path: &str) -> Result<String, LoadError> {
            if let Some((gated, release)) = &self.gated {
                if gated == path {
                    let release = release.lock().unwrap();
                    release.recv_timeout(TIMEOUT).unwrap();
                }
            }
            match self.pages.get(path) {
                Some(Ok(html)) => Ok(html.clone()),
                Some(Err(status)) => Err(LoadError::Status {
                    status: *status,
                    url: path.to_string(),
                }),
                None => Err(LoadError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "connection refused",
                ))),
            }
        }

        fn resource_uri(&self, path: &str) -> String {
            format!("http://book.test{}", path)
        }

        fn describe(&self) -> String {
            "mock".to_string()
        }
    }

    /// Loader whose worker signals `done` after each result is sent.
    fn loader(source: MockSource) -> (ContentLoader, Receiver<()>) {
        let (done_tx, done_rx) = mpsc::channel();
        let done_tx = Mutex::new(done_tx);
        let loader = ContentLoader::new(Arc::new(source), RewriteOptions::default())
            .with_repaint(move || {
                let _ = done_tx.lock().unwrap().send(());
            });
        (loader, done_rx)
    }

    #[test]
    fn test_initial_state_is_idle() {
        let (loader, _done) = loader(MockSource::default());
        assert_eq!(loader.state(), &LoadState::Idle);
        assert!(loader.content_path().is_none());
        assert!(!loader.is_loading());
    }

    #[test]
    fn test_load_displays_rewritten_body() {
        let source = MockSource::default().with_page(
            "/OEBPS/ch2.xhtml",
            r#"<html><body><h1>Dos</h1><img src="img/a.png"/><a href="ch3.xhtml">next</a></body></html>"#,
        );
        let (mut loader, done) = loader(source);

        loader.load("/OEBPS/ch2.xhtml");
        assert!(loader.is_loading());

        done.recv_timeout(TIMEOUT).unwrap();
        assert!(loader.poll());

        let LoadState::Displayed(page) = loader.state() else {
            panic!("expected displayed, got {:?}", loader.state());
        };
        assert_eq!(page.path, "/OEBPS/ch2.xhtml");
        assert!(page.document.body.contains(r#"src="/OEBPS/img/a.png""#));
        assert_eq!(page.document.internal_links, vec!["/OEBPS/ch3.xhtml"]);
        assert_eq!(page.rendered.link_hooks, vec!["/OEBPS/ch3.xhtml"]);
        assert!(page.rendered.markdown.contains("<http://book.test/OEBPS/img/a.png>"));
        assert_eq!(page.rendered.title.as_deref(), Some("Dos"));
        assert!(!loader.is_loading());
    }

    #[test]
    fn test_http_failure_moves_to_failed() {
        let source = MockSource::default().with_status("/OEBPS/missing.xhtml", 404);
        let (mut loader, done) = loader(source);

        loader.load("/OEBPS/missing.xhtml");
        done.recv_timeout(TIMEOUT).unwrap();
        loader.poll();

        assert!(!loader.is_loading());
        let LoadState::Failed { path, error } = loader.state() else {
            panic!("expected failure, got {:?}", loader.state());
        };
        assert_eq!(path, "/OEBPS/missing.xhtml");
        assert!(error.contains("status 404"));
    }

    #[test]
    fn test_transport_failure_moves_to_failed() {
        let (mut loader, done) = loader(MockSource::default());

        loader.load("/OEBPS/unreachable.xhtml");
        done.recv_timeout(TIMEOUT).unwrap();
        assert!(loader.poll());

        assert!(matches!(loader.state(), LoadState::Failed { error, .. } if error == "I/O error: connection refused"));
    }

    #[test]
    fn test_superseded_load_is_discarded() {
        let (release_tx, release_rx) = mpsc::channel();
        let source = MockSource {
            gated: Some(("/OEBPS/slow.xhtml".to_string(), Mutex::new(release_rx))),
            ..MockSource::default()
        }
        .with_page("/OEBPS/slow.xhtml", "<p>slow</p>")
        .with_page("/OEBPS/fast.xhtml", "<p>fast</p>");
        let (mut loader, done) = loader(source);

        loader.load("/OEBPS/slow.xhtml");
        loader.load("/OEBPS/fast.xhtml");

        done.recv_timeout(TIMEOUT).unwrap();
        loader.poll();
        assert!(matches!(loader.state(), LoadState::Displayed(page) if page.path == "/OEBPS/fast.xhtml"));

        // Let the slow load finish after the fast one
        release_tx.send(()).unwrap();
        done.recv_timeout(TIMEOUT).unwrap();
        assert!(!loader.poll());
        assert!(matches!(loader.state(), LoadState::Displayed(page) if page.path == "/OEBPS/fast.xhtml"));
    }

    #[test]
    fn test_reload_fetches_current_path_again() {
        let source = MockSource::default().with_page("/OEBPS/a.xhtml", "<p>a</p>");
        let (mut loader, done) = loader(source);

        loader.reload();
        assert_eq!(loader.state(), &LoadState::Idle);

        loader.load("/OEBPS/a.xhtml");
        done.recv_timeout(TIMEOUT).unwrap();
        loader.poll();

        loader.reload();
        assert!(matches!(loader.state(), LoadState::Loading { path } if path == "/OEBPS/a.xhtml"));
        done.recv_timeout(TIMEOUT).unwrap();
        assert!(loader.poll());
        assert!(matches!(loader.state(), LoadState::Displayed(_)));
    }
}
