//! Navigation channel shared by the table of contents and the content viewer.
//!
//! The tree and the viewer never call each other. Both hold a
//! [`NavSender`]; the viewer owns the single [`NavReceiver`] and drains it
//! once per frame.

use std::sync::mpsc::{self, Receiver, Sender};

/// Request to display a new content path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationChange {
    pub path: String,
}

/// Cloneable sending half of the navigation channel.
#[derive(Debug, Clone)]
pub struct NavSender {
    tx: Sender<NavigationChange>,
}

/// Receiving half of the navigation channel, owned by the viewer.
#[derive(Debug)]
pub struct NavReceiver {
    rx: Receiver<NavigationChange>,
}

/// Create a connected sender/receiver pair.
pub fn channel() -> (NavSender, NavReceiver) {
    let (tx, rx) = mpsc::channel();
    (NavSender { tx }, NavReceiver { rx })
}

impl NavSender {
    /// Fire-and-forget: a dropped receiver is logged, not reported.
    pub fn dispatch(&self, path: impl Into<String>) {
        let change = NavigationChange { path: path.into() };
        log::info!("Navigation requested: {}", change.path);
        if let Err(e) = self.tx.send(change) {
            log::warn!("Navigation change dropped, no viewer listening: {}", e.0.path);
        }
    }
}

impl NavReceiver {
    /// Drain everything queued since the last call without blocking.
    pub fn drain(&self) -> Vec<NavigationChange> {
        self.rx.try_iter().collect()
    }

    /// Only the newest pending request matters; earlier ones are superseded.
    pub fn latest(&self) -> Option<NavigationChange> {
        self.drain().pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_reaches_receiver() {
        let (tx, rx) = channel();
        tx.dispatch("/OEBPS/ch2.xhtml");
        assert_eq!(
            rx.drain(),
            vec![NavigationChange {
                path: "/OEBPS/ch2.xhtml".to_string()
            }]
        );
        assert!(rx.drain().is_empty());
    }

    #[test]
    fn test_cloned_senders_share_receiver() {
        let (tree, rx) = channel();
        let viewer = tree.clone();
        tree.dispatch("/OEBPS/a.xhtml");
        viewer.dispatch("/OEBPS/b.xhtml");
        let paths: Vec<String> = rx.drain().into_iter().map(|c| c.path).collect();
        assert_eq!(paths, vec!["/OEBPS/a.xhtml", "/OEBPS/b.xhtml"]);
    }

    #[test]
    fn test_latest_keeps_newest_request() {
        let (tx, rx) = channel();
        tx.dispatch("/OEBPS/a.xhtml");
        tx.dispatch("/OEBPS/b.xhtml");
        assert_eq!(rx.latest().map(|c| c.path).as_deref(), Some("/OEBPS/b.xhtml"));
        assert!(rx.latest().is_none());
    }

    #[test]
    fn test_dispatch_without_receiver_does_not_panic() {
        let (tx, rx) = channel();
        drop(rx);
        tx.dispatch("/OEBPS/lost.xhtml");
    }
}
