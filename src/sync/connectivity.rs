//! Connectivity signal.
//!
//! Whatever observes the network (an OS callback, a periodic probe) calls
//! [`Connectivity::set_online`]; admission reads the current value to tag
//! transactions as offline, and the sync driver waits on transitions.

use tokio::sync::watch;
use tracing::info;

/// Publisher side of the "is the network reachable" flag.
#[derive(Debug)]
pub struct Connectivity {
    tx: watch::Sender<bool>,
}

impl Connectivity {
    #[must_use]
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    /// Records the current reachability. Only real transitions wake
    /// subscribers.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "connectivity changed");
        }
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> ConnectivityWatch {
        ConnectivityWatch {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Subscriber side of [`Connectivity`].
#[derive(Debug, Clone)]
pub struct ConnectivityWatch {
    rx: watch::Receiver<bool>,
}

impl ConnectivityWatch {
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.rx.borrow()
    }

    /// Waits for the next transition and returns the new value, or `None`
    /// once the publisher is gone.
    pub async fn changed(&mut self) -> Option<bool> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }

    /// Waits until the network is reachable. Returns `false` if the
    /// publisher went away first.
    pub async fn wait_online(&mut self) -> bool {
        self.rx.wait_for(|online| *online).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transition_wakes_subscriber() {
        let connectivity = Connectivity::new(false);
        let mut watch = connectivity.subscribe();
        assert!(!watch.is_online());

        connectivity.set_online(true);
        assert_eq!(watch.changed().await, Some(true));
        assert!(connectivity.is_online());
    }

    #[tokio::test]
    async fn repeated_value_is_not_a_transition() {
        let connectivity = Connectivity::new(true);
        let mut watch = connectivity.subscribe();
        connectivity.set_online(true);
        connectivity.set_online(false);
        assert_eq!(watch.changed().await, Some(false));
    }

    #[tokio::test]
    async fn wait_online_returns_immediately_when_online() {
        let connectivity = Connectivity::new(true);
        let mut watch = connectivity.subscribe();
        assert!(watch.wait_online().await);
    }

    #[tokio::test]
    async fn dropped_publisher_ends_watch() {
        let connectivity = Connectivity::new(false);
        let mut watch = connectivity.subscribe();
        drop(connectivity);
        assert_eq!(watch.changed().await, None);
        assert!(!watch.wait_online().await);
    }
}
