//! Online/offline signal.

use tokio::sync::watch;

/// A boolean connectivity observable fed by the host environment.
///
/// Clones share the same signal.
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: watch::Sender<bool>,
}

impl Connectivity {
    /// Creates a signal with the given initial state.
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    /// Reports a connectivity change. Subscribers are only woken when the
    /// state actually changes.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
    }

    /// Returns the current state.
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Returns a receiver observing every change.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn only_changes_wake_subscribers() {
        let connectivity = Connectivity::new(false);
        let mut rx = connectivity.subscribe();

        connectivity.set_online(false);
        assert!(!rx.has_changed().unwrap());

        connectivity.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
        assert!(connectivity.is_online());
    }

    #[test]
    fn clones_share_state() {
        let a = Connectivity::default();
        let b = a.clone();
        b.set_online(false);
        assert!(!a.is_online());
    }
}
