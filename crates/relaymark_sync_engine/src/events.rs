//! Notifications about background sync outcomes.
//!
//! Offline mutations return before they reach a relay, so their eventual
//! success or failure is reported here instead of to the caller.

use relaymark_protocol::{OwnerKey, StateKind};
use tokio::sync::broadcast;
use uuid::Uuid;

/// A sync outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A document was published and its cache entry confirmed.
    Published {
        /// Owner.
        owner: OwnerKey,
        /// Document kind.
        kind: StateKind,
        /// Id of the published record.
        record_id: String,
    },
    /// An online publish exhausted its retries and was rolled back.
    PublishFailed {
        /// Owner.
        owner: OwnerKey,
        /// Document kind.
        kind: StateKind,
        /// Last error message.
        error: String,
    },
    /// A mutation was queued for later replay.
    OperationQueued {
        /// Owner.
        owner: OwnerKey,
        /// Queued operation id.
        id: Uuid,
        /// Operation name.
        op: &'static str,
    },
    /// A queued mutation was replayed and removed from the queue.
    OperationReplayed {
        /// Owner.
        owner: OwnerKey,
        /// Queued operation id.
        id: Uuid,
    },
    /// A queued mutation exceeded its retry budget and now blocks the queue.
    OperationFailed {
        /// Owner.
        owner: OwnerKey,
        /// Queued operation id.
        id: Uuid,
        /// Last error message.
        error: String,
    },
}

/// Fan-out of [`SyncEvent`]s. Sending never fails; events without
/// subscribers are dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event.
    pub fn emit(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }

    /// Returns a new subscriber.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = EventBus::new(4);
        bus.emit(SyncEvent::OperationReplayed {
            owner: OwnerKey::parse("alice").unwrap(),
            id: Uuid::nil(),
        });

        let mut rx = bus.subscribe();
        let event = SyncEvent::OperationReplayed {
            owner: OwnerKey::parse("alice").unwrap(),
            id: Uuid::new_v4(),
        };
        bus.emit(event.clone());
        assert_eq!(rx.recv().await.unwrap(), event);
    }
}
