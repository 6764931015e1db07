//! Relay gateway abstraction.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use relaymark_protocol::{Filter, Record, RecordDraft};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// Access to the relay network.
///
/// This trait abstracts the relay transport, allowing for different
/// implementations (websocket pools, mock for testing, etc.). Implementations
/// tolerate individual relay failures and return as soon as enough relays
/// have answered or their own timeout elapses.
#[async_trait]
pub trait RelayGateway: Send + Sync {
    /// Returns the newest record matching `filter`, or `None` if no
    /// reachable relay has one.
    async fn fetch_latest(&self, filter: &Filter) -> SyncResult<Option<Record>>;

    /// Signs and publishes `draft` to `relays`, returning the record id.
    ///
    /// Succeeds if at least one relay accepted the record.
    async fn publish(&self, draft: &RecordDraft, relays: &[String]) -> SyncResult<String>;

    /// Returns the currently connected relay endpoints.
    fn connected_endpoints(&self) -> Vec<String>;

    /// Connects to the default relay set and returns the connected endpoints.
    async fn connect_to_defaults(&self) -> Vec<String>;
}

/// An in-memory gateway for testing.
///
/// Published drafts are stored as records and served back by
/// [`fetch_latest`](RelayGateway::fetch_latest), so it behaves like a single
/// always-consistent relay unless failures are injected.
#[derive(Debug, Default)]
pub struct MockGateway {
    records: Mutex<Vec<Record>>,
    endpoints: Mutex<Vec<String>>,
    default_endpoints: Mutex<Vec<String>>,
    fetch_failure: Mutex<Option<SyncError>>,
    publish_failure: Mutex<Option<SyncError>>,
    scripted_publish_failures: Mutex<VecDeque<SyncError>>,
    fetch_delay: Mutex<Option<Duration>>,
    published: Mutex<Vec<RecordDraft>>,
    last_publish_relays: Mutex<Vec<String>>,
    fetch_calls: AtomicUsize,
    publish_calls: AtomicUsize,
    connect_calls: AtomicUsize,
}

impl MockGateway {
    /// Creates a gateway connected to three local relays.
    pub fn new() -> Self {
        let gateway = Self::default();
        gateway.set_endpoints(["ws://relay-a", "ws://relay-b", "ws://relay-c"]);
        gateway
    }

    /// Sets the connected endpoints. An empty set simulates having no
    /// reachable relay.
    pub fn set_endpoints<I, S>(&self, endpoints: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.endpoints.lock() = endpoints.into_iter().map(Into::into).collect();
    }

    /// Sets the endpoints [`connect_to_defaults`](RelayGateway::connect_to_defaults)
    /// adds to the connected set.
    pub fn set_default_endpoints<I, S>(&self, endpoints: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.default_endpoints.lock() = endpoints.into_iter().map(Into::into).collect();
    }

    /// Makes every fetch fail with `error` until cleared with `None`.
    pub fn set_fetch_failure(&self, error: Option<SyncError>) {
        *self.fetch_failure.lock() = error;
    }

    /// Makes every publish fail with `error` until cleared with `None`.
    pub fn set_publish_failure(&self, error: Option<SyncError>) {
        *self.publish_failure.lock() = error;
    }

    /// Makes the next `count` publishes fail with `error`.
    pub fn fail_next_publishes(&self, count: usize, error: SyncError) {
        let mut scripted = self.scripted_publish_failures.lock();
        scripted.extend(std::iter::repeat(error).take(count));
    }

    /// Delays every fetch by `delay`.
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        *self.fetch_delay.lock() = delay;
    }

    /// Stores a record as if another client had published it.
    pub fn insert_record(&self, record: Record) {
        self.records.lock().push(record);
    }

    /// Returns the drafts published so far.
    pub fn published(&self) -> Vec<RecordDraft> {
        self.published.lock().clone()
    }

    /// Returns the relays passed to the last publish.
    pub fn last_publish_relays(&self) -> Vec<String> {
        self.last_publish_relays.lock().clone()
    }

    /// Returns the number of fetches attempted.
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Returns the number of publishes attempted.
    pub fn publish_calls(&self) -> usize {
        self.publish_calls.load(Ordering::SeqCst)
    }

    /// Returns the number of `connect_to_defaults` calls.
    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelayGateway for MockGateway {
    async fn fetch_latest(&self, filter: &Filter) -> SyncResult<Option<Record>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.fetch_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.fetch_failure.lock().clone() {
            return Err(err);
        }
        if self.endpoints.lock().is_empty() {
            return Err(SyncError::NetworkUnavailable);
        }

        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| filter.matches(r))
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn publish(&self, draft: &RecordDraft, relays: &[String]) -> SyncResult<String> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_publish_relays.lock() = relays.to_vec();

        if let Some(err) = self.scripted_publish_failures.lock().pop_front() {
            return Err(err);
        }
        if let Some(err) = self.publish_failure.lock().clone() {
            return Err(err);
        }
        if relays.is_empty() {
            return Err(SyncError::NetworkUnavailable);
        }

        let record = Record {
            id: Uuid::new_v4().simple().to_string(),
            pubkey: draft.author.to_string(),
            kind: draft.kind,
            created_at: draft.created_at,
            tags: draft.tags.clone(),
            content: draft.content.clone(),
            sig: String::new(),
        };
        let id = record.id.clone();
        self.records.lock().push(record);
        self.published.lock().push(draft.clone());
        Ok(id)
    }

    fn connected_endpoints(&self) -> Vec<String> {
        self.endpoints.lock().clone()
    }

    async fn connect_to_defaults(&self) -> Vec<String> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let defaults = self.default_endpoints.lock().clone();
        let mut endpoints = self.endpoints.lock();
        for endpoint in defaults {
            if !endpoints.contains(&endpoint) {
                endpoints.push(endpoint);
            }
        }
        endpoints.clone()
    }
}
