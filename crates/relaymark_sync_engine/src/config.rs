//! Configuration for the sync engine.

use std::time::Duration;

/// Well-known public relays used to top up the publish set.
pub const DEFAULT_FALLBACK_RELAYS: [&str; 4] = [
    "wss://relay.damus.io",
    "wss://nos.lol",
    "wss://relay.nostr.band",
    "wss://relay.primal.net",
];

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Upper bound on one deduplicated fetch.
    pub fetch_timeout: Duration,
    /// Below this many connected relays, publishes are topped up with
    /// `fallback_relays`.
    pub min_publish_relays: usize,
    /// Relays added to the publish set when too few are connected.
    pub fallback_relays: Vec<String>,
    /// Retry configuration for publishes.
    pub retry: RetryConfig,
    /// Failed replays an offline operation may accumulate before it is
    /// marked failed.
    pub queue_max_retries: u32,
    /// Memory-tier entries idle longer than this are evicted.
    pub cache_idle_ttl: Duration,
    /// Buffer size of the sync event channel.
    pub event_capacity: usize,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(3),
            min_publish_relays: 3,
            fallback_relays: DEFAULT_FALLBACK_RELAYS
                .iter()
                .map(|r| r.to_string())
                .collect(),
            retry: RetryConfig::default(),
            queue_max_retries: 5,
            cache_idle_ttl: Duration::from_secs(30 * 60),
            event_capacity: 64,
        }
    }

    /// Sets the fetch timeout.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Sets the minimum number of publish relays.
    pub fn with_min_publish_relays(mut self, min: usize) -> Self {
        self.min_publish_relays = min;
        self
    }

    /// Replaces the fallback relay list.
    pub fn with_fallback_relays<I, S>(mut self, relays: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fallback_relays = relays.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the offline queue retry budget.
    pub fn with_queue_max_retries(mut self, max: u32) -> Self {
        self.queue_max_retries = max;
        self
    }

    /// Sets the memory-tier idle TTL.
    pub fn with_cache_idle_ttl(mut self, ttl: Duration) -> Self {
        self.cache_idle_ttl = ttl;
        self
    }

    /// Sets the sync event buffer size.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: false,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.add_jitter = jitter;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    ///
    /// Attempt `n >= 1` waits `initial_delay * multiplier^(n-1)`, capped at
    /// `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self
                .backoff_multiplier
                .powi(attempt.saturating_sub(1) as i32);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Add up to 25% jitter
            let jitter = delay_secs * 0.25 * rand_jitter();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Cheap pseudo-random fraction in `[0, 1)` from the clock's sub-second nanos.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}
