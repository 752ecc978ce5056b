//! Engine configuration.
//!
//! Snapshot retention has no safe default and must be chosen by the
//! operator; everything else ships with workable defaults that can be
//! overridden builder-style.

use std::time::Duration;

const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_HEARTBEAT_MISSES: u32 = 3;
const DEFAULT_EXECUTOR_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Development-only signing secret. Deployments must override it.
const DEV_TOKEN_SECRET: &str = "packherd-dev-secret";

/// Runtime configuration for [`crate::Engine`].
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// How many snapshots to keep per endpoint (target snapshots are
    /// always retained regardless of this cap).
    pub snapshot_retention: usize,
    /// Expected interval between endpoint status reports.
    pub heartbeat_interval: Duration,
    /// Missed heartbeats before an endpoint is considered offline.
    pub heartbeat_misses: u32,
    /// How long to wait for an executor completion callback before an
    /// in-progress operation is failed with `executor_timeout`.
    pub executor_timeout: Duration,
    /// Lifetime of bearer tokens issued at endpoint registration.
    pub token_ttl: Duration,
    /// HS256 signing secret for bearer tokens.
    pub token_secret: String,
}

impl CoreConfig {
    /// Create a configuration with the required snapshot retention cap.
    #[must_use]
    pub fn new(snapshot_retention: usize) -> Self {
        Self {
            snapshot_retention,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_misses: DEFAULT_HEARTBEAT_MISSES,
            executor_timeout: DEFAULT_EXECUTOR_TIMEOUT,
            token_ttl: DEFAULT_TOKEN_TTL,
            token_secret: DEV_TOKEN_SECRET.to_string(),
        }
    }

    /// Set the heartbeat interval.
    #[must_use]
    pub const fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the missed-heartbeat count before an endpoint goes offline.
    #[must_use]
    pub const fn with_heartbeat_misses(mut self, misses: u32) -> Self {
        self.heartbeat_misses = misses;
        self
    }

    /// Set the executor completion timeout.
    #[must_use]
    pub const fn with_executor_timeout(mut self, timeout: Duration) -> Self {
        self.executor_timeout = timeout;
        self
    }

    /// Set the token lifetime.
    #[must_use]
    pub const fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// Set the token signing secret.
    #[must_use]
    pub fn with_token_secret(mut self, secret: impl Into<String>) -> Self {
        self.token_secret = secret.into();
        self
    }

    /// Whether the configuration still carries the development secret.
    #[must_use]
    pub fn uses_dev_secret(&self) -> bool {
        self.token_secret == DEV_TOKEN_SECRET
    }

    /// Silence window after which an endpoint is considered offline.
    #[must_use]
    pub fn offline_after(&self) -> Duration {
        self.heartbeat_interval * self.heartbeat_misses
    }

    /// Offline window in Unix milliseconds, saturating on overflow.
    #[must_use]
    pub fn offline_after_ms(&self) -> i64 {
        i64::try_from(self.offline_after().as_millis()).unwrap_or(i64::MAX)
    }
}
