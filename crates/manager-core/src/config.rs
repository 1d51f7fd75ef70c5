//! Configuration for the manager-protocol client
//!
//! Values only — parsing config files or environment is the embedding
//! application's concern.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default manager interface port
pub const DEFAULT_MANAGER_PORT: u16 = 5038;

/// Connection settings for one PBX manager interface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// PBX host name or address
    pub host: String,
    /// Manager interface TCP port
    pub port: u16,
    /// Manager account username
    pub username: String,
    /// Manager account secret
    pub secret: String,
    /// Seconds to wait for an action response before failing with a timeout
    pub action_timeout_secs: u64,
    /// Reconnection behavior after connection loss
    pub reconnect: ReconnectPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_MANAGER_PORT,
            username: String::new(),
            secret: String::new(),
            action_timeout_secs: 10,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ManagerConfig {
    /// Create a configuration for the given host and credentials
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            secret: secret.into(),
            ..Default::default()
        }
    }

    /// Set the manager interface port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the per-action response timeout
    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Set the reconnection policy
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// The per-action response deadline
    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }
}

/// Exponential backoff policy for reconnection attempts
///
/// The delay before retry `n` (zero-based) is `min(base * 2^n, cap)`. The
/// attempt counter resets only on a fully authenticated connection; once
/// `max_attempts` consecutive attempts have failed the client stops retrying
/// and stays degraded until a manual reconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Initial delay between attempts, in milliseconds
    pub base_delay_ms: u64,
    /// Upper bound on the delay, in milliseconds
    pub max_delay_ms: u64,
    /// Consecutive failed attempts tolerated before giving up
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Backoff delay before the given zero-based retry attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.min(20);
        let delay = self.base_delay_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> = (0..8)
            .map(|n| policy.delay_for(n).as_millis() as u64)
            .collect();
        assert_eq!(
            delays,
            vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000, 30_000]
        );
    }

    #[test]
    fn backoff_never_overflows() {
        let policy = ReconnectPolicy {
            base_delay_ms: u64::MAX / 2,
            max_delay_ms: 30_000,
            max_attempts: 3,
        };
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(30_000));
    }

    #[test]
    fn builder_methods_apply() {
        let config = ManagerConfig::new("pbx.local", "admin", "secret")
            .with_port(5039)
            .with_action_timeout(Duration::from_secs(5));
        assert_eq!(config.port, 5039);
        assert_eq!(config.action_timeout(), Duration::from_secs(5));
        assert_eq!(config.host, "pbx.local");
    }
}
