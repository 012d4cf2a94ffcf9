//! Configuration for the sync engine.

use std::time::Duration;

/// Features that stay disabled while offline unless configured otherwise.
pub const DEFAULT_NETWORK_REQUIRED_FEATURES: &[&str] =
    &["invite_member", "export_data", "change_plan", "sign_out_everywhere"];

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// REST base URL, e.g. `https://api.example.com`.
    pub base_url: String,
    /// Path of the push channel, appended to the derived socket address.
    pub push_path: String,
    /// Scheme of the `Authorization` header.
    pub auth_scheme: String,
    /// Request timeout for direct calls.
    pub request_timeout: Duration,
    /// Push channel reconnect policy.
    pub reconnect: ReconnectConfig,
    /// Failed replays after which a queued change is dead-lettered.
    pub max_replay_attempts: u32,
    /// Feature names that are unavailable while offline.
    pub network_required_features: Vec<String>,
    /// Journal size in bytes above which the queue rewrites its journal.
    pub compaction_threshold: u64,
}

impl EngineConfig {
    /// Creates a configuration for the given REST base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            push_path: "/ws".to_string(),
            auth_scheme: "Bearer".to_string(),
            request_timeout: Duration::from_secs(30),
            reconnect: ReconnectConfig::default(),
            max_replay_attempts: 5,
            network_required_features: DEFAULT_NETWORK_REQUIRED_FEATURES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            compaction_threshold: 1024 * 1024,
        }
    }

    /// Sets the push channel path.
    pub fn with_push_path(mut self, path: impl Into<String>) -> Self {
        self.push_path = path.into();
        self
    }

    /// Sets the authorization scheme.
    pub fn with_auth_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.auth_scheme = scheme.into();
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the reconnect policy.
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Sets the replay attempt limit. Zero is treated as one.
    pub fn with_max_replay_attempts(mut self, attempts: u32) -> Self {
        self.max_replay_attempts = attempts.max(1);
        self
    }

    /// Replaces the list of network-required features.
    pub fn with_network_required_features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.network_required_features = features.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the journal compaction threshold.
    pub fn with_compaction_threshold(mut self, bytes: u64) -> Self {
        self.compaction_threshold = bytes;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new("http://localhost:8080")
    }
}

/// Reconnect policy of the push channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay after the first failed cycle.
    pub base_delay: Duration,
    /// Upper bound of any delay.
    pub max_delay: Duration,
    /// Growth factor per consecutive failure.
    pub multiplier: u32,
}

impl ReconnectConfig {
    /// Creates a reconnect policy.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            multiplier: 2,
        }
    }

    /// Sets the growth factor.
    pub fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Delay before the next attempt after `failures` consecutive failed cycles
    /// (0-indexed: the first failure waits `base_delay`).
    /// Overflow saturates at `max_delay`.
    pub fn delay_for_failures(&self, failures: u32) -> Duration {
        self.multiplier
            .max(1)
            .checked_pow(failures)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000), Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_builder() {
        let config = EngineConfig::new("https://api.example.com")
            .with_push_path("/realtime")
            .with_auth_scheme("Token")
            .with_request_timeout(Duration::from_secs(5))
            .with_max_replay_attempts(3)
            .with_network_required_features(["export_data"])
            .with_compaction_threshold(4096);

        assert_eq!(config.base_url, "https://api.example.com");
        assert_eq!(config.push_path, "/realtime");
        assert_eq!(config.auth_scheme, "Token");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.max_replay_attempts, 3);
        assert_eq!(config.network_required_features, vec!["export_data"]);
        assert_eq!(config.compaction_threshold, 4096);
    }

    #[test]
    fn zero_replay_attempts_is_clamped() {
        let config = EngineConfig::default().with_max_replay_attempts(0);
        assert_eq!(config.max_replay_attempts, 1);
    }

    #[test]
    fn reconnect_delays_double_and_cap() {
        let config = ReconnectConfig::default();
        assert_eq!(config.delay_for_failures(0), Duration::from_millis(1000));
        assert_eq!(config.delay_for_failures(1), Duration::from_millis(2000));
        assert_eq!(config.delay_for_failures(2), Duration::from_millis(4000));
        assert_eq!(config.delay_for_failures(5), Duration::from_secs(30));
        assert_eq!(config.delay_for_failures(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn custom_multiplier() {
        let config = ReconnectConfig::new(Duration::from_millis(100), Duration::from_secs(1))
            .with_multiplier(3);
        assert_eq!(config.delay_for_failures(1), Duration::from_millis(300));
        assert_eq!(config.delay_for_failures(3), Duration::from_secs(1));
    }

    #[test]
    fn large_delays_stay_exact() {
        let config = ReconnectConfig::new(Duration::from_millis(333), Duration::from_secs(86_400))
            .with_multiplier(3);
        assert_eq!(
            config.delay_for_failures(10),
            Duration::from_millis(333 * 59_049)
        );
        assert_eq!(config.delay_for_failures(40), Duration::from_secs(86_400));

        let flat = ReconnectConfig::default().with_multiplier(0);
        assert_eq!(flat.delay_for_failures(7), Duration::from_millis(1000));
    }
}
