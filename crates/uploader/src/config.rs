//! Uploader configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use upqueue_store::StoreConfig;

pub const ENV_ROOT: &str = "UPQUEUE_ROOT";
pub const ENV_NAMESPACE: &str = "UPQUEUE_NAMESPACE";
pub const ENV_RETRY_DELAY_SECS: &str = "UPQUEUE_RETRY_DELAY_SECS";
pub const ENV_STALE_AFTER_SECS: &str = "UPQUEUE_STALE_AFTER_SECS";
pub const ENV_MAX_IN_FLIGHT: &str = "UPQUEUE_MAX_IN_FLIGHT";

/// Uploader configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UploaderConfig {
    /// Where the job store lives
    pub store: StoreConfig,
    /// Cool-down between a failed upload and the next re-drive
    pub retry_delay: Duration,
    /// Upper bound on calls started by re-drives (1 = strictly sequential)
    pub max_in_flight: usize,
    /// Name for logging
    pub name: String,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            retry_delay: Duration::from_secs(60),
            max_in_flight: 1,
            name: "uploader".to_string(),
        }
    }
}

impl UploaderConfig {
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max.max(1);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Defaults overridden by `UPQUEUE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `UPQUEUE_*` key.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(root) = lookup(ENV_ROOT) {
            config.store.root = PathBuf::from(root);
        }
        if let Some(namespace) = lookup(ENV_NAMESPACE) {
            config.store.namespace = namespace;
        }
        if let Some(secs) = parse::<u64>(&lookup, ENV_RETRY_DELAY_SECS) {
            config.retry_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = parse::<u64>(&lookup, ENV_STALE_AFTER_SECS) {
            config.store.stale_after = Duration::from_secs(secs);
        }
        match parse::<usize>(&lookup, ENV_MAX_IN_FLIGHT) {
            Some(0) => warn!(key = ENV_MAX_IN_FLIGHT, "must be at least 1; keeping default"),
            Some(max) => config.max_in_flight = max,
            None => {}
        }

        config
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, value = %raw, error = %e, "ignoring invalid setting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_queue_policy() {
        let config = UploaderConfig::default();
        assert_eq!(config.retry_delay, Duration::from_secs(60));
        assert_eq!(config.max_in_flight, 1);
        assert_eq!(config.store.stale_after, Duration::from_secs(120));
    }

    #[test]
    fn lookup_overrides_defaults() {
        let config = UploaderConfig::from_lookup(lookup_from(&[
            (ENV_ROOT, "/var/lib/app"),
            (ENV_NAMESPACE, "photos"),
            (ENV_RETRY_DELAY_SECS, "5"),
            (ENV_STALE_AFTER_SECS, " 30 "),
            (ENV_MAX_IN_FLIGHT, "3"),
        ]));

        assert_eq!(config.store.root, PathBuf::from("/var/lib/app"));
        assert_eq!(config.store.namespace, "photos");
        assert_eq!(config.retry_delay, Duration::from_secs(5));
        assert_eq!(config.store.stale_after, Duration::from_secs(30));
        assert_eq!(config.max_in_flight, 3);
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let config = UploaderConfig::from_lookup(lookup_from(&[
            (ENV_RETRY_DELAY_SECS, "soon"),
            (ENV_MAX_IN_FLIGHT, "0"),
        ]));

        assert_eq!(config.retry_delay, Duration::from_secs(60));
        assert_eq!(config.max_in_flight, 1);
    }

    #[test]
    fn max_in_flight_builder_has_floor() {
        assert_eq!(UploaderConfig::default().with_max_in_flight(0).max_in_flight, 1);
    }
}
