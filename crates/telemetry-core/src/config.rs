// Pipeline configuration
//
// IngestConfig and GeoConfig can be:
// - Created directly for tests and embedding
// - Loaded from TELEMETRY_* environment variables via `from_env`

use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default minimum delay between two recorded events sharing a key
pub const DEFAULT_DB_DELAY_MINUTES: i64 = 30;

/// Default geolocation service (appends the address to this URL)
pub const DEFAULT_GEO_URL: &str = "http://freegeoip.net/json/";

/// Default bound on a geolocation lookup
pub const DEFAULT_GEO_TIMEOUT: Duration = Duration::from_millis(2000);

/// Invalid configuration value
#[derive(Debug, Error)]
#[error("invalid value {value:?} for {name}: {reason}")]
pub struct ConfigError {
    pub name: String,
    pub value: String,
    pub reason: String,
}

impl ConfigError {
    pub fn new(name: &str, value: &str, reason: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// How the dedup check and the append are sequenced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DedupMode {
    /// Check then append without exclusion. Concurrent requests for one key
    /// can both pass the check and both write inside the window.
    #[default]
    BestEffort,
    /// Check and append run under a per-key lock shard, so one process never
    /// writes twice for a key inside the window.
    Serialized,
}

impl FromStr for DedupMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "best_effort" | "best-effort" => Ok(DedupMode::BestEffort),
            "serialized" | "strict" => Ok(DedupMode::Serialized),
            other => Err(format!("unknown dedup mode '{other}'")),
        }
    }
}

/// What to do when geolocation fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GeoFailurePolicy {
    /// Continue with an absent location
    #[default]
    Degrade,
    /// Fail the request
    Reject,
}

impl FromStr for GeoFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "degrade" => Ok(GeoFailurePolicy::Degrade),
            "reject" => Ok(GeoFailurePolicy::Reject),
            other => Err(format!("unknown geolocation policy '{other}'")),
        }
    }
}

/// Configuration for the ingest pipeline
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Minimum delay `D` between recorded events sharing a key
    pub dedup_window: chrono::Duration,
    pub dedup_mode: DedupMode,
    pub geo_policy: GeoFailurePolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            dedup_window: chrono::Duration::minutes(DEFAULT_DB_DELAY_MINUTES),
            dedup_mode: DedupMode::default(),
            geo_policy: GeoFailurePolicy::default(),
        }
    }
}

impl IngestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the dedup window in minutes; out-of-range values saturate
    pub fn with_delay_minutes(mut self, minutes: i64) -> Self {
        self.dedup_window = chrono::Duration::try_minutes(minutes).unwrap_or(if minutes < 0 {
            chrono::Duration::MIN
        } else {
            chrono::Duration::MAX
        });
        self
    }

    pub fn with_dedup_mode(mut self, mode: DedupMode) -> Self {
        self.dedup_mode = mode;
        self
    }

    pub fn with_geo_policy(mut self, policy: GeoFailurePolicy) -> Self {
        self.geo_policy = policy;
        self
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = lookup("TELEMETRY_DB_DELAY_MINUTES") {
            let minutes: i64 = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::new("TELEMETRY_DB_DELAY_MINUTES", &raw, "not an integer"))?;
            if minutes < 0 {
                return Err(ConfigError::new(
                    "TELEMETRY_DB_DELAY_MINUTES",
                    &raw,
                    "must not be negative",
                ));
            }
            config.dedup_window = chrono::Duration::try_minutes(minutes).ok_or_else(|| {
                ConfigError::new("TELEMETRY_DB_DELAY_MINUTES", &raw, "out of range")
            })?;
        }
        if let Some(raw) = lookup("TELEMETRY_DEDUP_MODE") {
            config.dedup_mode = raw
                .parse()
                .map_err(|reason: String| ConfigError::new("TELEMETRY_DEDUP_MODE", &raw, reason))?;
        }
        if let Some(raw) = lookup("TELEMETRY_GEO_POLICY") {
            config.geo_policy = raw
                .parse()
                .map_err(|reason: String| ConfigError::new("TELEMETRY_GEO_POLICY", &raw, reason))?;
        }

        Ok(config)
    }
}

/// Configuration for the HTTP geolocation resolver
#[derive(Debug, Clone)]
pub struct GeoConfig {
    /// Lookup URL prefix; the client address is appended
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GEO_URL.to_string(),
            timeout: DEFAULT_GEO_TIMEOUT,
        }
    }
}

impl GeoConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = lookup("TELEMETRY_GEO_URL").filter(|s| !s.is_empty()) {
            config.base_url = url;
        }
        if let Some(raw) = lookup("TELEMETRY_GEO_TIMEOUT_MS") {
            let millis: u64 = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::new("TELEMETRY_GEO_TIMEOUT_MS", &raw, "not an integer"))?;
            config.timeout = Duration::from_millis(millis);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = IngestConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.dedup_window, chrono::Duration::minutes(30));
        assert_eq!(config.dedup_mode, DedupMode::BestEffort);
        assert_eq!(config.geo_policy, GeoFailurePolicy::Degrade);

        let geo = GeoConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(geo.base_url, DEFAULT_GEO_URL);
        assert_eq!(geo.timeout, DEFAULT_GEO_TIMEOUT);
    }

    #[test]
    fn test_overrides() {
        let config = IngestConfig::from_lookup(lookup(&[
            ("TELEMETRY_DB_DELAY_MINUTES", "5"),
            ("TELEMETRY_DEDUP_MODE", "serialized"),
            ("TELEMETRY_GEO_POLICY", "Reject"),
        ]))
        .unwrap();
        assert_eq!(config.dedup_window, chrono::Duration::minutes(5));
        assert_eq!(config.dedup_mode, DedupMode::Serialized);
        assert_eq!(config.geo_policy, GeoFailurePolicy::Reject);

        let geo = GeoConfig::from_lookup(lookup(&[
            ("TELEMETRY_GEO_URL", "http://geo.local/json/"),
            ("TELEMETRY_GEO_TIMEOUT_MS", "250"),
        ]))
        .unwrap();
        assert_eq!(geo.base_url, "http://geo.local/json/");
        assert_eq!(geo.timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = IngestConfig::from_lookup(lookup(&[("TELEMETRY_DB_DELAY_MINUTES", "soon")]))
            .unwrap_err();
        assert_eq!(err.name, "TELEMETRY_DB_DELAY_MINUTES");

        assert!(IngestConfig::from_lookup(lookup(&[("TELEMETRY_DB_DELAY_MINUTES", "-1")])).is_err());
        assert!(IngestConfig::from_lookup(lookup(&[("TELEMETRY_DEDUP_MODE", "maybe")])).is_err());
        assert!(GeoConfig::from_lookup(lookup(&[("TELEMETRY_GEO_TIMEOUT_MS", "1s")])).is_err());
    }

    #[test]
    fn test_oversized_delay_is_a_config_error() {
        let err = IngestConfig::from_lookup(lookup(&[(
            "TELEMETRY_DB_DELAY_MINUTES",
            "999999999999999999",
        )]))
        .unwrap_err();
        assert_eq!(err.name, "TELEMETRY_DB_DELAY_MINUTES");
        assert_eq!(err.reason, "out of range");

        let config = IngestConfig::default().with_delay_minutes(i64::MAX);
        assert_eq!(config.dedup_window, chrono::Duration::MAX);
    }
}
