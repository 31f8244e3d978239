// Server configuration loaded from the environment

use axum::http::HeaderValue;
use telemetry_core::ConfigError;

/// Default broadcast buffer per live viewer
pub const DEFAULT_LIVE_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Messages a live viewer may fall behind before it starts losing them
    pub live_capacity: usize,
    /// Empty means same-origin requests only
    pub cors_origins: Vec<HeaderValue>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            live_capacity: DEFAULT_LIVE_CAPACITY,
            cors_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(host) = lookup("TELEMETRY_HOST").filter(|s| !s.trim().is_empty()) {
            config.host = host.trim().to_string();
        }
        if let Some(raw) = lookup("TELEMETRY_PORT") {
            config.port = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::new("TELEMETRY_PORT", &raw, "not a port number"))?;
        }
        if let Some(raw) = lookup("TELEMETRY_LIVE_CAPACITY") {
            config.live_capacity = match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::new(
                        "TELEMETRY_LIVE_CAPACITY",
                        &raw,
                        "expected a positive integer",
                    ))
                }
            };
        }

        // Example: CORS_ALLOWED_ORIGINS="https://dash.example.com,https://admin.example.com"
        config.cors_origins = lookup("CORS_ALLOWED_ORIGINS")
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.split(',')
                    .filter_map(|s| s.trim().parse().ok())
                    .collect()
            })
            .unwrap_or_default();

        Ok(config)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
