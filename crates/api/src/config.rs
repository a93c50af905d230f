//! Application configuration loaded from environment variables.

use std::time::Duration;

use domain::DEFAULT_ADVISORY_BUFFER;
use storage::DEFAULT_LOCK_TIMEOUT;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOCK_TIMEOUT_MS`: longest wait for a row lock, at least 1 (default: `5000`)
/// - `ADVISORY_BUFFER`: low-stock advisories buffered per subscriber
///   (default: `256`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub lock_timeout: Duration,
    pub advisory_buffer: usize,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            lock_timeout: lookup("LOCK_TIMEOUT_MS")
                .and_then(|ms| ms.parse().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            advisory_buffer: lookup("ADVISORY_BUFFER")
                .and_then(|n| n.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.advisory_buffer),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            advisory_buffer: DEFAULT_ADVISORY_BUFFER,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.lock_timeout, Duration::from_secs(5));
        assert_eq!(config.advisory_buffer, 256);
    }

    #[test]
    fn test_reads_variables() {
        let config = from_pairs(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("LOCK_TIMEOUT_MS", "250"),
            ("ADVISORY_BUFFER", "16"),
        ]);
        assert_eq!(config.addr(), "127.0.0.1:8080");
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.advisory_buffer, 16);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[
            ("PORT", "not-a-port"),
            ("LOCK_TIMEOUT_MS", "-1"),
            ("ADVISORY_BUFFER", "0"),
        ]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.lock_timeout, DEFAULT_LOCK_TIMEOUT);
        assert_eq!(config.advisory_buffer, DEFAULT_ADVISORY_BUFFER);
    }

    #[test]
    fn test_zero_lock_timeout_falls_back() {
        let config = from_pairs(&[("LOCK_TIMEOUT_MS", "0")]);
        assert_eq!(config.lock_timeout, DEFAULT_LOCK_TIMEOUT);
    }

    #[test]
    fn test_addr_default() {
        let config = Config::default();
        assert_eq!(config.addr(), "0.0.0.0:3000");
    }
}
