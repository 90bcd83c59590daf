use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::limits::DEFAULT_ADMISSION_TIMEOUT_MS;

/// Server settings, read from `AGENNDO_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub admission_timeout: Duration,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "agenndo".into(),
            max_connections: 256,
            compact_threshold: 1000,
            admission_timeout: Duration::from_millis(DEFAULT_ADMISSION_TIMEOUT_MS),
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unparsable numbers fall back to the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            port: parsed(&lookup, "AGENNDO_PORT").unwrap_or(defaults.port),
            bind: lookup("AGENNDO_BIND").unwrap_or(defaults.bind),
            data_dir: lookup("AGENNDO_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            password: lookup("AGENNDO_PASSWORD").unwrap_or(defaults.password),
            max_connections: parsed(&lookup, "AGENNDO_MAX_CONNECTIONS").unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&lookup, "AGENNDO_COMPACT_THRESHOLD").unwrap_or(defaults.compact_threshold),
            admission_timeout: parsed(&lookup, "AGENNDO_ADMISSION_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.admission_timeout),
            metrics_port: parsed(&lookup, "AGENNDO_METRICS_PORT"),
            tls_cert: lookup("AGENNDO_TLS_CERT"),
            tls_key: lookup("AGENNDO_TLS_KEY"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = from(&[]);
        assert_eq!(config, Config::default());
        assert_eq!(config.listen_addr(), "0.0.0.0:5433");
        assert_eq!(config.admission_timeout, Duration::from_millis(500));
    }

    #[test]
    fn reads_overrides() {
        let config = from(&[
            ("AGENNDO_PORT", "6543"),
            ("AGENNDO_DATA_DIR", "/var/lib/agenndo"),
            ("AGENNDO_ADMISSION_TIMEOUT_MS", "250"),
            ("AGENNDO_METRICS_PORT", "9090"),
            ("AGENNDO_TLS_CERT", "cert.pem"),
        ]);
        assert_eq!(config.port, 6543);
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/agenndo"));
        assert_eq!(config.admission_timeout, Duration::from_millis(250));
        assert_eq!(config.metrics_port, Some(9090));
        assert_eq!(config.tls_cert.as_deref(), Some("cert.pem"));
        assert_eq!(config.tls_key, None);
    }

    #[test]
    fn garbage_numbers_fall_back() {
        let config = from(&[("AGENNDO_MAX_CONNECTIONS", "lots"), ("AGENNDO_PORT", "99999")]);
        assert_eq!(config.max_connections, 256);
        assert_eq!(config.port, 5433);
    }

    #[test]
    fn each_numeric_field_parses_its_own_type() {
        let config = from(&[
            ("AGENNDO_PORT", "7000"),
            ("AGENNDO_MAX_CONNECTIONS", " 64 "),
            ("AGENNDO_COMPACT_THRESHOLD", "5000000000"),
            ("AGENNDO_ADMISSION_TIMEOUT_MS", "1500"),
        ]);
        assert_eq!(config.port, 7000);
        assert_eq!(config.max_connections, 64);
        assert_eq!(config.compact_threshold, 5_000_000_000);
        assert_eq!(config.admission_timeout, Duration::from_millis(1500));
    }
}
