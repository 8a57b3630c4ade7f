use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Server settings, read from `SLOTGATE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends after which an account's log is compacted.
    pub compact_threshold: u64,
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
            password: "slotgate".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Unset or blank variables keep their default; unparsable ones are
    /// logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();
        Self {
            port: parsed(&get, "SLOTGATE_PORT").unwrap_or(defaults.port),
            bind: get("SLOTGATE_BIND").unwrap_or(defaults.bind),
            data_dir: get("SLOTGATE_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            password: get("SLOTGATE_PASSWORD").unwrap_or(defaults.password),
            max_connections: parsed(&get, "SLOTGATE_MAX_CONNECTIONS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&get, "SLOTGATE_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parsed(&get, "SLOTGATE_METRICS_PORT"),
            tls_cert: get("SLOTGATE_TLS_CERT"),
            tls_key: get("SLOTGATE_TLS_KEY"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = get(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring {key}={raw:?}: not a valid value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(config(&[]), Config::default());
        assert_eq!(Config::default().listen_addr(), "0.0.0.0:5433");
    }

    #[test]
    fn overrides_apply() {
        let c = config(&[
            ("SLOTGATE_PORT", "6000"),
            ("SLOTGATE_DATA_DIR", "/var/lib/slotgate"),
            ("SLOTGATE_METRICS_PORT", "9100"),
            ("SLOTGATE_COMPACT_THRESHOLD", "50"),
        ]);
        assert_eq!(c.port, 6000);
        assert_eq!(c.data_dir, PathBuf::from("/var/lib/slotgate"));
        assert_eq!(c.metrics_port, Some(9100));
        assert_eq!(c.compact_threshold, 50);
    }

    #[test]
    fn bad_values_fall_back() {
        let c = config(&[
            ("SLOTGATE_PORT", "not-a-port"),
            ("SLOTGATE_MAX_CONNECTIONS", "0"),
            ("SLOTGATE_PASSWORD", "   "),
        ]);
        assert_eq!(c.port, 5433);
        assert_eq!(c.max_connections, 256);
        assert_eq!(c.password, "slotgate");
    }
}
