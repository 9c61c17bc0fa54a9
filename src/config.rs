use std::path::PathBuf;

/// Server settings, read from `CAJA_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "caja".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unset or unparseable values fall back to the defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            bind: get("CAJA_BIND").unwrap_or(d.bind),
            port: parsed(&get, "CAJA_PORT").unwrap_or(d.port),
            data_dir: get("CAJA_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            password: get("CAJA_PASSWORD").unwrap_or(d.password),
            max_connections: parsed(&get, "CAJA_MAX_CONNECTIONS").unwrap_or(d.max_connections),
            compact_threshold: parsed(&get, "CAJA_COMPACT_THRESHOLD").unwrap_or(d.compact_threshold),
            metrics_port: parsed(&get, "CAJA_METRICS_PORT"),
            tls_cert: get("CAJA_TLS_CERT"),
            tls_key: get("CAJA_TLS_KEY"),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parsed<T: std::str::FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    get(key).and_then(|s| s.trim().parse().ok())
}
