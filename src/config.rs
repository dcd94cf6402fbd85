use crate::error::{RealtimeError, Result};
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use url::Url;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Hosted realtime backend connection
    pub realtime: RealtimeConfig,
    /// Channel registry tuning
    pub registry: RegistryConfig,
    /// Relay API server configuration
    pub relay: RelayServerConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Base realtime endpoint, e.g. `wss://project.example.co/realtime/v1`.
    /// `None` runs against the in-process feed.
    pub url: Option<Url>,
    /// Project API key sent as the `apikey` query parameter
    pub api_key: String,
    /// Database schema the change feeds are filtered on (default: public)
    pub schema: String,
    /// Heartbeat interval in seconds
    pub heartbeat_secs: u64,
    /// Socket connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Feed names backed by a differently named table (`feed=table`)
    pub tables: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Interval between health sweeps
    pub sweep_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayServerConfig {
    /// Port for the relay server (default: 8090)
    pub port: u16,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Allowed CORS origins (comma-separated, empty = localhost only)
    pub cors_origins: Vec<String>,
    /// Feeds subscribed at startup and logged as they change
    pub watch: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            realtime: RealtimeConfig {
                url: parse_realtime_url()?,
                api_key: get_env_or("REALTIME_API_KEY", ""),
                schema: get_env_or("REALTIME_SCHEMA", "public"),
                heartbeat_secs: parse_positive("REALTIME_HEARTBEAT_SECS", "30")?,
                connect_timeout_secs: parse_positive("REALTIME_CONNECT_TIMEOUT_SECS", "10")?,
                tables: parse_table_map(&get_env_or("REALTIME_TABLES", ""))?,
            },
            registry: RegistryConfig {
                sweep_interval: Duration::from_secs(parse_positive(
                    "REGISTRY_SWEEP_INTERVAL_SECS",
                    "30",
                )?),
            },
            relay: RelayServerConfig {
                port: get_env_or("RELAY_PORT", "8090").parse().map_err(|_| {
                    RealtimeError::InvalidConfig("RELAY_PORT must be a valid port number".into())
                })?,
                host: get_env_or("RELAY_HOST", "0.0.0.0"),
                cors_origins: split_list(&get_env_or("CORS_ORIGINS", "")),
                watch: split_list(&get_env_or("REALTIME_WATCH", "")),
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "json"),
            },
        })
    }

    /// Get the relay server address
    pub fn relay_addr(&self) -> String {
        format!("{}:{}", self.relay.host, self.relay.port)
    }
}

impl RealtimeConfig {
    /// Websocket endpoint for the realtime socket, with the api key and
    /// protocol version attached.
    pub fn websocket_url(&self) -> Option<Url> {
        let mut url = self.url.clone()?;
        {
            let mut segments = url.path_segments_mut().ok()?;
            segments.pop_if_empty().push("websocket");
        }
        url.query_pairs_mut()
            .append_pair("apikey", &self.api_key)
            .append_pair("vsn", "1.0.0");
        Some(url)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Table whose changes feed `name`; unmapped feeds are named after their table
    pub fn table_for<'a>(&'a self, name: &'a str) -> &'a str {
        self.tables.get(name).map(String::as_str).unwrap_or(name)
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: String::new(),
            schema: "public".to_string(),
            heartbeat_secs: 30,
            connect_timeout_secs: 10,
            tables: HashMap::new(),
        }
    }
}

fn parse_realtime_url() -> Result<Option<Url>> {
    let raw = env::var("REALTIME_URL").unwrap_or_default();
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    let mut url = Url::parse(raw).map_err(|e| {
        RealtimeError::InvalidConfig(format!("REALTIME_URL must be a valid URL: {}", e))
    })?;

    // Accept the REST-style http(s) project URL and switch it to ws(s).
    let scheme = match url.scheme().to_lowercase().as_str() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(RealtimeError::InvalidConfig(format!(
                "REALTIME_URL has unsupported scheme: {}",
                other
            )))
        }
    };
    url.set_scheme(scheme).map_err(|_| {
        RealtimeError::InvalidConfig("REALTIME_URL scheme could not be converted".into())
    })?;

    if url.host_str().is_none() {
        return Err(RealtimeError::InvalidConfig(
            "REALTIME_URL must include a host".into(),
        ));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(RealtimeError::InvalidConfig(
            "REALTIME_URL must not include query/fragment".into(),
        ));
    }

    Ok(Some(url))
}

fn parse_positive(key: &str, default: &str) -> Result<u64> {
    match get_env_or(key, default).parse::<u64>() {
        Ok(0) | Err(_) => Err(RealtimeError::InvalidConfig(format!(
            "{} must be a positive number of seconds",
            key
        ))),
        Ok(v) => Ok(v),
    }
}

fn parse_table_map(raw: &str) -> Result<HashMap<String, String>> {
    split_list(raw)
        .into_iter()
        .map(|pair| match pair.split_once('=') {
            Some((feed, table)) if !feed.trim().is_empty() && !table.trim().is_empty() => {
                Ok((feed.trim().to_string(), table.trim().to_string()))
            }
            _ => Err(RealtimeError::InvalidConfig(format!(
                "REALTIME_TABLES entry must be feed=table, got {:?}",
                pair
            ))),
        })
        .collect()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const CONFIG_ENV_KEYS: &[&str] = &[
        "REALTIME_URL",
        "REALTIME_API_KEY",
        "REALTIME_SCHEMA",
        "REALTIME_HEARTBEAT_SECS",
        "REALTIME_CONNECT_TIMEOUT_SECS",
        "REALTIME_TABLES",
        "REGISTRY_SWEEP_INTERVAL_SECS",
        "RELAY_PORT",
        "RELAY_HOST",
        "CORS_ORIGINS",
        "REALTIME_WATCH",
        "LOG_LEVEL",
        "LOG_FORMAT",
    ];

    struct EnvGuard {
        saved: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(keys: &[&str]) -> Self {
            let saved = keys
                .iter()
                .map(|&key| {
                    let old = env::var(key).ok();
                    env::remove_var(key);
                    (key.to_string(), old)
                })
                .collect();

            Self { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.saved.drain(..) {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        let config = tokio_test::assert_ok!(Config::from_env());

        assert!(config.realtime.url.is_none());
        assert_eq!(config.realtime.schema, "public");
        assert_eq!(config.realtime.heartbeat_secs, 30);
        assert_eq!(config.registry.sweep_interval, Duration::from_secs(30));
        assert_eq!(config.relay.port, 8090);
        assert_eq!(config.relay.host, "0.0.0.0");
        assert!(config.relay.cors_origins.is_empty());
        assert!(config.relay.watch.is_empty());
        assert!(config.realtime.tables.is_empty());
        assert_eq!(config.log.format, "json");
    }

    #[test]
    fn test_config_from_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("REALTIME_URL", "https://pos.example.co/realtime/v1");
        env::set_var("REALTIME_API_KEY", "anon-key");
        env::set_var("REGISTRY_SWEEP_INTERVAL_SECS", "5");
        env::set_var("RELAY_PORT", "9100");
        env::set_var("CORS_ORIGINS", "https://a.example, https://b.example");
        env::set_var("REALTIME_WATCH", "orders, order_items,");

        let config = Config::from_env().unwrap();

        let url = config.realtime.url.clone().unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.host_str(), Some("pos.example.co"));
        assert_eq!(config.realtime.api_key, "anon-key");
        assert_eq!(config.registry.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.relay.port, 9100);
        assert_eq!(
            config.relay.cors_origins,
            vec![
                "https://a.example".to_string(),
                "https://b.example".to_string()
            ]
        );
        assert_eq!(
            config.relay.watch,
            vec!["orders".to_string(), "order_items".to_string()]
        );
    }

    #[test]
    fn test_config_from_env_invalid_port() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("RELAY_PORT", "not-a-port");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, RealtimeError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_from_env_zero_sweep_interval_rejected() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("REGISTRY_SWEEP_INTERVAL_SECS", "0");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, RealtimeError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_from_env_invalid_realtime_url() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("REALTIME_URL", "not a url");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            RealtimeError::InvalidConfig(_)
        ));

        env::set_var("REALTIME_URL", "ftp://pos.example.co");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            RealtimeError::InvalidConfig(_)
        ));

        env::set_var("REALTIME_URL", "wss://pos.example.co/realtime/v1?apikey=x");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            RealtimeError::InvalidConfig(_)
        ));
    }

    #[test]
    fn test_config_from_env_table_map() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("REALTIME_TABLES", "kitchen_queue=orders, floor = tables");
        let config = Config::from_env().unwrap();
        assert_eq!(config.realtime.table_for("kitchen_queue"), "orders");
        assert_eq!(config.realtime.table_for("floor"), "tables");
        assert_eq!(config.realtime.table_for("menu_items"), "menu_items");

        env::set_var("REALTIME_TABLES", "kitchen_queue");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            RealtimeError::InvalidConfig(_)
        ));

        env::set_var("REALTIME_TABLES", "kitchen_queue=");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            RealtimeError::InvalidConfig(_)
        ));
    }

    #[test]
    fn test_websocket_url() {
        let config = RealtimeConfig {
            url: Some(Url::parse("wss://pos.example.co/realtime/v1/").unwrap()),
            api_key: "anon".to_string(),
            ..Default::default()
        };

        assert_eq!(
            config.websocket_url().unwrap().as_str(),
            "wss://pos.example.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );
        assert!(RealtimeConfig::default().websocket_url().is_none());
    }

    #[test]
    fn test_relay_addr() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("RELAY_HOST", "127.0.0.1");
        let config = Config::from_env().unwrap();
        assert_eq!(config.relay_addr(), "127.0.0.1:8090");
    }
}
