//! TOML configuration for the collector.
//!
//! The configuration is read once at startup and passed by reference into the
//! delivery client, cache store and producers. Nothing reads it from global
//! state.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::cache::validate_device_key;

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_INTERVAL_SECS: u64 = 300;

/// Top-level collector configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Telemetry endpoint settings.
    pub connection: ConnectionConfig,
    /// Proxies used when `connection.proxy` is enabled.
    #[serde(default)]
    pub proxies: ProxyConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    /// Weather API endpoints for the weather producers.
    #[serde(default)]
    pub weather: WeatherConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    /// One entry per measured sensor.
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,
}

/// Transport used to reach the telemetry server.
///
/// Anything other than `http` or `https` is kept as [`Transport::Unsupported`]
/// so the delivery client can refuse it without touching the network.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "String")]
pub enum Transport {
    #[default]
    Http,
    Https,
    Unsupported(String),
}

impl Transport {
    /// URL scheme, or `None` for an unsupported transport.
    pub fn scheme(&self) -> Option<&'static str> {
        match self {
            Transport::Http => Some("http"),
            Transport::Https => Some("https"),
            Transport::Unsupported(_) => None,
        }
    }
}

impl From<String> for Transport {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Transport::Http,
            "https" => Transport::Https,
            _ => Transport::Unsupported(s),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Http => write!(f, "http"),
            Transport::Https => write!(f, "https"),
            Transport::Unsupported(s) => write!(f, "{s}"),
        }
    }
}

/// Telemetry server connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// Server host, optionally with a port (`demo.thingsboard.io`, `10.0.0.5:8080`).
    pub server: String,
    #[serde(default)]
    pub method: Transport,
    /// Route requests through [`ProxyConfig`].
    #[serde(default)]
    pub proxy: bool,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Headers sent with every submission.
    #[serde(default = "default_headers")]
    pub headers: BTreeMap<String, String>,
}

/// Proxy URLs per scheme.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyConfig {
    pub http: Option<String>,
    pub https: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Directory holding `<authkey>_<date>.cache` files.
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeatherConfig {
    /// OpenWeatherMap current-weather URL including the `appid` query parameter.
    pub owm_url: Option<String>,
    /// Weather Underground conditions URL prefix; the ZIP code and format are appended.
    pub wund_url: Option<String>,
    #[serde(default = "default_wund_format")]
    pub wund_format: String,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            owm_url: None,
            wund_url: None,
            wund_format: default_wund_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    /// Seconds between collection rounds.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Drain a device's cache right after publishing for it.
    #[serde(default = "default_true")]
    pub drain_after_publish: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_INTERVAL_SECS,
            drain_after_publish: true,
        }
    }
}

/// Kind of measurement producer backing a sensor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum SensorKind {
    /// Dallas DS18B20 one-wire temperature probe.
    Ds18b20,
    /// OpenWeatherMap current conditions.
    OpenWeatherMap,
    /// Weather Underground current conditions.
    WeatherUnderground,
    /// Host resource usage.
    SystemStats,
    /// Anything else; reported as a sensor error.
    Other(String),
}

impl From<String> for SensorKind {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "ds18b20" => SensorKind::Ds18b20,
            "owm" | "openweathermap" => SensorKind::OpenWeatherMap,
            "wund" | "wunderground" => SensorKind::WeatherUnderground,
            "system" | "sys" | "sys_stats" => SensorKind::SystemStats,
            _ => SensorKind::Other(s),
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorKind::Ds18b20 => write!(f, "ds18b20"),
            SensorKind::OpenWeatherMap => write!(f, "owm"),
            SensorKind::WeatherUnderground => write!(f, "wund"),
            SensorKind::SystemStats => write!(f, "system"),
            SensorKind::Other(s) => write!(f, "{s}"),
        }
    }
}

/// One sensor and the device it publishes to.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorConfig {
    /// Human-readable name, unique within the file.
    pub name: String,
    /// Device authorization key on the telemetry server.
    pub authkey: String,
    pub kind: SensorKind,
    /// Probe path for one-wire sensors, ZIP code for weather sensors.
    #[serde(default)]
    pub device: String,
    /// Suffix appended to metric names (e.g. `_porch` gives `temp_porch`).
    #[serde(default)]
    pub label: String,
    /// Cache the record when live delivery fails.
    #[serde(default = "default_true")]
    pub cache_on_error: bool,
    /// Never send live; always cache.
    #[serde(default)]
    pub local_only: bool,
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Look up a sensor by name.
    pub fn sensor(&self, name: &str) -> Option<&SensorConfig> {
        self.sensors.iter().find(|s| s.name == name)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.server.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "connection.server must not be empty".to_string(),
            ));
        }
        if self.connection.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "connection.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.collector.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "collector.interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.connection.proxy && self.proxies.http.is_none() && self.proxies.https.is_none() {
            return Err(ConfigError::Invalid(
                "connection.proxy is enabled but no [proxies] are configured".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for sensor in &self.sensors {
            if !names.insert(sensor.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate sensor name '{}'",
                    sensor.name
                )));
            }
            validate_device_key(&sensor.authkey).map_err(|e| {
                ConfigError::Invalid(format!("sensor '{}': {e}", sensor.name))
            })?;
        }
        Ok(())
    }
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_interval_secs() -> u64 {
    DEFAULT_INTERVAL_SECS
}

fn default_headers() -> BTreeMap<String, String> {
    BTreeMap::from([("Content-Type".to_string(), "application/json".to_string())])
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache")
}

fn default_wund_format() -> String {
    "json".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_TOML: &str = r#"
[connection]
server = "demo.thingsboard.io"
"#;

    const FULL_TOML: &str = r#"
[connection]
server = "tb.example.com:8080"
method = "https"
proxy = true
timeout_secs = 5

[connection.headers]
"Content-Type" = "application/json"
"X-Site" = "garage"

[proxies]
http = "http://proxy.example.com:3128"
https = "http://proxy.example.com:3128"

[cache]
dir = "/var/cache/sensorcast"

[weather]
owm_url = "https://api.openweathermap.org/data/2.5/weather?appid=KEY"
wund_url = "https://api.wunderground.com/api/KEY/conditions/q/"

[collector]
interval_secs = 60
drain_after_publish = false

[[sensors]]
name = "porch"
authkey = "abc123"
kind = "ds18b20"
device = "/sys/bus/w1/devices/28-000005e2fdc3/w1_slave"
label = "_porch"

[[sensors]]
name = "weather"
authkey = "def456"
kind = "owm"
device = "12345"
cache_on_error = false

[[sensors]]
name = "pi"
authkey = "ghi789"
kind = "system"
local_only = true
"#;

    #[test]
    fn test_config_parse_minimal() {
        let config = Config::from_toml(MINIMAL_TOML).unwrap();
        assert_eq!(config.connection.server, "demo.thingsboard.io");
        assert_eq!(config.connection.method, Transport::Http);
        assert!(!config.connection.proxy);
        assert_eq!(config.connection.timeout_secs, 10);
        assert_eq!(
            config.connection.headers.get("Content-Type").map(String::as_str),
            Some("application/json")
        );
        assert_eq!(config.cache.dir, PathBuf::from("cache"));
        assert_eq!(config.collector.interval_secs, 300);
        assert!(config.collector.drain_after_publish);
        assert_eq!(config.weather.wund_format, "json");
        assert!(config.sensors.is_empty());
    }

    #[test]
    fn test_config_parse_all_fields() {
        let config = Config::from_toml(FULL_TOML).unwrap();
        assert_eq!(config.connection.method, Transport::Https);
        assert!(config.connection.proxy);
        assert_eq!(config.connection.timeout_secs, 5);
        assert_eq!(config.connection.headers.len(), 2);
        assert_eq!(
            config.proxies.https.as_deref(),
            Some("http://proxy.example.com:3128")
        );
        assert_eq!(config.cache.dir, PathBuf::from("/var/cache/sensorcast"));
        assert_eq!(config.collector.interval_secs, 60);
        assert!(!config.collector.drain_after_publish);

        assert_eq!(config.sensors.len(), 3);
        let porch = config.sensor("porch").unwrap();
        assert_eq!(porch.kind, SensorKind::Ds18b20);
        assert_eq!(porch.label, "_porch");
        assert!(porch.cache_on_error);
        assert!(!porch.local_only);

        let weather = config.sensor("weather").unwrap();
        assert_eq!(weather.kind, SensorKind::OpenWeatherMap);
        assert!(!weather.cache_on_error);

        let pi = config.sensor("pi").unwrap();
        assert_eq!(pi.kind, SensorKind::SystemStats);
        assert!(pi.local_only);
        assert!(config.sensor("missing").is_none());
    }

    #[test]
    fn test_unsupported_method_is_kept() {
        let config = Config::from_toml(
            r#"
[connection]
server = "tb.example.com"
method = "mqtt"
"#,
        )
        .unwrap();
        assert_eq!(
            config.connection.method,
            Transport::Unsupported("mqtt".to_string())
        );
        assert_eq!(config.connection.method.scheme(), None);
    }

    #[test]
    fn test_unknown_sensor_kind_is_kept() {
        let kind = SensorKind::from("thermocouple".to_string());
        assert_eq!(kind, SensorKind::Other("thermocouple".to_string()));
        assert_eq!(kind.to_string(), "thermocouple");
    }

    #[test]
    fn test_rejects_empty_server() {
        let err = Config::from_toml("[connection]\nserver = \"  \"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_authkey_with_delimiter() {
        let err = Config::from_toml(
            r#"
[connection]
server = "tb"

[[sensors]]
name = "a"
authkey = "has_underscore"
kind = "ds18b20"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("sensor 'a'"));
    }

    #[test]
    fn test_rejects_duplicate_sensor_names() {
        let err = Config::from_toml(
            r#"
[connection]
server = "tb"

[[sensors]]
name = "a"
authkey = "k1"
kind = "ds18b20"

[[sensors]]
name = "a"
authkey = "k2"
kind = "system"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate sensor name"));
    }

    #[test]
    fn test_rejects_proxy_without_proxies() {
        let err = Config::from_toml(
            r#"
[connection]
server = "tb"
proxy = true
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_parse_error() {
        let err = Config::from_toml("[connection\nserver=").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_file_missing() {
        let err = Config::from_file(Path::new("/nonexistent/sensorcast.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_example_config_is_valid() {
        let config = Config::from_toml(include_str!("../../../sensorcast.example.toml")).unwrap();
        assert_eq!(config.sensors.len(), 4);
        assert_eq!(config.sensor("outside").unwrap().kind, SensorKind::OpenWeatherMap);
        assert!(config.sensor("shed").unwrap().local_only);
        assert!(config.collector.drain_after_publish);
    }
}
