//! Detector Configuration Settings
//!
//! Configuration types for the detector, loaded from environment variables.
//! Numeric values that fail to parse fall back to their defaults; values
//! that select behavior (source kind, holiday dates, exchange offset) are
//! rejected instead.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{FixedOffset, NaiveDate};

use crate::application::services::ProducerConfig;
use crate::domain::schedule::{DEFAULT_UTC_OFFSET_HOURS, MarketSchedule, exchange_offset};
use crate::infrastructure::relay::DEFAULT_TOPIC;
use crate::infrastructure::source::http::{
    DEFAULT_BASE_URL, DEFAULT_BATCH_DELAY, DEFAULT_BATCH_SIZE, DEFAULT_REQUEST_TIMEOUT,
    HttpSourceConfig,
};
use crate::infrastructure::source::simulated::DEFAULT_UNIVERSE_SIZE;

/// Which snapshot source to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceKind {
    /// Random-walk universe.
    #[default]
    Simulated,
    /// Vendor batch quote API.
    Http,
}

impl SourceKind {
    /// Parse a source kind, `None` if unrecognized.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "simulated" | "mock" => Some(Self::Simulated),
            "http" | "vendor" => Some(Self::Http),
            _ => None,
        }
    }

    /// Get the source name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Simulated => "simulated",
            Self::Http => "http",
        }
    }
}

/// Vendor license key.
#[derive(Clone)]
pub struct License(String);

impl License {
    /// Wrap a license key.
    #[must_use]
    pub const fn new(key: String) -> Self {
        Self(key)
    }

    /// Get the key.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for License {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("License([REDACTED])")
    }
}

/// Listener settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Alert server (WebSocket) port.
    pub port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
    /// Outbound frame queue per subscriber.
    pub subscriber_queue_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 8000,
            health_port: 8082,
            subscriber_queue_capacity: 1_024,
        }
    }
}

/// Market calendar settings.
#[derive(Debug, Clone)]
pub struct MarketSettings {
    /// Exchange UTC offset.
    pub offset: FixedOffset,
    /// Closed dates in addition to weekends.
    pub holidays: Vec<NaiveDate>,
    /// Treat the market as always open.
    pub force_open: bool,
}

impl Default for MarketSettings {
    fn default() -> Self {
        Self {
            offset: MarketSchedule::default().offset(),
            holidays: Vec::new(),
            force_open: false,
        }
    }
}

impl MarketSettings {
    /// Build the market schedule.
    #[must_use]
    pub fn schedule(&self) -> MarketSchedule {
        MarketSchedule::new(self.offset)
            .with_holidays(self.holidays.iter().copied())
            .with_force_open(self.force_open)
    }
}

/// Producer cadence settings.
#[derive(Debug, Clone)]
pub struct ProducerSettings {
    /// Fast poll interval while open.
    pub poll_interval: Duration,
    /// Recheck interval while idle.
    pub idle_interval: Duration,
    /// Sleep while closed.
    pub closed_interval: Duration,
    /// Per-category batch bound.
    pub top_n_per_category: usize,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        let defaults = ProducerConfig::default();
        Self {
            poll_interval: defaults.poll_interval,
            idle_interval: defaults.idle_interval,
            closed_interval: defaults.closed_interval,
            top_n_per_category: defaults.top_n_per_category,
        }
    }
}

impl From<ProducerSettings> for ProducerConfig {
    fn from(settings: ProducerSettings) -> Self {
        Self {
            poll_interval: settings.poll_interval,
            idle_interval: settings.idle_interval,
            closed_interval: settings.closed_interval,
            top_n_per_category: settings.top_n_per_category,
        }
    }
}

/// Relay channel settings.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Topic name.
    pub channel: String,
    /// Forward relayed alerts straight to WebSocket subscribers.
    pub bridge: bool,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            channel: DEFAULT_TOPIC.to_string(),
            bridge: false,
        }
    }
}

/// Snapshot source settings.
#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// Which source to run.
    pub kind: SourceKind,
    /// Vendor API base URL.
    pub base_url: String,
    /// Vendor license (required for `Http`).
    pub license: Option<License>,
    /// Code → category file for the vendor source.
    pub constituents_path: PathBuf,
    /// Codes per vendor request.
    pub batch_size: usize,
    /// Pause between vendor requests.
    pub batch_delay: Duration,
    /// Instruments in the simulated universe.
    pub simulated_universe_size: usize,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            kind: SourceKind::default(),
            base_url: DEFAULT_BASE_URL.to_string(),
            license: None,
            constituents_path: PathBuf::from("index_constituents.json"),
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: DEFAULT_BATCH_DELAY,
            simulated_universe_size: DEFAULT_UNIVERSE_SIZE,
        }
    }
}

impl SourceSettings {
    /// HTTP client settings, `None` without a license.
    #[must_use]
    pub fn http_config(&self) -> Option<HttpSourceConfig> {
        self.license.as_ref().map(|license| HttpSourceConfig {
            base_url: self.base_url.clone(),
            license: license.expose().to_string(),
            batch_size: self.batch_size,
            batch_delay: self.batch_delay,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }
}

/// Complete detector configuration.
#[derive(Debug, Clone)]
pub struct SonarConfig {
    /// Listener settings.
    pub server: ServerSettings,
    /// Market calendar.
    pub market: MarketSettings,
    /// Producer cadence.
    pub producer: ProducerSettings,
    /// Relay channel.
    pub relay: RelaySettings,
    /// Snapshot source.
    pub source: SourceSettings,
    /// Baseline file.
    pub baseline_path: PathBuf,
}

impl SonarConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a selector
    /// value is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a selector
    /// value is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let server = ServerSettings {
            port: env.parse_or("TIDE_SONAR_PORT", ServerSettings::default().port),
            health_port: env.parse_or(
                "TIDE_SONAR_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
            subscriber_queue_capacity: env
                .parse_or(
                    "SUBSCRIBER_QUEUE_CAPACITY",
                    ServerSettings::default().subscriber_queue_capacity,
                )
                .max(1),
        };

        let market = MarketSettings {
            offset: env.offset("MARKET_UTC_OFFSET_HOURS")?,
            holidays: env.dates("MARKET_HOLIDAYS")?,
            force_open: env.bool_or("FORCE_MARKET_OPEN", false),
        };

        let producer = ProducerSettings {
            poll_interval: env.millis_or(
                "POLL_INTERVAL_MS",
                ProducerSettings::default().poll_interval,
            ),
            idle_interval: env.millis_or(
                "IDLE_INTERVAL_MS",
                ProducerSettings::default().idle_interval,
            ),
            closed_interval: env.secs_or(
                "CLOSED_INTERVAL_SECS",
                ProducerSettings::default().closed_interval,
            ),
            top_n_per_category: env.parse_or(
                "TOP_N_PER_CATEGORY",
                ProducerSettings::default().top_n_per_category,
            ),
        };

        let relay = RelaySettings {
            channel: env
                .non_empty("ALERT_CHANNEL")
                .unwrap_or_else(|| RelaySettings::default().channel),
            bridge: env.bool_or("ALERT_RELAY_BRIDGE", false),
        };

        let kind = match env.non_empty("DATA_SOURCE") {
            Some(raw) => SourceKind::from_str_case_insensitive(&raw).ok_or_else(|| {
                ConfigError::InvalidValue {
                    key: "DATA_SOURCE".to_string(),
                    value: raw,
                }
            })?,
            None => SourceKind::default(),
        };

        let license = match (kind, env.get("SOURCE_LICENSE")) {
            (SourceKind::Http, None) => {
                return Err(ConfigError::MissingEnvVar("SOURCE_LICENSE".to_string()));
            }
            (SourceKind::Http, Some(key)) if key.trim().is_empty() => {
                return Err(ConfigError::EmptyValue("SOURCE_LICENSE".to_string()));
            }
            (_, key) => key.filter(|k| !k.trim().is_empty()).map(License::new),
        };

        let source = SourceSettings {
            kind,
            base_url: env
                .non_empty("SOURCE_BASE_URL")
                .unwrap_or_else(|| SourceSettings::default().base_url),
            license,
            constituents_path: env
                .non_empty("CONSTITUENTS_PATH")
                .map_or_else(|| SourceSettings::default().constituents_path, PathBuf::from),
            batch_size: env
                .parse_or("SOURCE_BATCH_SIZE", SourceSettings::default().batch_size)
                .max(1),
            batch_delay: env.millis_or(
                "SOURCE_BATCH_DELAY_MS",
                SourceSettings::default().batch_delay,
            ),
            simulated_universe_size: env.parse_or(
                "SIMULATED_UNIVERSE_SIZE",
                SourceSettings::default().simulated_universe_size,
            ),
        };

        let baseline_path = env
            .non_empty("HISTORY_DATA_PATH")
            .map_or_else(|| PathBuf::from("history_baseline.json"), PathBuf::from);

        Ok(Self {
            server,
            market,
            producer,
            relay,
            source,
            baseline_path,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has a value that cannot be used.
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

// =============================================================================
// Parsing Helpers
// =============================================================================

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn non_empty(&self, key: &str) -> Option<String> {
        self.get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse_or<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.non_empty(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn bool_or(&self, key: &str, default: bool) -> bool {
        self.non_empty(key)
            .and_then(|v| match v.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Some(true),
                "false" | "0" | "no" | "off" => Some(false),
                _ => None,
            })
            .unwrap_or(default)
    }

    fn millis_or(&self, key: &str, default: Duration) -> Duration {
        self.non_empty(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn secs_or(&self, key: &str, default: Duration) -> Duration {
        self.non_empty(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn offset(&self, key: &str) -> Result<FixedOffset, ConfigError> {
        let Some(raw) = self.non_empty(key) else {
            return exchange_offset(DEFAULT_UTC_OFFSET_HOURS).ok_or_else(|| {
                ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: DEFAULT_UTC_OFFSET_HOURS.to_string(),
                }
            });
        };
        raw.parse::<i32>()
            .ok()
            .and_then(exchange_offset)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            })
    }

    fn dates(&self, key: &str) -> Result<Vec<NaiveDate>, ConfigError> {
        let Some(raw) = self.non_empty(key) else {
            return Ok(Vec::new());
        };
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: s.to_string(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<SonarConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        SonarConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = load(&[]).unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.health_port, 8082);
        assert_eq!(config.server.subscriber_queue_capacity, 1_024);
        assert_eq!(config.market.offset.local_minus_utc(), 8 * 3600);
        assert!(config.market.holidays.is_empty());
        assert!(!config.market.force_open);
        assert_eq!(config.producer.poll_interval, Duration::from_millis(500));
        assert_eq!(config.producer.idle_interval, Duration::from_secs(1));
        assert_eq!(config.producer.closed_interval, Duration::from_secs(60));
        assert_eq!(config.producer.top_n_per_category, 50);
        assert_eq!(config.relay.channel, "stock_alerts");
        assert!(!config.relay.bridge);
        assert_eq!(config.source.kind, SourceKind::Simulated);
        assert_eq!(config.source.batch_size, 15);
        assert_eq!(config.source.batch_delay, Duration::from_millis(50));
        assert_eq!(config.source.simulated_universe_size, 4_000);
        assert_eq!(config.baseline_path, PathBuf::from("history_baseline.json"));
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("TIDE_SONAR_PORT", "9000"),
            ("ALERT_CHANNEL", "alerts_test"),
            ("ALERT_RELAY_BRIDGE", "true"),
            ("FORCE_MARKET_OPEN", "1"),
            ("HISTORY_DATA_PATH", "/data/baseline.json"),
            ("MARKET_HOLIDAYS", "2026-10-01, 2026-10-02"),
            ("POLL_INTERVAL_MS", "250"),
            ("TOP_N_PER_CATEGORY", "20"),
        ])
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.relay.channel, "alerts_test");
        assert!(config.relay.bridge);
        assert!(config.market.force_open);
        assert_eq!(config.baseline_path, PathBuf::from("/data/baseline.json"));
        assert_eq!(config.market.holidays.len(), 2);
        assert_eq!(config.producer.poll_interval, Duration::from_millis(250));
        assert_eq!(config.producer.top_n_per_category, 20);
        assert!(config.market.schedule().is_forced_open());
    }

    #[test]
    fn unparseable_numbers_fall_back() {
        let config = load(&[
            ("TIDE_SONAR_PORT", "eighty"),
            ("POLL_INTERVAL_MS", "-5"),
            ("FORCE_MARKET_OPEN", "maybe"),
        ])
        .unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.producer.poll_interval, Duration::from_millis(500));
        assert!(!config.market.force_open);
    }

    #[test]
    fn http_source_requires_license() {
        assert!(matches!(
            load(&[("DATA_SOURCE", "http")]),
            Err(ConfigError::MissingEnvVar(key)) if key == "SOURCE_LICENSE"
        ));
        assert!(matches!(
            load(&[("DATA_SOURCE", "http"), ("SOURCE_LICENSE", " ")]),
            Err(ConfigError::EmptyValue(_))
        ));

        let config = load(&[("DATA_SOURCE", "HTTP"), ("SOURCE_LICENSE", "abc123")]).unwrap();
        assert_eq!(config.source.kind, SourceKind::Http);
        let http = config.source.http_config().unwrap();
        assert_eq!(http.license, "abc123");
        assert_eq!(http.base_url, "http://api.biyingapi.com");
    }

    #[test]
    fn invalid_selectors_are_rejected() {
        assert!(matches!(
            load(&[("DATA_SOURCE", "carrier-pigeon")]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            load(&[("MARKET_HOLIDAYS", "2026-13-45")]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            load(&[("MARKET_UTC_OFFSET_HOURS", "40")]),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn source_kind_parsing() {
        assert_eq!(
            SourceKind::from_str_case_insensitive("Simulated"),
            Some(SourceKind::Simulated)
        );
        assert_eq!(
            SourceKind::from_str_case_insensitive("http"),
            Some(SourceKind::Http)
        );
        assert_eq!(SourceKind::from_str_case_insensitive("ftp"), None);
        assert_eq!(SourceKind::Http.as_str(), "http");
    }

    #[test]
    fn license_redacted_debug() {
        let config = load(&[("DATA_SOURCE", "http"), ("SOURCE_LICENSE", "secret-key")]).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("[REDACTED]"));
    }
}
