use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{trace, warn};

use crate::dedup::DedupStrategy;
use crate::util::{env_or, env_var};

const DEFAULT_WORKERS: usize = 10;

const DEFAULT_METRICS_FILE: &str = "/data/metrics.jsonl";

const DEFAULT_OPENWEATHER_URL: &str = "https://api.openweathermap.org";

const DEFAULT_GRAFANA_URL: &str = "http://grafana:3000";

const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8080";

const DEFAULT_KAFKA_BROKERS: &str = "kafka:9092";

/// Static alert thresholds, shared by every aggregation worker.
///
/// All comparisons are strict: a value equal to a limit does not alert.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertThresholds {
    pub temp_low: f64,
    pub temp_high: f64,
    pub humidity_low: f64,
    pub humidity_high: f64,
    pub wind_high: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            temp_low: 32.0,
            temp_high: 90.0,
            humidity_low: 30.0,
            humidity_high: 70.0,
            wind_high: 40.0,
        }
    }
}

impl AlertThresholds {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            temp_low: env_or("TEMP_LOW", defaults.temp_low),
            temp_high: env_or("TEMP_HIGH", defaults.temp_high),
            humidity_low: env_or("HUMIDITY_LOW", defaults.humidity_low),
            humidity_high: env_or("HUMIDITY_HIGH", defaults.humidity_high),
            wind_high: env_or("WIND_SPEED_HIGH", defaults.wind_high),
        }
    }
}

/// Provider endpoint and credentials
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

/// Where the per-family topics live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerBackend {
    /// Comma-separated bootstrap servers of a Kafka cluster
    Kafka(String),

    /// Topics held in this process
    Memory,
}

impl BrokerBackend {
    /// `memory` selects the in-process broker, any other value is a broker
    /// list. Unset means the compose service address.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") => BrokerBackend::Kafka(DEFAULT_KAFKA_BROKERS.to_string()),
            Some(value) if value.eq_ignore_ascii_case("memory") => BrokerBackend::Memory,
            Some(value) => BrokerBackend::Kafka(value.to_string()),
        }
    }
}

/// Everything the pipeline reads from the environment
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Worker count for every pool
    pub workers: usize,
    pub thresholds: AlertThresholds,
    pub provider: ProviderConfig,

    /// Durable observation log
    pub metrics_file: PathBuf,
    pub dedup: DedupStrategy,

    pub broker: BrokerBackend,
    /// Bound for a single broker request
    pub broker_timeout: Duration,
    /// How long startup waits for the broker
    pub broker_wait: Duration,

    pub grafana_url: String,
    pub grafana_timeout: Duration,
    pub metrics_addr: SocketAddr,
}

impl PipelineConfig {
    /// Build the configuration from environment variables.
    ///
    /// Only `API_KEY` is required; everything else falls back to its default.
    pub fn from_env() -> anyhow::Result<Self> {
        let Some(api_key) = env_var("API_KEY") else {
            anyhow::bail!("API_KEY is not set, supply it to run the pipeline");
        };

        let mut workers = env_or("WORKERS", DEFAULT_WORKERS);
        if workers == 0 {
            warn!("WORKERS must be positive, defaulting to {DEFAULT_WORKERS}");
            workers = DEFAULT_WORKERS;
        }

        let dedup = if env_or("DEDUP_INDEX", false) {
            DedupStrategy::Indexed
        } else {
            DedupStrategy::Scan
        };

        let default_addr: SocketAddr = DEFAULT_METRICS_ADDR.parse()?;

        let config = Self {
            workers,
            thresholds: AlertThresholds::from_env(),
            provider: ProviderConfig {
                base_url: env_var("OPENWEATHER_URL")
                    .unwrap_or_else(|| DEFAULT_OPENWEATHER_URL.to_string()),
                api_key,
                timeout: Duration::from_secs(env_or("PROVIDER_TIMEOUT_SECS", 30u64)),
            },
            metrics_file: env_var("METRICS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_METRICS_FILE)),
            dedup,
            broker: BrokerBackend::parse(env_var("KAFKA_BROKERS").as_deref()),
            broker_timeout: Duration::from_secs(env_or("BROKER_TIMEOUT_SECS", 10u64)),
            broker_wait: Duration::from_secs(env_or("BROKER_WAIT_SECS", 60u64)),
            grafana_url: env_var("GRAFANA_URL").unwrap_or_else(|| DEFAULT_GRAFANA_URL.to_string()),
            grafana_timeout: Duration::from_secs(env_or("GRAFANA_TIMEOUT_SECS", 60u64)),
            metrics_addr: env_or("METRICS_ADDR", default_addr),
        };

        trace!("loaded config: {config:?}");
        Ok(config)
    }
}
