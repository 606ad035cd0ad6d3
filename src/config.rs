//! Application configuration

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use serde_with::serde_as;

use crate::errors::FleetError;
use crate::retry::RetryConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub amqp: AmqpConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub ingestor: IngestorConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub use_tls: bool,
    pub client_id: String,
    #[serde(default = "default_topics")]
    pub topics: Vec<String>,
    /// Leading topic segment, `/<namespace>/vehicle/<id>/location`
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_keep_alive")]
    pub keep_alive: Duration,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AmqpConfig {
    pub url: String,
    #[serde(default = "default_prefetch")]
    pub prefetch: u16,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout: Duration,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestorConfig {
    /// Feed messages handled at the same time
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Publish rejected feed payloads on `location.invalid`
    #[serde(default = "default_true")]
    pub dead_letter: bool,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    #[serde(default = "default_queue")]
    pub queue: String,
    #[serde(default = "default_consumer_tag")]
    pub consumer_tag: String,
    /// Upper bound on how old the cached station list may be
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_catalog_max_staleness")]
    pub catalog_max_staleness: Duration,
    #[serde(default)]
    pub dead_letter_exchange: Option<String>,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct SimulatorConfig {
    #[serde(default = "default_vehicle_id")]
    pub vehicle_id: String,
    #[serde(default = "default_start_latitude")]
    pub start_latitude: f64,
    #[serde(default = "default_start_longitude")]
    pub start_longitude: f64,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_interval")]
    pub interval: Duration,
    /// Maximum per-tick movement in degrees
    #[serde(default = "default_step_degrees")]
    pub step_degrees: f64,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_topics() -> Vec<String> {
    vec!["/fleet/vehicle/+/location".to_string()]
}

fn default_namespace() -> String {
    "fleet".to_string()
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(20)
}

fn default_prefetch() -> u16 {
    16
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    5
}

fn default_acquire_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_concurrency() -> usize {
    8
}

fn default_true() -> bool {
    true
}

fn default_queue() -> String {
    "geofence_alerts".to_string()
}

fn default_consumer_tag() -> String {
    "worker-geofence".to_string()
}

fn default_catalog_max_staleness() -> Duration {
    Duration::from_secs(30)
}

fn default_vehicle_id() -> String {
    "B1234XYZ".to_string()
}

fn default_start_latitude() -> f64 {
    -6.2088
}

fn default_start_longitude() -> f64 {
    106.8456
}

fn default_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_step_degrees() -> f64 {
    0.0002
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            dead_letter: default_true(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue: default_queue(),
            consumer_tag: default_consumer_tag(),
            catalog_max_staleness: default_catalog_max_staleness(),
            dead_letter_exchange: None,
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            vehicle_id: default_vehicle_id(),
            start_latitude: default_start_latitude(),
            start_longitude: default_start_longitude(),
            interval: default_interval(),
            step_degrees: default_step_degrees(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config/default")
    }

    /// Load from an optional config file, overridden by `FLEET__*` variables
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(
                Environment::with_prefix("FLEET")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("mqtt.topics"),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), FleetError> {
        require(!self.mqtt.host.is_empty(), "MQTT host cannot be empty")?;
        require(!self.mqtt.topics.is_empty(), "At least one MQTT topic is required")?;
        require(!self.amqp.url.is_empty(), "AMQP url cannot be empty")?;
        require(self.amqp.prefetch > 0, "AMQP prefetch must be greater than zero")?;
        require(!self.database.url.is_empty(), "Database url cannot be empty")?;
        require(
            self.database.max_connections >= self.database.min_connections,
            "Database max_connections must not be below min_connections",
        )?;
        require(
            self.ingestor.concurrency > 0,
            "Ingestor concurrency must be greater than zero",
        )?;
        require(
            !self.worker.catalog_max_staleness.is_zero(),
            "Catalog staleness bound must be greater than zero",
        )?;
        Ok(())
    }
}

fn require(condition: bool, message: &str) -> Result<(), FleetError> {
    if condition {
        Ok(())
    } else {
        Err(FleetError::ConfigurationError {
            message: message.to_string(),
        })
    }
}
