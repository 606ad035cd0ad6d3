//! Errors for the fleet tracker
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("Station catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("MQTT connection failed")]
    MqttConnectionError(#[from] rumqttc::ConnectionError),

    #[error("MQTT client error")]
    MqttClientError(#[from] rumqttc::ClientError),

    #[error("Serialization error")]
    SerdeError(#[from] serde_json::Error),

    #[error("Configuration error")]
    ConfigError(#[from] config::ConfigError),

    #[error("Invalid configuration: {message}")]
    ConfigurationError { message: String },

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Database migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),
}

/// Only connection-class failures are worth retrying; query, decode and
/// constraint errors repeat on every attempt.
impl From<sqlx::Error> for FleetError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => FleetError::StoreUnavailable(e.to_string()),
            _ => FleetError::DatabaseError(e.to_string()),
        }
    }
}

impl From<lapin::Error> for FleetError {
    fn from(e: lapin::Error) -> Self {
        FleetError::BrokerUnavailable(e.to_string())
    }
}

impl FleetError {
    /// Transient infrastructure failures that may succeed when tried again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FleetError::StoreUnavailable(_) | FleetError::BrokerUnavailable(_)
        )
    }

    /// Failures that concern a single message and must not be redelivered.
    pub fn is_message_local(&self) -> bool {
        matches!(
            self,
            FleetError::MalformedPayload(_) | FleetError::ValidationFailed(_)
        )
    }
}
