//! Message broker abstraction
//!
//! The ingestor and the geofence worker only need to publish bytes on an
//! exchange/routing key and to consume a queue with explicit settlement.
//! [`amqp::AmqpBroker`] implements this over RabbitMQ. The MQTT feed hands
//! out the same [`Delivery`] type, so both halves share one dispatch loop.

pub mod amqp;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::{config::WorkerConfig, errors::FleetError};

/// Topic exchange carrying all fleet traffic
pub const FLEET_EXCHANGE: &str = "fleet.events";
/// Routing key of relayed location readings
pub const LOCATION_RAW_KEY: &str = "location.raw";
/// Routing key of geofence entry alerts
pub const GEOFENCE_ENTRY_KEY: &str = "geofence.entry";
/// Routing key for feed payloads that failed decoding or validation
pub const LOCATION_INVALID_KEY: &str = "location.invalid";

/// Outcome of handling one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handled, remove from the queue
    Ack,
    /// Unprocessable, never redeliver (dead-letter or drop)
    Reject,
    /// Transient failure, leave for redelivery
    Requeue,
}

/// Settlement handle of a single delivery
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self) -> Result<(), FleetError>;
    async fn nack(&self, requeue: bool) -> Result<(), FleetError>;

    /// Whether `nack(true)` makes the transport deliver the message again.
    /// When it does not, the dispatch loop redelivers locally.
    fn redelivers_on_requeue(&self) -> bool {
        true
    }
}

/// A consumed message with its settlement handle
pub struct Delivery {
    pub payload: Vec<u8>,
    /// AMQP routing key or MQTT topic the message arrived on
    pub routing_key: String,
    pub redelivered: bool,
    acker: Box<dyn Acker>,
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("routing_key", &self.routing_key)
            .field("payload_len", &self.payload.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}

impl Delivery {
    pub fn new(
        payload: Vec<u8>,
        routing_key: impl Into<String>,
        redelivered: bool,
        acker: Box<dyn Acker>,
    ) -> Self {
        Self {
            payload,
            routing_key: routing_key.into(),
            redelivered,
            acker,
        }
    }

    pub fn redelivers_on_requeue(&self) -> bool {
        self.acker.redelivers_on_requeue()
    }

    /// Apply a handler outcome to the broker
    pub async fn settle(&self, disposition: Disposition) -> Result<(), FleetError> {
        match disposition {
            Disposition::Ack => self.acker.ack().await,
            Disposition::Reject => self.acker.nack(false).await,
            Disposition::Requeue => self.acker.nack(true).await,
        }
    }
}

pub type DeliveryStream = BoxStream<'static, Result<Delivery, FleetError>>;

/// Queue declaration and consumption parameters
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
    pub consumer_tag: String,
    /// Maximum unacknowledged deliveries per consumer
    pub prefetch: u16,
    /// Exchange receiving rejected deliveries, if any
    pub dead_letter_exchange: Option<String>,
}

impl QueueConfig {
    /// Durable queue of relayed readings consumed by the geofence worker
    pub fn location_relay(worker: &WorkerConfig, prefetch: u16) -> Self {
        Self {
            exchange: FLEET_EXCHANGE.to_string(),
            queue: worker.queue.clone(),
            routing_key: LOCATION_RAW_KEY.to_string(),
            consumer_tag: worker.consumer_tag.clone(),
            prefetch,
            dead_letter_exchange: worker.dead_letter_exchange.clone(),
        }
    }
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), FleetError>;
}

#[async_trait]
pub trait Consumer: Send + Sync {
    /// Declare the queue and its binding, then start consuming it
    async fn consume(&self, queue: &QueueConfig) -> Result<DeliveryStream, FleetError>;
}
