//! Feed ingestion: decode, validate, persist, relay
//!
//! A feed message is acknowledged only after the reading is stored and the
//! relay to the broker succeeded. Store or broker outages that outlast the
//! retry budget requeue the message. Any other failure, such as a decode or
//! validation error or a query the store refuses, rejects it (optionally
//! copying the payload to `location.invalid`).

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::{
    broker::{
        Delivery, Disposition, Publisher, FLEET_EXCHANGE, LOCATION_INVALID_KEY, LOCATION_RAW_KEY,
    },
    database::LocationStore,
    dispatch::Handler,
    errors::FleetError,
    models::LocationReading,
    mqtt::vehicle_id_from_topic,
    retry::{with_retry, RetryConfig},
};

pub struct LocationIngestor {
    store: Arc<dyn LocationStore>,
    publisher: Arc<dyn Publisher>,
    retry: RetryConfig,
    dead_letter: bool,
}

impl LocationIngestor {
    pub fn new(
        store: Arc<dyn LocationStore>,
        publisher: Arc<dyn Publisher>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            retry,
            dead_letter: true,
        }
    }

    /// Whether rejected payloads are published on `location.invalid`
    pub fn with_dead_letter(mut self, enabled: bool) -> Self {
        self.dead_letter = enabled;
        self
    }

    /// Process one feed message and decide how it is settled
    pub async fn process(&self, topic: &str, payload: &[u8]) -> Disposition {
        match self.ingest(topic, payload).await {
            Ok(()) => Disposition::Ack,
            Err(e) if e.is_retryable() => {
                error!(topic, error = %e, "Feed message not ingested, requeueing");
                Disposition::Requeue
            }
            Err(e) => {
                if e.is_message_local() {
                    warn!(topic, error = %e, "Rejecting feed message");
                } else {
                    error!(topic, error = %e, "Rejecting feed message the store refused");
                }
                self.dead_letter(payload).await;
                Disposition::Reject
            }
        }
    }

    async fn ingest(&self, topic: &str, payload: &[u8]) -> Result<(), FleetError> {
        let reading = LocationReading::decode(payload)?;

        if let Ok(topic_vehicle) = vehicle_id_from_topic(topic) {
            if topic_vehicle != reading.vehicle_id {
                warn!(
                    topic,
                    vehicle_id = %reading.vehicle_id,
                    "Payload vehicle_id differs from topic"
                );
            }
        }

        let stored = with_retry(&self.retry, "append_location", || {
            self.store.append_location(&reading)
        })
        .await?;

        match stored {
            Some(row) => info!(
                id = row.id,
                vehicle_id = %reading.vehicle_id,
                lat = reading.latitude,
                lon = reading.longitude,
                ts = reading.captured_at,
                "Stored location"
            ),
            None => debug!(
                vehicle_id = %reading.vehicle_id,
                ts = reading.captured_at,
                "Duplicate location, relaying again"
            ),
        }

        let relayed = reading.to_payload()?;
        with_retry(&self.retry, "relay_location", || {
            self.publisher
                .publish(FLEET_EXCHANGE, LOCATION_RAW_KEY, &relayed)
        })
        .await?;

        Ok(())
    }

    async fn dead_letter(&self, payload: &[u8]) {
        if !self.dead_letter {
            return;
        }
        if let Err(e) = self
            .publisher
            .publish(FLEET_EXCHANGE, LOCATION_INVALID_KEY, payload)
            .await
        {
            warn!(error = %e, "Failed to dead-letter rejected feed message");
        }
    }
}

#[async_trait]
impl Handler for LocationIngestor {
    async fn handle(&self, delivery: &Delivery) -> Disposition {
        self.process(&delivery.routing_key, &delivery.payload).await
    }
}
