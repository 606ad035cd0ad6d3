//! Mock telemetry source
//!
//! Moves one vehicle on a random walk and publishes each position on its
//! feed topic.

use chrono::Utc;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    config::SimulatorConfig, errors::FleetError, models::LocationReading, mqtt::MqttClient,
};

/// Random-walk position of a single vehicle
#[derive(Debug, Clone)]
pub struct RandomWalk {
    vehicle_id: String,
    latitude: f64,
    longitude: f64,
    step_degrees: f64,
}

impl RandomWalk {
    pub fn new(config: &SimulatorConfig) -> Self {
        Self {
            vehicle_id: config.vehicle_id.clone(),
            latitude: config.start_latitude,
            longitude: config.start_longitude,
            step_degrees: config.step_degrees,
        }
    }

    /// Move by up to half a step on each axis and report the new position
    pub fn advance<R: Rng + ?Sized>(&mut self, rng: &mut R, captured_at: i64) -> LocationReading {
        self.latitude += (rng.random::<f64>() - 0.5) * self.step_degrees;
        self.longitude += (rng.random::<f64>() - 0.5) * self.step_degrees;

        LocationReading::new(self.vehicle_id.clone(), self.latitude, self.longitude, captured_at)
    }

    pub fn position(&self) -> (f64, f64) {
        (self.latitude, self.longitude)
    }
}

/// Publish a new position every `config.interval` until cancelled
pub async fn run(
    client: &MqttClient,
    topic: &str,
    config: &SimulatorConfig,
    shutdown: CancellationToken,
) -> Result<(), FleetError> {
    let mut walk = RandomWalk::new(config);
    let mut ticker = tokio::time::interval(config.interval);

    info!(
        vehicle_id = %config.vehicle_id,
        lat = config.start_latitude,
        lon = config.start_longitude,
        topic,
        "Starting simulator"
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let reading = walk.advance(&mut rand::rng(), Utc::now().timestamp());
        let payload = reading.to_payload()?;

        match client.publish(topic, payload).await {
            Ok(()) => info!(
                vehicle_id = %reading.vehicle_id,
                lat = reading.latitude,
                lon = reading.longitude,
                ts = reading.captured_at,
                "Published"
            ),
            Err(e) => warn!(error = %e, "Publish failed"),
        }
    }

    Ok(())
}
