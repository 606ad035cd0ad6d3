//! In-memory stand-ins for Postgres and RabbitMQ

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use fleet_tracker::{
    broker::{Acker, Delivery, Publisher},
    database::{LocationStore, StationStore},
    errors::FleetError,
    models::{LocationReading, Station, StoredLocation},
};

/// Location store keyed by (vehicle_id, captured_at) like the real table
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<StoredLocation>>,
    pub unavailable: AtomicBool,
    /// Calls still to fail before the store comes back
    pub outage: AtomicU32,
    pub attempts: AtomicU32,
}

impl MemoryStore {
    pub fn rows(&self) -> Vec<StoredLocation> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl LocationStore for MemoryStore {
    async fn append_location(
        &self,
        reading: &LocationReading,
    ) -> Result<Option<StoredLocation>, FleetError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let in_outage = self
            .outage
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if in_outage || self.unavailable.load(Ordering::SeqCst) {
            return Err(FleetError::StoreUnavailable("connection refused".into()));
        }

        let mut rows = self.rows.lock().unwrap();
        let exists = rows.iter().any(|row| {
            row.reading.vehicle_id == reading.vehicle_id
                && row.reading.captured_at == reading.captured_at
        });
        if exists {
            return Ok(None);
        }

        let stored = StoredLocation {
            id: rows.len() as i64 + 1,
            reading: reading.clone(),
            recorded_at: Utc::now(),
        };
        rows.push(stored.clone());
        Ok(Some(stored))
    }
}

#[derive(Default)]
pub struct MemoryStations {
    pub stations: Mutex<Vec<Station>>,
    pub unavailable: AtomicBool,
}

impl MemoryStations {
    pub fn with(stations: Vec<Station>) -> Self {
        Self {
            stations: Mutex::new(stations),
            unavailable: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl StationStore for MemoryStations {
    async fn list_stations(&self) -> Result<Vec<Station>, FleetError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(FleetError::StoreUnavailable("connection refused".into()));
        }
        Ok(self.stations.lock().unwrap().clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
}

/// Records every successful publish; the first `failures` publishes on
/// `failing_key` are refused
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<Published>>,
    failing_key: Mutex<Option<String>>,
    failures: AtomicU32,
}

impl RecordingPublisher {
    pub fn failing(routing_key: &str, failures: u32) -> Self {
        Self {
            published: Mutex::default(),
            failing_key: Mutex::new(Some(routing_key.to_string())),
            failures: AtomicU32::new(failures),
        }
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }

    pub fn with_key(&self, routing_key: &str) -> Vec<Published> {
        self.published()
            .into_iter()
            .filter(|p| p.routing_key == routing_key)
            .collect()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), FleetError> {
        let refuse = self.failing_key.lock().unwrap().as_deref() == Some(routing_key)
            && self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if refuse {
            return Err(FleetError::BrokerUnavailable("publish not confirmed".into()));
        }

        self.published.lock().unwrap().push(Published {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }
}

pub type Settlements = Arc<Mutex<Vec<(usize, &'static str)>>>;

pub struct RecordingAcker {
    id: usize,
    settled: Settlements,
    redelivers: bool,
}

#[async_trait]
impl Acker for RecordingAcker {
    async fn ack(&self) -> Result<(), FleetError> {
        self.settled.lock().unwrap().push((self.id, "ack"));
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<(), FleetError> {
        let label = if requeue { "requeue" } else { "reject" };
        self.settled.lock().unwrap().push((self.id, label));
        Ok(())
    }

    fn redelivers_on_requeue(&self) -> bool {
        self.redelivers
    }
}

/// Delivery from a broker queue, which redelivers requeued messages itself
pub fn delivery(id: usize, routing_key: &str, payload: Vec<u8>, settled: &Settlements) -> Delivery {
    recorded(id, routing_key, payload, settled, true)
}

/// Delivery from the MQTT feed, which has no negative acknowledgement
pub fn feed_delivery(id: usize, topic: &str, payload: Vec<u8>, settled: &Settlements) -> Delivery {
    recorded(id, topic, payload, settled, false)
}

fn recorded(
    id: usize,
    routing_key: &str,
    payload: Vec<u8>,
    settled: &Settlements,
    redelivers: bool,
) -> Delivery {
    Delivery::new(
        payload,
        routing_key,
        false,
        Box::new(RecordingAcker {
            id,
            settled: settled.clone(),
            redelivers,
        }),
    )
}

pub fn station(id: i64, name: &str, latitude: f64, longitude: f64) -> Station {
    Station {
        id,
        name: name.to_string(),
        latitude,
        longitude,
    }
}

pub fn reading_payload(vehicle_id: &str, latitude: f64, longitude: f64, timestamp: i64) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "vehicle_id": vehicle_id,
        "latitude": latitude,
        "longitude": longitude,
        "timestamp": timestamp,
    }))
    .unwrap()
}
