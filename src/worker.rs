//! Geofence evaluation of relayed readings
//!
//! Every station within [`GEOFENCE_RADIUS_METERS`] of a reading produces one
//! `geofence.entry` alert. There is no entry/exit tracking: a vehicle that
//! stays near a station raises an alert for each reading.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::{
    broker::{Delivery, Disposition, Publisher, FLEET_EXCHANGE, GEOFENCE_ENTRY_KEY},
    catalog::StationCatalog,
    dispatch::Handler,
    geo::distance_meters,
    models::{GeofenceEvent, LocationReading, Station},
    retry::{with_retry, RetryConfig},
};

/// Proximity radius around each station
pub const GEOFENCE_RADIUS_METERS: f64 = 50.0;

/// Alerts for every station within `radius_meters` of `reading`, in station order
pub fn evaluate(
    reading: &LocationReading,
    stations: &[Station],
    radius_meters: f64,
) -> Vec<GeofenceEvent> {
    stations
        .iter()
        .filter_map(|station| {
            let distance = distance_meters(
                reading.latitude,
                reading.longitude,
                station.latitude,
                station.longitude,
            );
            (distance <= radius_meters).then(|| GeofenceEvent::new(reading, station, distance))
        })
        .collect()
}

pub struct GeofenceWorker {
    catalog: Arc<StationCatalog>,
    publisher: Arc<dyn Publisher>,
    retry: RetryConfig,
}

impl GeofenceWorker {
    pub fn new(
        catalog: Arc<StationCatalog>,
        publisher: Arc<dyn Publisher>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            catalog,
            publisher,
            retry,
        }
    }

    /// Evaluate one relayed reading and publish its alerts
    pub async fn process(&self, payload: &[u8]) -> Disposition {
        let reading = match LocationReading::decode(payload) {
            Ok(reading) => reading,
            Err(e) => {
                warn!(error = %e, "Rejecting relayed reading");
                return Disposition::Reject;
            }
        };

        let stations = match self.catalog.all_stations().await {
            Ok(stations) => stations,
            Err(e) => {
                warn!(
                    vehicle_id = %reading.vehicle_id,
                    error = %e,
                    "Skipping geofence check"
                );
                return Disposition::Ack;
            }
        };

        let events = evaluate(&reading, &stations, GEOFENCE_RADIUS_METERS);
        if events.is_empty() {
            debug!(vehicle_id = %reading.vehicle_id, "No station in range");
            return Disposition::Ack;
        }

        let mut failed = 0usize;
        for event in &events {
            if !self.publish_event(event).await {
                failed += 1;
            }
        }

        if failed > 0 {
            error!(
                vehicle_id = %reading.vehicle_id,
                failed,
                total = events.len(),
                "Alert publication incomplete, leaving reading for redelivery"
            );
            return Disposition::Requeue;
        }
        Disposition::Ack
    }

    async fn publish_event(&self, event: &GeofenceEvent) -> bool {
        let payload = match event.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to encode geofence event");
                return false;
            }
        };

        let published = with_retry(&self.retry, "publish_geofence_entry", || {
            self.publisher
                .publish(FLEET_EXCHANGE, GEOFENCE_ENTRY_KEY, &payload)
        })
        .await;

        match published {
            Ok(()) => {
                info!(
                    vehicle_id = %event.vehicle_id,
                    station = %event.station_name,
                    distance_m = event.distance_meters,
                    "geofence_entry"
                );
                true
            }
            Err(e) => {
                error!(
                    vehicle_id = %event.vehicle_id,
                    station_id = event.station_id,
                    error = %e,
                    "Failed to publish geofence entry"
                );
                false
            }
        }
    }
}

#[async_trait]
impl Handler for GeofenceWorker {
    async fn handle(&self, delivery: &Delivery) -> Disposition {
        if delivery.redelivered {
            debug!("Evaluating redelivered reading");
        }
        self.process(&delivery.payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(id: i64, name: &str, latitude: f64, longitude: f64) -> Station {
        Station {
            id,
            name: name.to_string(),
            latitude,
            longitude,
        }
    }

    fn reading() -> LocationReading {
        LocationReading::new("B1234XYZ", -6.2088, 106.8456, 1700000000)
    }

    #[test]
    fn station_within_radius_matches() {
        let stations = [
            station(1, "Harmoni", -6.2090, 106.8459),
            station(2, "Far", -6.2133, 106.8456),
        ];
        let events = evaluate(&reading(), &stations, GEOFENCE_RADIUS_METERS);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].station_id, 1);
        assert_eq!(events[0].station_name, "Harmoni");
        assert!((events[0].distance_meters - 39.93).abs() < 0.5);
        assert_eq!(events[0].captured_at, 1700000000);
    }

    #[test]
    fn multiple_stations_match_independently() {
        let stations = [
            station(1, "North", -6.2085, 106.8456),
            station(2, "South", -6.2091, 106.8456),
        ];
        let events = evaluate(&reading(), &stations, GEOFENCE_RADIUS_METERS);

        let ids: Vec<i64> = events.iter().map(|e| e.station_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn no_stations_no_events() {
        assert!(evaluate(&reading(), &[], GEOFENCE_RADIUS_METERS).is_empty());
    }

    #[test]
    fn radius_is_inclusive() {
        let d_lat = (50.0 / crate::geo::EARTH_RADIUS_METERS).to_degrees();
        let r = LocationReading::new("B1", 0.0, 0.0, 0);
        let s = station(1, "Edge", d_lat, 0.0);
        let distance = distance_meters(0.0, 0.0, d_lat, 0.0);

        assert_eq!(evaluate(&r, &[s.clone()], distance).len(), 1);
        assert!(evaluate(&r, &[s], distance - 1e-6).is_empty());
    }
}
