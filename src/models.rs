//! Data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::FleetError;

/// Vehicle location reading
///
/// Same JSON shape on the inbound feed and on the relayed broker message:
///
/// ```json
/// {"vehicle_id": "B1234XYZ", "latitude": -6.2088, "longitude": 106.8456, "timestamp": 1718000000}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationReading {
    /// Vehicle identifier, must be non-empty
    #[serde(default)]
    pub vehicle_id: String,
    /// Latitude in WGS84 decimal degrees
    pub latitude: f64,
    /// Longitude in WGS84 decimal degrees
    pub longitude: f64,
    /// Capture time in seconds from Unix epoch
    #[serde(rename = "timestamp")]
    pub captured_at: i64,
}

impl LocationReading {
    pub fn new(
        vehicle_id: impl Into<String>,
        latitude: f64,
        longitude: f64,
        captured_at: i64,
    ) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            latitude,
            longitude,
            captured_at,
        }
    }

    /// Parse a reading from a raw message body
    pub fn from_payload(payload: &[u8]) -> Result<Self, FleetError> {
        serde_json::from_slice(payload).map_err(|e| FleetError::MalformedPayload(e.to_string()))
    }

    /// Check the fields the decoder cannot enforce
    pub fn validate(&self) -> Result<(), FleetError> {
        if self.vehicle_id.trim().is_empty() {
            return Err(FleetError::ValidationFailed(
                "vehicle_id must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate in one step
    pub fn decode(payload: &[u8]) -> Result<Self, FleetError> {
        let reading = Self::from_payload(payload)?;
        reading.validate()?;
        Ok(reading)
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, FleetError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// A reading as persisted, with its surrogate key and persistence time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredLocation {
    pub id: i64,
    #[serde(flatten)]
    pub reading: LocationReading,
    pub recorded_at: DateTime<Utc>,
}

/// Fixed geofence station
#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    pub id: i64,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Proximity alert raised when a reading falls inside a station's radius
#[derive(Debug, Clone, PartialEq)]
pub struct GeofenceEvent {
    pub vehicle_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub captured_at: i64,
    pub station_id: i64,
    pub station_name: String,
    pub distance_meters: f64,
}

impl GeofenceEvent {
    pub fn new(reading: &LocationReading, station: &Station, distance_meters: f64) -> Self {
        Self {
            vehicle_id: reading.vehicle_id.clone(),
            latitude: reading.latitude,
            longitude: reading.longitude,
            captured_at: reading.captured_at,
            station_id: station.id,
            station_name: station.name.clone(),
            distance_meters,
        }
    }

    /// Encode as the `geofence.entry` alert message
    pub fn to_payload(&self) -> Result<Vec<u8>, FleetError> {
        let message = AlertMessage {
            vehicle_id: &self.vehicle_id,
            event: GEOFENCE_ENTRY_EVENT,
            location: AlertLocation {
                latitude: self.latitude,
                longitude: self.longitude,
            },
            timestamp: self.captured_at,
            station: AlertStation {
                id: self.station_id,
                name: &self.station_name,
            },
            distance_m: self.distance_meters,
        };
        Ok(serde_json::to_vec(&message)?)
    }
}

pub const GEOFENCE_ENTRY_EVENT: &str = "geofence_entry";

#[derive(Serialize)]
struct AlertMessage<'a> {
    vehicle_id: &'a str,
    event: &'static str,
    location: AlertLocation,
    timestamp: i64,
    station: AlertStation<'a>,
    distance_m: f64,
}

#[derive(Serialize)]
struct AlertLocation {
    latitude: f64,
    longitude: f64,
}

#[derive(Serialize)]
struct AlertStation<'a> {
    id: i64,
    name: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_location() {
        let s = r#"{
          "vehicle_id" : "B1234XYZ",
          "latitude" : -6.2088,
          "longitude" : 106.8456,
          "timestamp" : 1734361116
        }"#;
        let reading = LocationReading::decode(s.as_bytes()).unwrap();
        let expected = LocationReading::new("B1234XYZ", -6.2088, 106.8456, 1734361116);

        assert_eq!(reading, expected);
    }

    #[test]
    fn missing_vehicle_id_fails_validation() {
        let s = r#"{"latitude": -6.2, "longitude": 106.8, "timestamp": 1}"#;
        let err = LocationReading::decode(s.as_bytes()).unwrap_err();
        assert!(matches!(err, FleetError::ValidationFailed(_)));
    }

    #[test]
    fn blank_vehicle_id_fails_validation() {
        let reading = LocationReading::new("  ", 0.0, 0.0, 0);
        assert!(matches!(
            reading.validate(),
            Err(FleetError::ValidationFailed(_))
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        let err = LocationReading::decode(b"not json").unwrap_err();
        assert!(matches!(err, FleetError::MalformedPayload(_)));

        let err = LocationReading::decode(br#"{"vehicle_id": "A", "latitude": "x"}"#).unwrap_err();
        assert!(matches!(err, FleetError::MalformedPayload(_)));
    }

    #[test]
    fn reading_serializes_with_wire_field_names() {
        let reading = LocationReading::new("B1234XYZ", -6.2088, 106.8456, 1700000000);
        let payload = reading.to_payload().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();

        assert_eq!(value["vehicle_id"], "B1234XYZ");
        assert_eq!(value["timestamp"], 1700000000);
        assert!(value.get("captured_at").is_none());
    }

    #[test]
    fn alert_payload_shape() {
        let reading = LocationReading::new("B1234XYZ", -6.2088, 106.8456, 1700000000);
        let station = Station {
            id: 7,
            name: "Harmoni".to_string(),
            latitude: -6.2090,
            longitude: 106.8459,
        };
        let event = GeofenceEvent::new(&reading, &station, 38.5);
        let payload = event.to_payload().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();

        assert_eq!(value["vehicle_id"], "B1234XYZ");
        assert_eq!(value["event"], "geofence_entry");
        assert_eq!(value["location"]["latitude"], -6.2088);
        assert_eq!(value["location"]["longitude"], 106.8456);
        assert_eq!(value["timestamp"], 1700000000);
        assert_eq!(value["station"]["id"], 7);
        assert_eq!(value["station"]["name"], "Harmoni");
        assert_eq!(value["distance_m"], 38.5);
    }
}
