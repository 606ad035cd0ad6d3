// src/database/models.rs
use chrono::{DateTime, Utc};

use crate::models::{LocationReading, Station, StoredLocation};

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct LocationRow {
    id: i64,
    vehicle_id: String,
    latitude: f64,
    longitude: f64,
    captured_at: i64,
    created_at: DateTime<Utc>,
}

impl From<LocationRow> for StoredLocation {
    fn from(row: LocationRow) -> Self {
        Self {
            id: row.id,
            reading: LocationReading {
                vehicle_id: row.vehicle_id,
                latitude: row.latitude,
                longitude: row.longitude,
                captured_at: row.captured_at,
            },
            recorded_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct StationRow {
    id: i64,
    name: String,
    latitude: f64,
    longitude: f64,
}

impl From<StationRow> for Station {
    fn from(row: StationRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            latitude: row.latitude,
            longitude: row.longitude,
        }
    }
}
