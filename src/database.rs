// src/database.rs
mod models;

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{debug, info};

use crate::{
    config::DatabaseConfig,
    errors::FleetError,
    models::{LocationReading, Station, StoredLocation},
};
use self::models::{LocationRow, StationRow};

/// Append-only sink for accepted readings
#[async_trait]
pub trait LocationStore: Send + Sync {
    /// Persist a reading. Returns `None` when the same vehicle/capture time is
    /// already stored, which makes redelivered feed messages harmless.
    async fn append_location(
        &self,
        reading: &LocationReading,
    ) -> Result<Option<StoredLocation>, FleetError>;
}

/// Read access to the geofence stations
#[async_trait]
pub trait StationStore: Send + Sync {
    async fn list_stations(&self) -> Result<Vec<Station>, FleetError>;
}

/// Paging and time window for [`Database::location_history`]
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    /// Inclusive lower bound on capture time, Unix seconds
    pub start: Option<i64>,
    /// Inclusive upper bound on capture time, Unix seconds
    pub end: Option<i64>,
    /// Non-positive or missing falls back to 10
    pub limit: Option<i64>,
    /// Negative or missing falls back to 0
    pub offset: Option<i64>,
}

impl HistoryQuery {
    pub const DEFAULT_LIMIT: i64 = 10;

    fn effective_limit(&self) -> i64 {
        match self.limit {
            Some(limit) if limit > 0 => limit,
            _ => Self::DEFAULT_LIMIT,
        }
    }

    fn effective_offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// Postgres store for vehicle locations and stations
#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect using the configured pool limits and apply pending migrations
    pub async fn from_config(config: &DatabaseConfig) -> Result<Self, FleetError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await?;

        info!(
            max_connections = config.max_connections,
            "PostgreSQL connected"
        );
        Self::new(pool).await
    }

    /// Wrap an existing pool, applying pending migrations
    pub async fn new(pool: PgPool) -> Result<Self, FleetError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Most recent reading of a vehicle by capture time
    pub async fn latest_location(
        &self,
        vehicle_id: &str,
    ) -> Result<Option<StoredLocation>, FleetError> {
        let row: Option<LocationRow> = sqlx::query_as(
            "SELECT id, vehicle_id, latitude, longitude, captured_at, created_at
             FROM vehicle_locations
             WHERE vehicle_id = $1
             ORDER BY captured_at DESC
             LIMIT 1",
        )
        .bind(vehicle_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(StoredLocation::from))
    }

    /// Readings of a vehicle in ascending capture order
    pub async fn location_history(
        &self,
        vehicle_id: &str,
        query: &HistoryQuery,
    ) -> Result<Vec<StoredLocation>, FleetError> {
        let rows: Vec<LocationRow> = sqlx::query_as(
            "SELECT id, vehicle_id, latitude, longitude, captured_at, created_at
             FROM vehicle_locations
             WHERE vehicle_id = $1
               AND ($2::BIGINT IS NULL OR captured_at >= $2)
               AND ($3::BIGINT IS NULL OR captured_at <= $3)
             ORDER BY captured_at ASC
             LIMIT $4 OFFSET $5",
        )
        .bind(vehicle_id)
        .bind(query.start)
        .bind(query.end)
        .bind(query.effective_limit())
        .bind(query.effective_offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(StoredLocation::from).collect())
    }
}

#[async_trait]
impl LocationStore for Database {
    async fn append_location(
        &self,
        reading: &LocationReading,
    ) -> Result<Option<StoredLocation>, FleetError> {
        let row: Option<LocationRow> = sqlx::query_as(
            "INSERT INTO vehicle_locations (vehicle_id, latitude, longitude, captured_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (vehicle_id, captured_at) DO NOTHING
             RETURNING id, vehicle_id, latitude, longitude, captured_at, created_at",
        )
        .bind(&reading.vehicle_id)
        .bind(reading.latitude)
        .bind(reading.longitude)
        .bind(reading.captured_at)
        .fetch_optional(&self.pool)
        .await?;

        if row.is_none() {
            debug!(
                vehicle_id = %reading.vehicle_id,
                captured_at = reading.captured_at,
                "Reading already stored"
            );
        }
        Ok(row.map(StoredLocation::from))
    }
}

#[async_trait]
impl StationStore for Database {
    async fn list_stations(&self) -> Result<Vec<Station>, FleetError> {
        let rows: Vec<StationRow> =
            sqlx::query_as("SELECT id, name, latitude, longitude FROM bus_stations ORDER BY id")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(Station::from).collect())
    }
}
