//! Cached station catalog
//!
//! The station list is reloaded from the store when the cached copy is older
//! than `max_staleness`, so a returned list never reflects store state older
//! than that bound. A failed reload is remembered for [`RELOAD_BACKOFF`]:
//! callers in that window, including those queued behind the failing
//! reload, get `CatalogUnavailable` without touching the store.
//! [`StationCatalog::invalidate`] forces the next call to reload.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{database::StationStore, errors::FleetError, models::Station};

/// How long a failed reload is answered from memory
pub const RELOAD_BACKOFF: Duration = Duration::from_secs(1);

struct Snapshot {
    stations: Arc<[Station]>,
    loaded_at: Instant,
}

struct Failure {
    reason: String,
    failed_at: Instant,
}

#[derive(Default)]
struct Cache {
    snapshot: Option<Snapshot>,
    failure: Option<Failure>,
}

pub struct StationCatalog {
    store: Arc<dyn StationStore>,
    max_staleness: Duration,
    cache: Mutex<Cache>,
}

impl StationCatalog {
    pub fn new(store: Arc<dyn StationStore>, max_staleness: Duration) -> Self {
        Self {
            store,
            max_staleness,
            cache: Mutex::new(Cache::default()),
        }
    }

    /// All stations, ordered as the store returns them
    ///
    /// Concurrent callers share a single reload. A failed reload yields
    /// `CatalogUnavailable` instead of serving a copy past the staleness bound.
    pub async fn all_stations(&self) -> Result<Arc<[Station]>, FleetError> {
        let mut cache = self.cache.lock().await;

        if let Some(snapshot) = &cache.snapshot {
            if snapshot.loaded_at.elapsed() < self.max_staleness {
                return Ok(snapshot.stations.clone());
            }
        }

        if let Some(failure) = &cache.failure {
            if failure.failed_at.elapsed() < RELOAD_BACKOFF {
                return Err(FleetError::CatalogUnavailable(failure.reason.clone()));
            }
        }

        let stations: Arc<[Station]> = match self.store.list_stations().await {
            Ok(stations) => stations.into(),
            Err(e) => {
                warn!(error = %e, "Failed to load stations");
                let reason = e.to_string();
                cache.failure = Some(Failure {
                    reason: reason.clone(),
                    failed_at: Instant::now(),
                });
                return Err(FleetError::CatalogUnavailable(reason));
            }
        };

        debug!(count = stations.len(), "Station catalog reloaded");
        cache.snapshot = Some(Snapshot {
            stations: stations.clone(),
            loaded_at: Instant::now(),
        });
        cache.failure = None;
        Ok(stations)
    }

    /// Drop the cached copy; the next lookup reads the store
    pub async fn invalidate(&self) {
        *self.cache.lock().await = Cache::default();
    }
}
