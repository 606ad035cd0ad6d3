//! Vehicle location pipeline
//!
//! Feed readings are stored and relayed by the [`ingestor`]; the [`worker`]
//! matches relayed readings against fixed stations and publishes geofence
//! entry alerts.

pub mod broker;
pub mod catalog;
pub mod config;
pub mod database;
pub mod dispatch;
pub mod errors;
pub mod geo;
pub mod ingestor;
pub mod models;
pub mod mqtt;
pub mod retry;
pub mod shutdown;
pub mod simulator;
pub mod worker;

use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber, `RUST_LOG` filtering with `info` as default
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
