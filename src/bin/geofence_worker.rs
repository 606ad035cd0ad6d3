//! Geofence worker: relayed readings in, station entry alerts out

use std::sync::Arc;

use fleet_tracker::{
    broker::{amqp::AmqpBroker, Consumer, QueueConfig, FLEET_EXCHANGE},
    catalog::StationCatalog,
    config::AppConfig,
    database::Database,
    dispatch::{dispatch, DispatchEnd},
    errors::FleetError,
    shutdown,
    worker::GeofenceWorker,
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), FleetError> {
    #[cfg(feature = "dotenvy")]
    dotenvy::dotenv().ok();

    fleet_tracker::init_tracing();

    let config = AppConfig::load()?;
    config.validate()?;

    let database = Arc::new(Database::from_config(&config.database).await?);
    let catalog = Arc::new(StationCatalog::new(
        database.clone(),
        config.worker.catalog_max_staleness,
    ));

    let broker = Arc::new(AmqpBroker::connect(&config.amqp.url, FLEET_EXCHANGE).await?);
    let queue = QueueConfig::location_relay(&config.worker, config.amqp.prefetch);
    let deliveries = broker.consume(&queue).await?;

    let worker = GeofenceWorker::new(catalog, broker.clone(), config.retry.clone());

    let broker_lost = broker.lost();
    let shutdown = broker_lost.child_token();
    shutdown::cancel_on_signal(shutdown.clone());

    info!(
        queue = %queue.queue,
        routing_key = %queue.routing_key,
        consumer_tag = %queue.consumer_tag,
        "Geofence worker started"
    );
    let end = dispatch(
        Arc::new(worker),
        deliveries,
        usize::from(config.amqp.prefetch),
        config.retry.clone(),
        shutdown,
    )
    .await;
    let lost = broker_lost.is_cancelled();

    broker.close().await;
    database.pool().close().await;

    if lost || end == DispatchEnd::StreamClosed {
        error!("Geofence worker stopped, RabbitMQ consumer ended");
        return Err(FleetError::BrokerUnavailable(format!(
            "consumer on {} ended",
            queue.queue
        )));
    }
    info!("Geofence worker stopped");

    Ok(())
}
