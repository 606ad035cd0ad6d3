//! Location ingestor: MQTT feed to Postgres and RabbitMQ

use std::sync::Arc;

use fleet_tracker::{
    broker::{amqp::AmqpBroker, QueueConfig, FLEET_EXCHANGE},
    config::AppConfig,
    database::Database,
    dispatch::{dispatch, DispatchEnd},
    errors::FleetError,
    ingestor::LocationIngestor,
    mqtt::MqttClientBuilder,
    shutdown,
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

    let broker = Arc::new(AmqpBroker::connect(&config.amqp.url, FLEET_EXCHANGE).await?);
    // Readings relayed before any worker is running must still be queued
    broker
        .declare_queue(&QueueConfig::location_relay(&config.worker, config.amqp.prefetch))
        .await?;

    let (mqtt, deliveries) = MqttClientBuilder::new(&config.mqtt)?
        .connect(&config.mqtt.topics)
        .await?
        .into_stream();

    let ingestor = LocationIngestor::new(database.clone(), broker.clone(), config.retry.clone())
        .with_dead_letter(config.ingestor.dead_letter);

    // Losing the broker also stops intake
    let broker_lost = broker.lost();
    let shutdown = broker_lost.child_token();
    shutdown::cancel_on_signal(shutdown.clone());

    info!(
        topics = ?config.mqtt.topics,
        concurrency = config.ingestor.concurrency,
        "Ingestor listening"
    );
    let end = dispatch(
        Arc::new(ingestor),
        deliveries,
        config.ingestor.concurrency,
        config.retry.clone(),
        shutdown,
    )
    .await;
    let lost = broker_lost.is_cancelled();

    mqtt.disconnect().await;
    broker.close().await;
    database.pool().close().await;

    if lost {
        error!("Ingestor stopped, RabbitMQ connection lost");
        return Err(FleetError::BrokerUnavailable(
            "RabbitMQ connection lost".to_string(),
        ));
    }
    if end == DispatchEnd::StreamClosed {
        error!("Ingestor stopped, MQTT feed ended");
        return Err(FleetError::BrokerUnavailable("MQTT feed ended".to_string()));
    }
    info!("Ingestor stopped");

    Ok(())
}
