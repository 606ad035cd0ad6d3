//! Publishes a random walk for one vehicle on the location feed

use fleet_tracker::{
    config::AppConfig,
    errors::FleetError,
    mqtt::{location_topic, MqttClientBuilder},
    shutdown, simulator,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), FleetError> {
    #[cfg(feature = "dotenvy")]
    dotenvy::dotenv().ok();

    fleet_tracker::init_tracing();

    let mut config = AppConfig::load()?;
    config.mqtt.client_id = format!("vehicle-{}", config.simulator.vehicle_id);

    let client = MqttClientBuilder::new(&config.mqtt)?
        .connect_publisher()
        .await?;
    let topic = location_topic(&config.mqtt.namespace, &config.simulator.vehicle_id);

    let shutdown = CancellationToken::new();
    shutdown::cancel_on_signal(shutdown.clone());

    simulator::run(&client, &topic, &config.simulator, shutdown).await?;

    client.disconnect().await;
    info!("Simulator stopped");

    Ok(())
}
