//! MQTT client implementation

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, Publish, QoS, Transport};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{
    broker::{Acker, Delivery, DeliveryStream},
    config::MqttConfig,
    errors::FleetError,
};

/// Delay before polling again after an event loop error
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Topic of a vehicle's location feed
pub fn location_topic(namespace: &str, vehicle_id: &str) -> String {
    format!("/{namespace}/vehicle/{vehicle_id}/location")
}

/// Extract the vehicle id from `<namespace>/vehicle/<id>/location`
pub fn vehicle_id_from_topic(topic: &str) -> Result<&str, FleetError> {
    let parts: Vec<&str> = topic.trim_start_matches('/').split('/').collect();

    match parts.as_slice() {
        [.., "vehicle", id, "location"] if !id.is_empty() && parts.len() >= 4 => Ok(*id),
        _ => Err(FleetError::InvalidTopic(topic.to_string())),
    }
}

/// MQTT client builder; connects with manual acknowledgements so a feed
/// message is only PUBACKed once it has been handled.
pub struct MqttClientBuilder {
    client: AsyncClient,
    event_loop: EventLoop,
}

pub struct MqttClient {
    client: AsyncClient,
    rx: mpsc::Receiver<Delivery>,
    handle: tokio::task::JoinHandle<()>,
}

impl MqttClientBuilder {
    /// Create a new MQTT client
    pub fn new(config: &MqttConfig) -> Result<Self, FleetError> {
        let mut mqtt_options = MqttOptions::new(&config.client_id, &config.host, config.port);

        mqtt_options.set_keep_alive(config.keep_alive);
        mqtt_options.set_manual_acks(true);
        // Keep the session so unacknowledged QoS 1 messages are redelivered
        mqtt_options.set_clean_session(false);
        if config.use_tls {
            mqtt_options.set_transport(Transport::tls_with_default_config());
        }

        let (client, event_loop) = AsyncClient::new(mqtt_options, 100);

        Ok(Self { client, event_loop })
    }

    /// Connect to the broker and subscribe to `topics`
    ///
    /// Waits for the first CONNACK so that an unreachable broker fails
    /// startup. Later reconnects are handled by the event loop task, which
    /// also renews the subscriptions.
    pub async fn connect(mut self, topics: &[String]) -> Result<MqttClient, FleetError> {
        loop {
            match self.event_loop.poll().await? {
                Event::Incoming(Packet::ConnAck(_)) => break,
                _ => continue,
            }
        }
        info!("Connected to MQTT broker");
        Self::subscribe(&self.client, topics).await?;

        let (tx, rx) = mpsc::channel(100);
        let handle = tokio::spawn(Self::process_events(
            tx,
            self.event_loop,
            self.client.clone(),
            topics.to_vec(),
        ));

        Ok(MqttClient {
            client: self.client,
            rx,
            handle,
        })
    }

    /// Connect without subscribing, for publish-only use
    pub async fn connect_publisher(self) -> Result<MqttClient, FleetError> {
        self.connect(&[]).await
    }

    async fn subscribe(client: &AsyncClient, topics: &[String]) -> Result<(), FleetError> {
        for topic in topics.iter() {
            info!("Subscribing to topic: {}", topic);
            client.subscribe(topic, QoS::AtLeastOnce).await?;
        }
        Ok(())
    }

    /// Process MQTT events
    ///
    /// `rumqttc` reconnects on the next poll after a connection error; topic
    /// subscriptions are renewed on every CONNACK. The task ends when the
    /// receiving side is dropped.
    async fn process_events(
        tx: mpsc::Sender<Delivery>,
        mut event_loop: EventLoop,
        client: AsyncClient,
        topics: Vec<String>,
    ) {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Reconnected to MQTT broker, subscribing to topics");
                    if let Err(e) = Self::subscribe(&client, &topics).await {
                        error!("Failed to subscribe: {}", e);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let delivery = Self::into_delivery(&client, publish);
                    if tx.send(delivery).await.is_err() {
                        debug!("Feed receiver dropped, stopping MQTT event loop");
                        break;
                    }
                }
                Ok(_) => continue,
                Err(e) => {
                    error!("MQTT Error: {}", e);
                    if tx.is_closed() {
                        break;
                    }
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }

    fn into_delivery(client: &AsyncClient, publish: Publish) -> Delivery {
        Delivery::new(
            publish.payload.to_vec(),
            publish.topic.clone(),
            publish.dup,
            Box::new(MqttAcker {
                client: client.clone(),
                publish,
            }),
        )
    }
}

impl MqttClient {
    /// Turn the client into a delivery stream, returning the publishing half
    pub fn into_stream(self) -> (MqttPublisher, DeliveryStream) {
        let publisher = MqttPublisher {
            client: self.client,
            _handle: self.handle,
        };
        let deliveries = stream::unfold(self.rx, |mut rx| async move {
            rx.recv().await.map(|delivery| (Ok(delivery), rx))
        })
        .boxed();
        (publisher, deliveries)
    }

    pub async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), FleetError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }

    pub async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            warn!("MQTT disconnect failed: {}", e);
        }
    }
}

/// Publishing half left after [`MqttClient::into_stream`]
pub struct MqttPublisher {
    client: AsyncClient,
    _handle: tokio::task::JoinHandle<()>,
}

impl MqttPublisher {
    pub async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            warn!("MQTT disconnect failed: {}", e);
        }
    }
}

struct MqttAcker {
    client: AsyncClient,
    publish: Publish,
}

#[async_trait]
impl Acker for MqttAcker {
    async fn ack(&self) -> Result<(), FleetError> {
        self.client.ack(&self.publish).await?;
        Ok(())
    }

    /// MQTT has no negative acknowledgement. A rejected message is acked so
    /// it is not redelivered. A requeued one only reaches here once shutdown
    /// has interrupted local redelivery; it is left unacknowledged and the
    /// persistent session brings it back on the next connection.
    async fn nack(&self, requeue: bool) -> Result<(), FleetError> {
        if requeue {
            warn!(
                topic = %self.publish.topic,
                pkid = self.publish.pkid,
                "Leaving feed message unacknowledged"
            );
            Ok(())
        } else {
            self.ack().await
        }
    }

    fn redelivers_on_requeue(&self) -> bool {
        false
    }
}
