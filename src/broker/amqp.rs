//! RabbitMQ transport

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{Acker, Consumer, Delivery, DeliveryStream, Publisher, QueueConfig};
use crate::errors::FleetError;

/// Persistent delivery mode
const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// RabbitMQ connection with a single confirm-mode channel
///
/// There is no reconnect: once the connection or channel fails, [`lost`]
/// is cancelled and the owning service is expected to exit.
///
/// [`lost`]: AmqpBroker::lost
pub struct AmqpBroker {
    connection: Connection,
    channel: Channel,
    lost: CancellationToken,
}

impl AmqpBroker {
    /// Connect and declare the durable topic exchange
    pub async fn connect(url: &str, exchange: &str) -> Result<Self, FleetError> {
        let connection = Connection::connect(url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        let lost = CancellationToken::new();
        let on_lost = lost.clone();
        connection.on_error(move |e| {
            error!("RabbitMQ connection lost: {}", e);
            on_lost.cancel();
        });
        let on_lost = lost.clone();
        channel.on_error(move |e| {
            error!("RabbitMQ channel closed: {}", e);
            on_lost.cancel();
        });

        info!(exchange, "RabbitMQ connected");
        Ok(Self {
            connection,
            channel,
            lost,
        })
    }

    /// Cancelled when the connection or channel fails
    pub fn lost(&self) -> CancellationToken {
        self.lost.clone()
    }

    fn check_channel(&self) {
        if !self.channel.status().connected() && !self.lost.is_cancelled() {
            error!("RabbitMQ channel is no longer connected");
            self.lost.cancel();
        }
    }

    /// Declare a durable queue and bind it to the exchange
    pub async fn declare_queue(&self, queue: &QueueConfig) -> Result<(), FleetError> {
        let mut arguments = FieldTable::default();
        if let Some(dlx) = &queue.dead_letter_exchange {
            arguments.insert(
                "x-dead-letter-exchange".into(),
                AMQPValue::LongString(dlx.as_str().into()),
            );
        }

        self.channel
            .queue_declare(
                &queue.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                arguments,
            )
            .await?;

        self.channel
            .queue_bind(
                &queue.queue,
                &queue.exchange,
                &queue.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(
            exchange = %queue.exchange,
            queue = %queue.queue,
            routing_key = %queue.routing_key,
            "RabbitMQ queue declared"
        );
        Ok(())
    }

    pub async fn close(&self) {
        if let Err(e) = self.channel.close(200, "shutdown").await {
            warn!("Failed to close RabbitMQ channel: {}", e);
        }
        if let Err(e) = self.connection.close(200, "shutdown").await {
            warn!("Failed to close RabbitMQ connection: {}", e);
        }
    }
}

#[async_trait]
impl Publisher for AmqpBroker {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), FleetError> {
        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(DELIVERY_MODE_PERSISTENT);

        let confirmed = async {
            self.channel
                .basic_publish(
                    exchange,
                    routing_key,
                    BasicPublishOptions::default(),
                    payload,
                    properties,
                )
                .await?
                .await
        }
        .await;

        let confirmation = match confirmed {
            Ok(confirmation) => confirmation,
            Err(e) => {
                self.check_channel();
                return Err(e.into());
            }
        };

        if confirmation.is_nack() {
            return Err(FleetError::BrokerUnavailable(format!(
                "publish to {exchange}/{routing_key} was nacked"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Consumer for AmqpBroker {
    async fn consume(&self, queue: &QueueConfig) -> Result<DeliveryStream, FleetError> {
        self.declare_queue(queue).await?;
        self.channel
            .basic_qos(queue.prefetch, BasicQosOptions::default())
            .await?;

        let consumer = self
            .channel
            .basic_consume(
                &queue.queue,
                &queue.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(
            queue = %queue.queue,
            consumer_tag = %queue.consumer_tag,
            prefetch = queue.prefetch,
            "Consuming"
        );

        let stream = consumer.map(|delivery| -> Result<Delivery, FleetError> {
            let delivery = delivery?;
            Ok(Delivery::new(
                delivery.data,
                delivery.routing_key.as_str(),
                delivery.redelivered,
                Box::new(AmqpAcker(delivery.acker)),
            ))
        });
        Ok(stream.boxed())
    }
}

struct AmqpAcker(lapin::acker::Acker);

#[async_trait]
impl Acker for AmqpAcker {
    async fn ack(&self) -> Result<(), FleetError> {
        self.0.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<(), FleetError> {
        self.0
            .nack(BasicNackOptions {
                requeue,
                ..Default::default()
            })
            .await?;
        Ok(())
    }
}
