//! Bounded concurrent dispatch of deliveries to a handler

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    broker::{Delivery, DeliveryStream, Disposition},
    retry::RetryConfig,
};

/// Per-message handler; implementations hold no per-message state
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, delivery: &Delivery) -> Disposition;
}

/// Why [`dispatch`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchEnd {
    /// `shutdown` was cancelled
    Cancelled,
    /// The transport ended the delivery stream
    StreamClosed,
}

/// Feed deliveries to `handler` with at most `concurrency` in flight.
///
/// Each delivery is settled after its handler returns. A `Requeue` on a
/// transport that cannot redeliver by itself (MQTT) is handled again
/// locally, waiting `redelivery`'s backoff between attempts, until the
/// handler acks or rejects it or shutdown begins. The delivery keeps its
/// concurrency slot meanwhile.
///
/// When `shutdown` is cancelled or the stream ends, no further deliveries
/// are taken and the call returns once every in-flight handler has finished
/// and settled.
pub async fn dispatch<H: Handler>(
    handler: Arc<H>,
    mut deliveries: DeliveryStream,
    concurrency: usize,
    redelivery: RetryConfig,
    shutdown: CancellationToken,
) -> DispatchEnd {
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut in_flight = JoinSet::new();

    let end = loop {
        let permit = tokio::select! {
            _ = shutdown.cancelled() => break DispatchEnd::Cancelled,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break DispatchEnd::Cancelled,
            },
        };

        let delivery = tokio::select! {
            _ = shutdown.cancelled() => break DispatchEnd::Cancelled,
            next = deliveries.next() => match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => {
                    error!("Receive error: {}", e);
                    continue;
                }
                None => {
                    warn!("Delivery stream closed");
                    break DispatchEnd::StreamClosed;
                }
            },
        };

        let handler = handler.clone();
        let redelivery = redelivery.clone();
        let shutdown = shutdown.clone();
        in_flight.spawn(async move {
            let disposition = handle(&*handler, &delivery, &redelivery, &shutdown).await;
            if let Err(e) = delivery.settle(disposition).await {
                warn!(?disposition, "Failed to settle delivery: {}", e);
            }
            drop(permit);
        });

        while let Some(result) = in_flight.try_join_next() {
            if let Err(e) = result {
                error!("Handler task failed: {}", e);
            }
        }
    };

    if !in_flight.is_empty() {
        info!(in_flight = in_flight.len(), "Draining in-flight handlers");
    }
    while let Some(result) = in_flight.join_next().await {
        if let Err(e) = result {
            error!("Handler task failed: {}", e);
        }
    }

    end
}

async fn handle<H: Handler>(
    handler: &H,
    delivery: &Delivery,
    redelivery: &RetryConfig,
    shutdown: &CancellationToken,
) -> Disposition {
    let mut attempt = 0u32;

    loop {
        let disposition = handler.handle(delivery).await;
        if disposition != Disposition::Requeue || delivery.redelivers_on_requeue() {
            return disposition;
        }

        let delay = redelivery.delay_for_attempt(attempt);
        warn!(
            routing_key = %delivery.routing_key,
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "Handling requeued delivery again"
        );
        tokio::select! {
            _ = shutdown.cancelled() => return disposition,
            _ = tokio::time::sleep(delay) => {}
        }
        attempt = attempt.saturating_add(1);
    }
}
