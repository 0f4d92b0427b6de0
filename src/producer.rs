//! Event log producer: the durable hand-off from the synchronous path.
//!
//! Once `publish` returns `Ok`, the record is acknowledged by the log and
//! will reach a consumer at least once. The handler waits for that
//! acknowledgement *before* answering PASS, so a client is never told it
//! won without a surviving record. Publish failures are retried with a
//! sleep budget small enough to stay inside the request deadline.

use crate::config::KafkaConfig;
use crate::error::ProduceError;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::types::CouponLogEvent;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Boxed future type used by the producer seam.
pub type ProducerFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ProduceError>> + Send + 'a>>;

/// Appender onto the durable event log.
///
/// Implementations must not report `Ok` before the record is durable.
pub trait EventLogProducer: Send + Sync {
    /// Append one record, keyed by [`CouponLogEvent::partition_key`], and
    /// wait for the delivery acknowledgement.
    fn publish(&self, record: CouponLogEvent) -> ProducerFuture<'_, ()>;

    /// Liveness probe.
    fn ping(&self) -> ProducerFuture<'_, ()>;
}

/// Kafka/Redpanda-backed log producer.
///
/// Configured for durability over throughput on the issuance path:
/// `acks=all` plus idempotent sends, so a broker-side retry cannot
/// duplicate a record within a producer session.
pub struct KafkaLogProducer {
    producer: FutureProducer,
    topic: String,
    delivery_timeout: Duration,
    retry: RetryPolicy,
}

impl KafkaLogProducer {
    /// Create the producer and bind it to the issuance topic.
    ///
    /// # Errors
    ///
    /// Returns [`ProduceError::Unavailable`] when the client cannot be
    /// created from the given configuration.
    pub fn new(config: &KafkaConfig) -> Result<Self, ProduceError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", config.delivery_timeout_ms.to_string())
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("compression.type", "lz4")
            .create()
            .map_err(|e| ProduceError::Unavailable(format!("failed to create producer: {e}")))?;

        tracing::info!(
            brokers = %config.brokers,
            topic = %config.topic,
            "event log producer created"
        );

        Ok(Self {
            producer,
            topic: config.topic.clone(),
            delivery_timeout: Duration::from_millis(config.delivery_timeout_ms),
            retry: RetryPolicy::publish_budget(),
        })
    }
}

impl EventLogProducer for KafkaLogProducer {
    fn publish(&self, record: CouponLogEvent) -> ProducerFuture<'_, ()> {
        Box::pin(async move {
            let payload = serde_json::to_vec(&record).map_err(|e| ProduceError::Delivery {
                topic: self.topic.clone(),
                reason: format!("failed to serialize record: {e}"),
            })?;
            let key = record.partition_key();

            let delivery = retry_with_backoff(&self.retry, || {
                let kafka_record = FutureRecord::to(&self.topic).payload(&payload).key(&key);
                async {
                    self.producer
                        .send(kafka_record, Timeout::After(self.delivery_timeout))
                        .await
                        .map_err(|(kafka_error, _)| ProduceError::Delivery {
                            topic: self.topic.clone(),
                            reason: kafka_error.to_string(),
                        })
                }
            })
            .await;

            match delivery {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %self.topic,
                        partition,
                        offset,
                        key = %key,
                        "record acknowledged"
                    );
                    Ok(())
                }
                Err(err) => {
                    metrics::counter!("coupon.publish.failed").increment(1);
                    tracing::error!(topic = %self.topic, key = %key, error = %err, "publish failed after retries");
                    Err(err)
                }
            }
        })
    }

    fn ping(&self) -> ProducerFuture<'_, ()> {
        Box::pin(async move {
            // fetch_metadata blocks, but the timeout keeps the health probe
            // bounded.
            self.producer
                .client()
                .fetch_metadata(Some(&self.topic), Timeout::After(Duration::from_secs(2)))
                .map(|_| ())
                .map_err(|e| ProduceError::Unavailable(e.to_string()))
        })
    }
}
