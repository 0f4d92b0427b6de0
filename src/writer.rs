//! The durable writer: consumes the event log and persists issuance
//! history.
//!
//! Idempotence, not ordering, carries correctness here: the uniqueness
//! constraints on `user_coupons` absorb replays, so the offset is committed
//! only *after* the database write and a crash in between costs at most one
//! replay. A record that keeps failing is parked in the dead letter queue
//! and its offset committed, so a poison record never blocks its partition.

use crate::config::KafkaConfig;
use crate::db::CouponDatabase;
use crate::dlq::DeadLetterQueue;
use crate::error::PersistError;
use crate::retry::{retry_with_predicate, RetryPolicy};
use crate::types::CouponLogEvent;
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Message};

/// Event log consumer that writes one issuance row per record.
pub struct DurableWriter {
    consumer: StreamConsumer,
    db: CouponDatabase,
    dlq: DeadLetterQueue,
    retry: RetryPolicy,
}

impl DurableWriter {
    /// Create the consumer and subscribe to the issuance topic.
    ///
    /// Auto-commit is off: offset commits are tied to database commits.
    ///
    /// # Errors
    ///
    /// Returns the underlying rdkafka error when the consumer cannot be
    /// created or the subscription fails.
    pub fn new(config: &KafkaConfig, db: CouponDatabase) -> Result<Self, KafkaError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set("enable.partition.eof", "false")
            .create()?;

        consumer.subscribe(&[config.topic.as_str()])?;

        tracing::info!(
            brokers = %config.brokers,
            topic = %config.topic,
            group = %config.consumer_group,
            "durable writer subscribed"
        );

        let dlq = DeadLetterQueue::new(db.pool().clone());
        Ok(Self {
            consumer,
            db,
            dlq,
            retry: RetryPolicy::writer_default(),
        })
    }

    /// Consume until the task is cancelled.
    pub async fn run(&self) {
        let mut stream = self.consumer.stream();

        while let Some(result) = stream.next().await {
            match result {
                Ok(message) => self.handle_message(&message).await,
                Err(e) => {
                    tracing::error!(error = %e, "failed to receive from event log");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn handle_message(&self, message: &BorrowedMessage<'_>) {
        let raw = match message.payload() {
            Some(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            None => {
                tracing::warn!(
                    partition = message.partition(),
                    offset = message.offset(),
                    "record without payload, skipping"
                );
                self.commit(message);
                return;
            }
        };
        let key = message
            .key()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .unwrap_or_default();

        let record: CouponLogEvent = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                // Undecodable records can never succeed; park immediately.
                self.park(message, &key, &raw, &format!("undecodable record: {e}"), 0)
                    .await;
                return;
            }
        };

        let applied = retry_with_predicate(
            &self.retry,
            || self.apply(&record),
            PersistError::is_transient,
        )
        .await;

        match applied {
            Ok(()) => {
                metrics::counter!("coupon.consumer.applied").increment(1);
                self.commit(message);
            }
            Err(e) => {
                #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
                self.park(message, &key, &raw, &e.to_string(), self.retry.max_retries as i32)
                    .await;
            }
        }
    }

    /// Apply one record to the database. Exposed so replay tooling and
    /// tests can drive it directly.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError`] with the transient/permanent classification
    /// the retry loop keys on.
    pub async fn apply(&self, record: &CouponLogEvent) -> Result<(), PersistError> {
        match record {
            CouponLogEvent::CouponIssued {
                coupon_id,
                user_id,
                event_id,
                issued_at,
                ..
            } => {
                self.db
                    .record_issuance(*coupon_id, user_id, event_id, *issued_at)
                    .await
                    .map_err(|e| PersistError::classify(&e))?;
                Ok(())
            }
            CouponLogEvent::StockExhausted { event_id, .. } => {
                self.db
                    .mark_exhausted(event_id)
                    .await
                    .map_err(|e| PersistError::classify(&e))
            }
            CouponLogEvent::CouponRedeemed {
                coupon_id,
                redeemed_at,
                ..
            } => {
                let found = self
                    .db
                    .mark_redeemed(*coupon_id, *redeemed_at)
                    .await
                    .map_err(|e| PersistError::classify(&e))?;
                if found {
                    Ok(())
                } else {
                    // Same partition key as the issuance record, so the row
                    // should already exist; a miss means the issuance was
                    // lost and this redemption belongs in the dead letters.
                    Err(PersistError::Transient(format!(
                        "no issuance row for coupon {coupon_id}"
                    )))
                }
            }
        }
    }

    async fn park(
        &self,
        message: &BorrowedMessage<'_>,
        key: &str,
        payload: &str,
        cause: &str,
        retries: i32,
    ) {
        let parked = self
            .dlq
            .add_entry(
                key,
                payload,
                message.topic(),
                message.partition(),
                message.offset(),
                cause,
                retries,
            )
            .await;

        match parked {
            Ok(_) => self.commit(message),
            Err(e) => {
                // Without a parked copy, committing would lose the record;
                // leave the offset so a restart redelivers it.
                tracing::error!(error = %e, "failed to park record, offset left uncommitted");
            }
        }
    }

    fn commit(&self, message: &BorrowedMessage<'_>) {
        if let Err(e) = self.consumer.commit_message(message, CommitMode::Async) {
            tracing::warn!(
                partition = message.partition(),
                offset = message.offset(),
                error = %e,
                "offset commit failed, replay absorbed by idempotence"
            );
        }
    }
}
