//! Dead letter queue for log records that exhausted the writer's retries.
//!
//! A record parked here keeps its original partition key and raw payload so
//! an operator can triage and replay it; the partition it came from is
//! never blocked by it.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

/// A parked record with its failure context.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// Queue entry id
    pub id: i64,
    /// Original log partition key
    pub partition_key: String,
    /// Raw record payload as it arrived
    pub payload: String,
    /// Source topic
    pub topic: String,
    /// Source partition
    pub kafka_partition: i32,
    /// Source offset
    pub kafka_offset: i64,
    /// Why the writer gave up
    pub error_message: String,
    /// Attempts made before parking
    pub retry_count: i32,
    /// `pending`, `resolved` or `discarded`
    pub status: String,
    /// When the record was parked
    pub failed_at: DateTime<Utc>,
}

/// Postgres-backed dead letter queue.
pub struct DeadLetterQueue {
    pool: PgPool,
}

impl DeadLetterQueue {
    /// Wrap a pool; the table is created by the database migration.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Park a record that exhausted its retries.
    ///
    /// # Errors
    ///
    /// Returns the underlying sqlx error if the insert fails.
    pub async fn add_entry(
        &self,
        partition_key: &str,
        payload: &str,
        topic: &str,
        kafka_partition: i32,
        kafka_offset: i64,
        error_message: &str,
        retry_count: i32,
    ) -> Result<i64, sqlx::Error> {
        let (id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO failed_issuances
                (partition_key, payload, topic, kafka_partition, kafka_offset,
                 error_message, retry_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            ",
        )
        .bind(partition_key)
        .bind(payload)
        .bind(topic)
        .bind(kafka_partition)
        .bind(kafka_offset)
        .bind(error_message)
        .bind(retry_count)
        .fetch_one(&self.pool)
        .await?;

        tracing::warn!(
            dlq_id = id,
            partition_key,
            topic,
            kafka_partition,
            kafka_offset,
            error = error_message,
            retry_count,
            "record parked in dead letter queue"
        );
        metrics::counter!("coupon.consumer.dead_lettered").increment(1);

        Ok(id)
    }

    /// Pending entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns the underlying sqlx error if the query fails.
    pub async fn list_pending(&self, limit: i64) -> Result<Vec<DeadLetter>, sqlx::Error> {
        let rows = sqlx::query(
            r"
            SELECT id, partition_key, payload, topic, kafka_partition, kafka_offset,
                   error_message, retry_count, status, failed_at
            FROM failed_issuances
            WHERE status = 'pending'
            ORDER BY failed_at ASC
            LIMIT $1
            ",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_entry).collect())
    }

    /// Number of pending entries; feeds monitoring.
    ///
    /// # Errors
    ///
    /// Returns the underlying sqlx error if the query fails.
    pub async fn count_pending(&self) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM failed_issuances WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// Mark an entry resolved after manual replay.
    ///
    /// # Errors
    ///
    /// Returns the underlying sqlx error if the update fails.
    pub async fn mark_resolved(&self, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE failed_issuances SET status = 'resolved', resolved_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        tracing::info!(dlq_id = id, "dead letter resolved");
        Ok(())
    }

    fn row_to_entry(row: &PgRow) -> DeadLetter {
        DeadLetter {
            id: row.get("id"),
            partition_key: row.get("partition_key"),
            payload: row.get("payload"),
            topic: row.get("topic"),
            kafka_partition: row.get("kafka_partition"),
            kafka_offset: row.get("kafka_offset"),
            error_message: row.get("error_message"),
            retry_count: row.get("retry_count"),
            status: row.get("status"),
            failed_at: row.get("failed_at"),
        }
    }
}
