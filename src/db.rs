//! Postgres persistence: the sole authority for issuance *history*.
//!
//! Correctness on the write side is carried by two uniqueness constraints,
//! `UNIQUE(coupon_id)` and `UNIQUE(user_id, event_id)`, not by ordering or
//! application locks. The durable writer leans on them to absorb replays.

use crate::config::PostgresConfig;
use crate::types::{CouponId, EventId, UserId};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;

/// Metadata row for a coupon campaign.
#[derive(Debug, Clone)]
pub struct EventRecord {
    /// Campaign identifier
    pub event_id: EventId,
    /// Human name
    pub event_name: String,
    /// Free-form description
    pub description: Option<String>,
    /// Immutable total stock (set at initialization)
    pub total_stock: i64,
    /// Advisory mirror of the in-memory counter
    pub remaining_stock: i64,
    /// Campaign window start
    pub start_time: DateTime<Utc>,
    /// Campaign window end
    pub end_time: DateTime<Utc>,
    /// Admin kill switch
    pub is_active: bool,
}

/// Input for creating a campaign row.
#[derive(Debug, Clone)]
pub struct NewEvent {
    /// Campaign identifier
    pub event_id: EventId,
    /// Human name
    pub event_name: String,
    /// Free-form description
    pub description: Option<String>,
    /// Campaign window start
    pub start_time: DateTime<Utc>,
    /// Campaign window end
    pub end_time: DateTime<Utc>,
}

/// How an issuance record landed in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// A fresh row was written.
    Inserted,
    /// A matching row already existed; the record was a replay.
    AlreadyApplied,
}

/// Database handle shared by the writer, the admin surface and the
/// reconciler. Cheap to clone: wraps a connection pool.
#[derive(Clone)]
pub struct CouponDatabase {
    pool: PgPool,
}

impl CouponDatabase {
    /// Connect a pool to Postgres.
    ///
    /// # Errors
    ///
    /// Returns the underlying sqlx error when the pool cannot be built.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .connect(&config.url)
            .await?;

        tracing::info!(max_connections = config.max_connections, "database connected");
        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests).
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Access the underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the schema if it does not exist yet. Safe to re-run.
    ///
    /// # Errors
    ///
    /// Returns the underlying sqlx error if any statement fails.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS coupon_events (
                event_id        VARCHAR(64) PRIMARY KEY,
                event_name      TEXT        NOT NULL,
                description     TEXT,
                total_stock     BIGINT      NOT NULL DEFAULT 0,
                remaining_stock BIGINT      NOT NULL DEFAULT 0,
                start_time      TIMESTAMPTZ NOT NULL,
                end_time        TIMESTAMPTZ NOT NULL,
                is_active       BOOLEAN     NOT NULL DEFAULT TRUE,
                created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS user_coupons (
                id         BIGSERIAL   PRIMARY KEY,
                coupon_id  UUID        NOT NULL UNIQUE,
                user_id    VARCHAR(64) NOT NULL,
                event_id   VARCHAR(64) NOT NULL,
                issued_at  TIMESTAMPTZ NOT NULL,
                is_used    BOOLEAN     NOT NULL DEFAULT FALSE,
                used_at    TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (user_id, event_id)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_user_coupons_event_issued
             ON user_coupons (event_id, issued_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS failed_issuances (
                id              BIGSERIAL   PRIMARY KEY,
                partition_key   TEXT        NOT NULL,
                payload         TEXT        NOT NULL,
                topic           TEXT        NOT NULL,
                kafka_partition INT         NOT NULL,
                kafka_offset    BIGINT      NOT NULL,
                error_message   TEXT        NOT NULL,
                retry_count     INT         NOT NULL DEFAULT 0,
                status          TEXT        NOT NULL DEFAULT 'pending',
                failed_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                resolved_at     TIMESTAMPTZ
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        tracing::info!("database schema verified");
        Ok(())
    }

    /// Insert the campaign metadata row. Re-running with the same id is a
    /// no-op; returns `true` when a row was created.
    ///
    /// # Errors
    ///
    /// Returns the underlying sqlx error on failure.
    pub async fn create_event(&self, event: &NewEvent) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r"
            INSERT INTO coupon_events (event_id, event_name, description, start_time, end_time)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (event_id) DO NOTHING
            ",
        )
        .bind(event.event_id.as_str())
        .bind(&event.event_name)
        .bind(&event.description)
        .bind(event.start_time)
        .bind(event.end_time)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Record stock initialization on the metadata row, creating a minimal
    /// row when the campaign was seeded before `create_event` ran. Safe to
    /// re-run with the same total. Returns the row's end time so the caller
    /// can derive the participant-set TTL horizon.
    ///
    /// # Errors
    ///
    /// Returns the underlying sqlx error on failure.
    pub async fn upsert_stock(
        &self,
        event_id: &EventId,
        total: i64,
        default_end: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, sqlx::Error> {
        let row = sqlx::query(
            r"
            INSERT INTO coupon_events
                (event_id, event_name, total_stock, remaining_stock, start_time, end_time)
            VALUES ($1, $1, $2, $2, NOW(), $3)
            ON CONFLICT (event_id) DO UPDATE
                SET total_stock = EXCLUDED.total_stock,
                    remaining_stock = EXCLUDED.remaining_stock,
                    updated_at = NOW()
            RETURNING end_time
            ",
        )
        .bind(event_id.as_str())
        .bind(total)
        .bind(default_end)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("end_time"))
    }

    /// Fetch one campaign row.
    ///
    /// # Errors
    ///
    /// Returns the underlying sqlx error on failure.
    pub async fn get_event(&self, event_id: &EventId) -> Result<Option<EventRecord>, sqlx::Error> {
        let row = sqlx::query(
            r"
            SELECT event_id, event_name, description, total_stock, remaining_stock,
                   start_time, end_time, is_active
            FROM coupon_events
            WHERE event_id = $1
            ",
        )
        .bind(event_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Self::row_to_event(&r)))
    }

    /// Flip the admin kill switch.
    ///
    /// # Errors
    ///
    /// Returns the underlying sqlx error on failure.
    pub async fn deactivate(&self, event_id: &EventId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE coupon_events SET is_active = FALSE, updated_at = NOW() WHERE event_id = $1",
        )
        .bind(event_id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Persist one issuance. Conflicts on either uniqueness constraint are
    /// resolved as [`Applied::AlreadyApplied`]: the first durable row for a
    /// `(user, event)` pair wins and replays are absorbed silently.
    ///
    /// # Errors
    ///
    /// Returns the underlying sqlx error on failure.
    pub async fn record_issuance(
        &self,
        coupon_id: CouponId,
        user_id: &UserId,
        event_id: &EventId,
        issued_at: DateTime<Utc>,
    ) -> Result<Applied, sqlx::Error> {
        let result = sqlx::query(
            r"
            INSERT INTO user_coupons (coupon_id, user_id, event_id, issued_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT DO NOTHING
            ",
        )
        .bind(coupon_id.as_uuid())
        .bind(user_id.as_str())
        .bind(event_id.as_str())
        .bind(issued_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(Applied::Inserted);
        }

        // Conflict. Either the exact record was replayed (same coupon id)
        // or an earlier decision for this (user, event) already persisted
        // under a different coupon id; the earlier row holds.
        let existing: Option<(uuid::Uuid,)> = sqlx::query_as(
            "SELECT coupon_id FROM user_coupons WHERE user_id = $1 AND event_id = $2",
        )
        .bind(user_id.as_str())
        .bind(event_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match existing {
            Some((persisted,)) if persisted == coupon_id.as_uuid() => {
                tracing::debug!(coupon_id = %coupon_id, "replayed record already applied");
            }
            Some((persisted,)) => {
                tracing::warn!(
                    coupon_id = %coupon_id,
                    persisted = %persisted,
                    user_id = %user_id,
                    event_id = %event_id,
                    "conflicting coupon id for user, keeping the persisted row"
                );
            }
            None => {
                tracing::warn!(
                    coupon_id = %coupon_id,
                    "conflict without surviving row, concurrent writer interleaving"
                );
            }
        }

        Ok(Applied::AlreadyApplied)
    }

    /// Mark a coupon as redeemed. Returns `false` when the issuance row has
    /// not been persisted yet.
    ///
    /// # Errors
    ///
    /// Returns the underlying sqlx error on failure.
    pub async fn mark_redeemed(
        &self,
        coupon_id: CouponId,
        used_at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE user_coupons SET is_used = TRUE, used_at = $2 WHERE coupon_id = $1",
        )
        .bind(coupon_id.as_uuid())
        .bind(used_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Zero the advisory stock mirror and deactivate a sold-out campaign.
    ///
    /// # Errors
    ///
    /// Returns the underlying sqlx error on failure.
    pub async fn mark_exhausted(&self, event_id: &EventId) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            UPDATE coupon_events
            SET remaining_stock = 0, is_active = FALSE, updated_at = NOW()
            WHERE event_id = $1
            ",
        )
        .bind(event_id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Count persisted issuances for a campaign.
    ///
    /// # Errors
    ///
    /// Returns the underlying sqlx error on failure.
    pub async fn count_issued(&self, event_id: &EventId) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM user_coupons WHERE event_id = $1")
                .bind(event_id.as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// Campaigns worth reconciling: active ones, plus those whose window
    /// closed within the lookback so stable gaps still get reported.
    ///
    /// # Errors
    ///
    /// Returns the underlying sqlx error on failure.
    pub async fn reconcilable_events(
        &self,
        lookback_hours: i64,
    ) -> Result<Vec<EventRecord>, sqlx::Error> {
        let horizon = Utc::now() - ChronoDuration::hours(lookback_hours);

        let rows = sqlx::query(
            r"
            SELECT event_id, event_name, description, total_stock, remaining_stock,
                   start_time, end_time, is_active
            FROM coupon_events
            WHERE is_active = TRUE OR end_time >= $1
            ORDER BY event_id
            ",
        )
        .bind(horizon)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_event).collect())
    }

    fn row_to_event(row: &PgRow) -> EventRecord {
        EventRecord {
            event_id: EventId::new(row.get::<String, _>("event_id")),
            event_name: row.get("event_name"),
            description: row.get("description"),
            total_stock: row.get("total_stock"),
            remaining_stock: row.get("remaining_stock"),
            start_time: row.get("start_time"),
            end_time: row.get("end_time"),
            is_active: row.get("is_active"),
        }
    }
}
