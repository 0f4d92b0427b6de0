//! Redis-backed decision store.
//!
//! Uses a [`redis::Script`] wrapper for both server-side scripts, which
//! invokes by precomputed SHA and transparently re-loads the script text on
//! a NOSCRIPT miss. Connections are pooled through
//! [`redis::aio::ConnectionManager`].

use super::keys::{participants_key, stock_key, user_slot_key};
use super::script::{parse_issue_reply, COMPENSATE_SCRIPT, ISSUE_SCRIPT};
use super::{DecisionStore, StoreFuture, Verdict};
use crate::error::StoreError;
use crate::retry::{retry_with_predicate, RetryPolicy};
use crate::types::{CouponId, EventId, UserId};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script, Value};
use std::sync::Arc;
use std::time::Duration;

/// Decision store client backed by Redis.
#[derive(Clone)]
pub struct RedisDecisionStore {
    conn: ConnectionManager,
    issue_script: Arc<Script>,
    compensate_script: Arc<Script>,
    read_retry: RetryPolicy,
}

impl RedisDecisionStore {
    /// Connect to Redis and prepare both scripts.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the client cannot be created
    /// or the initial connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)
            .map_err(|e| StoreError::Unavailable(format!("failed to create client: {e}")))?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Unavailable(format!("failed to connect: {e}")))?;

        tracing::info!(url = %redis_url, "decision store connected");

        Ok(Self {
            conn,
            issue_script: Arc::new(Script::new(ISSUE_SCRIPT)),
            compensate_script: Arc::new(Script::new(COMPENSATE_SCRIPT)),
            read_retry: RetryPolicy::read_default(),
        })
    }

    fn unavailable(err: &RedisError) -> StoreError {
        StoreError::Unavailable(err.to_string())
    }

    /// Connection-level failures are worth retrying for idempotent reads;
    /// anything else (type errors, parse errors) is not.
    fn is_connection_error(err: &StoreError) -> bool {
        matches!(err, StoreError::Unavailable(_))
    }
}

impl DecisionStore for RedisDecisionStore {
    fn init_event(&self, event_id: EventId, stock: u64, ttl: Duration) -> StoreFuture<'_, bool> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            let key = stock_key(&event_id);
            // SET NX: only the first initialization wins; re-running is a
            // no-op so concurrent seeding cannot double-seed.
            let created: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(stock)
                .arg("NX")
                .arg("EX")
                .arg(ttl.as_secs())
                .query_async(&mut conn)
                .await
                .map_err(|e| Self::unavailable(&e))?;

            let seeded = created.is_some();
            tracing::info!(event_id = %event_id, stock, seeded, "stock initialization");
            Ok(seeded)
        })
    }

    fn issue(
        &self,
        event_id: EventId,
        user_id: UserId,
        coupon_id: CouponId,
        ttl: Duration,
    ) -> StoreFuture<'_, Verdict> {
        let mut conn = self.conn.clone();
        let script = Arc::clone(&self.issue_script);
        Box::pin(async move {
            // Never retried: a successful execution already debited stock.
            let reply: Value = script
                .key(stock_key(&event_id))
                .key(participants_key(&event_id))
                .key(user_slot_key(&event_id, &user_id))
                .arg(user_id.as_str())
                .arg(coupon_id.to_string())
                .arg(ttl.as_secs())
                .invoke_async(&mut conn)
                .await
                .map_err(|e| Self::unavailable(&e))?;

            parse_issue_reply(&reply)
        })
    }

    fn compensate(&self, event_id: EventId, user_id: UserId) -> StoreFuture<'_, bool> {
        let mut conn = self.conn.clone();
        let script = Arc::clone(&self.compensate_script);
        Box::pin(async move {
            let rolled_back: i64 = script
                .key(stock_key(&event_id))
                .key(participants_key(&event_id))
                .key(user_slot_key(&event_id, &user_id))
                .arg(user_id.as_str())
                .invoke_async(&mut conn)
                .await
                .map_err(|e| Self::unavailable(&e))?;

            Ok(rolled_back == 1)
        })
    }

    fn remaining(&self, event_id: EventId) -> StoreFuture<'_, Option<i64>> {
        let conn = self.conn.clone();
        let policy = self.read_retry.clone();
        Box::pin(async move {
            let key = stock_key(&event_id);
            retry_with_predicate(
                &policy,
                || {
                    let mut conn = conn.clone();
                    let key = key.clone();
                    async move {
                        let stock: Option<i64> =
                            conn.get(&key).await.map_err(|e| Self::unavailable(&e))?;
                        Ok(stock)
                    }
                },
                Self::is_connection_error,
            )
            .await
        })
    }

    fn participants_count(&self, event_id: EventId) -> StoreFuture<'_, u64> {
        let conn = self.conn.clone();
        let policy = self.read_retry.clone();
        Box::pin(async move {
            let key = participants_key(&event_id);
            retry_with_predicate(
                &policy,
                || {
                    let mut conn = conn.clone();
                    let key = key.clone();
                    async move {
                        let count: u64 =
                            conn.scard(&key).await.map_err(|e| Self::unavailable(&e))?;
                        Ok(count)
                    }
                },
                Self::is_connection_error,
            )
            .await
        })
    }

    fn get_user_coupon(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> StoreFuture<'_, Option<CouponId>> {
        let conn = self.conn.clone();
        let policy = self.read_retry.clone();
        Box::pin(async move {
            let key = user_slot_key(&event_id, &user_id);
            let cached: Option<String> = retry_with_predicate(
                &policy,
                || {
                    let mut conn = conn.clone();
                    let key = key.clone();
                    async move { conn.get(&key).await.map_err(|e| Self::unavailable(&e)) }
                },
                Self::is_connection_error,
            )
            .await?;

            match cached {
                Some(raw) => raw
                    .parse::<CouponId>()
                    .map(Some)
                    .map_err(|e| StoreError::Script(format!("bad cached coupon id: {e}"))),
                None => Ok(None),
            }
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            let _: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(|e| Self::unavailable(&e))?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DecisionStore;

    // These tests require a running Redis instance.
    // Run with: docker run -d -p 6379:6379 redis:7-alpine

    async fn connect() -> RedisDecisionStore {
        RedisDecisionStore::connect("redis://127.0.0.1:6379")
            .await
            .expect("redis reachable")
    }

    fn ttl() -> Duration {
        Duration::from_secs(60)
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn issue_debits_once_and_refuses_duplicates() {
        let store = connect().await;
        let event = EventId::new(format!("it-{}", uuid::Uuid::new_v4()));
        let user = UserId::new("u1");

        assert!(store
            .init_event(event.clone(), 2, ttl())
            .await
            .expect("seed"));

        let verdict = store
            .issue(event.clone(), user.clone(), CouponId::mint(), ttl())
            .await
            .expect("issue");
        assert_eq!(verdict, Verdict::Issued { remaining: 1 });

        let again = store
            .issue(event.clone(), user.clone(), CouponId::mint(), ttl())
            .await
            .expect("issue");
        assert_eq!(again, Verdict::AlreadyParticipated);

        assert_eq!(store.remaining(event).await.expect("read"), Some(1));
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn uninitialized_event_is_not_auto_seeded() {
        let store = connect().await;
        let event = EventId::new(format!("it-{}", uuid::Uuid::new_v4()));

        let verdict = store
            .issue(event.clone(), UserId::new("u1"), CouponId::mint(), ttl())
            .await
            .expect("issue");
        assert_eq!(verdict, Verdict::NotInitialized);
        assert_eq!(store.remaining(event).await.expect("read"), None);
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn compensate_restores_stock_and_is_idempotent() {
        let store = connect().await;
        let event = EventId::new(format!("it-{}", uuid::Uuid::new_v4()));
        let user = UserId::new("u1");

        store
            .init_event(event.clone(), 1, ttl())
            .await
            .expect("seed");
        store
            .issue(event.clone(), user.clone(), CouponId::mint(), ttl())
            .await
            .expect("issue");

        assert!(store
            .compensate(event.clone(), user.clone())
            .await
            .expect("compensate"));
        assert_eq!(store.remaining(event.clone()).await.expect("read"), Some(1));
        assert_eq!(
            store.participants_count(event.clone()).await.expect("read"),
            0
        );

        // Second run finds no membership and must not over-increment.
        assert!(!store
            .compensate(event.clone(), user)
            .await
            .expect("compensate"));
        assert_eq!(store.remaining(event).await.expect("read"), Some(1));
    }
}
