//! The synchronous issuance state machine.
//!
//! validate → decide (atomic script) → publish-and-wait → respond. A FAIL
//! verdict is a successful HTTP call carrying a business rejection; only
//! store failure, missing initialization or a durability failure surface as
//! 5xx.
//!
//! The decide→publish→compensate section runs on a spawned task: once the
//! decision has passed, an abandoned connection must not cancel the publish
//! mid-flight. The publish is seen through to acknowledgement or explicit
//! compensation either way.

use crate::error::{IssueError, ProduceError};
use crate::producer::EventLogProducer;
use crate::store::{DecisionStore, Verdict};
use crate::types::{CouponId, CouponLogEvent, EventId, UserId};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A granted coupon as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCoupon {
    /// The minted coupon id, durable in the log by the time this exists.
    pub coupon_id: CouponId,
    /// Stock left after this grant.
    pub remaining: i64,
}

/// Outcome of a well-formed issuance request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueOutcome {
    /// The user won.
    Issued(IssuedCoupon),
    /// Terminal business rejection; `reason` is the wire-level code.
    Rejected {
        /// `USER_ALREADY_PARTICIPATED` or `NO_STOCK_AVAILABLE`
        reason: &'static str,
    },
}

/// The issuance service: one instance shared by all request workers.
///
/// Holds no mutable state of its own; all contention lives in the decision
/// store, which linearizes it.
pub struct IssuanceService {
    store: Arc<dyn DecisionStore>,
    producer: Arc<dyn EventLogProducer>,
    participant_ttl: Duration,
    deadline: Duration,
}

impl IssuanceService {
    /// Assemble the service over its two seams.
    #[must_use]
    pub fn new(
        store: Arc<dyn DecisionStore>,
        producer: Arc<dyn EventLogProducer>,
        participant_ttl: Duration,
        deadline: Duration,
    ) -> Self {
        Self {
            store,
            producer,
            participant_ttl,
            deadline,
        }
    }

    /// Handle one issuance request end-to-end.
    ///
    /// # Errors
    ///
    /// - [`IssueError::Validation`] for empty identifiers.
    /// - [`IssueError::StockNotInitialized`] when the event was never seeded.
    /// - [`IssueError::Store`] when the store failed before a decision.
    /// - [`IssueError::PublishFailed`] when durability could not be achieved
    ///   after a PASS; the PASS is compensated first where possible.
    /// - [`IssueError::DeadlineExceeded`] when the deadline fired before the
    ///   decision ran (cancellation before the decision is free).
    pub async fn issue(&self, user_id: &str, event_id: &str) -> Result<IssueOutcome, IssueError> {
        let started = Instant::now();
        let (user_id, event_id) = validate(user_id, event_id)?;

        // Minted before the decision so one id correlates cache slot, log
        // record and persisted row.
        let coupon_id = CouponId::mint();

        if started.elapsed() >= self.deadline {
            return Err(IssueError::DeadlineExceeded);
        }

        let store = Arc::clone(&self.store);
        let producer = Arc::clone(&self.producer);
        let ttl = self.participant_ttl;

        // Spawned so that dropping the request future (client gone, HTTP
        // timeout) cannot cancel the publish after the decision passed.
        let critical = tokio::spawn(decide_and_publish(
            store, producer, event_id, user_id, coupon_id, ttl,
        ));

        critical
            .await
            .map_err(|e| IssueError::Internal(format!("issuance task failed: {e}")))?
    }
}

/// The post-validation critical section: decision, durability, compensation.
async fn decide_and_publish(
    store: Arc<dyn DecisionStore>,
    producer: Arc<dyn EventLogProducer>,
    event_id: EventId,
    user_id: UserId,
    coupon_id: CouponId,
    ttl: Duration,
) -> Result<IssueOutcome, IssueError> {
    let verdict = store
        .issue(event_id.clone(), user_id.clone(), coupon_id, ttl)
        .await?;

    let remaining = match verdict {
        Verdict::Issued { remaining } => remaining,
        Verdict::NotInitialized => {
            return Err(IssueError::StockNotInitialized(event_id));
        }
        rejected => {
            metrics::counter!("coupon.issue.rejected").increment(1);
            let reason = rejected.reason().unwrap_or("REJECTED");
            return Ok(IssueOutcome::Rejected { reason });
        }
    };

    let record = CouponLogEvent::issued(coupon_id, user_id.clone(), event_id.clone());
    if let Err(source) = producer.publish(record).await {
        return Err(compensate(&*store, event_id, user_id, coupon_id, source).await);
    }

    metrics::counter!("coupon.issue.success").increment(1);
    tracing::info!(
        event_id = %event_id,
        user_id = %user_id,
        coupon_id = %coupon_id,
        remaining,
        "coupon issued"
    );

    if remaining <= 0 {
        // Advisory record for the draining PASS; its loss degrades the
        // event-row mirror, not correctness, so no compensation on failure.
        if let Err(e) = producer
            .publish(CouponLogEvent::exhausted(event_id.clone(), remaining))
            .await
        {
            tracing::warn!(event_id = %event_id, error = %e, "failed to publish exhaustion record");
        }
    }

    Ok(IssueOutcome::Issued(IssuedCoupon {
        coupon_id,
        remaining,
    }))
}

/// Roll back an unpublishable PASS and fold the result into the error.
async fn compensate(
    store: &dyn DecisionStore,
    event_id: EventId,
    user_id: UserId,
    coupon_id: CouponId,
    source: ProduceError,
) -> IssueError {
    match store.compensate(event_id.clone(), user_id.clone()).await {
        Ok(rolled_back) => {
            tracing::warn!(
                event_id = %event_id,
                user_id = %user_id,
                coupon_id = %coupon_id,
                rolled_back,
                "publish failed after decision, compensated"
            );
            IssueError::PublishFailed {
                compensated: rolled_back,
                source,
            }
        }
        Err(store_err) => {
            // Reconciliation will find the orphaned participant; the
            // operator alert is the counter plus this log line.
            metrics::counter!("coupon.compensation.failed").increment(1);
            tracing::error!(
                event_id = %event_id,
                user_id = %user_id,
                coupon_id = %coupon_id,
                error = %store_err,
                "compensation failed, in-memory state drifts until reconciled"
            );
            IssueError::PublishFailed {
                compensated: false,
                source,
            }
        }
    }
}

fn validate(user_id: &str, event_id: &str) -> Result<(UserId, EventId), IssueError> {
    let user_id = user_id.trim();
    let event_id = event_id.trim();

    if user_id.is_empty() {
        return Err(IssueError::Validation("user_id must not be empty".into()));
    }
    if event_id.is_empty() {
        return Err(IssueError::Validation("event_id must not be empty".into()));
    }

    Ok((UserId::new(user_id), EventId::new(event_id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_rejects_empty_and_whitespace_ids() {
        assert!(matches!(
            validate("", "e1"),
            Err(IssueError::Validation(_))
        ));
        assert!(matches!(
            validate("u1", "   "),
            Err(IssueError::Validation(_))
        ));

        let (user, event) = validate(" u1 ", "e1").expect("valid");
        assert_eq!(user.as_str(), "u1");
        assert_eq!(event.as_str(), "e1");
    }
}
