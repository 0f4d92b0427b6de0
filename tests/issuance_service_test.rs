//! Service-level tests of the issuance state machine against the in-memory
//! doubles, which reproduce the decision script's semantics exactly.

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code can use unwrap/expect

use couponing::error::IssueError;
use couponing::issuance::{IssuanceService, IssueOutcome};
use couponing::testing::{InMemoryDecisionStore, InMemoryLogProducer};
use couponing::types::{CouponLogEvent, EventId};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    store: Arc<InMemoryDecisionStore>,
    producer: Arc<InMemoryLogProducer>,
    service: IssuanceService,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryDecisionStore::new());
    let producer = Arc::new(InMemoryLogProducer::new());
    let service = IssuanceService::new(
        Arc::clone(&store) as _,
        Arc::clone(&producer) as _,
        Duration::from_secs(3600),
        Duration::from_secs(1),
    );
    Harness {
        store,
        producer,
        service,
    }
}

async fn seed(harness: &Harness, event: &str, stock: u64) {
    use couponing::store::DecisionStore;
    harness
        .store
        .init_event(EventId::new(event), stock, Duration::from_secs(3600))
        .await
        .expect("seed");
}

fn issued_records(producer: &InMemoryLogProducer) -> Vec<CouponLogEvent> {
    producer
        .records()
        .into_iter()
        .filter(|r| matches!(r, CouponLogEvent::CouponIssued { .. }))
        .collect()
}

#[tokio::test]
async fn single_winner_gets_coupon_and_log_record() {
    let h = harness();
    seed(&h, "e1", 1).await;

    let outcome = h.service.issue("u1", "e1").await.expect("issue");
    let IssueOutcome::Issued(coupon) = outcome else {
        panic!("expected a grant, got {outcome:?}");
    };
    assert_eq!(coupon.remaining, 0);

    let records = issued_records(&h.producer);
    assert_eq!(records.len(), 1);
    let CouponLogEvent::CouponIssued {
        coupon_id,
        user_id,
        event_id,
        ..
    } = &records[0]
    else {
        unreachable!();
    };
    assert_eq!(*coupon_id, coupon.coupon_id);
    assert_eq!(user_id.as_str(), "u1");
    assert_eq!(event_id.as_str(), "e1");
}

#[tokio::test]
async fn duplicate_user_is_rejected_without_new_record() {
    let h = harness();
    seed(&h, "e1", 5).await;

    h.service.issue("u1", "e1").await.expect("first issue");
    let outcome = h.service.issue("u1", "e1").await.expect("second issue");

    assert_eq!(
        outcome,
        IssueOutcome::Rejected {
            reason: "USER_ALREADY_PARTICIPATED"
        }
    );
    assert_eq!(issued_records(&h.producer).len(), 1);
}

#[tokio::test]
async fn third_user_finds_two_units_sold_out() {
    let h = harness();
    seed(&h, "e2", 2).await;

    for user in ["u1", "u2"] {
        let outcome = h.service.issue(user, "e2").await.expect("issue");
        assert!(matches!(outcome, IssueOutcome::Issued(_)), "{user} should win");
    }

    let outcome = h.service.issue("u3", "e2").await.expect("issue");
    assert_eq!(
        outcome,
        IssueOutcome::Rejected {
            reason: "NO_STOCK_AVAILABLE"
        }
    );
}

#[tokio::test]
async fn zero_stock_event_rejects_everyone() {
    let h = harness();
    seed(&h, "empty", 0).await;

    for user in ["u1", "u2", "u3"] {
        let outcome = h.service.issue(user, "empty").await.expect("issue");
        assert_eq!(
            outcome,
            IssueOutcome::Rejected {
                reason: "NO_STOCK_AVAILABLE"
            }
        );
    }
    assert!(issued_records(&h.producer).is_empty());
}

#[tokio::test]
async fn uninitialized_event_is_an_operator_error_not_a_rejection() {
    let h = harness();

    let err = h.service.issue("u1", "never-seeded").await.expect_err("no seed");
    assert!(matches!(err, IssueError::StockNotInitialized(_)));
    assert!(h.producer.records().is_empty());
}

#[tokio::test]
async fn empty_ids_fail_validation_before_touching_the_store() {
    let h = harness();

    for (user, event) in [("", "e1"), ("u1", ""), ("  ", "e1")] {
        let err = h.service.issue(user, event).await.expect_err("invalid");
        assert!(matches!(err, IssueError::Validation(_)));
    }
}

#[tokio::test]
async fn store_outage_surfaces_as_store_error() {
    let h = harness();
    seed(&h, "e1", 1).await;
    h.store.set_unavailable(true);

    let err = h.service.issue("u1", "e1").await.expect_err("store down");
    assert!(matches!(err, IssueError::Store(_)));
}

#[tokio::test]
async fn publish_failure_compensates_and_retry_succeeds_after_recovery() {
    let h = harness();
    seed(&h, "e4", 1).await;
    h.producer.set_failing(true);

    let err = h.service.issue("u1", "e4").await.expect_err("publish down");
    let IssueError::PublishFailed { compensated, .. } = err else {
        panic!("expected publish failure, got {err:?}");
    };
    assert!(compensated, "in-memory decision should have been rolled back");

    // Stock restored and participant removed, so recovery lets the same
    // user win the unit.
    {
        use couponing::store::DecisionStore;
        assert_eq!(
            h.store.remaining(EventId::new("e4")).await.expect("read"),
            Some(1)
        );
        assert_eq!(
            h.store
                .participants_count(EventId::new("e4"))
                .await
                .expect("read"),
            0
        );
    }

    h.producer.set_failing(false);
    let outcome = h.service.issue("u1", "e4").await.expect("retry");
    let IssueOutcome::Issued(coupon) = outcome else {
        panic!("retry should win");
    };
    assert_eq!(coupon.remaining, 0);
    assert_eq!(issued_records(&h.producer).len(), 1);
}

#[tokio::test]
async fn draining_pass_emits_one_exhaustion_record() {
    let h = harness();
    seed(&h, "e5", 2).await;

    h.service.issue("u1", "e5").await.expect("issue");
    h.service.issue("u2", "e5").await.expect("issue");
    // Sold out now; further requests are rejections, not exhaustions.
    h.service.issue("u3", "e5").await.expect("issue");

    let exhausted: Vec<_> = h
        .producer
        .records()
        .into_iter()
        .filter(|r| matches!(r, CouponLogEvent::StockExhausted { .. }))
        .collect();
    assert_eq!(exhausted.len(), 1);
    let CouponLogEvent::StockExhausted { remaining, .. } = &exhausted[0] else {
        unreachable!();
    };
    assert_eq!(*remaining, 0);
}

#[tokio::test]
async fn coupon_is_readable_from_the_user_cache_slot() {
    use couponing::store::DecisionStore;

    let h = harness();
    seed(&h, "e6", 1).await;

    let outcome = h.service.issue("u1", "e6").await.expect("issue");
    let IssueOutcome::Issued(coupon) = outcome else {
        panic!("expected grant");
    };

    let cached = h
        .store
        .get_user_coupon(EventId::new("e6"), couponing::types::UserId::new("u1"))
        .await
        .expect("read");
    assert_eq!(cached, Some(coupon.coupon_id));
}
