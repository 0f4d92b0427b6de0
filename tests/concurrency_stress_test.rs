//! Concurrency stress tests: the stock and uniqueness invariants must hold
//! when every contender arrives at once.
//!
//! Run with: `cargo test --test concurrency_stress_test -- --nocapture`

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code can use unwrap/expect

use couponing::issuance::{IssuanceService, IssueOutcome};
use couponing::store::DecisionStore;
use couponing::testing::{InMemoryDecisionStore, InMemoryLogProducer};
use couponing::types::{CouponLogEvent, EventId};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn service(store: &Arc<InMemoryDecisionStore>, producer: &Arc<InMemoryLogProducer>) -> Arc<IssuanceService> {
    Arc::new(IssuanceService::new(
        Arc::clone(store) as _,
        Arc::clone(producer) as _,
        Duration::from_secs(3600),
        Duration::from_secs(5),
    ))
}

/// 100 distinct users race for a single unit: exactly one wins, the rest
/// see `NO_STOCK_AVAILABLE`.
#[tokio::test]
async fn last_unit_has_exactly_one_winner() {
    let store = Arc::new(InMemoryDecisionStore::new());
    let producer = Arc::new(InMemoryLogProducer::new());
    let service = service(&store, &producer);

    let event = EventId::new("last-unit");
    store
        .init_event(event.clone(), 1, Duration::from_secs(3600))
        .await
        .expect("seed");

    let mut handles = Vec::new();
    for i in 0..100 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service.issue(&format!("user-{i}"), "last-unit").await
        }));
    }

    let mut winners = 0;
    let mut sold_out = 0;
    for handle in handles {
        match handle.await.expect("join").expect("issue") {
            IssueOutcome::Issued(_) => winners += 1,
            IssueOutcome::Rejected { reason } => {
                assert_eq!(reason, "NO_STOCK_AVAILABLE");
                sold_out += 1;
            }
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(sold_out, 99);
    assert_eq!(store.remaining(event).await.expect("read"), Some(0));
}

/// One user fires 50 concurrent requests on ample stock: exactly one wins,
/// the rest are duplicates, and only one unit is debited.
#[tokio::test]
async fn duplicate_user_storm_debits_stock_once() {
    let store = Arc::new(InMemoryDecisionStore::new());
    let producer = Arc::new(InMemoryLogProducer::new());
    let service = service(&store, &producer);

    let event = EventId::new("dup-storm");
    store
        .init_event(event.clone(), 10, Duration::from_secs(3600))
        .await
        .expect("seed");

    let mut handles = Vec::new();
    for _ in 0..50 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service.issue("greedy", "dup-storm").await
        }));
    }

    let mut winners = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.expect("join").expect("issue") {
            IssueOutcome::Issued(_) => winners += 1,
            IssueOutcome::Rejected { reason } => {
                assert_eq!(reason, "USER_ALREADY_PARTICIPATED");
                duplicates += 1;
            }
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(duplicates, 49);
    assert_eq!(store.remaining(event.clone()).await.expect("read"), Some(9));
    assert_eq!(store.participants_count(event).await.expect("read"), 1);
}

/// 1000 distinct users contend for 100 units: exactly 100 successes, the
/// participant set holds exactly the winners (sold-out losers are never
/// admitted, so their retries keep reading `NO_STOCK_AVAILABLE`), and every
/// winner's record is on the log with a distinct coupon id.
#[tokio::test]
async fn heavy_contention_never_oversells() {
    let store = Arc::new(InMemoryDecisionStore::new());
    let producer = Arc::new(InMemoryLogProducer::new());
    let service = service(&store, &producer);

    let event = EventId::new("big-drop");
    store
        .init_event(event.clone(), 100, Duration::from_secs(3600))
        .await
        .expect("seed");

    let mut handles = Vec::new();
    for i in 0..1000 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service.issue(&format!("user-{i}"), "big-drop").await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if let IssueOutcome::Issued(_) = handle.await.expect("join").expect("issue") {
            winners += 1;
        }
    }

    assert_eq!(winners, 100);
    assert_eq!(store.remaining(event.clone()).await.expect("read"), Some(0));
    assert_eq!(store.participants_count(event).await.expect("read"), 100);

    let coupon_ids: HashSet<_> = producer
        .records()
        .into_iter()
        .filter_map(|record| match record {
            CouponLogEvent::CouponIssued { coupon_id, .. } => Some(coupon_id),
            _ => None,
        })
        .collect();
    assert_eq!(coupon_ids.len(), 100, "every winner has a distinct coupon");
}
