//! In-memory doubles for the two seams of the synchronous path.
//!
//! [`InMemoryDecisionStore`] reproduces the decision script's semantics
//! exactly (one mutex acquisition per call stands in for the store's
//! command queue), so service-level tests exercise the stock and
//! uniqueness invariants without a running Redis.

use crate::error::{ProduceError, StoreError};
use crate::producer::{EventLogProducer, ProducerFuture};
use crate::store::{DecisionStore, StoreFuture, Verdict};
use crate::types::{CouponId, CouponLogEvent, EventId, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Default)]
struct EventSlot {
    stock: i64,
    participants: HashSet<UserId>,
    coupons: HashMap<UserId, CouponId>,
}

/// Decision store double with script-identical semantics.
#[derive(Default)]
pub struct InMemoryDecisionStore {
    events: Mutex<HashMap<EventId, EventSlot>>,
    unavailable: AtomicBool,
}

impl InMemoryDecisionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with [`StoreError::Unavailable`] until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("store offline (test)".into()))
        } else {
            Ok(())
        }
    }
}

impl DecisionStore for InMemoryDecisionStore {
    fn init_event(&self, event_id: EventId, stock: u64, _ttl: Duration) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            self.check_available()?;
            let mut events = self.events.lock().expect("store mutex");
            if events.contains_key(&event_id) {
                return Ok(false);
            }
            #[allow(clippy::cast_possible_wrap)]
            events.insert(
                event_id,
                EventSlot {
                    stock: stock as i64,
                    ..EventSlot::default()
                },
            );
            Ok(true)
        })
    }

    fn issue(
        &self,
        event_id: EventId,
        user_id: UserId,
        coupon_id: CouponId,
        _ttl: Duration,
    ) -> StoreFuture<'_, Verdict> {
        Box::pin(async move {
            self.check_available()?;
            let mut events = self.events.lock().expect("store mutex");

            let Some(slot) = events.get_mut(&event_id) else {
                return Ok(Verdict::NotInitialized);
            };
            if slot.participants.contains(&user_id) {
                return Ok(Verdict::AlreadyParticipated);
            }
            if slot.stock <= 0 {
                return Ok(Verdict::SoldOut);
            }

            slot.participants.insert(user_id.clone());
            slot.stock -= 1;
            slot.coupons.insert(user_id, coupon_id);
            Ok(Verdict::Issued {
                remaining: slot.stock,
            })
        })
    }

    fn compensate(&self, event_id: EventId, user_id: UserId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            self.check_available()?;
            let mut events = self.events.lock().expect("store mutex");

            let Some(slot) = events.get_mut(&event_id) else {
                return Ok(false);
            };
            if !slot.participants.remove(&user_id) {
                return Ok(false);
            }
            slot.stock += 1;
            slot.coupons.remove(&user_id);
            Ok(true)
        })
    }

    fn remaining(&self, event_id: EventId) -> StoreFuture<'_, Option<i64>> {
        Box::pin(async move {
            self.check_available()?;
            let events = self.events.lock().expect("store mutex");
            Ok(events.get(&event_id).map(|slot| slot.stock))
        })
    }

    fn participants_count(&self, event_id: EventId) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            self.check_available()?;
            let events = self.events.lock().expect("store mutex");
            Ok(events
                .get(&event_id)
                .map(|slot| slot.participants.len() as u64)
                .unwrap_or(0))
        })
    }

    fn get_user_coupon(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> StoreFuture<'_, Option<CouponId>> {
        Box::pin(async move {
            self.check_available()?;
            let events = self.events.lock().expect("store mutex");
            Ok(events
                .get(&event_id)
                .and_then(|slot| slot.coupons.get(&user_id).copied()))
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.check_available() })
    }
}

/// Log producer double that records every published record.
#[derive(Default)]
pub struct InMemoryLogProducer {
    records: Mutex<Vec<CouponLogEvent>>,
    failing: AtomicBool,
}

impl InMemoryLogProducer {
    /// Create an empty producer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every publish fail until reset; drives compensation paths.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Everything published so far, in order.
    #[must_use]
    pub fn records(&self) -> Vec<CouponLogEvent> {
        self.records.lock().expect("producer mutex").clone()
    }
}

impl EventLogProducer for InMemoryLogProducer {
    fn publish(&self, record: CouponLogEvent) -> ProducerFuture<'_, ()> {
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                return Err(ProduceError::Delivery {
                    topic: "coupon-events".into(),
                    reason: "log offline (test)".into(),
                });
            }
            self.records.lock().expect("producer mutex").push(record);
            Ok(())
        })
    }

    fn ping(&self) -> ProducerFuture<'_, ()> {
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                Err(ProduceError::Unavailable("log offline (test)".into()))
            } else {
                Ok(())
            }
        })
    }
}
