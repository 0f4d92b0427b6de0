//! Reconciliation: out-of-band comparison of the decision store's counters
//! against persisted history.
//!
//! At quiescence `issuances_in_db <= participants_in_store` must hold; the
//! writer may lag but can never overshoot. The job only reports, it never
//! mutates either side.

use crate::db::CouponDatabase;
use crate::store::DecisionStore;
use crate::types::EventId;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Classification of one event's drift between store and database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drift {
    /// Counts agree.
    InSync,
    /// Database behind the store and still catching up; informational.
    Lag,
    /// Database behind the store, stable, and the event is over: records
    /// were dead-lettered or lost. Operator triage.
    Gap,
    /// Database ahead of the store: an invariant violation. Pages.
    Overshoot,
}

/// Classify a single observation.
///
/// `previous_db` is the persisted count seen on the prior pass for the same
/// event, used to tell a shrinking deficit (lag) from a stable one (gap).
#[must_use]
pub fn classify(store: i64, db: i64, previous_db: Option<i64>, event_ended: bool) -> Drift {
    if db > store {
        return Drift::Overshoot;
    }
    if db == store {
        return Drift::InSync;
    }

    let stable = previous_db.is_some_and(|prev| db <= prev);
    if stable && event_ended {
        Drift::Gap
    } else {
        Drift::Lag
    }
}

/// Periodic reconciliation job over all active (and recently ended) events.
pub struct Reconciler {
    store: Arc<dyn DecisionStore>,
    db: CouponDatabase,
    interval: Duration,
    lookback_hours: i64,
    previous_counts: HashMap<EventId, i64>,
}

impl Reconciler {
    /// Assemble the job.
    #[must_use]
    pub fn new(
        store: Arc<dyn DecisionStore>,
        db: CouponDatabase,
        interval: Duration,
        lookback_hours: i64,
    ) -> Self {
        Self {
            store,
            db,
            interval,
            lookback_hours,
            previous_counts: HashMap::new(),
        }
    }

    /// Run passes forever on the configured interval.
    pub async fn run(&mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                tracing::error!(error = %e, "reconciliation pass failed");
            }
        }
    }

    /// One reconciliation pass. Returns how many events drifted.
    ///
    /// # Errors
    ///
    /// Returns a description of the first store or database failure.
    pub async fn run_once(&mut self) -> Result<usize, String> {
        let events = self
            .db
            .reconcilable_events(self.lookback_hours)
            .await
            .map_err(|e| format!("failed to list events: {e}"))?;

        let now = Utc::now();
        let mut drifted = 0;

        for event in events {
            let participants = self
                .store
                .participants_count(event.event_id.clone())
                .await
                .map_err(|e| format!("failed to read participants for {}: {e}", event.event_id))?;
            #[allow(clippy::cast_possible_wrap)]
            let participants = participants as i64;

            let persisted = self
                .db
                .count_issued(&event.event_id)
                .await
                .map_err(|e| format!("failed to count issuances for {}: {e}", event.event_id))?;

            let previous = self.previous_counts.insert(event.event_id.clone(), persisted);
            let ended = event.end_time <= now || !event.is_active;

            match classify(participants, persisted, previous, ended) {
                Drift::InSync => {
                    tracing::debug!(event_id = %event.event_id, participants, persisted, "in sync");
                }
                Drift::Lag => {
                    drifted += 1;
                    tracing::info!(
                        event_id = %event.event_id,
                        participants,
                        persisted,
                        "writer lagging behind store"
                    );
                }
                Drift::Gap => {
                    drifted += 1;
                    metrics::counter!("coupon.reconcile.gap").increment(1);
                    tracing::warn!(
                        event_id = %event.event_id,
                        participants,
                        persisted,
                        missing = participants - persisted,
                        "stable gap on an ended event, check the dead letter queue"
                    );
                }
                Drift::Overshoot => {
                    drifted += 1;
                    metrics::counter!("coupon.reconcile.overshoot").increment(1);
                    tracing::error!(
                        event_id = %event.event_id,
                        participants,
                        persisted,
                        "database ahead of store, invariant violated"
                    );
                }
            }
        }

        Ok(drifted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_counts_are_in_sync() {
        assert_eq!(classify(100, 100, None, false), Drift::InSync);
        assert_eq!(classify(0, 0, Some(0), true), Drift::InSync);
    }

    #[test]
    fn db_ahead_is_always_overshoot() {
        assert_eq!(classify(10, 11, None, false), Drift::Overshoot);
        assert_eq!(classify(10, 11, Some(11), true), Drift::Overshoot);
    }

    #[test]
    fn shrinking_deficit_is_lag() {
        // Previous pass saw 50 persisted, now 80: the writer is catching up.
        assert_eq!(classify(100, 80, Some(50), true), Drift::Lag);
        // First observation is never a gap.
        assert_eq!(classify(100, 80, None, true), Drift::Lag);
    }

    #[test]
    fn stable_deficit_on_ended_event_is_gap() {
        assert_eq!(classify(100, 80, Some(80), true), Drift::Gap);
    }

    #[test]
    fn stable_deficit_on_live_event_is_still_lag() {
        assert_eq!(classify(100, 80, Some(80), false), Drift::Lag);
    }
}
