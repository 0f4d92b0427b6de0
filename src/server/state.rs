//! Shared application state for HTTP handlers.

use crate::config::IssuanceConfig;
use crate::db::CouponDatabase;
use crate::issuance::IssuanceService;
use crate::producer::EventLogProducer;
use crate::store::DecisionStore;
use std::sync::Arc;
use std::time::Duration;

/// State handed to every handler. Cheap to clone: everything inside is an
/// `Arc` or pool handle.
#[derive(Clone)]
pub struct AppState {
    /// The synchronous issuance state machine.
    pub service: Arc<IssuanceService>,
    /// Decision store, for status reads and admin seeding.
    pub store: Arc<dyn DecisionStore>,
    /// Log producer, for health probes.
    pub producer: Arc<dyn EventLogProducer>,
    /// Persistent history.
    pub db: CouponDatabase,
    /// Baseline participant TTL for seeding.
    pub participant_ttl: Duration,
    /// Grace past an event's end time when deriving seed TTLs.
    pub ttl_grace: Duration,
}

impl AppState {
    /// Assemble state from the connected collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn DecisionStore>,
        producer: Arc<dyn EventLogProducer>,
        db: CouponDatabase,
        issuance: &IssuanceConfig,
    ) -> Self {
        let participant_ttl = Duration::from_secs(issuance.participant_ttl_secs);
        let service = Arc::new(IssuanceService::new(
            Arc::clone(&store),
            Arc::clone(&producer),
            participant_ttl,
            Duration::from_millis(issuance.request_deadline_ms),
        ));

        Self {
            service,
            store,
            producer,
            db,
            participant_ttl,
            ttl_grace: Duration::from_secs(issuance.ttl_grace_secs),
        }
    }
}
