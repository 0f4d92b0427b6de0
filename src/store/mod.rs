//! The in-memory decision store: sole authority on who wins a coupon.
//!
//! All mutations route through two server-side scripts that each execute as
//! a single indivisible step relative to every other command, which is what
//! makes the system correct without distributed locks. The trait seam here
//! exists so the issuance service and tests can run against an in-memory
//! double with identical semantics (see [`crate::testing`]).

mod keys;
mod redis;
mod script;

pub use self::keys::{participants_key, stock_key, user_slot_key};
pub use self::redis::RedisDecisionStore;
pub use self::script::{COMPENSATE_SCRIPT, ISSUE_SCRIPT};

use crate::error::StoreError;
use crate::types::{CouponId, EventId, UserId};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Outcome of one evaluation of the atomic decision script.
///
/// The three FAIL verdicts are terminal for the request; the handler never
/// retries them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The user won: stock was debited exactly once and the user is now a
    /// member of the participant set. `remaining` is the post-decrement
    /// counter value and is never negative.
    Issued {
        /// Post-decrement stock
        remaining: i64,
    },
    /// The user already holds (or was already refused) a coupon here.
    AlreadyParticipated,
    /// Stock reached zero before this request.
    SoldOut,
    /// The stock key does not exist: the event was never initialized.
    /// Seeding is an explicit admin action, never done on first issuance.
    NotInitialized,
}

impl Verdict {
    /// Wire-level reason code for the two business rejections.
    #[must_use]
    pub const fn reason(&self) -> Option<&'static str> {
        match self {
            Self::AlreadyParticipated => Some("USER_ALREADY_PARTICIPATED"),
            Self::SoldOut => Some("NO_STOCK_AVAILABLE"),
            Self::Issued { .. } | Self::NotInitialized => None,
        }
    }
}

/// Boxed future type used by the store seam.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Typed client over the decision store.
///
/// Implementations must preserve the atomicity contract: `issue` and
/// `compensate` are single indivisible steps, and `issue` is **never**
/// transparently retried (it is not idempotent). Idempotent reads may be
/// retried on connection loss.
pub trait DecisionStore: Send + Sync {
    /// Seed the stock counter for an event. Returns `true` if this call
    /// created the counter, `false` if it already existed (re-running is a
    /// no-op by design).
    fn init_event(&self, event_id: EventId, stock: u64, ttl: Duration) -> StoreFuture<'_, bool>;

    /// Evaluate the atomic decision for `(event, user)` with a pre-minted
    /// coupon id.
    fn issue(
        &self,
        event_id: EventId,
        user_id: UserId,
        coupon_id: CouponId,
        ttl: Duration,
    ) -> StoreFuture<'_, Verdict>;

    /// Undo a PASS whose durability could not be achieved: re-increment
    /// stock and remove the participant, guarded by a membership check so
    /// re-running is idempotent. Returns `true` if a rollback happened.
    fn compensate(&self, event_id: EventId, user_id: UserId) -> StoreFuture<'_, bool>;

    /// Current stock counter, `None` when the event was never initialized.
    fn remaining(&self, event_id: EventId) -> StoreFuture<'_, Option<i64>>;

    /// Cardinality of the participant set.
    fn participants_count(&self, event_id: EventId) -> StoreFuture<'_, u64>;

    /// The coupon cached for a user, if any.
    fn get_user_coupon(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> StoreFuture<'_, Option<CouponId>>;

    /// Liveness probe.
    fn ping(&self) -> StoreFuture<'_, ()>;
}
