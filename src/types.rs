//! Core identifier types and the event-log record schema.
//!
//! Coupon ids are minted by the handler *before* the atomic decision runs,
//! so one id correlates the in-memory cache slot, the log record and the
//! persisted row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque identifier of a coupon campaign.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub String);

impl EventId {
    /// Create an event id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier of a requesting user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    /// Create a user id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique coupon token, 122 random bits via UUID v4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CouponId(pub Uuid);

impl CouponId {
    /// Mint a fresh coupon id.
    #[must_use]
    pub fn mint() -> Self {
        Self(Uuid::new_v4())
    }

    /// Access the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for CouponId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for CouponId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Schema version stamped on every log record.
pub const LOG_SCHEMA_VERSION: u32 = 1;

/// A record on the durable event log, tagged and versioned from day one.
///
/// Partitioning is by [`CouponLogEvent::partition_key`]: coupon lifecycle
/// records share a `event_id:user_id` key so that records for one user are
/// applied in order, while event-scoped records key by event id alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum CouponLogEvent {
    /// A coupon was granted by the atomic decision.
    CouponIssued {
        /// Record schema version
        version: u32,
        /// The pre-minted coupon id
        coupon_id: CouponId,
        /// Winning user
        user_id: UserId,
        /// Campaign the coupon belongs to
        event_id: EventId,
        /// When the decision passed
        issued_at: DateTime<Utc>,
    },
    /// The decision that drained the last unit of stock.
    StockExhausted {
        /// Record schema version
        version: u32,
        /// Campaign that sold out
        event_id: EventId,
        /// Post-decrement stock (zero or below)
        remaining: i64,
        /// When exhaustion was observed
        exhausted_at: DateTime<Utc>,
    },
    /// A previously issued coupon was redeemed.
    CouponRedeemed {
        /// Record schema version
        version: u32,
        /// The redeemed coupon
        coupon_id: CouponId,
        /// Holder of the coupon
        user_id: UserId,
        /// Campaign the coupon belongs to
        event_id: EventId,
        /// When redemption happened
        redeemed_at: DateTime<Utc>,
    },
}

impl CouponLogEvent {
    /// Build the issuance record for a fresh PASS.
    #[must_use]
    pub fn issued(coupon_id: CouponId, user_id: UserId, event_id: EventId) -> Self {
        Self::CouponIssued {
            version: LOG_SCHEMA_VERSION,
            coupon_id,
            user_id,
            event_id,
            issued_at: Utc::now(),
        }
    }

    /// Build the exhaustion record for the draining PASS.
    #[must_use]
    pub fn exhausted(event_id: EventId, remaining: i64) -> Self {
        Self::StockExhausted {
            version: LOG_SCHEMA_VERSION,
            event_id,
            remaining,
            exhausted_at: Utc::now(),
        }
    }

    /// Key that decides the log partition this record lands on.
    #[must_use]
    pub fn partition_key(&self) -> String {
        match self {
            Self::CouponIssued { event_id, user_id, .. }
            | Self::CouponRedeemed { event_id, user_id, .. } => {
                format!("{event_id}:{user_id}")
            }
            Self::StockExhausted { event_id, .. } => event_id.to_string(),
        }
    }

    /// The campaign this record concerns.
    #[must_use]
    pub fn event_id(&self) -> &EventId {
        match self {
            Self::CouponIssued { event_id, .. }
            | Self::StockExhausted { event_id, .. }
            | Self::CouponRedeemed { event_id, .. } => event_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_record_round_trips_as_tagged_json() {
        let record = CouponLogEvent::issued(
            CouponId::mint(),
            UserId::new("u1"),
            EventId::new("e1"),
        );
        let json = serde_json::to_string(&record).expect("serialize");
        assert!(json.contains("\"event_type\":\"coupon_issued\""));
        assert!(json.contains("\"version\":1"));

        let back: CouponLogEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, record);
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let json = r#"{"event_type":"mystery","version":1}"#;
        assert!(serde_json::from_str::<CouponLogEvent>(json).is_err());
    }

    #[test]
    fn partition_key_pins_a_user_to_one_partition() {
        let record = CouponLogEvent::issued(
            CouponId::mint(),
            UserId::new("u42"),
            EventId::new("spring-drop"),
        );
        assert_eq!(record.partition_key(), "spring-drop:u42");

        let exhausted = CouponLogEvent::exhausted(EventId::new("spring-drop"), 0);
        assert_eq!(exhausted.partition_key(), "spring-drop");
    }

    #[test]
    fn coupon_id_parses_back_from_display() {
        let id = CouponId::mint();
        let parsed: CouponId = id.to_string().parse().expect("parse");
        assert_eq!(parsed, id);
    }
}
