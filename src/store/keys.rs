//! Key layout for the decision store.
//!
//! All three keys touched by the decision script carry the event id inside
//! a `{...}` hash tag, so a cluster deployment hashes them onto one shard
//! and the script stays single-shard legal.

use crate::types::{EventId, UserId};

/// Stock counter: `coupon:{event_id}:stock`.
#[must_use]
pub fn stock_key(event_id: &EventId) -> String {
    format!("coupon:{{{event_id}}}:stock")
}

/// Participant set: `coupon:{event_id}:participants`.
#[must_use]
pub fn participants_key(event_id: &EventId) -> String {
    format!("coupon:{{{event_id}}}:participants")
}

/// Per-user cache slot: `coupon:user:{event_id}:user_id`.
#[must_use]
pub fn user_slot_key(event_id: &EventId, user_id: &UserId) -> String {
    format!("coupon:user:{{{event_id}}}:{user_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_tag(key: &str) -> &str {
        let open = key.find('{').expect("open brace");
        let close = key.find('}').expect("close brace");
        &key[open + 1..close]
    }

    #[test]
    fn layout_matches_wire_contract() {
        let event = EventId::new("e1");
        let user = UserId::new("u1");

        assert_eq!(stock_key(&event), "coupon:{e1}:stock");
        assert_eq!(participants_key(&event), "coupon:{e1}:participants");
        assert_eq!(user_slot_key(&event, &user), "coupon:user:{e1}:u1");
    }

    #[test]
    fn all_keys_share_one_hash_tag() {
        let event = EventId::new("summer-drop");
        let user = UserId::new("u9");

        let stock = stock_key(&event);
        let participants = participants_key(&event);
        let slot = user_slot_key(&event, &user);

        assert_eq!(hash_tag(&stock), "summer-drop");
        assert_eq!(hash_tag(&participants), "summer-drop");
        assert_eq!(hash_tag(&slot), "summer-drop");
    }
}
