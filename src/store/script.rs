//! The two server-side scripts and the reply parser.
//!
//! The issue script is the entire decision: uniqueness check, stock check,
//! debit and admission record in one indivisible step. The compensate
//! script mirrors its shape for the rollback direction. Script text is a
//! process-wide constant; hot reload is out of scope.

use super::Verdict;
use crate::error::StoreError;
use crate::types::CouponId;
use redis::{from_redis_value, Value};

/// Atomic check-and-commit.
///
/// KEYS: stock counter, participant set, per-user cache slot.
/// ARGV: user id, pre-minted coupon id, TTL seconds.
///
/// Replies `{0, <reason>}` on FAIL and `{1, 'SUCCESS', coupon_id,
/// remaining}` on PASS. The TTL refresh on the participant set keeps it
/// alive through the event's post-expiry horizon.
pub const ISSUE_SCRIPT: &str = r"
if redis.call('SISMEMBER', KEYS[2], ARGV[1]) == 1 then
    return {0, 'USER_ALREADY_PARTICIPATED'}
end

local stock = redis.call('GET', KEYS[1])
if not stock then
    return {0, 'STOCK_NOT_INITIALIZED'}
end
if tonumber(stock) <= 0 then
    return {0, 'NO_STOCK_AVAILABLE'}
end

redis.call('SADD', KEYS[2], ARGV[1])
local remaining = redis.call('DECR', KEYS[1])
redis.call('EXPIRE', KEYS[2], ARGV[3])
redis.call('SET', KEYS[3], ARGV[2], 'EX', ARGV[3])

return {1, 'SUCCESS', ARGV[2], remaining}
";

/// Rollback of a PASS whose durability failed.
///
/// KEYS: stock counter, participant set, per-user cache slot.
/// ARGV: user id.
///
/// Guarded by the membership check so re-running is a no-op. Replies 1 when
/// a rollback happened, 0 otherwise.
pub const COMPENSATE_SCRIPT: &str = r"
if redis.call('SISMEMBER', KEYS[2], ARGV[1]) == 0 then
    return 0
end

redis.call('SREM', KEYS[2], ARGV[1])
redis.call('INCR', KEYS[1])
redis.call('DEL', KEYS[3])

return 1
";

/// Decode the issue script's array reply into a [`Verdict`].
pub fn parse_issue_reply(value: &Value) -> Result<Verdict, StoreError> {
    let items: Vec<Value> =
        from_redis_value(value).map_err(|e| StoreError::Script(e.to_string()))?;

    let flag: i64 = element(&items, 0)?;
    let code: String = element(&items, 1)?;

    if flag == 1 {
        let coupon_raw: String = element(&items, 2)?;
        // The script echoes the coupon id back; a mismatch with what we
        // sent would mean cross-request reply confusion.
        coupon_raw
            .parse::<CouponId>()
            .map_err(|e| StoreError::Script(format!("bad coupon id in reply: {e}")))?;
        let remaining: i64 = element(&items, 3)?;
        return Ok(Verdict::Issued { remaining });
    }

    match code.as_str() {
        "USER_ALREADY_PARTICIPATED" => Ok(Verdict::AlreadyParticipated),
        "NO_STOCK_AVAILABLE" => Ok(Verdict::SoldOut),
        "STOCK_NOT_INITIALIZED" => Ok(Verdict::NotInitialized),
        other => Err(StoreError::Script(format!("unknown verdict code: {other}"))),
    }
}

fn element<T: redis::FromRedisValue>(items: &[Value], index: usize) -> Result<T, StoreError> {
    let value = items
        .get(index)
        .ok_or_else(|| StoreError::Script(format!("reply too short, missing element {index}")))?;
    from_redis_value(value).map_err(|e| StoreError::Script(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &str) -> Value {
        Value::BulkString(s.as_bytes().to_vec())
    }

    #[test]
    fn pass_reply_parses_to_issued() {
        let coupon = CouponId::mint();
        let reply = Value::Array(vec![
            Value::Int(1),
            bulk("SUCCESS"),
            bulk(&coupon.to_string()),
            Value::Int(41),
        ]);

        let verdict = parse_issue_reply(&reply).expect("parse");
        assert_eq!(verdict, Verdict::Issued { remaining: 41 });
    }

    #[test]
    fn fail_replies_parse_to_their_verdicts() {
        for (code, expected) in [
            ("USER_ALREADY_PARTICIPATED", Verdict::AlreadyParticipated),
            ("NO_STOCK_AVAILABLE", Verdict::SoldOut),
            ("STOCK_NOT_INITIALIZED", Verdict::NotInitialized),
        ] {
            let reply = Value::Array(vec![Value::Int(0), bulk(code)]);
            assert_eq!(parse_issue_reply(&reply).expect("parse"), expected);
        }
    }

    #[test]
    fn short_or_garbled_replies_are_script_errors() {
        let short = Value::Array(vec![Value::Int(1)]);
        assert!(matches!(
            parse_issue_reply(&short),
            Err(StoreError::Script(_))
        ));

        let unknown = Value::Array(vec![Value::Int(0), bulk("WAT")]);
        assert!(matches!(
            parse_issue_reply(&unknown),
            Err(StoreError::Script(_))
        ));

        let bad_coupon = Value::Array(vec![
            Value::Int(1),
            bulk("SUCCESS"),
            bulk("not-a-uuid"),
            Value::Int(3),
        ]);
        assert!(matches!(
            parse_issue_reply(&bad_coupon),
            Err(StoreError::Script(_))
        ));
    }

    #[test]
    fn scripts_guard_their_entry_conditions() {
        // The issue script must refuse before mutating; the compensate
        // script must be membership-guarded.
        assert!(ISSUE_SCRIPT.find("SISMEMBER").expect("has check") < ISSUE_SCRIPT.find("SADD").expect("has add"));
        assert!(COMPENSATE_SCRIPT.find("SISMEMBER").expect("has check") < COMPENSATE_SCRIPT.find("SREM").expect("has remove"));
    }
}
