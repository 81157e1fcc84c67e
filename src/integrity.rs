//! Tamper-evidence hashing for approval records.
//!
//! Every approval row carries a SHA-256 over a canonical UTF-8 rendering of
//! its fields. The rendering is deterministic across processes and restarts:
//! fields in fixed lexicographic order joined by `|`, decimals at their full
//! declared precision, timestamps as ISO-8601 UTC with microseconds, absent
//! optionals as empty strings, and JSON blobs in sort-keyed canonical form.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sha2::{Digest, Sha256};

use crate::models::ApprovalRequest;

/// Render a price to exactly 8 fractional digits, half-even.
pub fn fmt_price(value: &Decimal) -> String {
    let rounded = value.round_dp_with_strategy(8, RoundingStrategy::MidpointNearestEven);
    format!("{rounded:.8}")
}

/// Render risk/confidence to exactly 2 fractional digits, half-even.
pub fn fmt_pct2(value: &Decimal) -> String {
    let rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven);
    format!("{rounded:.2}")
}

/// Render a timestamp as ISO-8601 UTC with microsecond precision.
pub fn fmt_ts(value: &DateTime<Utc>) -> String {
    value.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Parse a timestamp previously rendered by [`fmt_ts`].
pub fn parse_ts(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Serialize a JSON value with object keys in sorted order at every depth.
///
/// Arrays keep their order; `signal_confluence` is an ordered list and must
/// hash as one.
pub fn canonical_json(value: &serde_json::Value) -> String {
    fn write(value: &serde_json::Value, out: &mut String) {
        match value {
            serde_json::Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                out.push('{');
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&serde_json::Value::String((*key).clone()).to_string());
                    out.push(':');
                    write(&map[*key], out);
                }
                out.push('}');
            }
            serde_json::Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write(item, out);
                }
                out.push(']');
            }
            other => out.push_str(&other.to_string()),
        }
    }

    let mut out = String::new();
    write(value, &mut out);
    out
}

/// The canonical rendering the row hash is computed over.
///
/// Field order is lexicographic by field name and never changes:
/// confidence, correlation_id, decided_at, decided_by, decision_channel,
/// decision_reason, expires_at, id, instrument, reasoning_summary,
/// request_price, requested_at, risk_pct, side, status, trade_id.
pub fn canonical_string(record: &ApprovalRequest) -> String {
    let reasoning = serde_json::to_value(&record.reasoning_summary)
        .map(|v| canonical_json(&v))
        .unwrap_or_default();

    [
        fmt_pct2(&record.confidence),
        record.correlation_id.clone(),
        record.decided_at.as_ref().map(fmt_ts).unwrap_or_default(),
        record.decided_by.clone().unwrap_or_default(),
        record
            .decision_channel
            .map(|c| c.as_str().to_string())
            .unwrap_or_default(),
        record.decision_reason.clone().unwrap_or_default(),
        fmt_ts(&record.expires_at),
        record.id.to_string(),
        record.instrument.clone(),
        reasoning,
        fmt_price(&record.request_price),
        fmt_ts(&record.requested_at),
        fmt_pct2(&record.risk_pct),
        record.side.as_str().to_string(),
        record.status.as_str().to_string(),
        record.trade_id.clone(),
    ]
    .join("|")
}

/// Compute the 64-hex SHA-256 digest of a record's canonical rendering.
pub fn compute(record: &ApprovalRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_string(record).as_bytes());
    hex::encode(hasher.finalize())
}

/// True iff the stored hash matches the hash recomputed over current fields.
pub fn verify(record: &ApprovalRequest) -> bool {
    compute(record) == record.row_hash
}

/// Canonical rendering for a deep-link token row. Same conventions as
/// approvals: lexicographic field order, `|` delimiter, empty string for an
/// unset `used_at`.
pub fn token_canonical_string(token: &crate::models::DeepLinkToken) -> String {
    [
        token.correlation_id.clone(),
        fmt_ts(&token.created_at),
        fmt_ts(&token.expires_at),
        token.token.clone(),
        token.trade_id.clone(),
        token.used_at.as_ref().map(fmt_ts).unwrap_or_default(),
    ]
    .join("|")
}

/// Compute the row hash of a deep-link token.
pub fn compute_token(token: &crate::models::DeepLinkToken) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token_canonical_string(token).as_bytes());
    hex::encode(hasher.finalize())
}

/// True iff the token row's stored hash matches its fields.
pub fn verify_token(token: &crate::models::DeepLinkToken) -> bool {
    compute_token(token) == token.row_hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ApprovalStatus, ReasoningSummary, Side};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn record() -> ApprovalRequest {
        ApprovalRequest {
            id: Uuid::nil(),
            trade_id: "T1".to_string(),
            instrument: "BTCZAR".to_string(),
            side: Side::Buy,
            risk_pct: dec!(1.00),
            confidence: dec!(0.80),
            request_price: dec!(1500000.00000000),
            reasoning_summary: ReasoningSummary {
                trend: "up".to_string(),
                volatility: "low".to_string(),
                signal_confluence: vec!["b".to_string(), "a".to_string()],
                notes: None,
            },
            correlation_id: "corr-1".to_string(),
            status: ApprovalStatus::AwaitingApproval,
            requested_at: Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap(),
            expires_at: Utc.with_ymd_and_hms(2026, 8, 1, 12, 5, 0).unwrap(),
            decided_at: None,
            decided_by: None,
            decision_channel: None,
            decision_reason: None,
            row_hash: String::new(),
        }
    }

    #[test]
    fn hash_is_deterministic() {
        let r = record();
        let h1 = compute(&r);
        let h2 = compute(&r);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn any_field_change_changes_hash() {
        let base = compute(&record());

        let mut r = record();
        r.instrument = "ETHZAR".to_string();
        assert_ne!(compute(&r), base);

        let mut r = record();
        r.request_price = dec!(1500000.00000001);
        assert_ne!(compute(&r), base);

        let mut r = record();
        r.status = ApprovalStatus::Accepted;
        assert_ne!(compute(&r), base);

        let mut r = record();
        r.reasoning_summary.signal_confluence.reverse();
        assert_ne!(compute(&r), base, "confluence order is significant");
    }

    #[test]
    fn verify_detects_tampering() {
        let mut r = record();
        r.row_hash = compute(&r);
        assert!(verify(&r));

        r.risk_pct = dec!(2.00);
        assert!(!verify(&r));
    }

    #[test]
    fn decimals_render_at_full_declared_precision() {
        assert_eq!(fmt_price(&dec!(1500000)), "1500000.00000000");
        assert_eq!(fmt_price(&dec!(0.1)), "0.10000000");
        assert_eq!(fmt_pct2(&dec!(1)), "1.00");
        // Half-even at the 8th fractional digit.
        assert_eq!(fmt_price(&dec!(0.000000005)), "0.00000000");
        assert_eq!(fmt_price(&dec!(0.000000015)), "0.00000002");
        // Half-even at the 2nd fractional digit.
        assert_eq!(fmt_pct2(&dec!(0.125)), "0.12");
        assert_eq!(fmt_pct2(&dec!(0.135)), "0.14");
    }

    #[test]
    fn timestamps_render_with_microseconds() {
        let ts = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        assert_eq!(fmt_ts(&ts), "2026-08-01T12:00:00.000000Z");
        assert_eq!(parse_ts("2026-08-01T12:00:00.000000Z"), Some(ts));
    }

    #[test]
    fn canonical_json_sorts_keys_and_keeps_array_order() {
        let v = serde_json::json!({
            "volatility": "low",
            "trend": "up",
            "signal_confluence": ["b", "a"],
        });
        assert_eq!(
            canonical_json(&v),
            r#"{"signal_confluence":["b","a"],"trend":"up","volatility":"low"}"#
        );
    }

    #[test]
    fn absent_optionals_render_empty() {
        let r = record();
        let canonical = canonical_string(&r);
        // decided_at, decided_by, decision_channel, decision_reason are the
        // 3rd..=6th fields and must all be empty pre-decision.
        let fields: Vec<&str> = canonical.split('|').collect();
        assert_eq!(&fields[2..6], &["", "", "", ""]);
    }
}
