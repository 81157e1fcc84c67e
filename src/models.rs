//! Core domain records for the approval gateway.
//!
//! Everything the store persists lives here: the approval record itself,
//! the decision-time market snapshot, the append-only audit entry and the
//! single-use deep-link token, plus the inbound signal/decision payloads.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{HitlError, SecCode};

/// Decision reason written when HITL is disabled (test/bypass mode).
pub const REASON_HITL_DISABLED: &str = "HITL_DISABLED";
/// Decision reason written when an approval times out.
pub const REASON_HITL_TIMEOUT: &str = "HITL_TIMEOUT";
/// Decision reason written when the slippage guard rejects an approve.
pub const REASON_SLIPPAGE_EXCEEDED: &str = "SLIPPAGE_EXCEEDED";
/// Decision reason written when the Guardian lock cascades.
pub const REASON_GUARDIAN_LOCK: &str = "GUARDIAN_LOCK";
/// Decision reason written when a stored row fails hash verification.
pub const REASON_HASH_MISMATCH: &str = "HASH_MISMATCH";
/// Decision reason written when the market-data feed cannot be reached.
pub const REASON_MARKET_DATA_UNAVAILABLE: &str = "MARKET_DATA_UNAVAILABLE";

/// Maximum free-text length for an operator's decision reason.
pub const MAX_DECISION_REASON_LEN: usize = 500;

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }
}

/// Approval lifecycle status.
///
/// Legacy rows may carry an `EXPIRED` status string; it is read back as
/// `Rejected` since expiry is persisted as a system rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    AwaitingApproval,
    Accepted,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::AwaitingApproval => "AWAITING_APPROVAL",
            ApprovalStatus::Accepted => "ACCEPTED",
            ApprovalStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "AWAITING_APPROVAL" => Some(ApprovalStatus::AwaitingApproval),
            "ACCEPTED" => Some(ApprovalStatus::Accepted),
            "REJECTED" | "EXPIRED" => Some(ApprovalStatus::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ApprovalStatus::Accepted | ApprovalStatus::Rejected)
    }
}

/// Where a decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionChannel {
    Web,
    Discord,
    Cli,
    System,
}

impl DecisionChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionChannel::Web => "WEB",
            DecisionChannel::Discord => "DISCORD",
            DecisionChannel::Cli => "CLI",
            DecisionChannel::System => "SYSTEM",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "WEB" => Some(DecisionChannel::Web),
            "DISCORD" => Some(DecisionChannel::Discord),
            "CLI" => Some(DecisionChannel::Cli),
            "SYSTEM" => Some(DecisionChannel::System),
            _ => None,
        }
    }
}

/// Operator verdict on a pending approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Approve,
    Reject,
}

/// Structured reasoning attached to a trade signal.
///
/// Schema-checked at the boundary; hashed via its canonical sort-keyed JSON
/// rendering (see `integrity::canonical_json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningSummary {
    pub trend: String,
    pub volatility: String,
    pub signal_confluence: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Inbound trade signal requesting human approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSignal {
    pub trade_id: String,
    pub instrument: String,
    pub side: Side,
    pub risk_pct: Decimal,
    pub confidence: Decimal,
    pub request_price: Decimal,
    pub reasoning_summary: ReasoningSummary,
    pub correlation_id: String,
}

impl TradeSignal {
    /// Boundary validation. Rejected signals never reach the store.
    pub fn validate(&self) -> Result<(), HitlError> {
        if self.trade_id.trim().is_empty() {
            return Err(HitlError::validation("trade_id must not be empty"));
        }
        if self.instrument.trim().is_empty() {
            return Err(HitlError::validation("instrument must not be empty"));
        }
        if self.risk_pct < Decimal::ZERO || self.risk_pct > Decimal::from(100) {
            return Err(HitlError::validation("risk_pct must be within 0..=100"));
        }
        if self.confidence < Decimal::ZERO || self.confidence > Decimal::ONE {
            return Err(HitlError::validation("confidence must be within 0..=1"));
        }
        if self.request_price <= Decimal::ZERO {
            return Err(HitlError::validation("request_price must be positive"));
        }
        Ok(())
    }
}

/// Operator decision on a pending approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub trade_id: String,
    pub verdict: Verdict,
    pub operator_id: String,
    pub channel: DecisionChannel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub correlation_id: String,
}

impl DecisionRequest {
    pub fn validate(&self) -> Result<(), HitlError> {
        if self.operator_id.trim().is_empty() {
            return Err(HitlError::validation("operator_id must not be empty"));
        }
        if let Some(reason) = &self.reason {
            if reason.chars().count() > MAX_DECISION_REASON_LEN {
                return Err(HitlError::validation(
                    "decision reason exceeds 500 characters",
                ));
            }
        }
        Ok(())
    }
}

/// The canonical approval record.
///
/// Immutable after creation except for the six decision fields and
/// `row_hash`; the store's triggers enforce this at the SQL layer and
/// `integrity::verify` enforces it on every read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub trade_id: String,
    pub instrument: String,
    pub side: Side,
    pub risk_pct: Decimal,
    pub confidence: Decimal,
    pub request_price: Decimal,
    pub reasoning_summary: ReasoningSummary,
    pub correlation_id: String,
    pub status: ApprovalStatus,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<String>,
    pub decision_channel: Option<DecisionChannel>,
    pub decision_reason: Option<String>,
    pub row_hash: String,
}

impl ApprovalRequest {
    pub fn is_decided(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Server-side countdown surfaced to the pending-list UI.
    pub fn seconds_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }
}

/// Market context captured at decision time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostTradeSnapshot {
    pub approval_id: Uuid,
    pub bid: Decimal,
    pub ask: Decimal,
    pub spread: Decimal,
    pub mid_price: Decimal,
    pub response_latency_ms: i64,
    pub price_deviation_pct: Decimal,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
}

impl PostTradeSnapshot {
    /// Derive spread, mid and deviation from a quote and the request price.
    ///
    /// Invariants: `ask >= bid`, all prices positive.
    pub fn from_quote(
        approval: &ApprovalRequest,
        bid: Decimal,
        ask: Decimal,
        response_latency_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<Self, HitlError> {
        if bid <= Decimal::ZERO || ask <= Decimal::ZERO {
            return Err(HitlError::market_data("quote prices must be positive"));
        }
        if ask < bid {
            return Err(HitlError::market_data("quote ask below bid"));
        }
        let mid_price = (bid + ask) / Decimal::TWO;
        let deviation = ((mid_price - approval.request_price).abs() / approval.request_price)
            * Decimal::ONE_HUNDRED;
        Ok(Self {
            approval_id: approval.id,
            bid,
            ask,
            spread: ask - bid,
            mid_price,
            response_latency_ms,
            price_deviation_pct: deviation,
            correlation_id: approval.correlation_id.clone(),
            created_at: now,
        })
    }
}

/// Verbs recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    CreateBlocked,
    DecideBlocked,
    Approve,
    Reject,
    Expire,
    GuardianCascadeReject,
    UnauthorizedAttempt,
    HashMismatch,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::CreateBlocked => "CREATE_BLOCKED",
            AuditAction::DecideBlocked => "DECIDE_BLOCKED",
            AuditAction::Approve => "APPROVE",
            AuditAction::Reject => "REJECT",
            AuditAction::Expire => "EXPIRE",
            AuditAction::GuardianCascadeReject => "GUARDIAN_CASCADE_REJECT",
            AuditAction::UnauthorizedAttempt => "UNAUTHORIZED_ATTEMPT",
            AuditAction::HashMismatch => "HASH_MISMATCH",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATE" => Some(AuditAction::Create),
            "CREATE_BLOCKED" => Some(AuditAction::CreateBlocked),
            "DECIDE_BLOCKED" => Some(AuditAction::DecideBlocked),
            "APPROVE" => Some(AuditAction::Approve),
            "REJECT" => Some(AuditAction::Reject),
            "EXPIRE" => Some(AuditAction::Expire),
            "GUARDIAN_CASCADE_REJECT" => Some(AuditAction::GuardianCascadeReject),
            "UNAUTHORIZED_ATTEMPT" => Some(AuditAction::UnauthorizedAttempt),
            "HASH_MISMATCH" => Some(AuditAction::HashMismatch),
            _ => None,
        }
    }
}

/// Append-only record of a state-changing action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor_id: String,
    pub action: AuditAction,
    pub target_type: String,
    pub target_id: String,
    pub previous_state: Option<serde_json::Value>,
    pub new_state: Option<serde_json::Value>,
    pub payload: Option<serde_json::Value>,
    pub correlation_id: String,
    pub error_code: Option<SecCode>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        actor_id: impl Into<String>,
        action: AuditAction,
        target_id: impl Into<String>,
        correlation_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            actor_id: actor_id.into(),
            action,
            target_type: "approval_request".to_string(),
            target_id: target_id.into(),
            previous_state: None,
            new_state: None,
            payload: None,
            correlation_id: correlation_id.into(),
            error_code: None,
            created_at: now,
        }
    }

    pub fn with_states(
        mut self,
        previous: Option<serde_json::Value>,
        new: Option<serde_json::Value>,
    ) -> Self {
        self.previous_state = previous;
        self.new_state = new;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_error_code(mut self, code: SecCode) -> Self {
        self.error_code = Some(code);
        self
    }
}

/// Single-use access token letting a chat deep-link resolve to one approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepLinkToken {
    pub token: String,
    pub trade_id: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
    pub row_hash: String,
}

/// Events published on the in-process bus for UI consumers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HitlEvent {
    #[serde(rename = "hitl.created")]
    Created {
        approval: ApprovalRequest,
        seconds_remaining: i64,
    },
    #[serde(rename = "hitl.decided")]
    Decided { approval: ApprovalRequest },
    #[serde(rename = "hitl.expired")]
    Expired { approval: ApprovalRequest },
    /// System-level alert (hash mismatch, configuration failure).
    #[serde(rename = "hitl.alert")]
    Alert {
        code: SecCode,
        message: String,
        correlation_id: String,
    },
}

impl HitlEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            HitlEvent::Created { .. } => "hitl.created",
            HitlEvent::Decided { .. } => "hitl.decided",
            HitlEvent::Expired { .. } => "hitl.expired",
            HitlEvent::Alert { .. } => "hitl.alert",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn summary() -> ReasoningSummary {
        ReasoningSummary {
            trend: "up".to_string(),
            volatility: "low".to_string(),
            signal_confluence: vec!["ema_cross".to_string(), "volume_spike".to_string()],
            notes: None,
        }
    }

    fn signal() -> TradeSignal {
        TradeSignal {
            trade_id: "T1".to_string(),
            instrument: "BTCZAR".to_string(),
            side: Side::Buy,
            risk_pct: dec!(1.00),
            confidence: dec!(0.80),
            request_price: dec!(1500000.00000000),
            reasoning_summary: summary(),
            correlation_id: "corr-1".to_string(),
        }
    }

    #[test]
    fn signal_validation_bounds() {
        assert!(signal().validate().is_ok());

        let mut bad = signal();
        bad.risk_pct = dec!(101);
        assert!(bad.validate().is_err());

        let mut bad = signal();
        bad.confidence = dec!(1.01);
        assert!(bad.validate().is_err());

        let mut bad = signal();
        bad.request_price = Decimal::ZERO;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn status_parses_legacy_expired_as_rejected() {
        assert_eq!(
            ApprovalStatus::parse("EXPIRED"),
            Some(ApprovalStatus::Rejected)
        );
    }

    #[test]
    fn decision_reason_length_capped() {
        let mut decision = DecisionRequest {
            trade_id: "T1".to_string(),
            verdict: Verdict::Reject,
            operator_id: "op1".to_string(),
            channel: DecisionChannel::Web,
            reason: Some("x".repeat(MAX_DECISION_REASON_LEN)),
            correlation_id: "corr-1".to_string(),
        };
        assert!(decision.validate().is_ok());

        decision.reason = Some("x".repeat(MAX_DECISION_REASON_LEN + 1));
        assert!(decision.validate().is_err());
    }

    #[test]
    fn snapshot_derives_spread_mid_and_deviation() {
        let approval = ApprovalRequest {
            id: Uuid::new_v4(),
            trade_id: "T1".to_string(),
            instrument: "BTCZAR".to_string(),
            side: Side::Buy,
            risk_pct: dec!(1.00),
            confidence: dec!(0.80),
            request_price: dec!(1000.00000000),
            reasoning_summary: summary(),
            correlation_id: "corr-1".to_string(),
            status: ApprovalStatus::AwaitingApproval,
            requested_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::seconds(300),
            decided_at: None,
            decided_by: None,
            decision_channel: None,
            decision_reason: None,
            row_hash: String::new(),
        };

        let snap =
            PostTradeSnapshot::from_quote(&approval, dec!(999), dec!(1001), 12, Utc::now()).unwrap();
        assert_eq!(snap.spread, dec!(2));
        assert_eq!(snap.mid_price, dec!(1000));
        assert_eq!(snap.price_deviation_pct, Decimal::ZERO);

        assert!(
            PostTradeSnapshot::from_quote(&approval, dec!(1001), dec!(999), 0, Utc::now()).is_err()
        );
    }
}
