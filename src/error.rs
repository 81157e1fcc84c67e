//! Error taxonomy for the approval gateway.
//!
//! Every gate maps to exactly one `SEC` code; anything that would let a trade
//! proceed under ambiguity is converted into a rejection upstream of here.

use serde::{Deserialize, Serialize};

/// Stable error codes surfaced in audit entries and API error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecCode {
    /// Missing or invalid authentication.
    Sec001,
    /// Request validation failure or duplicate trade.
    Sec010,
    /// Guardian capital lock engaged (or Guardian unreachable).
    Sec020,
    /// Invalid or stale state transition.
    Sec030,
    /// Missing required configuration.
    Sec040,
    /// Price stale, market data unavailable, or slippage breach.
    Sec050,
    /// Expiry reached.
    Sec060,
    /// Row hash mismatch (tamper evidence).
    Sec080,
    /// Operator not in the authorized set.
    Sec090,
}

impl SecCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecCode::Sec001 => "SEC-001",
            SecCode::Sec010 => "SEC-010",
            SecCode::Sec020 => "SEC-020",
            SecCode::Sec030 => "SEC-030",
            SecCode::Sec040 => "SEC-040",
            SecCode::Sec050 => "SEC-050",
            SecCode::Sec060 => "SEC-060",
            SecCode::Sec080 => "SEC-080",
            SecCode::Sec090 => "SEC-090",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SEC-001" => Some(SecCode::Sec001),
            "SEC-010" => Some(SecCode::Sec010),
            "SEC-020" => Some(SecCode::Sec020),
            "SEC-030" => Some(SecCode::Sec030),
            "SEC-040" => Some(SecCode::Sec040),
            "SEC-050" => Some(SecCode::Sec050),
            "SEC-060" => Some(SecCode::Sec060),
            "SEC-080" => Some(SecCode::Sec080),
            "SEC-090" => Some(SecCode::Sec090),
            _ => None,
        }
    }
}

impl std::fmt::Display for SecCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SecCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SecCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        SecCode::parse(&s).ok_or_else(|| serde::de::Error::custom(format!("unknown code {s}")))
    }
}

/// Gateway error type. Each variant carries enough context for the audit
/// trail; the HTTP layer maps it onto a status and structured error body.
#[derive(Debug, thiserror::Error)]
pub enum HitlError {
    #[error("missing or invalid authentication: {0}")]
    MissingAuth(String),

    #[error("request validation failed: {0}")]
    Validation(String),

    #[error("duplicate trade {trade_id}")]
    DuplicateTrade { trade_id: String },

    #[error("guardian lock engaged: {reason}")]
    GuardianLocked { reason: String },

    #[error("invalid state transition from {from} via {action}")]
    InvalidTransition { from: String, action: String },

    #[error("approval for trade {trade_id} already decided")]
    AlreadyDecided { trade_id: String },

    #[error("deep-link token already used or expired")]
    TokenConsumed,

    #[error("missing required configuration: {0}")]
    MissingConfig(String),

    #[error("slippage {deviation_pct}% exceeds maximum {max_pct}%")]
    SlippageExceeded {
        deviation_pct: String,
        max_pct: String,
    },

    #[error("market data unavailable: {0}")]
    MarketDataUnavailable(String),

    #[error("row hash mismatch for approval {id}")]
    HashMismatch { id: String },

    #[error("operator {operator_id} is not authorized")]
    UnauthorizedOperator { operator_id: String },

    #[error("no approval found for trade {trade_id}")]
    NotFound { trade_id: String },

    #[error("too many decision attempts; retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("storage failure: {0}")]
    Storage(#[from] anyhow::Error),
}

impl HitlError {
    pub fn validation(msg: impl Into<String>) -> Self {
        HitlError::Validation(msg.into())
    }

    pub fn market_data(msg: impl Into<String>) -> Self {
        HitlError::MarketDataUnavailable(msg.into())
    }

    /// The SEC code this error surfaces as, if any. Plain 404s and internal
    /// storage failures carry none.
    pub fn sec_code(&self) -> Option<SecCode> {
        match self {
            HitlError::MissingAuth(_) => Some(SecCode::Sec001),
            HitlError::Validation(_) | HitlError::DuplicateTrade { .. } => Some(SecCode::Sec010),
            HitlError::GuardianLocked { .. } => Some(SecCode::Sec020),
            HitlError::InvalidTransition { .. }
            | HitlError::AlreadyDecided { .. }
            | HitlError::TokenConsumed => Some(SecCode::Sec030),
            HitlError::MissingConfig(_) => Some(SecCode::Sec040),
            HitlError::SlippageExceeded { .. } | HitlError::MarketDataUnavailable(_) => {
                Some(SecCode::Sec050)
            }
            HitlError::HashMismatch { .. } => Some(SecCode::Sec080),
            HitlError::UnauthorizedOperator { .. } => Some(SecCode::Sec090),
            HitlError::NotFound { .. } | HitlError::RateLimited { .. } | HitlError::Storage(_) => {
                None
            }
        }
    }
}

impl From<rusqlite::Error> for HitlError {
    fn from(e: rusqlite::Error) -> Self {
        HitlError::Storage(anyhow::Error::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sec_code_round_trips() {
        for code in [
            SecCode::Sec001,
            SecCode::Sec010,
            SecCode::Sec020,
            SecCode::Sec030,
            SecCode::Sec040,
            SecCode::Sec050,
            SecCode::Sec060,
            SecCode::Sec080,
            SecCode::Sec090,
        ] {
            assert_eq!(SecCode::parse(code.as_str()), Some(code));
        }
        assert_eq!(SecCode::parse("SEC-999"), None);
    }

    #[test]
    fn gate_errors_map_to_their_codes() {
        assert_eq!(
            HitlError::GuardianLocked {
                reason: "drawdown".into()
            }
            .sec_code(),
            Some(SecCode::Sec020)
        );
        assert_eq!(
            HitlError::AlreadyDecided {
                trade_id: "T1".into()
            }
            .sec_code(),
            Some(SecCode::Sec030)
        );
        assert_eq!(
            HitlError::UnauthorizedOperator {
                operator_id: "mallory".into()
            }
            .sec_code(),
            Some(SecCode::Sec090)
        );
        assert_eq!(
            HitlError::NotFound {
                trade_id: "T1".into()
            }
            .sec_code(),
            None
        );
    }
}
