//! Transactional persistence for approvals, snapshots, audit entries and
//! deep-link tokens.
//!
//! The store is the only component allowed to touch the database. Every
//! mutating operation appends its audit entry inside the same transaction;
//! partial failure rolls both back. Immutability is enforced twice: by the
//! whitelist/no-delete triggers in the schema and by hash verification on
//! read.
//!
//! Decisions use a conditional UPDATE (`WHERE status = 'AWAITING_APPROVAL'`)
//! so that concurrent approve/reject/expire attempts serialize in SQLite and
//! only the first succeeds. There is no in-process lock on approval records.

use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::error::HitlError;
use crate::integrity;
use crate::models::{
    ApprovalRequest, ApprovalStatus, AuditAction, AuditEntry, DecisionChannel, DeepLinkToken,
    PostTradeSnapshot, ReasoningSummary, Side,
};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS approvals (
    id TEXT PRIMARY KEY,
    trade_id TEXT NOT NULL UNIQUE,
    instrument TEXT NOT NULL,
    side TEXT NOT NULL CHECK (side IN ('BUY', 'SELL')),
    risk_pct TEXT NOT NULL,
    confidence TEXT NOT NULL,
    request_price TEXT NOT NULL,
    reasoning_summary TEXT NOT NULL,
    correlation_id TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('AWAITING_APPROVAL', 'ACCEPTED', 'REJECTED', 'EXPIRED')),
    requested_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    decided_at TEXT,
    decided_by TEXT,
    decision_channel TEXT,
    decision_reason TEXT,
    row_hash TEXT NOT NULL CHECK (length(row_hash) = 64),
    CHECK (expires_at > requested_at)
);

CREATE INDEX IF NOT EXISTS idx_approvals_status_expires
    ON approvals(status, expires_at ASC);

CREATE TABLE IF NOT EXISTS post_trade_snapshots (
    approval_id TEXT PRIMARY KEY REFERENCES approvals(id),
    bid TEXT NOT NULL,
    ask TEXT NOT NULL,
    spread TEXT NOT NULL,
    mid_price TEXT NOT NULL,
    response_latency_ms INTEGER NOT NULL,
    price_deviation_pct TEXT NOT NULL,
    correlation_id TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    actor_id TEXT NOT NULL,
    action TEXT NOT NULL,
    target_type TEXT NOT NULL,
    target_id TEXT NOT NULL,
    previous_state TEXT,
    new_state TEXT,
    payload TEXT,
    correlation_id TEXT NOT NULL,
    error_code TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_target
    ON audit_log(target_id, id ASC);

CREATE TABLE IF NOT EXISTS deep_link_tokens (
    token TEXT PRIMARY KEY CHECK (length(token) = 64),
    trade_id TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    used_at TEXT,
    correlation_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    row_hash TEXT NOT NULL CHECK (length(row_hash) = 64)
);

-- Hard deletes are forbidden everywhere; decided approvals are final; audit
-- and snapshot rows are insert-only; token rows permit exactly one mutation:
-- setting used_at (with its re-hash) while it is still null.

CREATE TRIGGER IF NOT EXISTS approvals_no_delete
BEFORE DELETE ON approvals
BEGIN
    SELECT RAISE(ABORT, 'SEC: approvals must never be deleted');
END;

CREATE TRIGGER IF NOT EXISTS approvals_update_whitelist
BEFORE UPDATE ON approvals
WHEN OLD.id IS NOT NEW.id
    OR OLD.trade_id IS NOT NEW.trade_id
    OR OLD.instrument IS NOT NEW.instrument
    OR OLD.side IS NOT NEW.side
    OR OLD.risk_pct IS NOT NEW.risk_pct
    OR OLD.confidence IS NOT NEW.confidence
    OR OLD.request_price IS NOT NEW.request_price
    OR OLD.reasoning_summary IS NOT NEW.reasoning_summary
    OR OLD.correlation_id IS NOT NEW.correlation_id
    OR OLD.requested_at IS NOT NEW.requested_at
    OR OLD.expires_at IS NOT NEW.expires_at
BEGIN
    SELECT RAISE(ABORT, 'SEC: column outside decision whitelist');
END;

CREATE TRIGGER IF NOT EXISTS approvals_terminal_final
BEFORE UPDATE ON approvals
WHEN OLD.status IN ('ACCEPTED', 'REJECTED', 'EXPIRED')
BEGIN
    SELECT RAISE(ABORT, 'SEC: decided approvals are final');
END;

CREATE TRIGGER IF NOT EXISTS snapshots_no_delete
BEFORE DELETE ON post_trade_snapshots
BEGIN
    SELECT RAISE(ABORT, 'SEC: snapshots must never be deleted');
END;

CREATE TRIGGER IF NOT EXISTS snapshots_no_update
BEFORE UPDATE ON post_trade_snapshots
BEGIN
    SELECT RAISE(ABORT, 'SEC: snapshots are immutable');
END;

CREATE TRIGGER IF NOT EXISTS audit_no_delete
BEFORE DELETE ON audit_log
BEGIN
    SELECT RAISE(ABORT, 'SEC: audit entries must never be deleted');
END;

CREATE TRIGGER IF NOT EXISTS audit_no_update
BEFORE UPDATE ON audit_log
BEGIN
    SELECT RAISE(ABORT, 'SEC: audit entries are immutable');
END;

CREATE TRIGGER IF NOT EXISTS tokens_no_delete
BEFORE DELETE ON deep_link_tokens
BEGIN
    SELECT RAISE(ABORT, 'SEC: tokens must never be deleted');
END;

CREATE TRIGGER IF NOT EXISTS tokens_single_mutation
BEFORE UPDATE ON deep_link_tokens
WHEN OLD.token IS NOT NEW.token
    OR OLD.trade_id IS NOT NEW.trade_id
    OR OLD.expires_at IS NOT NEW.expires_at
    OR OLD.correlation_id IS NOT NEW.correlation_id
    OR OLD.created_at IS NOT NEW.created_at
    OR OLD.used_at IS NOT NULL
    OR NEW.used_at IS NULL
BEGIN
    SELECT RAISE(ABORT, 'SEC: tokens permit only setting used_at once');
END;
"#;

const APPROVAL_COLUMNS: &str = "id, trade_id, instrument, side, risk_pct, confidence, \
     request_price, reasoning_summary, correlation_id, status, requested_at, expires_at, \
     decided_at, decided_by, decision_channel, decision_reason, row_hash";

/// Result of a hash-verified pending scan. Corrupted rows are excluded from
/// the valid list but surfaced so callers can quarantine them.
#[derive(Debug, Default)]
pub struct PendingScan {
    pub valid: Vec<ApprovalRequest>,
    pub corrupted: Vec<ApprovalRequest>,
}

#[derive(Clone)]
pub struct ApprovalStore {
    conn: Arc<Mutex<Connection>>,
}

impl ApprovalStore {
    pub fn open(db_path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(db_path).context("open approval db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON").ok();
        conn.execute_batch(SCHEMA_SQL)
            .context("apply approval schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert a new approval together with its CREATE audit entry.
    pub async fn create(
        &self,
        record: &ApprovalRequest,
        audit: &AuditEntry,
    ) -> Result<(), HitlError> {
        let conn = self.conn.lock().await;
        conn.execute("BEGIN IMMEDIATE", [])?;

        let result = (|| -> Result<(), HitlError> {
            let mut insert = conn.prepare_cached(&format!(
                "INSERT INTO approvals ({APPROVAL_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
            ))?;
            insert
                .execute(params![
                    record.id.to_string(),
                    record.trade_id,
                    record.instrument,
                    record.side.as_str(),
                    integrity::fmt_pct2(&record.risk_pct),
                    integrity::fmt_pct2(&record.confidence),
                    integrity::fmt_price(&record.request_price),
                    reasoning_text(&record.reasoning_summary)?,
                    record.correlation_id,
                    record.status.as_str(),
                    integrity::fmt_ts(&record.requested_at),
                    integrity::fmt_ts(&record.expires_at),
                    record.decided_at.as_ref().map(integrity::fmt_ts),
                    record.decided_by,
                    record.decision_channel.map(|c| c.as_str()),
                    record.decision_reason,
                    record.row_hash,
                ])
                .map_err(|e| {
                    if is_unique_violation(&e, "approvals.trade_id") {
                        HitlError::DuplicateTrade {
                            trade_id: record.trade_id.clone(),
                        }
                    } else {
                        e.into()
                    }
                })?;

            insert_audit(&conn, audit)?;
            Ok(())
        })();

        finish_tx(&conn, result)
    }

    /// Apply a decided record. The UPDATE is conditional on the row still
    /// being AWAITING_APPROVAL; losing a race surfaces `SEC-030` and nothing
    /// is written.
    pub async fn decide(
        &self,
        decided: &ApprovalRequest,
        audit: &AuditEntry,
        snapshot: Option<&PostTradeSnapshot>,
    ) -> Result<(), HitlError> {
        debug_assert!(decided.status.is_terminal());

        let conn = self.conn.lock().await;
        conn.execute("BEGIN IMMEDIATE", [])?;

        let result = (|| -> Result<(), HitlError> {
            let mut update = conn.prepare_cached(
                "UPDATE approvals SET \
                     status = ?1, decided_at = ?2, decided_by = ?3, \
                     decision_channel = ?4, decision_reason = ?5, row_hash = ?6 \
                 WHERE trade_id = ?7 AND status = 'AWAITING_APPROVAL'",
            )?;
            let changed = update.execute(params![
                decided.status.as_str(),
                decided.decided_at.as_ref().map(integrity::fmt_ts),
                decided.decided_by,
                decided.decision_channel.map(|c| c.as_str()),
                decided.decision_reason,
                decided.row_hash,
                decided.trade_id,
            ])?;

            if changed == 0 {
                return Err(HitlError::AlreadyDecided {
                    trade_id: decided.trade_id.clone(),
                });
            }

            insert_audit(&conn, audit)?;

            if let Some(snap) = snapshot {
                let mut insert = conn.prepare_cached(
                    "INSERT INTO post_trade_snapshots \
                         (approval_id, bid, ask, spread, mid_price, response_latency_ms, \
                          price_deviation_pct, correlation_id, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )?;
                insert.execute(params![
                    snap.approval_id.to_string(),
                    integrity::fmt_price(&snap.bid),
                    integrity::fmt_price(&snap.ask),
                    integrity::fmt_price(&snap.spread),
                    integrity::fmt_price(&snap.mid_price),
                    snap.response_latency_ms,
                    format!(
                        "{:.4}",
                        snap.price_deviation_pct.round_dp_with_strategy(
                            4,
                            rust_decimal::RoundingStrategy::MidpointNearestEven
                        )
                    ),
                    snap.correlation_id,
                    integrity::fmt_ts(&snap.created_at),
                ])?;
            }

            Ok(())
        })();

        finish_tx(&conn, result)
    }

    /// Append a standalone audit entry (blocked creates, unauthorized
    /// attempts) outside any record mutation.
    pub async fn append_audit(&self, audit: &AuditEntry) -> Result<(), HitlError> {
        let conn = self.conn.lock().await;
        insert_audit(&conn, audit)
    }

    /// All AWAITING_APPROVAL rows ordered by `expires_at` ascending, each
    /// hash-verified. Mismatches are quarantined into `corrupted`.
    pub async fn fetch_pending(&self) -> Result<PendingScan, HitlError> {
        let rows = self.fetch_awaiting_raw().await?;
        let mut scan = PendingScan::default();
        for record in rows {
            if integrity::verify(&record) {
                scan.valid.push(record);
            } else {
                warn!(
                    approval_id = %record.id,
                    trade_id = %record.trade_id,
                    "row hash mismatch on pending read"
                );
                scan.corrupted.push(record);
            }
        }
        Ok(scan)
    }

    /// All AWAITING_APPROVAL rows without hash verification, ordered by
    /// `expires_at` ascending. Recovery decides what to do with bad rows.
    pub async fn fetch_awaiting_raw(&self) -> Result<Vec<ApprovalRequest>, HitlError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approvals \
             WHERE status = 'AWAITING_APPROVAL' ORDER BY expires_at ASC"
        ))?;
        let rows = stmt
            .query_map([], row_to_approval)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// AWAITING_APPROVAL rows whose deadline has passed.
    pub async fn fetch_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ApprovalRequest>, HitlError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approvals \
             WHERE status = 'AWAITING_APPROVAL' AND expires_at <= ?1 \
             ORDER BY expires_at ASC"
        ))?;
        let rows = stmt
            .query_map([integrity::fmt_ts(&now)], row_to_approval)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub async fn fetch_by_trade_id(
        &self,
        trade_id: &str,
    ) -> Result<Option<ApprovalRequest>, HitlError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approvals WHERE trade_id = ?1"
        ))?;
        let mut rows = stmt.query_map([trade_id], row_to_approval)?;
        rows.next().transpose().map_err(Into::into)
    }

    pub async fn fetch_by_id(&self, id: Uuid) -> Result<Option<ApprovalRequest>, HitlError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approvals WHERE id = ?1"
        ))?;
        let mut rows = stmt.query_map([id.to_string()], row_to_approval)?;
        rows.next().transpose().map_err(Into::into)
    }

    pub async fn insert_token(&self, token: &DeepLinkToken) -> Result<(), HitlError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "INSERT INTO deep_link_tokens \
                 (token, trade_id, expires_at, used_at, correlation_id, created_at, row_hash) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        stmt.execute(params![
            token.token,
            token.trade_id,
            integrity::fmt_ts(&token.expires_at),
            token.used_at.as_ref().map(integrity::fmt_ts),
            token.correlation_id,
            integrity::fmt_ts(&token.created_at),
            token.row_hash,
        ])?;
        Ok(())
    }

    /// Consume a token: at most one caller ever succeeds. Expired, unknown
    /// and already-used tokens all surface `SEC-030`.
    pub async fn redeem_token(
        &self,
        token_value: &str,
        now: DateTime<Utc>,
    ) -> Result<String, HitlError> {
        let conn = self.conn.lock().await;
        conn.execute("BEGIN IMMEDIATE", [])?;

        let result = (|| -> Result<String, HitlError> {
            let mut stmt = conn.prepare_cached(
                "SELECT token, trade_id, expires_at, used_at, correlation_id, created_at, row_hash \
                 FROM deep_link_tokens WHERE token = ?1",
            )?;
            let mut rows = stmt.query_map([token_value], row_to_token)?;
            let Some(existing) = rows.next().transpose()? else {
                return Err(HitlError::TokenConsumed);
            };
            drop(rows);

            if now >= existing.expires_at {
                return Err(HitlError::TokenConsumed);
            }

            let mut consumed = existing.clone();
            consumed.used_at = Some(now);
            consumed.row_hash = integrity::compute_token(&consumed);

            let mut update = conn.prepare_cached(
                "UPDATE deep_link_tokens SET used_at = ?1, row_hash = ?2 \
                 WHERE token = ?3 AND used_at IS NULL",
            )?;
            let changed = update.execute(params![
                integrity::fmt_ts(&now),
                consumed.row_hash,
                token_value,
            ])?;
            if changed == 0 {
                return Err(HitlError::TokenConsumed);
            }

            Ok(existing.trade_id)
        })();

        finish_tx(&conn, result)
    }

    pub async fn token_by_value(
        &self,
        token_value: &str,
    ) -> Result<Option<DeepLinkToken>, HitlError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT token, trade_id, expires_at, used_at, correlation_id, created_at, row_hash \
             FROM deep_link_tokens WHERE token = ?1",
        )?;
        let mut rows = stmt.query_map([token_value], row_to_token)?;
        rows.next().transpose().map_err(Into::into)
    }

    /// Audit entries for one target, oldest first.
    pub async fn audit_for_target(&self, target_id: &str) -> Result<Vec<AuditEntry>, HitlError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT actor_id, action, target_type, target_id, previous_state, new_state, \
                    payload, correlation_id, error_code, created_at \
             FROM audit_log WHERE target_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map([target_id], row_to_audit)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub async fn snapshot_for(
        &self,
        approval_id: Uuid,
    ) -> Result<Option<PostTradeSnapshot>, HitlError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT approval_id, bid, ask, spread, mid_price, response_latency_ms, \
                    price_deviation_pct, correlation_id, created_at \
             FROM post_trade_snapshots WHERE approval_id = ?1",
        )?;
        let mut rows = stmt.query_map([approval_id.to_string()], row_to_snapshot)?;
        rows.next().transpose().map_err(Into::into)
    }

    /// Escape hatch for invariant tests: run raw SQL against the live
    /// connection (e.g. attempted DELETEs that the triggers must refuse).
    pub async fn execute_raw(&self, sql: &str) -> Result<usize, HitlError> {
        let conn = self.conn.lock().await;
        conn.execute(sql, []).map_err(Into::into)
    }
}

fn finish_tx<T>(conn: &Connection, result: Result<T, HitlError>) -> Result<T, HitlError> {
    match result {
        Ok(value) => {
            conn.execute("COMMIT", [])?;
            Ok(value)
        }
        Err(e) => {
            let _ = conn.execute("ROLLBACK", []);
            Err(e)
        }
    }
}

fn insert_audit(conn: &Connection, audit: &AuditEntry) -> Result<(), HitlError> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO audit_log \
             (actor_id, action, target_type, target_id, previous_state, new_state, payload, \
              correlation_id, error_code, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )?;
    stmt.execute(params![
        audit.actor_id,
        audit.action.as_str(),
        audit.target_type,
        audit.target_id,
        audit.previous_state.as_ref().map(|v| v.to_string()),
        audit.new_state.as_ref().map(|v| v.to_string()),
        audit.payload.as_ref().map(|v| v.to_string()),
        audit.correlation_id,
        audit.error_code.map(|c| c.as_str()),
        integrity::fmt_ts(&audit.created_at),
    ])?;
    Ok(())
}

fn is_unique_violation(e: &rusqlite::Error, column: &str) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(rusqlite::ErrorCode::ConstraintViolation)
    ) && e.to_string().contains(column)
}

fn reasoning_text(summary: &ReasoningSummary) -> Result<String, HitlError> {
    let value = serde_json::to_value(summary)
        .map_err(|e| HitlError::Storage(anyhow::Error::new(e)))?;
    Ok(integrity::canonical_json(&value))
}

fn bad_column(idx: usize, what: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("malformed {what}").into(),
    )
}

fn parse_decimal(idx: usize, raw: &str, what: &str) -> rusqlite::Result<Decimal> {
    raw.parse::<Decimal>().map_err(|_| bad_column(idx, what))
}

fn parse_ts_col(idx: usize, raw: &str, what: &str) -> rusqlite::Result<DateTime<Utc>> {
    integrity::parse_ts(raw).ok_or_else(|| bad_column(idx, what))
}

fn row_to_approval(row: &rusqlite::Row<'_>) -> rusqlite::Result<ApprovalRequest> {
    let id_raw: String = row.get(0)?;
    let side_raw: String = row.get(3)?;
    let risk_raw: String = row.get(4)?;
    let conf_raw: String = row.get(5)?;
    let price_raw: String = row.get(6)?;
    let reasoning_raw: String = row.get(7)?;
    let status_raw: String = row.get(9)?;
    let requested_raw: String = row.get(10)?;
    let expires_raw: String = row.get(11)?;
    let decided_raw: Option<String> = row.get(12)?;
    let channel_raw: Option<String> = row.get(14)?;

    Ok(ApprovalRequest {
        id: id_raw.parse().map_err(|_| bad_column(0, "approval id"))?,
        trade_id: row.get(1)?,
        instrument: row.get(2)?,
        side: Side::parse(&side_raw).ok_or_else(|| bad_column(3, "side"))?,
        risk_pct: parse_decimal(4, &risk_raw, "risk_pct")?,
        confidence: parse_decimal(5, &conf_raw, "confidence")?,
        request_price: parse_decimal(6, &price_raw, "request_price")?,
        reasoning_summary: serde_json::from_str(&reasoning_raw)
            .map_err(|_| bad_column(7, "reasoning_summary"))?,
        correlation_id: row.get(8)?,
        status: ApprovalStatus::parse(&status_raw).ok_or_else(|| bad_column(9, "status"))?,
        requested_at: parse_ts_col(10, &requested_raw, "requested_at")?,
        expires_at: parse_ts_col(11, &expires_raw, "expires_at")?,
        decided_at: decided_raw
            .map(|raw| parse_ts_col(12, &raw, "decided_at"))
            .transpose()?,
        decided_by: row.get(13)?,
        decision_channel: channel_raw
            .map(|raw| DecisionChannel::parse(&raw).ok_or_else(|| bad_column(14, "channel")))
            .transpose()?,
        decision_reason: row.get(15)?,
        row_hash: row.get(16)?,
    })
}

fn row_to_token(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeepLinkToken> {
    let expires_raw: String = row.get(2)?;
    let used_raw: Option<String> = row.get(3)?;
    let created_raw: String = row.get(5)?;

    Ok(DeepLinkToken {
        token: row.get(0)?,
        trade_id: row.get(1)?,
        expires_at: parse_ts_col(2, &expires_raw, "expires_at")?,
        used_at: used_raw
            .map(|raw| parse_ts_col(3, &raw, "used_at"))
            .transpose()?,
        correlation_id: row.get(4)?,
        created_at: parse_ts_col(5, &created_raw, "created_at")?,
        row_hash: row.get(6)?,
    })
}

fn row_to_audit(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEntry> {
    let action_raw: String = row.get(1)?;
    let previous_raw: Option<String> = row.get(4)?;
    let new_raw: Option<String> = row.get(5)?;
    let payload_raw: Option<String> = row.get(6)?;
    let error_raw: Option<String> = row.get(8)?;
    let created_raw: String = row.get(9)?;

    let parse_json = |idx: usize, raw: Option<String>| -> rusqlite::Result<Option<serde_json::Value>> {
        raw.map(|s| serde_json::from_str(&s).map_err(|_| bad_column(idx, "json blob")))
            .transpose()
    };

    Ok(AuditEntry {
        actor_id: row.get(0)?,
        action: AuditAction::parse(&action_raw).ok_or_else(|| bad_column(1, "action"))?,
        target_type: row.get(2)?,
        target_id: row.get(3)?,
        previous_state: parse_json(4, previous_raw)?,
        new_state: parse_json(5, new_raw)?,
        payload: parse_json(6, payload_raw)?,
        correlation_id: row.get(7)?,
        error_code: error_raw.and_then(|s| crate::error::SecCode::parse(&s)),
        created_at: parse_ts_col(9, &created_raw, "created_at")?,
    })
}

fn row_to_snapshot(row: &rusqlite::Row<'_>) -> rusqlite::Result<PostTradeSnapshot> {
    let id_raw: String = row.get(0)?;
    let bid_raw: String = row.get(1)?;
    let ask_raw: String = row.get(2)?;
    let spread_raw: String = row.get(3)?;
    let mid_raw: String = row.get(4)?;
    let dev_raw: String = row.get(6)?;
    let created_raw: String = row.get(8)?;

    Ok(PostTradeSnapshot {
        approval_id: id_raw.parse().map_err(|_| bad_column(0, "approval id"))?,
        bid: parse_decimal(1, &bid_raw, "bid")?,
        ask: parse_decimal(2, &ask_raw, "ask")?,
        spread: parse_decimal(3, &spread_raw, "spread")?,
        mid_price: parse_decimal(4, &mid_raw, "mid_price")?,
        response_latency_ms: row.get(5)?,
        price_deviation_pct: parse_decimal(6, &dev_raw, "price_deviation_pct")?,
        correlation_id: row.get(7)?,
        created_at: parse_ts_col(8, &created_raw, "created_at")?,
    })
}
