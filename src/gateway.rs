//! Gateway core: the approval lifecycle orchestrator.
//!
//! Every trade signal and every operator decision flows through here. The
//! gate order on decide is fixed: authorization, Guardian, hash, staleness,
//! expiry, market data, slippage, transition. Each gate maps to one SEC code
//! and anything ambiguous resolves to rejection.
//!
//! Serialization per approval is delegated to the store's conditional
//! UPDATE; the gateway itself holds no lock on records, so concurrent calls
//! on different approvals proceed in parallel and concurrent calls on the
//! same approval resolve to exactly one winner.

use chrono::{DateTime, SubsecRound, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{HitlError, SecCode};
use crate::guardian::GuardianPort;
use crate::integrity;
use crate::lifecycle::{validate_transition, LifecycleState};
use crate::market_data::MarketDataSource;
use crate::metrics::{reason, HitlMetrics};
use crate::models::{
    ApprovalRequest, ApprovalStatus, AuditAction, AuditEntry, DecisionChannel, DecisionRequest,
    HitlEvent, PostTradeSnapshot, TradeSignal, Verdict, REASON_GUARDIAN_LOCK,
    REASON_HASH_MISMATCH, REASON_HITL_DISABLED, REASON_HITL_TIMEOUT,
    REASON_MARKET_DATA_UNAVAILABLE, REASON_SLIPPAGE_EXCEEDED,
};
use crate::notify::{best_effort, ChatNotifier, EventBus};
use crate::slippage;
use crate::store::ApprovalStore;
use crate::token::TokenService;

const SYSTEM_ACTOR: &str = "system";

/// Outcome of a startup recovery pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub reannounced: usize,
    pub expired: usize,
    pub quarantined: usize,
}

pub struct HitlGateway {
    config: Config,
    store: ApprovalStore,
    guardian: Arc<dyn GuardianPort>,
    market_data: Arc<dyn MarketDataSource>,
    notifier: Arc<dyn ChatNotifier>,
    events: EventBus,
    tokens: TokenService,
    metrics: Arc<HitlMetrics>,
}

impl HitlGateway {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        store: ApprovalStore,
        guardian: Arc<dyn GuardianPort>,
        market_data: Arc<dyn MarketDataSource>,
        notifier: Arc<dyn ChatNotifier>,
        events: EventBus,
        metrics: Arc<HitlMetrics>,
    ) -> Self {
        let tokens = TokenService::new(store.clone());
        Self {
            config,
            store,
            guardian,
            market_data,
            notifier,
            events,
            tokens,
            metrics,
        }
    }

    pub fn store(&self) -> &ApprovalStore {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn metrics(&self) -> &HitlMetrics {
        &self.metrics
    }

    /// Timestamps are stored at microsecond precision; produce them at that
    /// grain so in-memory records equal their persisted form.
    fn now(&self) -> DateTime<Utc> {
        Utc::now().trunc_subsecs(6)
    }

    /// Accept a trade signal and persist it as a pending approval.
    pub async fn create(&self, signal: TradeSignal) -> Result<ApprovalRequest, HitlError> {
        signal.validate()?;
        let now = self.now();

        // Bypass mode: auto-accept with a full audit trail. Testing only.
        if !self.config.hitl_enabled {
            return self.create_auto_accepted(signal, now).await;
        }

        let guardian_status = self.guardian.status().await;
        if guardian_status.is_locked() {
            let lock_reason = guardian_status
                .reason
                .unwrap_or_else(|| "unspecified".to_string());
            let audit = AuditEntry::new(
                SYSTEM_ACTOR,
                AuditAction::CreateBlocked,
                signal.trade_id.clone(),
                signal.correlation_id.clone(),
                now,
            )
            .with_error_code(SecCode::Sec020)
            .with_payload(serde_json::json!({ "guardian_reason": lock_reason }));
            self.store.append_audit(&audit).await?;
            self.metrics.incr_blocked_by_guardian();
            return Err(HitlError::GuardianLocked {
                reason: lock_reason,
            });
        }

        let mut approval = ApprovalRequest {
            id: Uuid::new_v4(),
            trade_id: signal.trade_id,
            instrument: signal.instrument,
            side: signal.side,
            risk_pct: signal.risk_pct,
            confidence: signal.confidence,
            request_price: signal.request_price,
            reasoning_summary: signal.reasoning_summary,
            correlation_id: signal.correlation_id,
            status: ApprovalStatus::AwaitingApproval,
            requested_at: now,
            expires_at: now + self.config.approval_ttl(),
            decided_at: None,
            decided_by: None,
            decision_channel: None,
            decision_reason: None,
            row_hash: String::new(),
        };
        approval.row_hash = integrity::compute(&approval);

        let audit = AuditEntry::new(
            SYSTEM_ACTOR,
            AuditAction::Create,
            approval.id.to_string(),
            approval.correlation_id.clone(),
            now,
        )
        .with_states(
            None,
            Some(serde_json::json!({ "status": approval.status.as_str() })),
        );
        self.store.create(&approval, &audit).await?;

        info!(
            trade_id = %approval.trade_id,
            instrument = %approval.instrument,
            expires_at = %approval.expires_at,
            "approval created"
        );

        self.events.emit(HitlEvent::Created {
            approval: approval.clone(),
            seconds_remaining: approval.seconds_remaining(now),
        });

        match self
            .tokens
            .mint(
                &approval.trade_id,
                self.config.approval_ttl(),
                &approval.correlation_id,
                now,
            )
            .await
        {
            Ok(token) => {
                best_effort(
                    "chat request",
                    self.notifier.send_request(&approval, &token),
                )
                .await;
            }
            Err(e) => warn!(error = %e, "deep-link token mint failed (notification skipped)"),
        }

        self.metrics.incr_request();
        Ok(approval)
    }

    async fn create_auto_accepted(
        &self,
        signal: TradeSignal,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, HitlError> {
        let mut approval = ApprovalRequest {
            id: Uuid::new_v4(),
            trade_id: signal.trade_id,
            instrument: signal.instrument,
            side: signal.side,
            risk_pct: signal.risk_pct,
            confidence: signal.confidence,
            request_price: signal.request_price,
            reasoning_summary: signal.reasoning_summary,
            correlation_id: signal.correlation_id,
            status: ApprovalStatus::Accepted,
            requested_at: now,
            expires_at: now + self.config.approval_ttl(),
            decided_at: Some(now),
            decided_by: Some(SYSTEM_ACTOR.to_string()),
            decision_channel: Some(DecisionChannel::System),
            decision_reason: Some(REASON_HITL_DISABLED.to_string()),
            row_hash: String::new(),
        };
        approval.row_hash = integrity::compute(&approval);

        let audit = AuditEntry::new(
            SYSTEM_ACTOR,
            AuditAction::Create,
            approval.id.to_string(),
            approval.correlation_id.clone(),
            now,
        )
        .with_states(
            None,
            Some(serde_json::json!({ "status": approval.status.as_str() })),
        )
        .with_payload(serde_json::json!({ "reason": REASON_HITL_DISABLED }));
        self.store.create(&approval, &audit).await?;

        warn!(trade_id = %approval.trade_id, "HITL disabled: signal auto-accepted");
        self.events.emit(HitlEvent::Decided {
            approval: approval.clone(),
        });
        self.metrics.incr_request();
        Ok(approval)
    }

    /// Apply an operator decision to a pending approval.
    pub async fn decide(&self, decision: DecisionRequest) -> Result<ApprovalRequest, HitlError> {
        decision.validate()?;
        let now = self.now();

        // Gate 1: authorization. Unauthorized callers learn nothing about
        // Guardian, expiry or slippage state.
        if !self.config.is_operator_allowed(&decision.operator_id) {
            let audit = AuditEntry::new(
                decision.operator_id.clone(),
                AuditAction::UnauthorizedAttempt,
                decision.trade_id.clone(),
                decision.correlation_id.clone(),
                now,
            )
            .with_error_code(SecCode::Sec090);
            self.store.append_audit(&audit).await?;
            warn!(
                operator_id = %decision.operator_id,
                trade_id = %decision.trade_id,
                "unauthorized decision attempt"
            );
            return Err(HitlError::UnauthorizedOperator {
                operator_id: decision.operator_id,
            });
        }

        // Gate 2: Guardian recheck.
        let guardian_status = self.guardian.status().await;
        if guardian_status.is_locked() {
            let lock_reason = guardian_status
                .reason
                .unwrap_or_else(|| "unspecified".to_string());
            let audit = AuditEntry::new(
                decision.operator_id.clone(),
                AuditAction::DecideBlocked,
                decision.trade_id.clone(),
                decision.correlation_id.clone(),
                now,
            )
            .with_error_code(SecCode::Sec020)
            .with_payload(serde_json::json!({ "guardian_reason": lock_reason }));
            self.store.append_audit(&audit).await?;
            return Err(HitlError::GuardianLocked {
                reason: lock_reason,
            });
        }

        // Gate 3: load and verify integrity.
        let approval = self
            .store
            .fetch_by_trade_id(&decision.trade_id)
            .await?
            .ok_or_else(|| HitlError::NotFound {
                trade_id: decision.trade_id.clone(),
            })?;

        if !integrity::verify(&approval) {
            self.quarantine_corrupted(&approval, now).await?;
            return Err(HitlError::HashMismatch {
                id: approval.id.to_string(),
            });
        }

        // Gate 4: staleness.
        if approval.status != ApprovalStatus::AwaitingApproval {
            return Err(HitlError::AlreadyDecided {
                trade_id: approval.trade_id,
            });
        }

        // Gate 5: expiry. The auto-reject is the decision outcome and is
        // idempotent with the expiry worker.
        if approval.is_expired(now) {
            return match self.expire_approval(&approval, now).await? {
                Some(expired) => Ok(expired),
                // Lost the race to the worker; the stored outcome stands.
                None => self
                    .store
                    .fetch_by_trade_id(&decision.trade_id)
                    .await?
                    .ok_or(HitlError::NotFound {
                        trade_id: decision.trade_id,
                    }),
            };
        }

        // Gate 6: market context. No quote, no decision.
        let quote = match self.market_data.quote(&approval.instrument).await {
            Ok(q) => q,
            Err(e) => {
                self.reject_on_market_failure(&approval, &decision, now)
                    .await?;
                return Err(e);
            }
        };

        let latency_ms = (now - approval.requested_at).num_milliseconds();
        let snapshot = match PostTradeSnapshot::from_quote(
            &approval,
            quote.bid,
            quote.ask,
            latency_ms,
            now,
        ) {
            Ok(s) => s,
            Err(e) => {
                self.reject_on_market_failure(&approval, &decision, now)
                    .await?;
                return Err(e);
            }
        };

        // Gate 7: slippage, approvals only.
        if decision.verdict == Verdict::Approve {
            let check = slippage::validate(
                approval.request_price,
                snapshot.mid_price,
                self.config.slippage_max_pct,
            )?;
            if !check.valid {
                let deviation = check.deviation_pct.to_string();
                let max = self.config.slippage_max_pct.to_string();
                self.persist_decision(
                    &approval,
                    ApprovalStatus::Rejected,
                    &decision.operator_id,
                    decision.channel,
                    REASON_SLIPPAGE_EXCEEDED,
                    AuditAction::Reject,
                    Some(SecCode::Sec050),
                    Some(serde_json::json!({
                        "deviation_pct": deviation,
                        "max_pct": max,
                    })),
                    Some(&snapshot),
                    now,
                )
                .await
                .map(|rejected| {
                    self.events.emit(HitlEvent::Decided { approval: rejected });
                })?;
                self.metrics.incr_rejection(reason::SLIPPAGE);
                return Err(HitlError::SlippageExceeded {
                    deviation_pct: deviation,
                    max_pct: max,
                });
            }
        }

        // Gate 8: state transition, then the transactional write.
        let target = match decision.verdict {
            Verdict::Approve => LifecycleState::Accepted,
            Verdict::Reject => LifecycleState::Rejected,
        };
        validate_transition(approval.status.into(), target)?;
        let new_status = match target {
            LifecycleState::Accepted => ApprovalStatus::Accepted,
            _ => ApprovalStatus::Rejected,
        };
        let action = match decision.verdict {
            Verdict::Approve => AuditAction::Approve,
            Verdict::Reject => AuditAction::Reject,
        };

        let decided = self
            .persist_decision(
                &approval,
                new_status,
                &decision.operator_id,
                decision.channel,
                decision.reason.as_deref().unwrap_or_default(),
                action,
                None,
                None,
                Some(&snapshot),
                now,
            )
            .await?;

        let latency_secs = (now - approval.requested_at).num_milliseconds() as f64 / 1000.0;
        self.metrics.observe_response_latency(latency_secs);
        match decided.status {
            ApprovalStatus::Accepted => self.metrics.incr_approval(),
            _ => self.metrics.incr_rejection(reason::OPERATOR),
        }

        self.events.emit(HitlEvent::Decided {
            approval: decided.clone(),
        });
        best_effort("chat decision", self.notifier.send_decision(&decided)).await;

        info!(
            trade_id = %decided.trade_id,
            status = decided.status.as_str(),
            decided_by = %decision.operator_id,
            "approval decided"
        );
        Ok(decided)
    }

    /// All pending approvals ordered by deadline. Corrupted rows are
    /// excluded; each raises an alert carrying `SEC-080` and the row id.
    pub async fn get_pending(&self) -> Result<Vec<ApprovalRequest>, HitlError> {
        let scan = self.store.fetch_pending().await?;
        for bad in &scan.corrupted {
            error!(approval_id = %bad.id, "pending row failed hash verification");
            self.events.emit(HitlEvent::Alert {
                code: SecCode::Sec080,
                message: format!("hash mismatch on approval {}", bad.id),
                correlation_id: bad.correlation_id.clone(),
            });
        }
        Ok(scan.valid)
    }

    /// Startup recovery. Runs before any operation is accepted: verifies
    /// every pending row, quarantines tampered ones, expires overdue ones
    /// and re-announces the rest for UI resynchronization.
    pub async fn recover_on_startup(&self) -> Result<RecoveryReport, HitlError> {
        let now = self.now();
        let rows = self.store.fetch_awaiting_raw().await?;
        let mut report = RecoveryReport::default();

        for approval in rows {
            if !integrity::verify(&approval) {
                self.quarantine_corrupted(&approval, now).await?;
                report.quarantined += 1;
                continue;
            }
            if approval.is_expired(now) {
                if self.expire_approval(&approval, now).await?.is_some() {
                    report.expired += 1;
                }
                continue;
            }
            self.events.emit(HitlEvent::Created {
                approval: approval.clone(),
                seconds_remaining: approval.seconds_remaining(now),
            });
            report.reannounced += 1;
        }

        info!(
            reannounced = report.reannounced,
            expired = report.expired,
            quarantined = report.quarantined,
            "startup recovery complete"
        );
        Ok(report)
    }

    /// One expiry-worker pass: auto-reject everything past its deadline.
    pub async fn run_expiry_pass(&self) -> Result<usize, HitlError> {
        let now = self.now();
        let overdue = self.store.fetch_expired(now).await?;
        let mut expired = 0usize;
        for approval in overdue {
            if self.expire_approval(&approval, now).await?.is_some() {
                expired += 1;
            }
        }
        Ok(expired)
    }

    /// Reject every pending approval in response to a Guardian lock.
    pub async fn cascade_reject_on_guardian_lock(
        &self,
        lock_reason: &str,
    ) -> Result<usize, HitlError> {
        let now = self.now();
        let pending = self.store.fetch_awaiting_raw().await?;
        let mut rejected = 0usize;

        for approval in pending {
            let outcome = self
                .persist_decision(
                    &approval,
                    ApprovalStatus::Rejected,
                    SYSTEM_ACTOR,
                    DecisionChannel::System,
                    REASON_GUARDIAN_LOCK,
                    AuditAction::GuardianCascadeReject,
                    Some(SecCode::Sec020),
                    Some(serde_json::json!({ "guardian_reason": lock_reason })),
                    None,
                    now,
                )
                .await;
            match outcome {
                Ok(decided) => {
                    self.metrics.incr_rejection(reason::GUARDIAN_LOCK);
                    self.events.emit(HitlEvent::Decided {
                        approval: decided.clone(),
                    });
                    best_effort("chat decision", self.notifier.send_decision(&decided)).await;
                    rejected += 1;
                }
                // Raced an operator decision or the expiry worker.
                Err(HitlError::AlreadyDecided { .. }) => continue,
                Err(e) => return Err(e),
            }
        }

        if rejected > 0 {
            warn!(rejected, lock_reason, "guardian lock cascade rejected pending approvals");
        }
        Ok(rejected)
    }

    /// Expire one approval. Returns `None` when another actor decided first.
    async fn expire_approval(
        &self,
        approval: &ApprovalRequest,
        now: DateTime<Utc>,
    ) -> Result<Option<ApprovalRequest>, HitlError> {
        let outcome = self
            .persist_decision(
                approval,
                ApprovalStatus::Rejected,
                SYSTEM_ACTOR,
                DecisionChannel::System,
                REASON_HITL_TIMEOUT,
                AuditAction::Expire,
                Some(SecCode::Sec060),
                None,
                None,
                now,
            )
            .await;

        match outcome {
            Ok(expired) => {
                self.metrics.incr_rejection(reason::TIMEOUT);
                self.events.emit(HitlEvent::Expired {
                    approval: expired.clone(),
                });
                best_effort("chat timeout", self.notifier.send_timeout(&expired)).await;
                Ok(Some(expired))
            }
            Err(HitlError::AlreadyDecided { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Quarantine a row whose stored hash no longer matches its fields:
    /// force-reject it, audit with `SEC-080` and raise an alert. The row is
    /// never re-announced.
    async fn quarantine_corrupted(
        &self,
        approval: &ApprovalRequest,
        now: DateTime<Utc>,
    ) -> Result<(), HitlError> {
        error!(
            approval_id = %approval.id,
            trade_id = %approval.trade_id,
            "row hash mismatch: quarantining approval"
        );

        let outcome = self
            .persist_decision(
                approval,
                ApprovalStatus::Rejected,
                SYSTEM_ACTOR,
                DecisionChannel::System,
                REASON_HASH_MISMATCH,
                AuditAction::HashMismatch,
                Some(SecCode::Sec080),
                Some(serde_json::json!({ "stored_hash": approval.row_hash })),
                None,
                now,
            )
            .await;

        match outcome {
            Ok(_) | Err(HitlError::AlreadyDecided { .. }) => {}
            Err(e) => return Err(e),
        }

        self.metrics.incr_rejection(reason::HASH_MISMATCH);
        self.events.emit(HitlEvent::Alert {
            code: SecCode::Sec080,
            message: format!("hash mismatch on approval {}", approval.id),
            correlation_id: approval.correlation_id.clone(),
        });
        Ok(())
    }

    async fn reject_on_market_failure(
        &self,
        approval: &ApprovalRequest,
        decision: &DecisionRequest,
        now: DateTime<Utc>,
    ) -> Result<(), HitlError> {
        let outcome = self
            .persist_decision(
                approval,
                ApprovalStatus::Rejected,
                SYSTEM_ACTOR,
                DecisionChannel::System,
                REASON_MARKET_DATA_UNAVAILABLE,
                AuditAction::Reject,
                Some(SecCode::Sec050),
                Some(serde_json::json!({
                    "attempted_by": decision.operator_id,
                    "detail": "market-data unavailable",
                })),
                None,
                now,
            )
            .await;
        match outcome {
            Ok(rejected) => {
                self.metrics.incr_rejection(reason::MARKET_DATA);
                self.events.emit(HitlEvent::Decided { approval: rejected });
                Ok(())
            }
            Err(HitlError::AlreadyDecided { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Build the decided record, rehash it and write it through the store's
    /// conditional UPDATE together with its audit entry and snapshot.
    #[allow(clippy::too_many_arguments)]
    async fn persist_decision(
        &self,
        approval: &ApprovalRequest,
        new_status: ApprovalStatus,
        decided_by: &str,
        channel: DecisionChannel,
        decision_reason: &str,
        action: AuditAction,
        error_code: Option<SecCode>,
        payload: Option<serde_json::Value>,
        snapshot: Option<&PostTradeSnapshot>,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, HitlError> {
        let mut decided = approval.clone();
        decided.status = new_status;
        decided.decided_at = Some(now);
        decided.decided_by = Some(decided_by.to_string());
        decided.decision_channel = Some(channel);
        decided.decision_reason = Some(decision_reason.to_string());
        decided.row_hash = integrity::compute(&decided);

        let mut audit = AuditEntry::new(
            decided_by,
            action,
            decided.id.to_string(),
            decided.correlation_id.clone(),
            now,
        )
        .with_states(
            Some(serde_json::json!({ "status": approval.status.as_str() })),
            Some(serde_json::json!({
                "status": decided.status.as_str(),
                "decided_by": decided_by,
                "decision_channel": channel.as_str(),
                "decision_reason": decision_reason,
            })),
        );
        if let Some(code) = error_code {
            audit = audit.with_error_code(code);
        }
        if let Some(p) = payload {
            audit = audit.with_payload(p);
        }

        self.store.decide(&decided, &audit, snapshot).await?;
        Ok(decided)
    }
}
