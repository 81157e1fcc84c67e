//! HITL endpoint handlers.
//!
//! The operator identity always comes from the validated token; the request
//! body merely restates it and the two must agree. Every response carries a
//! correlation id.

use axum::{
    extract::{Path, State},
    response::Json,
    Extension,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::ApiState;
use crate::auth::OperatorIdentity;
use crate::error::HitlError;
use crate::models::{ApprovalRequest, DecisionChannel, DecisionRequest, Verdict};

#[derive(Debug, Serialize)]
pub struct PendingItem {
    #[serde(flatten)]
    pub approval: ApprovalRequest,
    pub seconds_remaining: i64,
}

#[derive(Debug, Serialize)]
pub struct PendingResponse {
    pub approvals: Vec<PendingItem>,
    pub correlation_id: String,
}

#[derive(Debug, Serialize)]
pub struct DecisionResponse {
    pub approval: ApprovalRequest,
    pub correlation_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ApproveBody {
    pub approved_by: String,
    pub channel: String,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RejectBody {
    pub rejected_by: String,
    pub channel: String,
    pub reason: String,
}

/// GET /api/hitl/pending
pub async fn list_pending(
    State(state): State<ApiState>,
) -> Result<Json<PendingResponse>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let approvals = state
        .gateway
        .get_pending()
        .await
        .map_err(|e| ApiError::new(e, correlation_id.clone()))?;

    let now = Utc::now();
    let approvals = approvals
        .into_iter()
        .map(|approval| PendingItem {
            seconds_remaining: approval.seconds_remaining(now),
            approval,
        })
        .collect();

    Ok(Json(PendingResponse {
        approvals,
        correlation_id,
    }))
}

/// POST /api/hitl/{trade_id}/approve
pub async fn approve(
    State(state): State<ApiState>,
    Path(trade_id): Path<String>,
    Extension(OperatorIdentity(operator_id)): Extension<OperatorIdentity>,
    Json(body): Json<ApproveBody>,
) -> Result<Json<DecisionResponse>, ApiError> {
    decide(
        state,
        trade_id,
        operator_id,
        body.approved_by,
        body.channel,
        Verdict::Approve,
        body.comment,
    )
    .await
}

/// POST /api/hitl/{trade_id}/reject
pub async fn reject(
    State(state): State<ApiState>,
    Path(trade_id): Path<String>,
    Extension(OperatorIdentity(operator_id)): Extension<OperatorIdentity>,
    Json(body): Json<RejectBody>,
) -> Result<Json<DecisionResponse>, ApiError> {
    decide(
        state,
        trade_id,
        operator_id,
        body.rejected_by,
        body.channel,
        Verdict::Reject,
        Some(body.reason),
    )
    .await
}

async fn decide(
    state: ApiState,
    trade_id: String,
    operator_id: String,
    stated_operator: String,
    channel: String,
    verdict: Verdict,
    reason: Option<String>,
) -> Result<Json<DecisionResponse>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let fail = |e: HitlError| ApiError::new(e, correlation_id.clone());

    if stated_operator != operator_id {
        return Err(fail(HitlError::validation(
            "decision body operator does not match the authenticated operator",
        )));
    }

    let channel = DecisionChannel::parse(&channel.to_uppercase())
        .ok_or_else(|| fail(HitlError::validation("unknown decision channel")))?;

    state
        .limiter
        .check(&operator_id, &trade_id)
        .map_err(&fail)?;

    let approval = state
        .gateway
        .decide(DecisionRequest {
            trade_id,
            verdict,
            operator_id,
            channel,
            reason,
            correlation_id: correlation_id.clone(),
        })
        .await
        .map_err(&fail)?;

    Ok(Json(DecisionResponse {
        approval,
        correlation_id,
    }))
}

#[derive(Debug, Serialize)]
pub struct DeepLinkResponse {
    pub approval: ApprovalRequest,
    pub correlation_id: String,
}

/// GET /api/hitl/deeplink/{token}
///
/// Resolve a chat deep-link click to its pending approval. Consumes the
/// token: a second click fails with `SEC-030`.
pub async fn resolve_deeplink(
    State(state): State<ApiState>,
    Path(token): Path<String>,
) -> Result<Json<DeepLinkResponse>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let fail = |e: HitlError| ApiError::new(e, correlation_id.clone());

    let trade_id = state
        .gateway
        .tokens()
        .redeem(&token, Utc::now())
        .await
        .map_err(&fail)?;

    let approval = state
        .gateway
        .store()
        .fetch_by_trade_id(&trade_id)
        .await
        .map_err(&fail)?
        .ok_or_else(|| fail(HitlError::NotFound { trade_id }))?;

    Ok(Json(DeepLinkResponse {
        approval,
        correlation_id,
    }))
}

/// GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// GET /metrics
pub async fn metrics_text(State(state): State<ApiState>) -> String {
    state.gateway.metrics().render_prometheus()
}
