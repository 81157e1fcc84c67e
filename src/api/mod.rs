//! REST surface of the approval gateway.

pub mod error;
pub mod hitl;

use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::auth::{auth_middleware, JwtHandler};
use crate::gateway::HitlGateway;
use crate::middleware::{request_logging, DecisionRateLimiter};

#[derive(Clone)]
pub struct ApiState {
    pub gateway: Arc<HitlGateway>,
    pub jwt: Arc<JwtHandler>,
    pub limiter: DecisionRateLimiter,
}

/// Assemble the full router: authenticated HITL routes plus the unauthenticated
/// health and metrics endpoints.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/hitl/pending", get(hitl::list_pending))
        .route("/api/hitl/:trade_id/approve", post(hitl::approve))
        .route("/api/hitl/:trade_id/reject", post(hitl::reject))
        .route("/api/hitl/deeplink/:token", get(hitl::resolve_deeplink))
        .route_layer(axum_mw::from_fn_with_state(
            state.jwt.clone(),
            auth_middleware,
        ))
        .route("/health", get(hitl::health))
        .route("/metrics", get(hitl::metrics_text))
        .layer(axum_mw::from_fn(request_logging))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
