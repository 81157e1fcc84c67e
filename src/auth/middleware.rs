//! Bearer-token validation middleware.
//!
//! Every `/api/hitl` route sits behind this layer. A missing or invalid
//! token is `SEC-001`: the request never reaches a handler.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::jwt::JwtHandler;

/// Operator identity extracted from a validated token, available to
/// handlers via request extensions.
#[derive(Debug, Clone)]
pub struct OperatorIdentity(pub String);

pub async fn auth_middleware(
    State(jwt_handler): State<Arc<JwtHandler>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .ok_or(AuthError::MissingToken)?;

    let claims = jwt_handler
        .validate_token(token)
        .map_err(|_| AuthError::InvalidToken)?;

    req.extensions_mut().insert(OperatorIdentity(claims.sub));
    Ok(next.run(req).await)
}

#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match self {
            AuthError::MissingToken => "missing authorization token",
            AuthError::InvalidToken => "invalid or expired token",
        };
        let body = serde_json::json!({
            "error_code": "SEC-001",
            "message": message,
            "correlation_id": Uuid::new_v4().to_string(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        (StatusCode::UNAUTHORIZED, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_are_401_with_sec_001() {
        for err in [AuthError::MissingToken, AuthError::InvalidToken] {
            let response = err.into_response();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
    }
}
