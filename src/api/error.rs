//! HTTP mapping of gateway errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;

use crate::error::HitlError;

/// A gateway error bound to the request's correlation id, rendered as the
/// structured error body every endpoint returns.
#[derive(Debug)]
pub struct ApiError {
    pub error: HitlError,
    pub correlation_id: String,
}

impl ApiError {
    pub fn new(error: HitlError, correlation_id: impl Into<String>) -> Self {
        Self {
            error,
            correlation_id: correlation_id.into(),
        }
    }

    fn status(&self) -> StatusCode {
        match &self.error {
            HitlError::MissingAuth(_) => StatusCode::UNAUTHORIZED,
            HitlError::Validation(_) => StatusCode::BAD_REQUEST,
            HitlError::NotFound { .. } => StatusCode::NOT_FOUND,
            HitlError::UnauthorizedOperator { .. } => StatusCode::FORBIDDEN,
            HitlError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            HitlError::DuplicateTrade { .. }
            | HitlError::GuardianLocked { .. }
            | HitlError::InvalidTransition { .. }
            | HitlError::AlreadyDecided { .. }
            | HitlError::TokenConsumed
            | HitlError::SlippageExceeded { .. }
            | HitlError::MarketDataUnavailable(_)
            | HitlError::HashMismatch { .. } => StatusCode::CONFLICT,
            HitlError::MissingConfig(_) | HitlError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_code(&self) -> &'static str {
        match self.error.sec_code() {
            Some(code) => code.as_str(),
            None => match &self.error {
                HitlError::NotFound { .. } => "NOT_FOUND",
                HitlError::RateLimited { .. } => "RATE_LIMITED",
                _ => "INTERNAL",
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Internal details stay in the logs, not on the wire.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.error, "internal error");
            "internal error".to_string()
        } else {
            self.error.to_string()
        };

        let body = serde_json::json!({
            "error_code": self.error_code(),
            "message": message,
            "correlation_id": self.correlation_id,
            "timestamp": Utc::now().to_rfc3339(),
        });

        let mut response = (status, Json(body)).into_response();
        if let HitlError::RateLimited { retry_after_secs } = self.error {
            if let Ok(value) = retry_after_secs.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_the_table() {
        let cases = [
            (
                HitlError::UnauthorizedOperator {
                    operator_id: "x".into(),
                },
                StatusCode::FORBIDDEN,
            ),
            (
                HitlError::NotFound {
                    trade_id: "T1".into(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                HitlError::GuardianLocked {
                    reason: "locked".into(),
                },
                StatusCode::CONFLICT,
            ),
            (
                HitlError::AlreadyDecided {
                    trade_id: "T1".into(),
                },
                StatusCode::CONFLICT,
            ),
            (HitlError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (
                HitlError::RateLimited {
                    retry_after_secs: 1,
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(ApiError::new(error, "corr").status(), expected);
        }
    }
}
