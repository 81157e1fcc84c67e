//! JWT token validation (and generation, for tooling and tests).

use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use tracing::debug;

use crate::auth::models::Claims;

pub struct JwtHandler {
    secret: String,
    expiration_hours: i64,
}

impl JwtHandler {
    pub fn new(secret: String) -> Self {
        Self {
            secret,
            expiration_hours: 24,
        }
    }

    /// Generate a token for an operator id. Issuance normally happens in the
    /// auth service; this exists for the CLI and test harnesses.
    pub fn generate_token(&self, operator_id: &str) -> Result<String> {
        let expiration = Utc::now()
            .checked_add_signed(chrono::Duration::hours(self.expiration_hours))
            .context("invalid expiry timestamp")?
            .timestamp() as usize;

        let claims = Claims {
            sub: operator_id.to_string(),
            exp: expiration,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .context("failed to generate JWT")
    }

    /// Validate a token and extract its claims.
    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        let decoded = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .context("invalid or expired token")?;

        debug!(operator_id = %decoded.claims.sub, "validated JWT");
        Ok(decoded.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_and_validation_round_trip() {
        let handler = JwtHandler::new("unit-test-secret-unit-test-secret".to_string());
        let token = handler.generate_token("alice").unwrap();
        let claims = handler.validate_token(&token).unwrap();
        assert_eq!(claims.sub, "alice");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let issuer = JwtHandler::new("secret-a-secret-a-secret-a-secret".to_string());
        let verifier = JwtHandler::new("secret-b-secret-b-secret-b-secret".to_string());
        let token = issuer.generate_token("alice").unwrap();
        assert!(verifier.validate_token(&token).is_err());
    }

    #[test]
    fn garbage_token_is_rejected() {
        let handler = JwtHandler::new("unit-test-secret-unit-test-secret".to_string());
        assert!(handler.validate_token("not-a-jwt").is_err());
    }
}
