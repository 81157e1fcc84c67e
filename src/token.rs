//! Single-use deep-link tokens.
//!
//! A token lets a chat-originated click resolve to one pending approval
//! without re-authentication beyond the normal session. Redeeming is an
//! atomic conditional update in the store, so at most one consumer ever
//! succeeds.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;

use crate::error::HitlError;
use crate::integrity;
use crate::models::DeepLinkToken;
use crate::store::ApprovalStore;

/// 32 random bytes, hex-encoded to the 64-char opaque token value.
pub fn generate_token_value() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Clone)]
pub struct TokenService {
    store: ApprovalStore,
}

impl TokenService {
    pub fn new(store: ApprovalStore) -> Self {
        Self { store }
    }

    /// Mint and persist a fresh token for `trade_id`.
    pub async fn mint(
        &self,
        trade_id: &str,
        ttl: Duration,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DeepLinkToken, HitlError> {
        let mut token = DeepLinkToken {
            token: generate_token_value(),
            trade_id: trade_id.to_string(),
            expires_at: now + ttl,
            used_at: None,
            correlation_id: correlation_id.to_string(),
            created_at: now,
            row_hash: String::new(),
        };
        token.row_hash = integrity::compute_token(&token);

        self.store.insert_token(&token).await?;
        Ok(token)
    }

    /// Redeem a token, returning its trade id. Fails with `SEC-030` when the
    /// token is unknown, expired, or already consumed.
    pub async fn redeem(
        &self,
        token_value: &str,
        now: DateTime<Utc>,
    ) -> Result<String, HitlError> {
        self.store.redeem_token(token_value, now).await
    }
}
