//! Authentication data structures.

use serde::{Deserialize, Serialize};

/// JWT claims payload. `sub` is the operator id checked against
/// `HITL_ALLOWED_OPERATORS` on every decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}
