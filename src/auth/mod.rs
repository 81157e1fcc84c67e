//! Operator authentication.
//!
//! Token issuance lives outside the gateway; this module only validates
//! Bearer tokens and exposes the operator identity they carry.

pub mod jwt;
pub mod middleware;
pub mod models;

pub use jwt::JwtHandler;
pub use middleware::{auth_middleware, OperatorIdentity};
pub use models::Claims;
