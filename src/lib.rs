//! HITL Approval Gateway
//!
//! Fail-closed human-in-the-loop authorization barrier between a trade-signal
//! producer and an exchange execution layer. No trade reaches the exchange
//! without an explicit, auditable human decision; silence resolves to
//! rejection.

pub mod api;
pub mod auth;
pub mod cascade;
pub mod config;
pub mod error;
pub mod expiry;
pub mod gateway;
pub mod guardian;
pub mod integrity;
pub mod lifecycle;
pub mod market_data;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod notify;
pub mod slippage;
pub mod store;
pub mod token;

pub use config::Config;
pub use error::{HitlError, SecCode};
pub use gateway::HitlGateway;
pub use store::ApprovalStore;
