//! Environment-driven gateway configuration.
//!
//! Loaded once at startup and threaded through the gateway and workers as an
//! explicit value; there is no process-wide mutable configuration. Missing
//! required values abort startup with `SEC-040`.

use std::collections::HashSet;
use std::env;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::error::HitlError;

#[derive(Debug, Clone)]
pub struct Config {
    /// Master switch. `false` is a testing-only bypass that auto-accepts.
    pub hitl_enabled: bool,
    /// Seconds an approval stays actionable before auto-rejection.
    pub timeout_seconds: i64,
    /// Maximum tolerated price deviation on approve, in percent.
    pub slippage_max_pct: Decimal,
    /// Operators allowed to decide approvals.
    pub allowed_operators: HashSet<String>,
    /// Expiry worker scan interval.
    pub expiry_interval: Duration,
    pub database_path: String,
    pub port: u16,
    pub jwt_secret: String,
    /// Guardian service base URL. Absent means the Guardian is treated as
    /// locked (fail-closed).
    pub guardian_url: Option<String>,
    pub guardian_poll_interval: Duration,
    /// Market-data service base URL. Absent means decide fails `SEC-050`.
    pub market_data_url: Option<String>,
    /// Per-call timeout for Guardian / market-data / chat requests.
    pub outbound_timeout: Duration,
}

fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "on" | "ON" | "yes" | "YES")
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, HitlError> {
        dotenv::dotenv().ok();

        let hitl_enabled = env::var("HITL_ENABLED")
            .map(|v| parse_bool(&v))
            .unwrap_or(true);

        let timeout_seconds: i64 = env_parse("HITL_TIMEOUT_SECONDS", 300);
        if timeout_seconds <= 0 {
            return Err(HitlError::MissingConfig(
                "HITL_TIMEOUT_SECONDS must be positive".to_string(),
            ));
        }

        let slippage_max_pct = match env::var("HITL_SLIPPAGE_MAX_PERCENT") {
            Ok(v) => v.parse::<Decimal>().map_err(|_| {
                HitlError::MissingConfig("HITL_SLIPPAGE_MAX_PERCENT is not a decimal".to_string())
            })?,
            Err(_) => Decimal::new(5, 1), // 0.5
        };
        if slippage_max_pct < Decimal::ZERO {
            return Err(HitlError::MissingConfig(
                "HITL_SLIPPAGE_MAX_PERCENT must not be negative".to_string(),
            ));
        }

        let allowed_operators: HashSet<String> = env::var("HITL_ALLOWED_OPERATORS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        // Without an operator set every decision would be rejected, which
        // makes the gateway a dead end rather than a gate. Refuse to start.
        if hitl_enabled && allowed_operators.is_empty() {
            return Err(HitlError::MissingConfig(
                "HITL_ALLOWED_OPERATORS must name at least one operator".to_string(),
            ));
        }

        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| HitlError::MissingConfig("JWT_SECRET is not set".to_string()))?;

        Ok(Self {
            hitl_enabled,
            timeout_seconds,
            slippage_max_pct,
            allowed_operators,
            expiry_interval: Duration::from_secs(env_parse("HITL_EXPIRY_INTERVAL_SECONDS", 30u64)),
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "./hitl_gateway.db".to_string()),
            port: env_parse("PORT", 8090u16),
            jwt_secret,
            guardian_url: env::var("GUARDIAN_URL").ok().filter(|s| !s.trim().is_empty()),
            guardian_poll_interval: Duration::from_secs(env_parse(
                "GUARDIAN_POLL_INTERVAL_SECONDS",
                5u64,
            )),
            market_data_url: env::var("MARKET_DATA_URL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            outbound_timeout: Duration::from_millis(env_parse("OUTBOUND_TIMEOUT_MS", 2000u64)),
        })
    }

    /// Approval time-to-live as a chrono duration.
    pub fn approval_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.timeout_seconds)
    }

    pub fn is_operator_allowed(&self, operator_id: &str) -> bool {
        self.allowed_operators.contains(operator_id)
    }
}

/// Direct constructor for tests; env-based construction is covered in the
/// integration suite where the process environment can be owned.
pub fn test_config(operators: &[&str]) -> Config {
    Config {
        hitl_enabled: true,
        timeout_seconds: 300,
        slippage_max_pct: Decimal::new(5, 1),
        allowed_operators: operators.iter().map(|s| s.to_string()).collect(),
        expiry_interval: Duration::from_secs(30),
        database_path: ":memory:".to_string(),
        port: 8090,
        jwt_secret: "test-secret-test-secret-test-secret".to_string(),
        guardian_url: None,
        guardian_poll_interval: Duration::from_secs(5),
        market_data_url: None,
        outbound_timeout: Duration::from_millis(2000),
    }
}
