//! Price-drift guard applied when an operator approves a trade.
//!
//! Pure and deterministic; no I/O. The gateway feeds it the request price
//! captured at signal time and the mid price captured at decision time.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::HitlError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlippageCheck {
    pub valid: bool,
    /// Absolute relative deviation in percent, half-even rounded to 4 dp.
    pub deviation_pct: Decimal,
}

/// Compare the request price against the current price.
///
/// `deviation_pct = |current - request| / request * 100`, rounded half-even
/// to 4 decimal places. Valid iff `deviation_pct <= max_pct`.
pub fn validate(
    request_price: Decimal,
    current_price: Decimal,
    max_pct: Decimal,
) -> Result<SlippageCheck, HitlError> {
    if request_price <= Decimal::ZERO {
        return Err(HitlError::validation("request price must be positive"));
    }

    let deviation_pct = ((current_price - request_price).abs() / request_price
        * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(4, RoundingStrategy::MidpointNearestEven);

    Ok(SlippageCheck {
        valid: deviation_pct <= max_pct,
        deviation_pct,
    })
}
