//! Interest accrual model.
//!
//! Simple interest on principal: `I = P * r * t`, computed in fixed-point
//! integer arithmetic with truncation toward zero. Truncating per position
//! guarantees the sum of all positions' accruals never exceeds the
//! protocol-wide figure computed the same way. Accrued interest is tracked
//! separately from principal and does not itself bear interest.

use casper_types::U256;
use serde::{Deserialize, Serialize};

use crate::errors::{LedgerError, LedgerResult};
use crate::types::BPS_SCALE;

/// Seconds in a year (365 days)
pub const SECONDS_PER_YEAR: u64 = 31_536_000;

/// Interest rate bounds configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterestRateBounds {
    /// Minimum interest rate in basis points
    pub min_bps: u32,
    /// Maximum interest rate in basis points (4000 = 40% APR)
    pub max_bps: u32,
}

impl Default for InterestRateBounds {
    fn default() -> Self {
        Self {
            min_bps: 0,
            max_bps: 4_000,
        }
    }
}

/// Interest owed on `debt` between `last_accrual_time` and `now`.
///
/// `debt * rate_bps * elapsed / (BPS_SCALE * SECONDS_PER_YEAR)`, truncated
/// toward zero. Returns zero when no time has passed, so calling twice with
/// the same `now` is idempotent. Overflow is fatal to the transition.
pub fn accrued_interest(
    debt: U256,
    rate_bps: u32,
    last_accrual_time: u64,
    now: u64,
) -> LedgerResult<U256> {
    if now <= last_accrual_time || debt.is_zero() || rate_bps == 0 {
        return Ok(U256::zero());
    }

    let elapsed = now - last_accrual_time;
    debt.checked_mul(U256::from(rate_bps))
        .and_then(|v| v.checked_mul(U256::from(elapsed)))
        .map(|v| v / U256::from(BPS_SCALE) / U256::from(SECONDS_PER_YEAR))
        .ok_or(LedgerError::ArithmeticOverflow("interest accrual"))
}

/// Validate an interest rate against the configured bounds.
pub fn validate_rate(rate_bps: u32, bounds: &InterestRateBounds) -> LedgerResult<()> {
    if rate_bps < bounds.min_bps || rate_bps > bounds.max_bps {
        return Err(LedgerError::RateOutOfBounds {
            rate_bps,
            min_bps: bounds.min_bps,
            max_bps: bounds.max_bps,
        });
    }
    Ok(())
}
