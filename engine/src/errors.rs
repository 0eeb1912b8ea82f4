//! Ledger error taxonomy.
//!
//! Every rejected transition names the invariant that failed (which ratio,
//! which balance) so downstream consumers can render an accurate reason.
//! Replay conflicts are not errors; they resolve to a skipped no-op at the
//! event-application layer.

use casper_types::U256;
use thiserror::Error;

use crate::types::{AccountId, CdpStatus};

/// Errors raised by ledger transition functions. A transition that returns an
/// error has not applied its requested change; only an interest-accrual
/// sub-transition that completed before the failing check persists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    // --- Validation: malformed input, rejected before any state is touched ---
    #[error("unknown asset `{0}`")]
    UnknownAsset(String),
    #[error("amount must be non-zero")]
    ZeroAmount,
    #[error("invalid adjustment: {reason}")]
    InvalidAdjustment { reason: &'static str },
    #[error("interest rate {rate_bps} bps outside bounds [{min_bps}, {max_bps}] bps")]
    RateOutOfBounds {
        rate_bps: u32,
        min_bps: u32,
        max_bps: u32,
    },

    // --- State conflicts: rejected, surfaced to the caller, no partial effect ---
    #[error("lender `{0}` already has a non-terminal position")]
    DuplicatePosition(AccountId),
    #[error("no position found for lender `{0}`")]
    PositionNotFound(AccountId),
    #[error("`{operation}` not permitted while position is {status:?}")]
    InvalidStatus {
        status: CdpStatus,
        operation: &'static str,
    },
    #[error("collateralization ratio {ratio_bps} bps below minimum {minimum_bps} bps")]
    InsufficientCollateralization { ratio_bps: u32, minimum_bps: u32 },
    #[error("repay amount {amount} exceeds total owed {owed}")]
    OverRepayment { amount: U256, owed: U256 },
    #[error("cannot close: {debt} principal and {interest} interest outstanding")]
    DebtOutstanding { debt: U256, interest: U256 },
    #[error("withdrawal of {requested} exceeds compounded balance {available}")]
    InsufficientBalance { requested: U256, available: U256 },
    #[error("position healthy: ratio {ratio_bps} bps not below minimum {minimum_bps} bps")]
    NotLiquidatable { ratio_bps: u32, minimum_bps: u32 },

    // --- Arithmetic: fatal to the single transition, never silently clamped ---
    #[error("fixed-point overflow in {0}")]
    ArithmeticOverflow(&'static str),
}

pub type LedgerResult<T> = Result<T, LedgerError>;
