//! Decoded chain events consumed by the ledger transition functions.
//!
//! Each category is a closed enum and is matched exhaustively; there is no
//! dispatch by topic string. Events arrive wrapped in a [`ChainEvent`]
//! envelope whose timestamp doubles as the per-category replay cursor.

use casper_types::U256;
use serde::{Deserialize, Serialize};

use crate::types::AccountId;

/// Envelope around a decoded chain event. `at` is the event's chain timestamp
/// (unix seconds) and serves as the replay cursor for its category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEvent<P> {
    pub at: u64,
    pub payload: P,
}

impl<P> ChainEvent<P> {
    pub fn new(at: u64, payload: P) -> Self {
        Self { at, payload }
    }
}

/// CDP-category events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CdpEvent {
    Open {
        lender: AccountId,
        collateral: U256,
        debt: U256,
    },
    AddCollateral {
        lender: AccountId,
        amount: U256,
    },
    WithdrawCollateral {
        lender: AccountId,
        amount: U256,
    },
    Borrow {
        lender: AccountId,
        amount: U256,
    },
    Repay {
        lender: AccountId,
        amount: U256,
    },
    Freeze {
        lender: AccountId,
    },
    Unfreeze {
        lender: AccountId,
    },
    Close {
        lender: AccountId,
    },
}

/// Stability-pool-category events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StakeEvent {
    Deposit { staker: AccountId, amount: U256 },
    Withdraw { staker: AccountId, amount: U256 },
    ClaimGain { staker: AccountId },
}

/// Liquidation-category events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidationEvent {
    Liquidate { lender: AccountId },
}

/// Outcome of applying a chain event against the per-category checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Event applied; `cursor` is the new checkpoint to persist.
    Applied { cursor: u64 },
    /// Replay or out-of-order cursor; state untouched.
    Skipped { cursor: u64, last_applied: u64 },
}

impl ApplyOutcome {
    pub fn is_applied(self) -> bool {
        matches!(self, ApplyOutcome::Applied { .. })
    }
}
