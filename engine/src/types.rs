//! Common types and persisted record shapes for the ledger core.

use core::fmt;

use casper_types::U256;
use serde::{Deserialize, Serialize};

use crate::interest::InterestRateBounds;

/// Fixed-point precision scale (1e18). Prices and the pool product factor are
/// scaled by this; amounts stay in the asset's smallest unit.
pub const SCALE: u64 = 1_000_000_000_000_000_000;

/// Basis points scale (100% = 10000 bps).
pub const BPS_SCALE: u32 = 10_000;

/// Chain account identifier. Opaque here; the ingestion layer hands us the
/// on-chain encoding as-is.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(raw: &str) -> Self {
        Self(raw.to_owned())
    }
}

/// Asset kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetKind {
    /// Native collateral asset
    Collateral,
    /// Pegged debt asset minted against collateral
    Debt,
}

/// Asset record. Updated by oracle ingestion; never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Symbol (unique key)
    pub symbol: String,
    /// Asset kind
    pub kind: AssetKind,
    /// On-chain pool address the asset trades through
    pub pool_address: String,
    /// Latest known price, fixed-point 1e18
    pub price: U256,
    /// Last known native-collateral price, fixed-point 1e18
    pub native_price: U256,
    /// Timestamp of the latest price observation (unix seconds)
    pub updated_at: u64,
}

/// CDP lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CdpStatus {
    Open,
    Frozen,
    Liquidated,
    Closed,
}

impl CdpStatus {
    /// Liquidated and Closed are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, CdpStatus::Liquidated | CdpStatus::Closed)
    }

    /// Legal transitions: Open -> {Frozen, Closed, Liquidated},
    /// Frozen -> {Open, Liquidated}.
    pub fn may_become(self, next: CdpStatus) -> bool {
        matches!(
            (self, next),
            (CdpStatus::Open, CdpStatus::Frozen)
                | (CdpStatus::Open, CdpStatus::Closed)
                | (CdpStatus::Open, CdpStatus::Liquidated)
                | (CdpStatus::Frozen, CdpStatus::Open)
                | (CdpStatus::Frozen, CdpStatus::Liquidated)
        )
    }
}

/// Collateralized debt position. One open position per lender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cdp {
    /// Lender address (unique key)
    pub lender: AccountId,
    /// Collateral deposited (smallest unit)
    pub collateral: U256,
    /// Principal debt outstanding (smallest unit)
    pub debt: U256,
    /// Accrued-but-unpaid interest; monotone between interest charges
    pub accrued_interest: U256,
    /// Cumulative interest paid over the lifetime of the position
    pub interest_paid: U256,
    /// Timestamp of last interest accrual (unix seconds)
    pub last_accrual_time: u64,
    /// Lifecycle status
    pub status: CdpStatus,
}

impl Cdp {
    /// Principal plus accrued interest, or `None` on overflow.
    pub fn total_owed(&self) -> Option<U256> {
        self.debt.checked_add(self.accrued_interest)
    }
}

/// Stability pool depositor snapshot. The depositor's true balance is never
/// stored; it is derived from these snapshots and the pool-wide scaling state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Staker {
    /// Staker address
    pub address: AccountId,
    /// Raw deposit amount at last touch
    pub deposit: U256,
    /// Product factor snapshot at last touch
    pub p_snap: U256,
    /// Sum factor snapshot at last touch
    pub s_snap: U256,
    /// Pool epoch at last touch
    pub epoch: u64,
    /// Pool scale at last touch
    pub scale: u64,
    /// Collateral gains realized at past touches but not yet claimed
    pub pending_gain: U256,
}

/// Pool-wide scaling state. Mutated only by the liquidation engine's offset.
///
/// `p` shrinks by the loss fraction on every liquidation and `s` grows by the
/// per-unit collateral gain; `scale` tracks precision renormalizations of `p`
/// and `epoch` increments each time the pool is fully consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingState {
    /// Product factor, fixed-point 1e18 (starts at 1.0)
    pub p: U256,
    /// Sum factor for the current epoch and scale (starts at 0)
    pub s: U256,
    /// Current epoch
    pub epoch: u64,
    /// Current scale
    pub scale: u64,
}

impl Default for ScalingState {
    fn default() -> Self {
        Self {
            p: U256::from(SCALE),
            s: U256::zero(),
            epoch: 0,
            scale: 0,
        }
    }
}

/// Immutable liquidation record. Append-only; never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Liquidation {
    /// Lender whose position was liquidated
    pub lender: AccountId,
    /// Total collateral taken from the position
    pub collateral_liquidated: U256,
    /// Principal debt offset against the stability pool
    pub principal_repaid: U256,
    /// Accrued interest repaid out of collateral value
    pub interest_repaid: U256,
    /// Portion of collateral applied to the interest repayment
    pub collateral_for_interest: U256,
    /// USD value of the collateral at liquidation time
    pub collateral_value_usd: U256,
    /// Collateral asset price frozen at liquidation time
    pub collateral_price: U256,
    /// Debt asset price frozen at liquidation time
    pub debt_price: U256,
    /// Principal the pool could not absorb (pool shortfall edge case)
    pub debt_shortfall: U256,
    /// Liquidation timestamp (unix seconds)
    pub at: u64,
}

/// Chain event category. Each category has its own replay cursor and is
/// applied strictly in chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    Cdp,
    Stake,
    Liquidation,
}

/// What happens to a depositor's collateral gains when a deposit or withdrawal
/// realizes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GainPolicy {
    /// Bank realized gains in the staker's pending accumulator until claimed
    Accumulate,
    /// Release realized gains to the caller on every touch
    PayOut,
}

/// How a repayment exceeding the total owed is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepayRounding {
    /// Reject with `OverRepayment`
    Strict,
    /// Round the amount down to the total owed and close the position
    RoundToClose,
}

/// Protocol parameters. All of these are injected configuration; the defaults
/// exist for convenience only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Minimum collateralization ratio in bps (12000 = 120.00%)
    pub minimum_collateral_ratio_bps: u32,
    /// Annual interest rate in bps
    pub interest_rate_bps: u32,
    /// Interest rate bounds
    pub interest_rate_bounds: InterestRateBounds,
    /// Collateral gain handling policy
    pub gain_policy: GainPolicy,
    /// Over-repayment handling policy
    pub repay_rounding: RepayRounding,
    /// Symbol of the native collateral asset
    pub collateral_symbol: String,
    /// Symbol of the pegged debt asset
    pub debt_symbol: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            minimum_collateral_ratio_bps: 12_000,
            interest_rate_bps: 500,
            interest_rate_bounds: InterestRateBounds::default(),
            gain_policy: GainPolicy::Accumulate,
            repay_rounding: RepayRounding::Strict,
            collateral_symbol: "NATIVE".to_owned(),
            debt_symbol: "PUSD".to_owned(),
        }
    }
}
