//! CDP ledger: owns positions, computes collateralization and accrued
//! interest, and exposes the lifecycle transitions (open, adjust, repay,
//! close, freeze).
//!
//! Transitions are compute-then-commit: every check happens against a
//! read-only view and state is written only once nothing can fail, so a
//! rejected transition leaves no partial mutation. Interest accrual is its
//! own idempotent sub-transition and always runs before a ratio check.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use casper_types::U256;
use serde::{Deserialize, Serialize};

use crate::errors::{LedgerError, LedgerResult};
use crate::interest::accrued_interest;
use crate::oracle::PriceOracle;
use crate::types::{AccountId, Cdp, CdpStatus, ProtocolConfig, BPS_SCALE};

/// Collateral/debt adjustment: unsigned deltas with direction flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adjustment {
    pub collateral_delta: U256,
    pub collateral_is_withdraw: bool,
    pub debt_delta: U256,
    pub debt_is_repay: bool,
}

impl Adjustment {
    pub fn add_collateral(amount: U256) -> Self {
        Self {
            collateral_delta: amount,
            collateral_is_withdraw: false,
            debt_delta: U256::zero(),
            debt_is_repay: false,
        }
    }

    pub fn withdraw_collateral(amount: U256) -> Self {
        Self {
            collateral_delta: amount,
            collateral_is_withdraw: true,
            debt_delta: U256::zero(),
            debt_is_repay: false,
        }
    }

    pub fn borrow(amount: U256) -> Self {
        Self {
            collateral_delta: U256::zero(),
            collateral_is_withdraw: false,
            debt_delta: amount,
            debt_is_repay: false,
        }
    }

    pub fn repay_debt(amount: U256) -> Self {
        Self {
            collateral_delta: U256::zero(),
            collateral_is_withdraw: false,
            debt_delta: amount,
            debt_is_repay: true,
        }
    }
}

/// Result of a repayment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepayOutcome {
    pub interest_paid: U256,
    pub principal_paid: U256,
    /// Collateral returned when a rounded repayment closed the position
    pub collateral_returned: U256,
    pub closed: bool,
}

/// Position data handed to the liquidation engine when a CDP is zeroed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiquidatedPosition {
    pub collateral: U256,
    pub principal: U256,
    pub accrued_interest: U256,
}

/// Ledger of collateralized debt positions, one open position per lender.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdpLedger {
    cdps: BTreeMap<AccountId, Cdp>,
    total_collateral: U256,
    total_debt: U256,
    total_accrued_interest: U256,
    open_count: u64,
}

/// Collateralization ratio in bps, rounded down:
/// `(collateral * collateralPrice * BPS_SCALE) / (debt * debtPrice)`.
///
/// Rounding down is conservative: a position's health is never overstated.
/// Zero debt reads as `u32::MAX`.
pub fn ratio_bps(
    collateral: U256,
    debt_total: U256,
    oracle: &PriceOracle,
    config: &ProtocolConfig,
) -> LedgerResult<u32> {
    if debt_total.is_zero() {
        return Ok(u32::MAX);
    }

    let collateral_price = oracle.price_of(&config.collateral_symbol)?;
    let debt_price = oracle.price_of(&config.debt_symbol)?;

    let numerator = collateral
        .checked_mul(collateral_price)
        .and_then(|v| v.checked_mul(U256::from(BPS_SCALE)))
        .ok_or(LedgerError::ArithmeticOverflow("ratio numerator"))?;
    let denominator = debt_total
        .checked_mul(debt_price)
        .ok_or(LedgerError::ArithmeticOverflow("ratio denominator"))?;
    if denominator.is_zero() {
        return Ok(u32::MAX);
    }

    let scaled = numerator / denominator;
    if scaled > U256::from(u32::MAX) {
        Ok(u32::MAX)
    } else {
        Ok(scaled.low_u32())
    }
}

impl CdpLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new position. Fails with `DuplicatePosition` if the lender
    /// already has a non-terminal CDP and with `InsufficientCollateralization`
    /// if the resulting ratio is below the protocol minimum.
    pub fn open(
        &mut self,
        lender: AccountId,
        collateral: U256,
        debt_requested: U256,
        oracle: &PriceOracle,
        config: &ProtocolConfig,
        now: u64,
    ) -> LedgerResult<&Cdp> {
        if collateral.is_zero() || debt_requested.is_zero() {
            return Err(LedgerError::ZeroAmount);
        }
        if let Some(existing) = self.cdps.get(&lender) {
            if !existing.status.is_terminal() {
                return Err(LedgerError::DuplicatePosition(lender));
            }
        }

        let ratio = ratio_bps(collateral, debt_requested, oracle, config)?;
        if ratio < config.minimum_collateral_ratio_bps {
            return Err(LedgerError::InsufficientCollateralization {
                ratio_bps: ratio,
                minimum_bps: config.minimum_collateral_ratio_bps,
            });
        }

        let new_total_collateral = self
            .total_collateral
            .checked_add(collateral)
            .ok_or(LedgerError::ArithmeticOverflow("total collateral"))?;
        let new_total_debt = self
            .total_debt
            .checked_add(debt_requested)
            .ok_or(LedgerError::ArithmeticOverflow("total debt"))?;

        let cdp = Cdp {
            lender: lender.clone(),
            collateral,
            debt: debt_requested,
            accrued_interest: U256::zero(),
            interest_paid: U256::zero(),
            last_accrual_time: now,
            status: CdpStatus::Open,
        };

        self.total_collateral = new_total_collateral;
        self.total_debt = new_total_debt;
        self.open_count += 1;

        let slot = match self.cdps.entry(lender) {
            Entry::Vacant(vacant) => vacant.insert(cdp),
            Entry::Occupied(occupied) => {
                // Terminal record from a previous lifetime; replace it.
                let slot = occupied.into_mut();
                *slot = cdp;
                slot
            }
        };
        Ok(slot)
    }

    /// Accrue interest on the position up to `now`. Idempotent for equal
    /// timestamps; a clock that goes backwards accrues nothing.
    pub fn accrue_interest(
        &mut self,
        lender: &AccountId,
        config: &ProtocolConfig,
        now: u64,
    ) -> LedgerResult<U256> {
        let cdp = self
            .cdps
            .get_mut(lender)
            .ok_or_else(|| LedgerError::PositionNotFound(lender.clone()))?;
        if cdp.status.is_terminal() {
            return Err(LedgerError::InvalidStatus {
                status: cdp.status,
                operation: "accrue_interest",
            });
        }

        let interest = accrued_interest(cdp.debt, config.interest_rate_bps, cdp.last_accrual_time, now)?;
        if !interest.is_zero() {
            let new_accrued = cdp
                .accrued_interest
                .checked_add(interest)
                .ok_or(LedgerError::ArithmeticOverflow("accrued interest"))?;
            let new_total = self
                .total_accrued_interest
                .checked_add(interest)
                .ok_or(LedgerError::ArithmeticOverflow("total accrued interest"))?;
            cdp.accrued_interest = new_accrued;
            self.total_accrued_interest = new_total;
        }
        if now > cdp.last_accrual_time {
            cdp.last_accrual_time = now;
        }
        Ok(interest)
    }

    /// Adjust collateral and debt on an open position. Interest is re-accrued
    /// first so the ratio check always sees current interest. A delta that
    /// would drive collateral or debt negative is rejected with
    /// `InvalidAdjustment`; a repaying delta settles accrued interest before
    /// principal.
    pub fn adjust(
        &mut self,
        lender: &AccountId,
        adjustment: Adjustment,
        oracle: &PriceOracle,
        config: &ProtocolConfig,
        now: u64,
    ) -> LedgerResult<()> {
        if adjustment.collateral_delta.is_zero() && adjustment.debt_delta.is_zero() {
            return Err(LedgerError::ZeroAmount);
        }
        self.require_open(lender, "adjust")?;
        self.accrue_interest(lender, config, now)?;

        let cdp = self
            .cdps
            .get(lender)
            .ok_or_else(|| LedgerError::PositionNotFound(lender.clone()))?;

        let new_collateral = if adjustment.collateral_is_withdraw {
            if adjustment.collateral_delta > cdp.collateral {
                return Err(LedgerError::InvalidAdjustment {
                    reason: "collateral would go negative",
                });
            }
            cdp.collateral - adjustment.collateral_delta
        } else {
            cdp.collateral
                .checked_add(adjustment.collateral_delta)
                .ok_or(LedgerError::ArithmeticOverflow("collateral adjustment"))?
        };

        let (new_debt, new_accrued, interest_paid) = if adjustment.debt_is_repay {
            let owed = cdp
                .total_owed()
                .ok_or(LedgerError::ArithmeticOverflow("total owed"))?;
            if adjustment.debt_delta > owed {
                return Err(LedgerError::InvalidAdjustment {
                    reason: "debt would go negative",
                });
            }
            let interest_paid = adjustment.debt_delta.min(cdp.accrued_interest);
            let principal_paid = adjustment.debt_delta - interest_paid;
            (
                cdp.debt - principal_paid,
                cdp.accrued_interest - interest_paid,
                interest_paid,
            )
        } else {
            let new_debt = cdp
                .debt
                .checked_add(adjustment.debt_delta)
                .ok_or(LedgerError::ArithmeticOverflow("debt adjustment"))?;
            (new_debt, cdp.accrued_interest, U256::zero())
        };

        let owed_after = new_debt
            .checked_add(new_accrued)
            .ok_or(LedgerError::ArithmeticOverflow("total owed"))?;
        let ratio = ratio_bps(new_collateral, owed_after, oracle, config)?;
        if ratio < config.minimum_collateral_ratio_bps {
            return Err(LedgerError::InsufficientCollateralization {
                ratio_bps: ratio,
                minimum_bps: config.minimum_collateral_ratio_bps,
            });
        }

        // All checks passed; compute the new totals, then commit.
        let principal_paid = if adjustment.debt_is_repay {
            adjustment.debt_delta - interest_paid
        } else {
            U256::zero()
        };
        let new_total_collateral = if adjustment.collateral_is_withdraw {
            self.total_collateral
                .checked_sub(adjustment.collateral_delta)
        } else {
            self.total_collateral
                .checked_add(adjustment.collateral_delta)
        }
        .ok_or(LedgerError::ArithmeticOverflow("total collateral"))?;
        let new_total_debt = if adjustment.debt_is_repay {
            self.total_debt.checked_sub(principal_paid)
        } else {
            self.total_debt.checked_add(adjustment.debt_delta)
        }
        .ok_or(LedgerError::ArithmeticOverflow("total debt"))?;
        let new_total_accrued = self
            .total_accrued_interest
            .checked_sub(interest_paid)
            .ok_or(LedgerError::ArithmeticOverflow("total accrued interest"))?;

        let new_interest_paid = cdp
            .interest_paid
            .checked_add(interest_paid)
            .ok_or(LedgerError::ArithmeticOverflow("interest paid"))?;

        let cdp = self
            .cdps
            .get_mut(lender)
            .ok_or_else(|| LedgerError::PositionNotFound(lender.clone()))?;
        cdp.collateral = new_collateral;
        cdp.debt = new_debt;
        cdp.accrued_interest = new_accrued;
        cdp.interest_paid = new_interest_paid;
        self.total_collateral = new_total_collateral;
        self.total_debt = new_total_debt;
        self.total_accrued_interest = new_total_accrued;
        Ok(())
    }

    /// Repay up to the total owed. The amount settles accrued interest first;
    /// the remainder reduces principal. An amount exceeding the total owed is
    /// rejected with `OverRepayment` unless the configured rounding policy
    /// rounds the position closed.
    pub fn repay(
        &mut self,
        lender: &AccountId,
        amount: U256,
        config: &ProtocolConfig,
        now: u64,
    ) -> LedgerResult<RepayOutcome> {
        if amount.is_zero() {
            return Err(LedgerError::ZeroAmount);
        }
        self.require_open(lender, "repay")?;
        self.accrue_interest(lender, config, now)?;

        let cdp = self
            .cdps
            .get(lender)
            .ok_or_else(|| LedgerError::PositionNotFound(lender.clone()))?;
        let owed = cdp
            .total_owed()
            .ok_or(LedgerError::ArithmeticOverflow("total owed"))?;

        let (effective, closing) = if amount > owed {
            match config.repay_rounding {
                crate::types::RepayRounding::Strict => {
                    return Err(LedgerError::OverRepayment { amount, owed });
                }
                crate::types::RepayRounding::RoundToClose => (owed, true),
            }
        } else {
            (amount, false)
        };

        let interest_paid = effective.min(cdp.accrued_interest);
        let principal_paid = effective - interest_paid;
        let collateral_returned = if closing { cdp.collateral } else { U256::zero() };

        let new_total_debt = self
            .total_debt
            .checked_sub(principal_paid)
            .ok_or(LedgerError::ArithmeticOverflow("total debt"))?;
        let new_total_accrued = self
            .total_accrued_interest
            .checked_sub(interest_paid)
            .ok_or(LedgerError::ArithmeticOverflow("total accrued interest"))?;
        let new_total_collateral = self
            .total_collateral
            .checked_sub(collateral_returned)
            .ok_or(LedgerError::ArithmeticOverflow("total collateral"))?;
        let new_interest_paid = cdp
            .interest_paid
            .checked_add(interest_paid)
            .ok_or(LedgerError::ArithmeticOverflow("interest paid"))?;

        let cdp = self
            .cdps
            .get_mut(lender)
            .ok_or_else(|| LedgerError::PositionNotFound(lender.clone()))?;
        cdp.debt = cdp.debt - principal_paid;
        cdp.accrued_interest = cdp.accrued_interest - interest_paid;
        cdp.interest_paid = new_interest_paid;
        if closing {
            cdp.collateral = U256::zero();
            cdp.status = CdpStatus::Closed;
            self.open_count = self.open_count.saturating_sub(1);
        }
        self.total_debt = new_total_debt;
        self.total_accrued_interest = new_total_accrued;
        self.total_collateral = new_total_collateral;

        Ok(RepayOutcome {
            interest_paid,
            principal_paid,
            collateral_returned,
            closed: closing,
        })
    }

    /// Close a fully repaid position and return its collateral.
    pub fn close(&mut self, lender: &AccountId) -> LedgerResult<U256> {
        self.require_open(lender, "close")?;
        let cdp = self
            .cdps
            .get(lender)
            .ok_or_else(|| LedgerError::PositionNotFound(lender.clone()))?;
        if !cdp.debt.is_zero() || !cdp.accrued_interest.is_zero() {
            return Err(LedgerError::DebtOutstanding {
                debt: cdp.debt,
                interest: cdp.accrued_interest,
            });
        }
        let collateral = cdp.collateral;
        let new_total_collateral = self
            .total_collateral
            .checked_sub(collateral)
            .ok_or(LedgerError::ArithmeticOverflow("total collateral"))?;

        let cdp = self
            .cdps
            .get_mut(lender)
            .ok_or_else(|| LedgerError::PositionNotFound(lender.clone()))?;
        cdp.collateral = U256::zero();
        cdp.status = CdpStatus::Closed;
        self.total_collateral = new_total_collateral;
        self.open_count = self.open_count.saturating_sub(1);
        Ok(collateral)
    }

    /// Freeze an open position (Open -> Frozen).
    pub fn freeze(&mut self, lender: &AccountId) -> LedgerResult<()> {
        self.transition(lender, CdpStatus::Frozen, "freeze")
    }

    /// Unfreeze a frozen position (Frozen -> Open).
    pub fn unfreeze(&mut self, lender: &AccountId) -> LedgerResult<()> {
        self.transition(lender, CdpStatus::Open, "unfreeze")
    }

    /// Collateralization ratio of the position as stored. Callers that need
    /// the evaluation-time ratio accrue interest first.
    pub fn collateralization_ratio(
        &self,
        lender: &AccountId,
        oracle: &PriceOracle,
        config: &ProtocolConfig,
    ) -> LedgerResult<u32> {
        let cdp = self
            .cdps
            .get(lender)
            .ok_or_else(|| LedgerError::PositionNotFound(lender.clone()))?;
        let owed = cdp
            .total_owed()
            .ok_or(LedgerError::ArithmeticOverflow("total owed"))?;
        ratio_bps(cdp.collateral, owed, oracle, config)
    }

    /// Read-only liquidation eligibility at `now`: the ratio is computed with
    /// interest accrued to the evaluation time without mutating the position.
    pub fn is_liquidatable(
        &self,
        lender: &AccountId,
        oracle: &PriceOracle,
        config: &ProtocolConfig,
        now: u64,
    ) -> LedgerResult<bool> {
        let cdp = self
            .cdps
            .get(lender)
            .ok_or_else(|| LedgerError::PositionNotFound(lender.clone()))?;
        if cdp.status.is_terminal() {
            return Ok(false);
        }
        let pending =
            accrued_interest(cdp.debt, config.interest_rate_bps, cdp.last_accrual_time, now)?;
        let owed = cdp
            .total_owed()
            .and_then(|owed| owed.checked_add(pending))
            .ok_or(LedgerError::ArithmeticOverflow("total owed"))?;
        let ratio = ratio_bps(cdp.collateral, owed, oracle, config)?;
        Ok(ratio < config.minimum_collateral_ratio_bps)
    }

    /// Zero out a position during liquidation. Only the liquidation engine
    /// calls this, after it has re-checked eligibility.
    pub fn close_for_liquidation(&mut self, lender: &AccountId) -> LedgerResult<LiquidatedPosition> {
        let cdp = self
            .cdps
            .get(lender)
            .ok_or_else(|| LedgerError::PositionNotFound(lender.clone()))?;
        if !cdp.status.may_become(CdpStatus::Liquidated) {
            return Err(LedgerError::InvalidStatus {
                status: cdp.status,
                operation: "liquidate",
            });
        }
        let position = LiquidatedPosition {
            collateral: cdp.collateral,
            principal: cdp.debt,
            accrued_interest: cdp.accrued_interest,
        };
        let new_total_collateral = self
            .total_collateral
            .checked_sub(position.collateral)
            .ok_or(LedgerError::ArithmeticOverflow("total collateral"))?;
        let new_total_debt = self
            .total_debt
            .checked_sub(position.principal)
            .ok_or(LedgerError::ArithmeticOverflow("total debt"))?;
        let new_total_accrued = self
            .total_accrued_interest
            .checked_sub(position.accrued_interest)
            .ok_or(LedgerError::ArithmeticOverflow("total accrued interest"))?;

        let cdp = self
            .cdps
            .get_mut(lender)
            .ok_or_else(|| LedgerError::PositionNotFound(lender.clone()))?;
        cdp.collateral = U256::zero();
        cdp.debt = U256::zero();
        cdp.accrued_interest = U256::zero();
        cdp.status = CdpStatus::Liquidated;
        self.total_collateral = new_total_collateral;
        self.total_debt = new_total_debt;
        self.total_accrued_interest = new_total_accrued;
        self.open_count = self.open_count.saturating_sub(1);
        Ok(position)
    }

    pub fn get(&self, lender: &AccountId) -> Option<&Cdp> {
        self.cdps.get(lender)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cdp> {
        self.cdps.values()
    }

    pub fn total_collateral(&self) -> U256 {
        self.total_collateral
    }

    pub fn total_debt(&self) -> U256 {
        self.total_debt
    }

    pub fn total_accrued_interest(&self) -> U256 {
        self.total_accrued_interest
    }

    /// Number of non-terminal positions.
    pub fn open_count(&self) -> u64 {
        self.open_count
    }

    fn require_open(&self, lender: &AccountId, operation: &'static str) -> LedgerResult<()> {
        let cdp = self
            .cdps
            .get(lender)
            .ok_or_else(|| LedgerError::PositionNotFound(lender.clone()))?;
        if cdp.status != CdpStatus::Open {
            return Err(LedgerError::InvalidStatus {
                status: cdp.status,
                operation,
            });
        }
        Ok(())
    }

    fn transition(
        &mut self,
        lender: &AccountId,
        next: CdpStatus,
        operation: &'static str,
    ) -> LedgerResult<()> {
        let cdp = self
            .cdps
            .get_mut(lender)
            .ok_or_else(|| LedgerError::PositionNotFound(lender.clone()))?;
        if !cdp.status.may_become(next) {
            return Err(LedgerError::InvalidStatus {
                status: cdp.status,
                operation,
            });
        }
        cdp.status = next;
        Ok(())
    }
}
