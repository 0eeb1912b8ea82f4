//! Stability pool: debt-absorbing deposits with product-sum gain tracking.
//!
//! Depositors fund the pool with the debt asset. When a position is
//! liquidated the pool absorbs its principal and receives the seized
//! collateral; every depositor's balance shrinks and gain grows in
//! proportion to their share, in O(1) per liquidation.
//!
//! The product factor `p` compounds the loss fraction of every offset and
//! the sum factor `s` accumulates the per-unit collateral gain. `scale`
//! renormalizes `p` when it loses too much precision and `epoch` starts a
//! fresh product after full depletion. Sums are kept per `(epoch, scale)`
//! so a depositor whose snapshot predates a rollover can still claim the
//! gains earned inside their own epoch.

use std::collections::BTreeMap;

use casper_types::U256;
use serde::{Deserialize, Serialize};

use crate::errors::{LedgerError, LedgerResult};
use crate::types::{AccountId, GainPolicy, ScalingState, Staker, SCALE};

/// Renormalization factor for the product (1e9).
pub const SCALE_FACTOR: u64 = 1_000_000_000;

/// Result of a deposit or withdrawal touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchOutcome {
    /// Compounded balance before the touch was applied
    pub compounded_before: U256,
    /// Collateral gain realized by the touch
    pub gain_realized: U256,
    /// Collateral released to the caller (zero under `GainPolicy::Accumulate`)
    pub paid_out: U256,
}

/// Result of offsetting liquidated debt against the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetOutcome {
    /// Principal the pool absorbed
    pub debt_absorbed: U256,
    /// Collateral the pool took in exchange, pro-rata to the absorbed debt
    pub collateral_absorbed: U256,
    /// Principal the pool could not absorb
    pub debt_shortfall: U256,
}

/// The stability pool ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StabilityPool {
    stakers: BTreeMap<AccountId, Staker>,
    /// Final `s` value per epoch and scale; entries are never removed so
    /// stale snapshots can settle gains from ended epochs and scales.
    epoch_scale_sums: BTreeMap<u64, BTreeMap<u64, U256>>,
    state: ScalingState,
    total_deposits: U256,
    /// Collateral held on behalf of depositors, not yet claimed
    total_collateral_gains: U256,
    /// Cumulative principal absorbed over the pool's lifetime
    total_debt_absorbed: U256,
    staker_count: u64,
}

impl StabilityPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deposit into the pool. Realizes the depositor's current gain first,
    /// then tops up their compounded balance and refreshes the snapshot.
    pub fn deposit(
        &mut self,
        address: &AccountId,
        amount: U256,
        policy: GainPolicy,
    ) -> LedgerResult<TouchOutcome> {
        if amount.is_zero() {
            return Err(LedgerError::ZeroAmount);
        }

        let (compounded, gain, old_pending, had_deposit) = self.realized_view(address)?;
        let (pending, paid_out) = settle_gain(old_pending, gain, policy)?;

        let new_deposit = compounded
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow("pool deposit"))?;
        let new_total = self
            .total_deposits
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow("pool total deposits"))?;
        let new_collateral_gains = self
            .total_collateral_gains
            .checked_sub(paid_out)
            .ok_or(LedgerError::ArithmeticOverflow("pool collateral gains"))?;

        if !had_deposit {
            self.staker_count += 1;
        }
        self.total_deposits = new_total;
        self.total_collateral_gains = new_collateral_gains;
        self.store_snapshot(address, new_deposit, pending);

        Ok(TouchOutcome {
            compounded_before: compounded,
            gain_realized: gain,
            paid_out,
        })
    }

    /// Withdraw from the pool. The request is checked against the compounded
    /// balance, not the raw deposit.
    pub fn withdraw(
        &mut self,
        address: &AccountId,
        amount: U256,
        policy: GainPolicy,
    ) -> LedgerResult<TouchOutcome> {
        if amount.is_zero() {
            return Err(LedgerError::ZeroAmount);
        }

        let (compounded, gain, old_pending, had_deposit) = self.realized_view(address)?;
        if amount > compounded {
            return Err(LedgerError::InsufficientBalance {
                requested: amount,
                available: compounded,
            });
        }
        let (pending, paid_out) = settle_gain(old_pending, gain, policy)?;

        let new_deposit = compounded - amount;
        let new_total = self
            .total_deposits
            .checked_sub(amount)
            .ok_or(LedgerError::ArithmeticOverflow("pool total deposits"))?;
        let new_collateral_gains = self
            .total_collateral_gains
            .checked_sub(paid_out)
            .ok_or(LedgerError::ArithmeticOverflow("pool collateral gains"))?;

        if had_deposit && new_deposit.is_zero() {
            self.staker_count = self.staker_count.saturating_sub(1);
        }
        self.total_deposits = new_total;
        self.total_collateral_gains = new_collateral_gains;
        if new_deposit.is_zero() && pending.is_zero() {
            self.stakers.remove(address);
        } else {
            self.store_snapshot(address, new_deposit, pending);
        }

        Ok(TouchOutcome {
            compounded_before: compounded,
            gain_realized: gain,
            paid_out,
        })
    }

    /// Claim all collateral gains (realized plus banked) without changing the
    /// deposit. Unknown depositors claim nothing.
    pub fn claim_gain(&mut self, address: &AccountId) -> LedgerResult<U256> {
        if !self.stakers.contains_key(address) {
            return Ok(U256::zero());
        }
        let (compounded, gain, old_pending, had_deposit) = self.realized_view(address)?;
        let claimed = old_pending
            .checked_add(gain)
            .ok_or(LedgerError::ArithmeticOverflow("pool gain"))?;

        let new_collateral_gains = self
            .total_collateral_gains
            .checked_sub(claimed)
            .ok_or(LedgerError::ArithmeticOverflow("pool collateral gains"))?;
        self.total_collateral_gains = new_collateral_gains;

        if compounded.is_zero() {
            if had_deposit {
                self.staker_count = self.staker_count.saturating_sub(1);
            }
            self.stakers.remove(address);
        } else {
            self.store_snapshot(address, compounded, U256::zero());
        }
        Ok(claimed)
    }

    /// Absorb liquidated principal in exchange for collateral. If the pool
    /// cannot cover the whole principal it absorbs what it can, takes
    /// collateral pro-rata, and reports the remainder as a shortfall. Never
    /// fails for an empty pool.
    pub fn offset(&mut self, principal: U256, collateral: U256) -> LedgerResult<OffsetOutcome> {
        let total = self.total_deposits;
        if principal.is_zero() || total.is_zero() {
            return Ok(OffsetOutcome {
                debt_absorbed: U256::zero(),
                collateral_absorbed: U256::zero(),
                debt_shortfall: principal,
            });
        }

        let absorbed = principal.min(total);
        let collateral_absorbed = if absorbed == principal {
            collateral
        } else {
            collateral
                .checked_mul(absorbed)
                .ok_or(LedgerError::ArithmeticOverflow("offset collateral"))?
                / principal
        };
        let shortfall = principal - absorbed;

        // S += collateral * P / total, recorded under the current
        // (epoch, scale) key before P moves.
        let sum_increment = collateral_absorbed
            .checked_mul(self.state.p)
            .ok_or(LedgerError::ArithmeticOverflow("pool sum increment"))?
            / total;
        let new_s = self
            .state
            .s
            .checked_add(sum_increment)
            .ok_or(LedgerError::ArithmeticOverflow("pool sum"))?;
        let new_total = total - absorbed;

        // P *= (total - absorbed) / total, renormalizing or rolling the
        // epoch as needed.
        let mut next = self.state.clone();
        next.s = new_s;
        if new_total.is_zero() {
            next.epoch += 1;
            next.scale = 0;
            next.p = U256::from(SCALE);
            next.s = U256::zero();
        } else {
            let new_p = self
                .state
                .p
                .checked_mul(new_total)
                .ok_or(LedgerError::ArithmeticOverflow("pool product"))?
                / total;
            if new_p < U256::from(SCALE / SCALE_FACTOR) {
                let renormalized = new_p
                    .checked_mul(U256::from(SCALE_FACTOR))
                    .ok_or(LedgerError::ArithmeticOverflow("pool product"))?;
                if renormalized.is_zero() {
                    return Err(LedgerError::ArithmeticOverflow("pool product underflow"));
                }
                next.p = renormalized;
                next.scale += 1;
                next.s = U256::zero();
            } else {
                next.p = new_p;
            }
        }

        let new_collateral_gains = self
            .total_collateral_gains
            .checked_add(collateral_absorbed)
            .ok_or(LedgerError::ArithmeticOverflow("pool collateral gains"))?;
        let new_absorbed_total = self
            .total_debt_absorbed
            .checked_add(absorbed)
            .ok_or(LedgerError::ArithmeticOverflow("pool debt absorbed"))?;

        self.epoch_scale_sums
            .entry(self.state.epoch)
            .or_default()
            .insert(self.state.scale, new_s);
        self.state = next;
        self.total_deposits = new_total;
        self.total_collateral_gains = new_collateral_gains;
        self.total_debt_absorbed = new_absorbed_total;

        Ok(OffsetOutcome {
            debt_absorbed: absorbed,
            collateral_absorbed,
            debt_shortfall: shortfall,
        })
    }

    /// Depositor's balance after all offsets since their last touch:
    /// `deposit * p / p_snap`, divided once more by the renormalization
    /// factor per scale crossed. Two or more scale crossings round to zero,
    /// as does any epoch rollover.
    pub fn compounded_deposit(&self, address: &AccountId) -> LedgerResult<U256> {
        match self.stakers.get(address) {
            Some(staker) => self.compounded_of(staker),
            None => Ok(U256::zero()),
        }
    }

    /// Collateral gain earned since the depositor's last touch, excluding
    /// any banked pending gain.
    pub fn unrealized_gain(&self, address: &AccountId) -> LedgerResult<U256> {
        match self.stakers.get(address) {
            Some(staker) => self.gain_of(staker),
            None => Ok(U256::zero()),
        }
    }

    /// Realized-plus-unrealized gain available to claim.
    pub fn claimable_gain(&self, address: &AccountId) -> LedgerResult<U256> {
        match self.stakers.get(address) {
            Some(staker) => {
                let gain = self.gain_of(staker)?;
                staker
                    .pending_gain
                    .checked_add(gain)
                    .ok_or(LedgerError::ArithmeticOverflow("pool gain"))
            }
            None => Ok(U256::zero()),
        }
    }

    pub fn get(&self, address: &AccountId) -> Option<&Staker> {
        self.stakers.get(address)
    }

    pub fn scaling_state(&self) -> &ScalingState {
        &self.state
    }

    pub fn total_deposits(&self) -> U256 {
        self.total_deposits
    }

    pub fn total_collateral_gains(&self) -> U256 {
        self.total_collateral_gains
    }

    pub fn total_debt_absorbed(&self) -> U256 {
        self.total_debt_absorbed
    }

    pub fn staker_count(&self) -> u64 {
        self.staker_count
    }

    /// Compounded balance, realized gain, banked pending gain, and whether
    /// the depositor had a non-zero raw deposit.
    fn realized_view(&self, address: &AccountId) -> LedgerResult<(U256, U256, U256, bool)> {
        match self.stakers.get(address) {
            Some(staker) => {
                let compounded = self.compounded_of(staker)?;
                let gain = self.gain_of(staker)?;
                Ok((compounded, gain, staker.pending_gain, !staker.deposit.is_zero()))
            }
            None => Ok((U256::zero(), U256::zero(), U256::zero(), false)),
        }
    }

    fn compounded_of(&self, staker: &Staker) -> LedgerResult<U256> {
        if staker.deposit.is_zero() || staker.p_snap.is_zero() {
            return Ok(U256::zero());
        }
        if self.state.epoch > staker.epoch {
            return Ok(U256::zero());
        }
        let scale_diff = self.state.scale.saturating_sub(staker.scale);
        let compounded = staker
            .deposit
            .checked_mul(self.state.p)
            .ok_or(LedgerError::ArithmeticOverflow("compounded deposit"))?
            / staker.p_snap;
        match scale_diff {
            0 => Ok(compounded),
            1 => Ok(compounded / U256::from(SCALE_FACTOR)),
            _ => Ok(U256::zero()),
        }
    }

    /// Gain since the snapshot, read from the (epoch, scale) sums so it
    /// stays claimable after the pool moves to a later scale or epoch.
    fn gain_of(&self, staker: &Staker) -> LedgerResult<U256> {
        if staker.deposit.is_zero() || staker.p_snap.is_zero() {
            return Ok(U256::zero());
        }
        let s_current = self.sum_at(staker.epoch, staker.scale);
        let first_portion = s_current
            .checked_sub(staker.s_snap)
            .ok_or(LedgerError::ArithmeticOverflow("pool sum regression"))?;
        let second_portion = self.sum_at(staker.epoch, staker.scale + 1) / U256::from(SCALE_FACTOR);
        let sum_diff = first_portion
            .checked_add(second_portion)
            .ok_or(LedgerError::ArithmeticOverflow("pool gain"))?;
        let gain = staker
            .deposit
            .checked_mul(sum_diff)
            .ok_or(LedgerError::ArithmeticOverflow("pool gain"))?
            / staker.p_snap;
        Ok(gain)
    }

    fn sum_at(&self, epoch: u64, scale: u64) -> U256 {
        self.epoch_scale_sums
            .get(&epoch)
            .and_then(|sums| sums.get(&scale))
            .copied()
            .unwrap_or_else(U256::zero)
    }

    fn store_snapshot(&mut self, address: &AccountId, deposit: U256, pending_gain: U256) {
        let staker = Staker {
            address: address.clone(),
            deposit,
            p_snap: self.state.p,
            s_snap: self.state.s,
            epoch: self.state.epoch,
            scale: self.state.scale,
            pending_gain,
        };
        self.stakers.insert(address.clone(), staker);
    }
}

fn settle_gain(pending: U256, gain: U256, policy: GainPolicy) -> LedgerResult<(U256, U256)> {
    let combined = pending
        .checked_add(gain)
        .ok_or(LedgerError::ArithmeticOverflow("pool gain"))?;
    match policy {
        GainPolicy::Accumulate => Ok((combined, U256::zero())),
        GainPolicy::PayOut => Ok((U256::zero(), combined)),
    }
}
