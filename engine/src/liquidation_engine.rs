//! Liquidation engine: seizes under-collateralized positions and offsets
//! their principal against the stability pool.
//!
//! Liquidation flow:
//! 1. Accrue interest so eligibility is judged at evaluation time
//! 2. Check the position's ratio against the protocol minimum
//! 3. Freeze the oracle prices into the record
//! 4. Repay accrued interest out of collateral value
//! 5. Offset the principal against the pool (partial on shortfall)
//! 6. Zero the position and append the immutable record
//!
//! The pool offset runs before the position is zeroed: it is the only step
//! that can still fail, so a failure leaves the ledger untouched.

use casper_types::U256;
use serde::{Deserialize, Serialize};

use crate::cdp_ledger::CdpLedger;
use crate::errors::{LedgerError, LedgerResult};
use crate::oracle::PriceOracle;
use crate::stability_pool::StabilityPool;
use crate::types::{AccountId, Liquidation, ProtocolConfig, SCALE};

/// Cumulative liquidation counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationStats {
    pub liquidation_count: u64,
    pub total_collateral_liquidated: U256,
    pub total_principal_repaid: U256,
    pub total_interest_repaid: U256,
    pub total_shortfall: U256,
}

/// Liquidation engine. Owns the append-only record log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationEngine {
    records: Vec<Liquidation>,
    stats: LiquidationStats,
}

impl LiquidationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Liquidate `lender`'s position. Fails with `NotLiquidatable` when the
    /// evaluation-time ratio is at or above the protocol minimum.
    pub fn liquidate(
        &mut self,
        ledger: &mut CdpLedger,
        pool: &mut StabilityPool,
        oracle: &PriceOracle,
        config: &ProtocolConfig,
        lender: &AccountId,
        now: u64,
    ) -> LedgerResult<Liquidation> {
        ledger.accrue_interest(lender, config, now)?;

        let ratio = ledger.collateralization_ratio(lender, oracle, config)?;
        if ratio >= config.minimum_collateral_ratio_bps {
            return Err(LedgerError::NotLiquidatable {
                ratio_bps: ratio,
                minimum_bps: config.minimum_collateral_ratio_bps,
            });
        }

        let collateral_price = oracle.price_of(&config.collateral_symbol)?;
        let debt_price = oracle.price_of(&config.debt_symbol)?;

        let cdp = ledger
            .get(lender)
            .ok_or_else(|| LedgerError::PositionNotFound(lender.clone()))?;
        let collateral = cdp.collateral;
        let principal = cdp.debt;
        let accrued = cdp.accrued_interest;

        let collateral_value_usd = collateral
            .checked_mul(collateral_price)
            .ok_or(LedgerError::ArithmeticOverflow("collateral value"))?
            / U256::from(SCALE);

        // Accrued interest is repaid out of collateral value before the pool
        // sees anything. An underwater-into-interest position repays what the
        // collateral covers.
        let collateral_in_debt_units = value_in(collateral, collateral_price, debt_price)?;
        let interest_repaid = accrued.min(collateral_in_debt_units);
        let collateral_for_interest = value_in(interest_repaid, debt_price, collateral_price)?
            .min(collateral);
        let collateral_to_pool = collateral - collateral_for_interest;

        // Only fallible mutation; the ledger is untouched if it errors.
        let offset = pool.offset(principal, collateral_to_pool)?;

        // Pre-validated by the ratio check above; Open and Frozen both
        // liquidate.
        let position = ledger.close_for_liquidation(lender)?;
        debug_assert_eq!(position.principal, principal);

        let record = Liquidation {
            lender: lender.clone(),
            collateral_liquidated: collateral,
            principal_repaid: offset.debt_absorbed,
            interest_repaid,
            collateral_for_interest,
            collateral_value_usd,
            collateral_price,
            debt_price,
            debt_shortfall: offset.debt_shortfall,
            at: now,
        };

        self.stats.liquidation_count += 1;
        self.stats.total_collateral_liquidated = self
            .stats
            .total_collateral_liquidated
            .checked_add(collateral)
            .ok_or(LedgerError::ArithmeticOverflow("liquidated collateral total"))?;
        self.stats.total_principal_repaid = self
            .stats
            .total_principal_repaid
            .checked_add(offset.debt_absorbed)
            .ok_or(LedgerError::ArithmeticOverflow("principal repaid total"))?;
        self.stats.total_interest_repaid = self
            .stats
            .total_interest_repaid
            .checked_add(interest_repaid)
            .ok_or(LedgerError::ArithmeticOverflow("interest repaid total"))?;
        self.stats.total_shortfall = self
            .stats
            .total_shortfall
            .checked_add(offset.debt_shortfall)
            .ok_or(LedgerError::ArithmeticOverflow("shortfall total"))?;

        self.records.push(record.clone());
        Ok(record)
    }

    /// Append-only liquidation history, oldest first.
    pub fn records(&self) -> &[Liquidation] {
        &self.records
    }

    pub fn stats(&self) -> &LiquidationStats {
        &self.stats
    }
}

/// Convert `amount` priced at `from_price` into units priced at `to_price`.
fn value_in(amount: U256, from_price: U256, to_price: U256) -> LedgerResult<U256> {
    if to_price.is_zero() {
        return Err(LedgerError::ArithmeticOverflow("price conversion"));
    }
    let value = amount
        .checked_mul(from_price)
        .ok_or(LedgerError::ArithmeticOverflow("price conversion"))?
        / to_price;
    Ok(value)
}
