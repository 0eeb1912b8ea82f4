//! Protocol composition root: routes decoded chain events into the ledgers.
//!
//! Owns the config, the price oracle, the CDP ledger, the stability pool,
//! the liquidation engine and the per-category checkpoints. Every apply is
//! idempotent against its category cursor: a replayed event is skipped
//! without touching state, and a failed event leaves both the state and the
//! cursor where they were.

use casper_types::U256;
use serde::{Deserialize, Serialize};

use crate::cdp_ledger::{Adjustment, CdpLedger};
use crate::checkpoint::CheckpointStore;
use crate::errors::LedgerResult;
use crate::events::{ApplyOutcome, CdpEvent, ChainEvent, LiquidationEvent, StakeEvent};
use crate::interest::validate_rate;
use crate::liquidation_engine::LiquidationEngine;
use crate::oracle::PriceOracle;
use crate::stability_pool::StabilityPool;
use crate::types::{Asset, EventCategory, ProtocolConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Protocol {
    config: ProtocolConfig,
    oracle: PriceOracle,
    ledger: CdpLedger,
    pool: StabilityPool,
    engine: LiquidationEngine,
    checkpoints: CheckpointStore,
}

impl Protocol {
    /// Build a protocol instance. The interest rate is validated against the
    /// configured bounds up front so no transition can run with a bad rate.
    pub fn new(config: ProtocolConfig) -> LedgerResult<Self> {
        validate_rate(config.interest_rate_bps, &config.interest_rate_bounds)?;
        Ok(Self {
            config,
            oracle: PriceOracle::new(),
            ledger: CdpLedger::new(),
            pool: StabilityPool::new(),
            engine: LiquidationEngine::new(),
            checkpoints: CheckpointStore::new(),
        })
    }

    /// Register an asset with the oracle. Idempotent; an existing record is
    /// kept.
    pub fn register_asset(&mut self, asset: Asset) {
        self.oracle.register_asset(asset);
    }

    /// Ingest a price observation.
    pub fn record_price(
        &mut self,
        symbol: &str,
        price: U256,
        native_price: U256,
        at: u64,
    ) -> LedgerResult<()> {
        self.oracle.record_price(symbol, price, native_price, at)
    }

    /// Apply a CDP-category chain event.
    pub fn apply_cdp_event(&mut self, event: ChainEvent<CdpEvent>) -> LedgerResult<ApplyOutcome> {
        if let Some(skipped) = self.replay_check(EventCategory::Cdp, event.at) {
            return Ok(skipped);
        }
        let at = event.at;
        match event.payload {
            CdpEvent::Open {
                lender,
                collateral,
                debt,
            } => {
                self.ledger
                    .open(lender, collateral, debt, &self.oracle, &self.config, at)?;
            }
            CdpEvent::AddCollateral { lender, amount } => {
                self.ledger.adjust(
                    &lender,
                    Adjustment::add_collateral(amount),
                    &self.oracle,
                    &self.config,
                    at,
                )?;
            }
            CdpEvent::WithdrawCollateral { lender, amount } => {
                self.ledger.adjust(
                    &lender,
                    Adjustment::withdraw_collateral(amount),
                    &self.oracle,
                    &self.config,
                    at,
                )?;
            }
            CdpEvent::Borrow { lender, amount } => {
                self.ledger.adjust(
                    &lender,
                    Adjustment::borrow(amount),
                    &self.oracle,
                    &self.config,
                    at,
                )?;
            }
            CdpEvent::Repay { lender, amount } => {
                self.ledger.repay(&lender, amount, &self.config, at)?;
            }
            CdpEvent::Freeze { lender } => {
                self.ledger.freeze(&lender)?;
            }
            CdpEvent::Unfreeze { lender } => {
                self.ledger.unfreeze(&lender)?;
            }
            CdpEvent::Close { lender } => {
                self.ledger.accrue_interest(&lender, &self.config, at)?;
                self.ledger.close(&lender)?;
            }
        }
        self.checkpoints.advance(EventCategory::Cdp, at);
        Ok(ApplyOutcome::Applied { cursor: at })
    }

    /// Apply a stability-pool-category chain event.
    pub fn apply_stake_event(
        &mut self,
        event: ChainEvent<StakeEvent>,
    ) -> LedgerResult<ApplyOutcome> {
        if let Some(skipped) = self.replay_check(EventCategory::Stake, event.at) {
            return Ok(skipped);
        }
        let at = event.at;
        match event.payload {
            StakeEvent::Deposit { staker, amount } => {
                self.pool.deposit(&staker, amount, self.config.gain_policy)?;
            }
            StakeEvent::Withdraw { staker, amount } => {
                self.pool.withdraw(&staker, amount, self.config.gain_policy)?;
            }
            StakeEvent::ClaimGain { staker } => {
                self.pool.claim_gain(&staker)?;
            }
        }
        self.checkpoints.advance(EventCategory::Stake, at);
        Ok(ApplyOutcome::Applied { cursor: at })
    }

    /// Apply a liquidation-category chain event.
    pub fn apply_liquidation_event(
        &mut self,
        event: ChainEvent<LiquidationEvent>,
    ) -> LedgerResult<ApplyOutcome> {
        if let Some(skipped) = self.replay_check(EventCategory::Liquidation, event.at) {
            return Ok(skipped);
        }
        let at = event.at;
        match event.payload {
            LiquidationEvent::Liquidate { lender } => {
                self.engine.liquidate(
                    &mut self.ledger,
                    &mut self.pool,
                    &self.oracle,
                    &self.config,
                    &lender,
                    at,
                )?;
            }
        }
        self.checkpoints.advance(EventCategory::Liquidation, at);
        Ok(ApplyOutcome::Applied { cursor: at })
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn oracle(&self) -> &PriceOracle {
        &self.oracle
    }

    pub fn ledger(&self) -> &CdpLedger {
        &self.ledger
    }

    pub fn pool(&self) -> &StabilityPool {
        &self.pool
    }

    pub fn liquidations(&self) -> &LiquidationEngine {
        &self.engine
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    fn replay_check(&self, category: EventCategory, at: u64) -> Option<ApplyOutcome> {
        if self.checkpoints.is_replay(category, at) {
            // last_applied is Some whenever is_replay holds.
            let last_applied = self.checkpoints.last_applied(category).unwrap_or(at);
            Some(ApplyOutcome::Skipped {
                cursor: at,
                last_applied,
            })
        } else {
            None
        }
    }
}
