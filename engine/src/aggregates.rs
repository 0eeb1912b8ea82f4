//! Derived read-only rollups over the protocol state.
//!
//! Everything here is recomputed from the ledgers on demand; nothing is
//! cached, so the rollup can never drift from the state it summarizes.

use casper_types::U256;
use serde::{Deserialize, Serialize};

use crate::cdp_ledger::ratio_bps;
use crate::errors::{LedgerError, LedgerResult};
use crate::protocol::Protocol;

/// Histogram bucket upper bounds in bps. The last bucket is open-ended and
/// also holds zero-debt positions (ratio reads as `u32::MAX`).
pub const RATIO_BUCKET_BOUNDS: [u32; 5] = [11_000, 12_000, 15_000, 20_000, 30_000];

/// Counts of live positions per collateralization band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatioHistogram {
    counts: [u64; RATIO_BUCKET_BOUNDS.len() + 1],
}

impl RatioHistogram {
    pub fn record(&mut self, ratio_bps: u32) {
        let idx = RATIO_BUCKET_BOUNDS
            .iter()
            .position(|bound| ratio_bps < *bound)
            .unwrap_or(RATIO_BUCKET_BOUNDS.len());
        self.counts[idx] += 1;
    }

    /// Count of positions with a ratio below `bound` must use a configured
    /// bucket bound; other values return `None`.
    pub fn below(&self, bound: u32) -> Option<u64> {
        let idx = RATIO_BUCKET_BOUNDS.iter().position(|b| *b == bound)?;
        Some(self.counts[..=idx].iter().sum())
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

/// Snapshot of protocol-wide totals and counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolAggregates {
    pub total_collateral: U256,
    pub total_principal: U256,
    pub total_accrued_interest: U256,
    pub open_positions: u64,
    pub pool_deposits: U256,
    pub pool_collateral_gains: U256,
    pub pool_debt_absorbed: U256,
    pub pool_stakers: u64,
    pub liquidation_count: u64,
    pub total_shortfall: U256,
    pub ratio_histogram: RatioHistogram,
}

impl ProtocolAggregates {
    pub fn collect(protocol: &Protocol) -> LedgerResult<Self> {
        let ledger = protocol.ledger();
        let pool = protocol.pool();
        let stats = protocol.liquidations().stats();

        let mut histogram = RatioHistogram::default();
        for cdp in ledger.iter().filter(|cdp| !cdp.status.is_terminal()) {
            let owed = cdp
                .total_owed()
                .ok_or(LedgerError::ArithmeticOverflow("total owed"))?;
            let ratio = ratio_bps(cdp.collateral, owed, protocol.oracle(), protocol.config())?;
            histogram.record(ratio);
        }

        Ok(Self {
            total_collateral: ledger.total_collateral(),
            total_principal: ledger.total_debt(),
            total_accrued_interest: ledger.total_accrued_interest(),
            open_positions: ledger.open_count(),
            pool_deposits: pool.total_deposits(),
            pool_collateral_gains: pool.total_collateral_gains(),
            pool_debt_absorbed: pool.total_debt_absorbed(),
            pool_stakers: pool.staker_count(),
            liquidation_count: stats.liquidation_count,
            total_shortfall: stats.total_shortfall,
            ratio_histogram: histogram,
        })
    }
}
