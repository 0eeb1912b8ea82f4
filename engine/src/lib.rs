//! Off-chain accounting core for a CDP lending protocol with a
//! debt-absorbing stability pool.
//!
//! The engine consumes decoded chain events and maintains three ledgers:
//! collateralized debt positions, stability pool deposits with product-sum
//! gain tracking, and an append-only liquidation log. All amounts are
//! `U256` in the asset's smallest unit; prices and the pool product are
//! fixed-point 1e18; ratios are u32 basis points.

pub mod aggregates;
pub mod cdp_ledger;
pub mod checkpoint;
pub mod errors;
pub mod events;
pub mod interest;
pub mod liquidation_engine;
pub mod oracle;
pub mod protocol;
pub mod stability_pool;
pub mod types;

pub use aggregates::{ProtocolAggregates, RatioHistogram};
pub use cdp_ledger::{ratio_bps, Adjustment, CdpLedger, RepayOutcome};
pub use checkpoint::CheckpointStore;
pub use errors::{LedgerError, LedgerResult};
pub use events::{ApplyOutcome, CdpEvent, ChainEvent, LiquidationEvent, StakeEvent};
pub use interest::{accrued_interest, validate_rate, InterestRateBounds, SECONDS_PER_YEAR};
pub use liquidation_engine::{LiquidationEngine, LiquidationStats};
pub use oracle::PriceOracle;
pub use protocol::Protocol;
pub use stability_pool::{OffsetOutcome, StabilityPool, TouchOutcome, SCALE_FACTOR};
pub use types::{
    AccountId, Asset, AssetKind, Cdp, CdpStatus, EventCategory, GainPolicy, Liquidation,
    ProtocolConfig, RepayRounding, ScalingState, Staker, BPS_SCALE, SCALE,
};
