//! CDP Core
//!
//! Umbrella crate for the CDP lending accounting core. The actual ledger
//! engine lives in `cdp-core-engine`; this crate re-exports it so downstream
//! services (event ingestion, read-model servers) depend on a single name.

pub use cdp_core_engine::*;
