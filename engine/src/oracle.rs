//! Price oracle snapshot.
//!
//! Holds the latest known price for each asset. Pure lookup; the transition
//! functions never call out to the network. Prices are fed in by oracle
//! ingestion through [`PriceOracle::record_price`].

use std::collections::BTreeMap;

use casper_types::U256;
use serde::{Deserialize, Serialize};

use crate::errors::{LedgerError, LedgerResult};
use crate::types::Asset;

/// Latest-known prices, keyed by asset symbol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceOracle {
    assets: BTreeMap<String, Asset>,
}

impl PriceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an asset. Re-registering keeps the existing record; assets are
    /// never deleted.
    pub fn register_asset(&mut self, asset: Asset) {
        self.assets.entry(asset.symbol.clone()).or_insert(asset);
    }

    /// Record a price observation. Observations older than the stored one are
    /// ignored so out-of-order oracle feeds cannot roll a price back.
    pub fn record_price(
        &mut self,
        symbol: &str,
        price: U256,
        native_price: U256,
        at: u64,
    ) -> LedgerResult<()> {
        let asset = self
            .assets
            .get_mut(symbol)
            .ok_or_else(|| LedgerError::UnknownAsset(symbol.to_owned()))?;
        if at < asset.updated_at {
            return Ok(());
        }
        asset.price = price;
        asset.native_price = native_price;
        asset.updated_at = at;
        Ok(())
    }

    /// Latest known price for `symbol`, fixed-point 1e18.
    pub fn price_of(&self, symbol: &str) -> LedgerResult<U256> {
        self.assets
            .get(symbol)
            .map(|asset| asset.price)
            .ok_or_else(|| LedgerError::UnknownAsset(symbol.to_owned()))
    }

    pub fn get(&self, symbol: &str) -> Option<&Asset> {
        self.assets.get(symbol)
    }

    pub fn assets(&self) -> impl Iterator<Item = &Asset> {
        self.assets.values()
    }
}
