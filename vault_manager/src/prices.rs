//! Asset prices used to value deposits and strategy positions

use std::collections::BTreeMap;

use alloy_primitives::U256;

use crate::{
    types::AssetId,
    utils::error::{ManagerError, ManagerResult},
};

/// USD price source. Prices are e18 scaled per whole asset unit.
pub trait PriceFeed {
    fn price(&self, asset: &AssetId) -> ManagerResult<U256>;

    /// Prices for an asset group, in group order
    fn prices(&self, assets: &[AssetId]) -> ManagerResult<Vec<U256>> {
        assets.iter().map(|asset| self.price(asset)).collect()
    }
}

/// Price feed filled by a keeper through the `report_prices` endpoint
#[derive(Clone, Default, Debug)]
pub struct ReportedPrices {
    prices: BTreeMap<AssetId, U256>,
    updated_at: u64,
}

impl ReportedPrices {
    pub fn report(&mut self, asset: AssetId, price: U256, now: u64) -> &mut Self {
        self.prices.insert(asset, price);
        self.updated_at = now;
        self
    }

    pub fn updated_at(&self) -> u64 {
        self.updated_at
    }
}

impl PriceFeed for ReportedPrices {
    fn price(&self, asset: &AssetId) -> ManagerResult<U256> {
        match self.prices.get(asset) {
            Some(price) if !price.is_zero() => Ok(*price),
            _ => Err(ManagerError::NonExistentValue),
        }
    }
}
