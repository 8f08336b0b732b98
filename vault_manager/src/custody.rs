//! Bookkeeping of assets held by the manager but not routed into a strategy.
//!
//! The custody pool receives flushed deposits (earmarked per strategy) and is drained
//! by the strategy's harvest. The emergency holding area receives everything recovered
//! from removed strategies.

use std::collections::BTreeMap;

use alloy_primitives::U256;

use crate::{
    types::StrategyId,
    utils::{
        common::{add_assign_assets, all_zero, checked_sub},
        error::{config_err, ManagerError, ManagerResult},
    },
};

/// Flushed but unharvested assets, per strategy
#[derive(Clone, Default, Debug)]
pub struct CustodyPool {
    balances: BTreeMap<StrategyId, Vec<U256>>,
}

impl CustodyPool {
    /// Adds flushed deposits to the strategy's earmark
    pub fn add(&mut self, strategy: StrategyId, amounts: &[U256]) -> ManagerResult<()> {
        let balance = self
            .balances
            .entry(strategy)
            .or_insert_with(|| vec![U256::ZERO; amounts.len()]);
        add_assign_assets(balance, amounts)
    }

    /// Removes and returns everything earmarked for the strategy
    pub fn drain(&mut self, strategy: StrategyId) -> Option<Vec<U256>> {
        self.balances.remove(&strategy)
    }

    /// Removes part of the strategy's earmark
    pub fn take(&mut self, strategy: StrategyId, amounts: &[U256]) -> ManagerResult<()> {
        let balance = self
            .balances
            .get_mut(&strategy)
            .ok_or(ManagerError::NonExistentValue)?;
        if balance.len() != amounts.len() {
            return Err(config_err("Asset vectors have different lengths."));
        }
        *balance = balance
            .iter()
            .zip(amounts)
            .map(|(held, amount)| checked_sub(*held, *amount, "Custody balance"))
            .collect::<ManagerResult<Vec<U256>>>()?;
        if all_zero(balance) {
            self.balances.remove(&strategy);
        }
        Ok(())
    }

    pub fn balance(&self, strategy: StrategyId) -> Option<&Vec<U256>> {
        self.balances.get(&strategy)
    }
}

/// Assets recovered from removed strategies, kept per strategy for manual distribution
#[derive(Clone, Default, Debug)]
pub struct EmergencyHolding {
    balances: BTreeMap<StrategyId, Vec<U256>>,
}

impl EmergencyHolding {
    pub fn add(&mut self, strategy: StrategyId, amounts: &[U256]) -> ManagerResult<()> {
        let balance = self
            .balances
            .entry(strategy)
            .or_insert_with(|| vec![U256::ZERO; amounts.len()]);
        add_assign_assets(balance, amounts)
    }

    pub fn balance(&self, strategy: StrategyId) -> Option<&Vec<U256>> {
        self.balances.get(&strategy)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StrategyId, &Vec<U256>)> {
        self.balances.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custody_add_and_drain() {
        let mut custody = CustodyPool::default();
        custody.add(1, &[U256::from(5), U256::from(1)]).unwrap();
        custody.add(1, &[U256::from(5), U256::from(2)]).unwrap();

        assert_eq!(
            custody.balance(1),
            Some(&vec![U256::from(10), U256::from(3)])
        );
        custody.take(1, &[U256::from(1), U256::from(1)]).unwrap();
        assert!(custody.take(1, &[U256::from(10), U256::ZERO]).is_err());
        assert_eq!(custody.drain(1), Some(vec![U256::from(9), U256::from(2)]));
        assert_eq!(custody.drain(1), None);
    }

    #[test]
    fn test_mismatched_asset_count_is_rejected() {
        let mut custody = CustodyPool::default();
        custody.add(1, &[U256::from(5)]).unwrap();
        assert!(custody.add(1, &[U256::from(5), U256::from(1)]).is_err());
    }
}
