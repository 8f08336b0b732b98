use std::collections::BTreeSet;

use candid::Principal;

use crate::{
    access::Role,
    prices::PriceFeed,
    protocol::Protocol,
    strategy::ledger::{self, HarvestOutcome},
    types::{HarvestParams, StrategyId},
    utils::error::{config_err, ManagerError, ManagerResult},
};

fn ensure_unique(strategy_ids: &[StrategyId]) -> ManagerResult<()> {
    let unique: BTreeSet<&StrategyId> = strategy_ids.iter().collect();
    if unique.len() != strategy_ids.len() {
        return Err(config_err("Strategies must be unique."));
    }
    Ok(())
}

impl Protocol {
    /// Harvests the open index of every listed strategy.
    ///
    /// `params` holds one entry per strategy, or none for default parameters.
    /// Every precondition is checked before the first strategy is touched.
    pub fn harvest(
        &mut self,
        caller: Principal,
        strategy_ids: &[StrategyId],
        params: &[HarvestParams],
        now: u64,
    ) -> ManagerResult<Vec<HarvestOutcome>> {
        self.roles.check(Role::DoHardWorker, caller)?;
        ensure_unique(strategy_ids)?;
        if !params.is_empty() && params.len() != strategy_ids.len() {
            return Err(config_err("Harvest parameters do not match the strategies."));
        }

        let mut prices = Vec::with_capacity(strategy_ids.len());
        let mut staged = Vec::with_capacity(strategy_ids.len());
        for id in strategy_ids {
            let strategy = self.active_strategy(*id, Role::DoHardWorker, caller)?;
            strategy.lock.ensure_ready(*id)?;
            prices.push(self.prices.prices(&strategy.settings.assets)?);
            staged.push(self.stage_strategy(*id)?);
        }

        // All strategies, their adapters and the custody pool commit together or not at all.
        let default_params = HarvestParams::default();
        let mut custody = self.custody.clone();
        let mut outcomes = Vec::with_capacity(strategy_ids.len());
        for (position, entry) in staged.iter_mut().enumerate() {
            let params = params.get(position).unwrap_or(&default_params);
            let outcome = ledger::harvest(
                &mut entry.strategy,
                entry.adapter.as_mut(),
                &self.config,
                params,
                &prices[position],
                now,
            )?;
            // Flushed deposits left the custody pool for the strategy.
            custody.drain(entry.id);
            outcomes.push(outcome);
        }
        self.commit_strategies(staged);
        self.custody = custody;
        Ok(outcomes)
    }

    /// Resumes the pending harvest of every listed strategy
    pub fn harvest_continue(
        &mut self,
        caller: Principal,
        strategy_ids: &[StrategyId],
        continuation_data: &[Vec<u8>],
        now: u64,
    ) -> ManagerResult<Vec<HarvestOutcome>> {
        self.roles.check(Role::DoHardWorker, caller)?;
        ensure_unique(strategy_ids)?;
        if !continuation_data.is_empty() && continuation_data.len() != strategy_ids.len() {
            return Err(config_err("Continuation data does not match the strategies."));
        }
        let mut staged = Vec::with_capacity(strategy_ids.len());
        for id in strategy_ids {
            let strategy = self.active_strategy(*id, Role::DoHardWorker, caller)?;
            if !strategy.lock.is_locked() {
                return Err(ManagerError::Custom(format!(
                    "Strategy {} is not awaiting a continuation.",
                    id
                )));
            }
            staged.push(self.stage_strategy(*id)?);
        }

        let mut outcomes = Vec::with_capacity(strategy_ids.len());
        for (position, entry) in staged.iter_mut().enumerate() {
            let data = continuation_data
                .get(position)
                .map(|data| data.as_slice())
                .unwrap_or_default();
            outcomes.push(ledger::harvest_continue(
                &mut entry.strategy,
                entry.adapter.as_mut(),
                data,
                now,
            )?);
        }
        self.commit_strategies(staged);
        Ok(outcomes)
    }
}
