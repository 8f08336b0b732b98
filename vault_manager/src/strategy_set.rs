//! Registration and removal of strategies and vaults.
//!
//! A removed strategy is replaced by the ghost sentinel in every affected vault, so
//! slot indexes and the other allocations stay untouched. Funds that were flushed to
//! it but not harvested, or are held by its in-flight harvest, move to the emergency
//! holding area instead of the remaining strategies.

use alloy_primitives::U256;
use candid::Principal;

use crate::{
    access::Role,
    protocol::{Protocol, StagedStrategy},
    strategy::{adapter::StrategyAdapter, settings::StrategySettings, Strategy, StrategyStatus},
    types::{Holder, StrategyId, StrategyInput, VaultId, VaultInput},
    utils::{
        common::{add_assign_assets, all_zero},
        error::{config_err, ManagerError, ManagerResult},
    },
    vault::{settings::VaultSettings, Vault},
};

/// Funds recovered by a strategy removal
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RemovalSummary {
    /// Vaults whose slot was replaced by the ghost
    pub ghosted_vaults: Vec<VaultId>,
    /// Assets moved to the emergency holding area
    pub recovered: Vec<U256>,
}

impl Protocol {
    pub fn register_strategy(
        &mut self,
        caller: Principal,
        input: StrategyInput,
        adapter: Box<dyn StrategyAdapter>,
    ) -> ManagerResult<StrategyId> {
        self.roles.check(Role::Admin, caller)?;
        let id = self.next_strategy_id;
        let settings = StrategySettings::from((id, input));
        settings.validate()?;

        self.strategies.insert(id, Strategy::new(settings));
        self.adapters.insert(id, adapter);
        self.next_strategy_id += 1;
        Ok(id)
    }

    pub fn create_vault(
        &mut self,
        caller: Principal,
        input: VaultInput,
        now: u64,
    ) -> ManagerResult<VaultId> {
        self.roles.check(Role::Admin, caller)?;
        let id = self.next_vault_id;
        let settings = VaultSettings::try_from((id, input))?;
        for slot in &settings.slots {
            let strategy = self.active_strategy(slot.strategy, Role::Admin, caller)?;
            if strategy.settings.assets != settings.assets {
                return Err(config_err(format!(
                    "Strategy {} does not match the vault's asset group.",
                    slot.strategy
                )));
            }
        }

        self.vaults.insert(id, Vault::new(settings, now));
        self.next_vault_id += 1;
        Ok(id)
    }

    /// Replaces the strategy in a single vault with the ghost sentinel.
    ///
    /// The vault's unharvested deposits into the strategy move to the emergency holding
    /// area and its strategy shares, escrowed ones included, move to the emergency wallet.
    pub fn remove_strategy_from_vault(
        &mut self,
        caller: Principal,
        vault_id: VaultId,
        strategy_id: StrategyId,
    ) -> ManagerResult<RemovalSummary> {
        self.roles.check(Role::EmergencyWithdrawalExecutor, caller)?;
        let strategy =
            self.active_strategy(strategy_id, Role::EmergencyWithdrawalExecutor, caller)?;
        strategy.lock.ensure_ready(strategy_id)?;
        let mut vault = self.vault(vault_id)?.clone();
        if !vault.settings.ghost_strategy(strategy_id) {
            return Err(ManagerError::NonExistentValue);
        }

        let holder = Holder::Vault(vault_id);
        let wallet = Holder::Account(self.config.emergency_wallet);
        let mut strategy = strategy.clone();
        let mut custody = self.custody.clone();
        let mut emergency = self.emergency.clone();
        let mut recovered = vec![U256::ZERO; strategy.settings.assets.len()];

        if let Some(flow) = strategy.data.pending.remove(&holder) {
            if !flow.deposits.is_empty() && !all_zero(&flow.deposits) {
                custody.take(strategy_id, &flow.deposits)?;
                emergency.add(strategy_id, &flow.deposits)?;
                recovered = flow.deposits;
            }
            strategy.data.credit(wallet, flow.withdrawn_shares)?;
        }
        let position = strategy.data.balance_of(&holder);
        strategy.data.debit(holder, position)?;
        strategy.data.credit(wallet, position)?;

        self.strategies.insert(strategy_id, strategy);
        self.vaults.insert(vault_id, vault);
        self.custody = custody;
        self.emergency = emergency;
        Ok(RemovalSummary {
            ghosted_vaults: vec![vault_id],
            recovered,
        })
    }

    /// Removes the strategy from the protocol.
    ///
    /// Every vault holding it gets a ghost slot. Flushed deposits and the deposits of an
    /// in-flight harvest move to the emergency holding area and, with `emergency_withdraw`,
    /// so does the whole position held in the external protocol. Shares escrowed for
    /// withdrawals that will never settle are credited to the emergency wallet, so the
    /// share supply stays covered by balances.
    pub fn remove_strategy(
        &mut self,
        caller: Principal,
        strategy_id: StrategyId,
        emergency_withdraw: bool,
    ) -> ManagerResult<RemovalSummary> {
        self.roles.check(Role::EmergencyWithdrawalExecutor, caller)?;
        self.active_strategy(strategy_id, Role::EmergencyWithdrawalExecutor, caller)?;
        let StagedStrategy {
            id,
            mut strategy,
            mut adapter,
        } = self.stage_strategy(strategy_id)?;
        let asset_count = strategy.settings.assets.len();
        let wallet = Holder::Account(self.config.emergency_wallet);
        let mut emergency = self.emergency.clone();
        let mut recovered = vec![U256::ZERO; asset_count];

        if let Some(flushed) = self.custody.balance(id) {
            recovered = flushed.clone();
        }
        if let Some(staged) = strategy.lock.unlock() {
            adapter.cancel_action()?;
            for flow in staged.flows.values() {
                if !flow.deposits.is_empty() {
                    add_assign_assets(&mut recovered, &flow.deposits)?;
                }
                strategy.data.credit(wallet, flow.withdrawn_shares)?;
            }
        }
        for flow in std::mem::take(&mut strategy.data.pending).into_values() {
            strategy.data.credit(wallet, flow.withdrawn_shares)?;
        }
        if emergency_withdraw {
            add_assign_assets(&mut recovered, &adapter.emergency_withdraw()?)?;
        }
        if !all_zero(&recovered) {
            emergency.add(id, &recovered)?;
        }
        strategy.status = StrategyStatus::Removed;

        let mut ghosted_vaults = Vec::new();
        for (vault_id, vault) in self.vaults.iter_mut() {
            if vault.settings.ghost_strategy(id) {
                ghosted_vaults.push(*vault_id);
            }
        }
        // Flushed deposits are part of `recovered` now.
        self.custody.drain(id);
        self.commit_strategies(vec![StagedStrategy {
            id,
            strategy,
            adapter,
        }]);
        self.emergency = emergency;
        Ok(RemovalSummary {
            ghosted_vaults,
            recovered,
        })
    }

    pub fn grant_role(
        &mut self,
        caller: Principal,
        role: Role,
        principal: Principal,
    ) -> ManagerResult<()> {
        self.roles.check(Role::Admin, caller)?;
        self.roles.grant(role, principal);
        Ok(())
    }

    pub fn revoke_role(
        &mut self,
        caller: Principal,
        role: Role,
        principal: Principal,
    ) -> ManagerResult<()> {
        self.roles.check(Role::Admin, caller)?;
        self.roles.revoke(role, principal);
        Ok(())
    }
}
