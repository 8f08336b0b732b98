//! Aggregate state of the vault manager and the operations that span several components

use std::collections::BTreeMap;

use alloy_primitives::U256;
use candid::Principal;

use crate::{
    access::{Role, RoleRegistry},
    config::ProtocolConfig,
    custody::{CustodyPool, EmergencyHolding},
    prices::ReportedPrices,
    strategy::{
        adapter::{StrategyAdapter, StrategyReport},
        redeem, Strategy,
    },
    tickets::{self, TicketRegistry},
    types::{Holder, StrategyId, TicketId, VaultId},
    utils::error::{config_err, ManagerError, ManagerResult},
    vault::Vault,
};

/// Copy of a strategy and its adapter that an operation runs on before committing
pub(crate) struct StagedStrategy {
    pub id: StrategyId,
    pub strategy: Strategy,
    pub adapter: Box<dyn StrategyAdapter>,
}

pub struct Protocol {
    pub config: ProtocolConfig,
    pub roles: RoleRegistry,
    pub prices: ReportedPrices,
    pub strategies: BTreeMap<StrategyId, Strategy>,
    /// External yield source of every registered strategy
    pub adapters: BTreeMap<StrategyId, Box<dyn StrategyAdapter>>,
    pub vaults: BTreeMap<VaultId, Vault>,
    pub tickets: TicketRegistry,
    pub custody: CustodyPool,
    pub emergency: EmergencyHolding,
    pub(crate) next_strategy_id: StrategyId,
    pub(crate) next_vault_id: VaultId,
}

impl Default for Protocol {
    fn default() -> Self {
        Self::new(ProtocolConfig::default())
    }
}

impl Protocol {
    pub fn new(config: ProtocolConfig) -> Self {
        Self {
            config,
            roles: RoleRegistry::default(),
            prices: ReportedPrices::default(),
            strategies: BTreeMap::new(),
            adapters: BTreeMap::new(),
            vaults: BTreeMap::new(),
            tickets: TicketRegistry::default(),
            custody: CustodyPool::default(),
            emergency: EmergencyHolding::default(),
            // Id 0 is the ghost strategy
            next_strategy_id: 1,
            next_vault_id: 1,
        }
    }

    pub fn strategy(&self, id: StrategyId) -> ManagerResult<&Strategy> {
        self.strategies.get(&id).ok_or(ManagerError::NonExistentValue)
    }

    pub fn vault(&self, id: VaultId) -> ManagerResult<&Vault> {
        self.vaults.get(&id).ok_or(ManagerError::NonExistentValue)
    }

    pub(crate) fn vault_mut(&mut self, id: VaultId) -> ManagerResult<&mut Vault> {
        self.vaults.get_mut(&id).ok_or(ManagerError::NonExistentValue)
    }

    /// Returns the strategy if it exists and was not removed
    pub(crate) fn active_strategy(
        &self,
        id: StrategyId,
        role: Role,
        caller: Principal,
    ) -> ManagerResult<&Strategy> {
        let strategy = self.strategy(id)?;
        strategy.ensure_active(role, caller)?;
        Ok(strategy)
    }

    pub(crate) fn adapter(&self, id: StrategyId) -> ManagerResult<&dyn StrategyAdapter> {
        self.adapters
            .get(&id)
            .map(|adapter| adapter.as_ref())
            .ok_or(ManagerError::NonExistentValue)
    }

    pub(crate) fn adapter_mut(&mut self, id: StrategyId) -> ManagerResult<&mut dyn StrategyAdapter> {
        self.adapters
            .get_mut(&id)
            .map(|adapter| adapter.as_mut())
            .ok_or(ManagerError::NonExistentValue)
    }

    pub(crate) fn stage_strategy(&self, id: StrategyId) -> ManagerResult<StagedStrategy> {
        Ok(StagedStrategy {
            id,
            strategy: self.strategy(id)?.clone(),
            adapter: self.adapter(id)?.box_clone(),
        })
    }

    /// Writes staged strategies and adapters back into the protocol
    pub(crate) fn commit_strategies(&mut self, staged: Vec<StagedStrategy>) {
        for StagedStrategy {
            id,
            strategy,
            adapter,
        } in staged
        {
            self.strategies.insert(id, strategy);
            self.adapters.insert(id, adapter);
        }
    }

    /// Queues a deposit for `receiver` and optionally flushes the vault right away.
    /// Returns the deposit ticket.
    pub fn deposit(
        &mut self,
        vault_id: VaultId,
        amounts: &[U256],
        receiver: Principal,
        do_flush: bool,
        now: u64,
    ) -> ManagerResult<TicketId> {
        let vault_before = self.vault(vault_id)?.clone();
        let tickets_before = self.tickets.clone();

        let mut vault = vault_before.clone();
        let ticket = tickets::request_deposit(&mut vault, &mut self.tickets, receiver, amounts)?;
        self.vaults.insert(vault_id, vault);
        if do_flush {
            if let Err(err) = self.flush(vault_id, now) {
                self.vaults.insert(vault_id, vault_before);
                self.tickets = tickets_before;
                return Err(err);
            }
        }
        Ok(ticket)
    }

    /// Escrows `shares` of the owner for the open batch. Returns the withdrawal ticket.
    pub fn redeem(
        &mut self,
        vault_id: VaultId,
        owner: Principal,
        shares: U256,
        prior_ticket_ids: &[TicketId],
        prior_fractions: &[u64],
    ) -> ManagerResult<TicketId> {
        let vault = self.vaults.get_mut(&vault_id).ok_or(ManagerError::NonExistentValue)?;
        tickets::request_withdrawal(
            vault,
            &mut self.tickets,
            owner,
            shares,
            prior_ticket_ids,
            prior_fractions,
        )
    }

    pub fn claim_deposit(
        &mut self,
        vault_id: VaultId,
        owner: Principal,
        ticket_ids: &[TicketId],
        fractions: &[u64],
    ) -> ManagerResult<U256> {
        let vault = self.vaults.get_mut(&vault_id).ok_or(ManagerError::NonExistentValue)?;
        tickets::claim_deposit(vault, &mut self.tickets, owner, ticket_ids, fractions)
    }

    pub fn claim_withdrawal(
        &mut self,
        vault_id: VaultId,
        owner: Principal,
        ticket_ids: &[TicketId],
        fractions: &[u64],
    ) -> ManagerResult<Vec<U256>> {
        let vault = self.vaults.get_mut(&vault_id).ok_or(ManagerError::NonExistentValue)?;
        tickets::claim_withdrawal(vault, &mut self.tickets, owner, ticket_ids, fractions)
    }

    /// Queues strategy shares of the caller for redemption in the open harvest index
    pub fn redeem_strategy_shares_async(
        &mut self,
        caller: Principal,
        strategy_id: StrategyId,
        shares: U256,
    ) -> ManagerResult<u64> {
        self.active_strategy(strategy_id, Role::DoHardWorker, caller)?;
        let strategy = self
            .strategies
            .get_mut(&strategy_id)
            .ok_or(ManagerError::NonExistentValue)?;
        redeem::redeem_strategy_shares_async(strategy, Holder::Account(caller), shares)
    }

    /// Collects the assets of finalized strategy share redemptions of the caller
    pub fn claim_strategy_share_withdrawals(
        &mut self,
        caller: Principal,
        strategy_ids: &[StrategyId],
        harvest_indexes: &[u64],
    ) -> ManagerResult<Vec<Vec<U256>>> {
        if strategy_ids.len() != harvest_indexes.len() {
            return Err(config_err("Strategies and harvest indexes have different lengths."));
        }
        let mut strategies = self.strategies.clone();
        let mut claimed = Vec::with_capacity(strategy_ids.len());
        for (id, harvest_index) in strategy_ids.iter().zip(harvest_indexes) {
            let strategy = strategies.get_mut(id).ok_or(ManagerError::NonExistentValue)?;
            strategy.lock.ensure_action_finished(*id)?;
            claimed.push(redeem::claim_strategy_share_withdrawal(
                strategy,
                Holder::Account(caller),
                *harvest_index,
            )?);
        }
        self.strategies = strategies;
        Ok(claimed)
    }

    /// Applies a keeper report to the strategy's adapter
    pub fn report_strategy_yield(
        &mut self,
        caller: Principal,
        strategy_id: StrategyId,
        report: &StrategyReport,
    ) -> ManagerResult<()> {
        self.roles.check(Role::DoHardWorker, caller)?;
        self.active_strategy(strategy_id, Role::DoHardWorker, caller)?;
        self.adapter_mut(strategy_id)?.apply_report(report)
    }

    /// Records asset prices reported by a keeper
    pub fn report_prices(
        &mut self,
        caller: Principal,
        prices: &[(Principal, U256)],
        now: u64,
    ) -> ManagerResult<()> {
        self.roles.check(Role::DoHardWorker, caller)?;
        if prices.iter().any(|(_, price)| price.is_zero()) {
            return Err(config_err("Prices must be positive."));
        }
        for (asset, price) in prices {
            self.prices.report(*asset, *price, now);
        }
        Ok(())
    }
}
