//! Candid views of the protocol state, served by the canister queries

use candid::{Nat, Principal};

use crate::{
    protocol::Protocol,
    types::{
        FlushRecordQuery, HarvestRecordQuery, StrategyId, StrategyQuery, TicketId, TicketQuery,
        VaultId, VaultQuery,
    },
    utils::{
        common::{u256_to_nat, u256s_to_nats},
        error::{ManagerError, ManagerResult},
    },
};

impl Protocol {
    pub fn strategy_query(&self, id: StrategyId) -> ManagerResult<StrategyQuery> {
        let strategy = self.strategy(id)?;
        Ok(StrategyQuery {
            id,
            name: strategy.settings.name.clone(),
            assets: strategy.settings.assets.clone(),
            atomic: strategy.settings.atomic,
            removed: !strategy.is_active(),
            total_shares: u256_to_nat(&strategy.data.total_shares),
            total_value: u256_to_nat(&strategy.data.total_value),
            harvest_index: strategy.data.harvest_index,
            awaiting_continuation: strategy.lock.token().cloned(),
        })
    }

    pub fn vault_query(&self, id: VaultId) -> ManagerResult<VaultQuery> {
        let vault = self.vault(id)?;
        Ok(VaultQuery {
            id,
            owner: vault.settings.owner,
            strategies: vault.settings.slots.iter().map(|slot| slot.strategy).collect(),
            allocations: vault.settings.slots.iter().map(|slot| slot.allocation).collect(),
            total_supply: u256_to_nat(&vault.data.shares.total_supply),
            flush_index: vault.data.flush_index,
            last_synced: vault.data.last_synced,
            last_fee_collection: vault.data.last_fee_collection,
            fees: vault.settings.fees,
        })
    }

    /// Pool shares held by `owner`
    pub fn vault_balance(&self, id: VaultId, owner: Principal) -> ManagerResult<Nat> {
        let vault = self.vault(id)?;
        Ok(u256_to_nat(&vault.data.shares.balance_of(&owner)))
    }

    pub fn deposit_ticket_query(&self, id: TicketId) -> ManagerResult<TicketQuery> {
        let ticket = self
            .tickets
            .deposit(id)
            .ok_or(ManagerError::InvalidDepositNftId(id))?;
        let vault = self.vault(ticket.vault)?;
        Ok(TicketQuery {
            id,
            owner: ticket.owner,
            flush_index: ticket.flush_index,
            amounts: u256s_to_nats(&ticket.amounts),
            fraction: ticket.fraction,
            claimable: ticket.is_claimable(&vault.data),
        })
    }

    /// The ticket's escrowed shares are reported as its single amount
    pub fn withdrawal_ticket_query(&self, id: TicketId) -> ManagerResult<TicketQuery> {
        let ticket = self
            .tickets
            .withdrawal(id)
            .ok_or(ManagerError::InvalidWithdrawalNftId(id))?;
        let vault = self.vault(ticket.vault)?;
        Ok(TicketQuery {
            id,
            owner: ticket.owner,
            flush_index: ticket.flush_index,
            amounts: vec![u256_to_nat(&ticket.shares)],
            fraction: ticket.fraction,
            claimable: ticket.is_claimable(&vault.data),
        })
    }

    pub fn flush_record_query(
        &self,
        vault_id: VaultId,
        flush_index: u64,
    ) -> ManagerResult<FlushRecordQuery> {
        let record = self
            .vault(vault_id)?
            .data
            .record(flush_index)
            .ok_or(ManagerError::NonExistentValue)?;
        let synced = record.sync_record();
        Ok(FlushRecordQuery {
            flush_index,
            strategies: record.strategies.clone(),
            harvest_indexes: record.harvest_indexes.clone(),
            deposits: u256s_to_nats(&record.deposits),
            withdrawn_shares: u256_to_nat(&record.withdrawn_shares),
            synced: synced.is_some(),
            minted_user_shares: synced
                .map(|sync| u256_to_nat(&sync.minted_user_shares))
                .unwrap_or_default(),
            withdrawn_assets: synced
                .map(|sync| u256s_to_nats(&sync.withdrawn_assets))
                .unwrap_or_default(),
        })
    }

    pub fn harvest_record_query(
        &self,
        strategy_id: StrategyId,
        harvest_index: u64,
    ) -> ManagerResult<HarvestRecordQuery> {
        let record = self
            .strategy(strategy_id)?
            .data
            .record(harvest_index)
            .ok_or(ManagerError::NonExistentValue)?;
        Ok(HarvestRecordQuery {
            strategy: strategy_id,
            harvest_index,
            prices: u256s_to_nats(&record.prices),
            share_price: u256_to_nat(&record.share_price),
            total_shares: u256_to_nat(&record.total_shares),
            total_value: u256_to_nat(&record.total_value),
            base_yield: record.base_yield.to_string(),
            compound_yield: u256_to_nat(&record.compound_yield),
            protocol_fee_shares: u256_to_nat(&record.protocol_fee_shares),
            finalized_at: record.finalized_at,
        })
    }

    /// Assets recovered from removed strategies, per strategy
    pub fn emergency_holdings(&self) -> Vec<(StrategyId, Vec<Nat>)> {
        self.emergency
            .iter()
            .map(|(id, amounts)| (*id, u256s_to_nats(amounts)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        access::Role,
        strategy::reported::ReportedStrategy,
        types::{StrategyInput, VaultInput},
        vault::settings::VaultFees,
    };
    use alloy_primitives::U256;

    #[test]
    fn test_queries_follow_the_state() {
        let admin = Principal::from_slice(&[1]);
        let asset = Principal::from_slice(&[10]);
        let mut protocol = Protocol::default();
        protocol.roles.grant(Role::Admin, admin);
        let strategy = protocol
            .register_strategy(
                admin,
                StrategyInput {
                    name: "lending".to_string(),
                    assets: vec![asset],
                    atomic: false,
                },
                Box::new(ReportedStrategy::new(1, 1)),
            )
            .unwrap();
        let vault = protocol
            .create_vault(
                admin,
                VaultInput {
                    owner: admin,
                    assets: vec![asset],
                    strategies: vec![strategy],
                    allocations: vec![10_000],
                    fees: VaultFees::default(),
                    guards: vec![],
                },
                0,
            )
            .unwrap();
        let ticket = protocol
            .deposit(vault, &[U256::from(40)], admin, true, 1)
            .unwrap();

        let query = protocol.strategy_query(strategy).unwrap();
        assert_eq!(query.name, "lending");
        assert!(!query.removed);
        assert_eq!(query.awaiting_continuation, None);

        let query = protocol.vault_query(vault).unwrap();
        assert_eq!(query.flush_index, 1);
        assert_eq!(query.last_synced, 0);

        let query = protocol.deposit_ticket_query(ticket).unwrap();
        assert_eq!(query.amounts, vec![Nat::from(40_u64)]);
        assert!(!query.claimable);

        let record = protocol.flush_record_query(vault, 0).unwrap();
        assert_eq!(record.harvest_indexes, vec![Some(0)]);
        assert!(!record.synced);

        assert!(matches!(
            protocol.withdrawal_ticket_query(ticket),
            Err(ManagerError::InvalidWithdrawalNftId(id)) if id == ticket
        ));
        assert!(protocol.emergency_holdings().is_empty());
    }
}
