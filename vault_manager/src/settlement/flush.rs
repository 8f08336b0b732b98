use alloy_primitives::U256;

use crate::{
    protocol::Protocol,
    types::{Holder, VaultId},
    utils::{
        common::{all_zero, mul_div, split_pro_rata, Rounding},
        error::{ManagerError, ManagerResult},
    },
    vault::data::{FlushBatch, FlushRecord},
};

impl Protocol {
    /// Locks the open batch of the vault and queues it into its live strategies.
    /// Returns the flushed index.
    pub fn flush(&mut self, vault_id: VaultId, now: u64) -> ManagerResult<u64> {
        let vault = self.vault(vault_id)?;
        vault.ensure_live()?;
        let batch = &vault.data.open_batch;
        if batch.is_empty() {
            return Err(ManagerError::NothingToFlush);
        }
        let holder = Holder::Vault(vault_id);
        let asset_count = vault.settings.assets.len();
        let total_supply = vault.data.shares.total_supply;

        let mut strategies = Vec::new();
        for (_, slot) in vault.settings.live_slots() {
            let strategy = self.strategy(slot.strategy)?;
            if !strategy.is_active() {
                continue;
            }
            // One flush per harvest index, so every harvest record maps to a single batch.
            if strategy.data.pending.contains_key(&holder) {
                return Err(ManagerError::StrategyNotReady(slot.strategy));
            }
            strategies.push(strategy.clone());
        }
        if strategies.is_empty() {
            return Err(ManagerError::GhostVault(vault_id));
        }

        let weights: Vec<U256> = vault
            .settings
            .slots
            .iter()
            .map(|slot| {
                let live = strategies.iter().any(|strategy| strategy.id() == slot.strategy);
                if live {
                    U256::from(slot.allocation)
                } else {
                    U256::ZERO
                }
            })
            .collect();
        let mut allocated = vec![vec![U256::ZERO; asset_count]; weights.len()];
        for (asset, amount) in batch.deposits.iter().enumerate() {
            let parts = split_pro_rata(*amount, &weights)?;
            for (slot_assets, part) in allocated.iter_mut().zip(parts) {
                slot_assets[asset] = part;
            }
        }

        let mut custody = self.custody.clone();
        let mut record = FlushRecord {
            flush_index: vault.data.flush_index,
            strategies: Vec::with_capacity(weights.len()),
            harvest_indexes: Vec::with_capacity(weights.len()),
            deposits: batch.deposits.clone(),
            withdrawn_shares: batch.withdrawn_shares,
            flushed_at: now,
            synced: None,
        };
        for (slot, amounts) in vault.settings.slots.iter().zip(&allocated) {
            let Some(strategy) = strategies
                .iter_mut()
                .find(|strategy| strategy.id() == slot.strategy)
            else {
                record.strategies.push(slot.strategy);
                record.harvest_indexes.push(None);
                continue;
            };

            strategy.data.touch(holder, asset_count);
            if !all_zero(amounts) {
                strategy.data.queue_deposit(holder, amounts)?;
                custody.add(strategy.id(), amounts)?;
            }
            if !batch.withdrawn_shares.is_zero() && !total_supply.is_zero() {
                let shares = mul_div(
                    strategy.data.balance_of(&holder),
                    batch.withdrawn_shares,
                    total_supply,
                    Rounding::Down,
                )?;
                if !shares.is_zero() {
                    strategy.data.queue_withdrawal(holder, shares)?;
                }
            }
            record.strategies.push(strategy.id());
            record.harvest_indexes.push(Some(strategy.data.harvest_index));
        }

        let mut data = vault.data.clone();
        data.shares.burn_escrowed(batch.withdrawn_shares)?;
        let flush_index = data.flush_index;
        data.records.insert(flush_index, record);
        data.flush_index += 1;
        data.open_batch = FlushBatch::new(asset_count);

        for strategy in strategies {
            self.strategies.insert(strategy.id(), strategy);
        }
        self.custody = custody;
        self.vault_mut(vault_id)?.data = data;
        Ok(flush_index)
    }
}
