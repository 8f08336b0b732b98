use std::collections::BTreeMap;

use alloy_primitives::U256;

use crate::{
    constants::scale,
    fees::{compute_fees, FeeInput},
    protocol::Protocol,
    strategy::Strategy,
    types::{Holder, StrategyId, VaultId},
    utils::{
        common::{add_assign_assets, assets_value, checked_sub, mul_div, Rounding},
        error::{arithmetic_err, ManagerError, ManagerResult},
    },
    vault::data::{MintedFees, SyncRecord},
};

/// Harvest result of the vault in one strategy
struct StrategyPosition {
    strategy: StrategyId,
    share_price: U256,
    /// Vault shares that were held before the batch
    existing_shares: U256,
    minted_shares: U256,
    withdrawn_assets: Vec<U256>,
    prices: Vec<U256>,
}

/// Readiness of a flushed batch
enum BatchState {
    Ready(Vec<StrategyPosition>),
    Missing(StrategyId),
}

fn batch_state(
    strategies: &BTreeMap<StrategyId, Strategy>,
    live: &[StrategyId],
    holder: Holder,
    harvests: impl Iterator<Item = (StrategyId, u64)>,
) -> ManagerResult<BatchState> {
    let mut positions = Vec::new();
    for (id, harvest_index) in harvests {
        let strategy = strategies.get(&id).ok_or(ManagerError::NonExistentValue)?;
        // Removed strategies were settled through the emergency holding area.
        if !strategy.is_active() || !live.contains(&id) {
            continue;
        }
        if strategy.lock.pending_index() == Some(harvest_index) {
            return Err(ManagerError::StrategyNotReady(id));
        }
        let Some(record) = strategy.data.record(harvest_index) else {
            return Ok(BatchState::Missing(id));
        };
        let participant = record.participants.get(&holder);
        let (existing_shares, minted_shares, withdrawn_assets) = match participant {
            Some(participant) => (
                checked_sub(
                    participant.balance_after,
                    participant.minted_shares,
                    "Vault strategy balance",
                )?,
                participant.minted_shares,
                participant.withdrawn_assets.clone(),
            ),
            None => (U256::ZERO, U256::ZERO, vec![]),
        };
        positions.push(StrategyPosition {
            strategy: id,
            share_price: record.share_price,
            existing_shares,
            minted_shares,
            withdrawn_assets,
            prices: record.prices.clone(),
        });
    }
    Ok(BatchState::Ready(positions))
}

impl Protocol {
    /// Syncs the flushed batches of the vault in order.
    ///
    /// Stops at the first batch whose harvests are not finalized yet, or fails on it when
    /// `revert_on_missing_harvest` is set. A batch referencing a harvest that awaits a
    /// continuation always fails. Returns the synced flush indexes.
    pub fn sync(
        &mut self,
        vault_id: VaultId,
        revert_on_missing_harvest: bool,
        now: u64,
    ) -> ManagerResult<Vec<u64>> {
        let vault = self.vault(vault_id)?;
        if vault.data.is_synced() {
            return Err(ManagerError::NothingToSync);
        }
        let holder = Holder::Vault(vault_id);
        let live = vault.settings.live_strategies();
        let asset_count = vault.settings.assets.len();
        let owner = vault.settings.owner;
        let fees = vault.settings.fees;

        let mut data = vault.data.clone();
        let mut strategies = self.strategies.clone();
        let mut synced = Vec::new();

        for flush_index in vault.data.last_synced..vault.data.flush_index {
            let record = data.records.get(&flush_index).ok_or(ManagerError::NonExistentValue)?;
            let positions = match batch_state(&strategies, &live, holder, record.harvests())? {
                BatchState::Ready(positions) => positions,
                BatchState::Missing(strategy) if revert_on_missing_harvest => {
                    return Err(ManagerError::StrategyNotReady(strategy));
                }
                BatchState::Missing(_) => break,
            };

            let prices = positions
                .first()
                .map(|position| position.prices.clone())
                .unwrap_or_else(|| vec![U256::ZERO; asset_count]);
            let deposit_value = assets_value(&record.deposits, &prices)?;

            let mut existing_value = U256::ZERO;
            let mut realized_deposit_value = U256::ZERO;
            let mut strategy_gains = Vec::with_capacity(positions.len());
            let mut withdrawn_assets = vec![U256::ZERO; asset_count];
            for position in &positions {
                existing_value += mul_div(
                    position.existing_shares,
                    position.share_price,
                    scale(),
                    Rounding::Down,
                )?;
                realized_deposit_value += mul_div(
                    position.minted_shares,
                    position.share_price,
                    scale(),
                    Rounding::Down,
                )?;
                let last_price = data
                    .last_share_prices
                    .get(&position.strategy)
                    .copied()
                    .unwrap_or_default();
                let gain = if !last_price.is_zero() && position.share_price > last_price {
                    mul_div(
                        position.existing_shares,
                        position.share_price - last_price,
                        scale(),
                        Rounding::Down,
                    )?
                } else {
                    U256::ZERO
                };
                strategy_gains.push(gain);
                if !position.withdrawn_assets.is_empty() {
                    add_assign_assets(&mut withdrawn_assets, &position.withdrawn_assets)?;
                }
            }

            let outcome = compute_fees(
                &FeeInput {
                    supply: data.shares.total_supply,
                    existing_value,
                    strategy_gains,
                    deposit_value: realized_deposit_value,
                    elapsed: now.saturating_sub(data.last_fee_collection),
                },
                &fees,
            )?;
            data.shares.mint(owner, outcome.owner_shares())?;
            data.shares.mint_unclaimed(outcome.user_shares)?;

            for position in &positions {
                data.last_share_prices
                    .insert(position.strategy, position.share_price);
                let strategy = strategies
                    .get_mut(&position.strategy)
                    .ok_or(ManagerError::NonExistentValue)?;
                let harvest_index = record
                    .harvests()
                    .find(|(id, _)| *id == position.strategy)
                    .map(|(_, index)| index)
                    .ok_or_else(|| arithmetic_err("Flush record lost a strategy."))?;
                strategy.data.collected.insert((harvest_index, holder));
            }

            let sync_record = SyncRecord {
                prices,
                deposit_value,
                minted_user_shares: outcome.user_shares,
                claimed_shares: U256::ZERO,
                withdrawn_assets,
                claimed_assets: vec![U256::ZERO; asset_count],
                fees: MintedFees {
                    management: outcome.management_shares,
                    performance: outcome.performance_shares,
                    deposit: outcome.deposit_fee_shares,
                },
                synced_at: now,
            };
            if let Some(record) = data.records.get_mut(&flush_index) {
                record.synced = Some(sync_record);
            }
            data.last_synced = flush_index + 1;
            data.last_fee_collection = now;
            synced.push(flush_index);
        }

        self.strategies = strategies;
        self.vault_mut(vault_id)?.data = data;
        Ok(synced)
    }
}
