use alloy_primitives::U256;
use candid::Principal;

use crate::{
    access::Role,
    guards::{run_guards, GuardRequest, RequestKind},
    protocol::Protocol,
    strategy::redeem,
    types::{Holder, VaultId},
    utils::{
        common::{add_assign_assets, mul_div, Rounding},
        error::{config_err, ManagerError, ManagerResult},
    },
};

impl Protocol {
    /// Redeems pool shares of the owner immediately, bypassing the flush cycle.
    /// No vault fee is taken on a fast redemption.
    pub fn redeem_fast(
        &mut self,
        vault_id: VaultId,
        owner: Principal,
        shares: U256,
        min_amounts: &[U256],
    ) -> ManagerResult<Vec<U256>> {
        let vault = self.vault(vault_id)?;
        vault.ensure_live()?;
        if !vault.data.is_synced() {
            return Err(ManagerError::VaultNotSynced(vault_id));
        }
        let asset_count = vault.settings.assets.len();
        if !min_amounts.is_empty() && min_amounts.len() != asset_count {
            return Err(config_err("Slippages do not match the vault's asset group."));
        }
        if shares.is_zero() {
            return Err(config_err("Nothing to redeem."));
        }
        if vault.data.shares.balance_of(&owner) < shares {
            return Err(ManagerError::InsufficientBalance);
        }
        run_guards(
            &vault.settings.guards,
            &GuardRequest {
                kind: RequestKind::Withdrawal,
                owner,
                amounts: &[],
                shares,
            },
        )?;

        let holder = Holder::Vault(vault_id);
        let total_supply = vault.data.shares.total_supply;
        let mut redemptions = Vec::new();
        for id in vault.settings.live_strategies() {
            let strategy = self.active_strategy(id, Role::DoHardWorker, owner)?;
            strategy.lock.ensure_ready(id)?;
            let strategy_shares = mul_div(
                strategy.data.balance_of(&holder),
                shares,
                total_supply,
                Rounding::Down,
            )?;
            redemptions.push((id, strategy_shares));
        }

        // Slippage is checked on the previews, before any adapter moves funds.
        let mut previewed = vec![U256::ZERO; asset_count];
        for (id, strategy_shares) in &redemptions {
            let strategy = self.strategy(*id)?;
            let adapter = self.adapter(*id)?;
            let preview =
                adapter.preview_redeem_fast(*strategy_shares, strategy.data.total_shares)?;
            add_assign_assets(&mut previewed, &preview)?;
        }
        for (index, (amount, minimum)) in previewed.iter().zip(min_amounts).enumerate() {
            if amount < minimum {
                return Err(ManagerError::SlippageExceeded(index as u32));
            }
        }

        let mut staged = Vec::with_capacity(redemptions.len());
        let mut redeemed = vec![U256::ZERO; asset_count];
        for (id, strategy_shares) in redemptions {
            let mut entry = self.stage_strategy(id)?;
            let assets = redeem::redeem_fast(
                &mut entry.strategy,
                entry.adapter.as_mut(),
                holder,
                strategy_shares,
            )?;
            add_assign_assets(&mut redeemed, &assets)?;
            staged.push(entry);
        }

        let mut data = self.vault(vault_id)?.data.clone();
        data.shares.burn(owner, shares)?;
        self.commit_strategies(staged);
        self.vault_mut(vault_id)?.data = data;
        Ok(redeemed)
    }
}
