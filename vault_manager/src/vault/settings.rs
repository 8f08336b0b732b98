//! Vault settings: asset group, strategy slots, fees and guards

use candid::{CandidType, Principal};
use serde::Deserialize;

use crate::{
    constants::{
        DEPOSIT_FEE_MAX, FULL_PERCENT, GHOST_STRATEGY_ID, MANAGEMENT_FEE_MAX,
        MAX_VAULT_STRATEGIES, PERFORMANCE_FEE_MAX,
    },
    guards::GuardDefinition,
    types::{AssetId, StrategyId, VaultId, VaultInput},
    utils::error::{config_err, ManagerResult},
};

/// Vault level fees in basis points
#[derive(Clone, Copy, CandidType, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct VaultFees {
    /// Taken from the shares minted for every deposit
    pub deposit_pct: u16,
    /// Per annum, pro-rated by the time elapsed between syncs
    pub management_pct: u16,
    /// Taken from the realized positive yield of every strategy
    pub performance_pct: u16,
}

impl VaultFees {
    pub fn validate(&self) -> ManagerResult<()> {
        if self.deposit_pct > DEPOSIT_FEE_MAX {
            return Err(config_err("Deposit fee is above its cap."));
        }
        if self.management_pct > MANAGEMENT_FEE_MAX {
            return Err(config_err("Management fee is above its cap."));
        }
        if self.performance_pct > PERFORMANCE_FEE_MAX {
            return Err(config_err("Performance fee is above its cap."));
        }
        Ok(())
    }
}

/// Strategy position of a vault. A ghost slot keeps the index of a removed strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StrategySlot {
    pub strategy: StrategyId,
    /// Basis points of every flushed deposit routed to the strategy
    pub allocation: u16,
}

impl StrategySlot {
    pub fn ghost() -> Self {
        Self {
            strategy: GHOST_STRATEGY_ID,
            allocation: 0,
        }
    }

    pub fn is_ghost(&self) -> bool {
        self.strategy == GHOST_STRATEGY_ID
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct VaultSettings {
    pub id: VaultId,
    /// Receives the deposit, management and performance fee shares
    pub owner: Principal,
    pub assets: Vec<AssetId>,
    pub slots: Vec<StrategySlot>,
    pub fees: VaultFees,
    pub guards: Vec<GuardDefinition>,
}

impl VaultSettings {
    /// Sets the id for the vault.
    pub fn id(&mut self, id: VaultId) -> &mut Self {
        self.id = id;
        self
    }

    /// Sets the owner of the vault.
    pub fn owner(&mut self, owner: Principal) -> &mut Self {
        self.owner = owner;
        self
    }

    /// Sets the asset group of the vault.
    pub fn assets(&mut self, assets: Vec<AssetId>) -> &mut Self {
        self.assets = assets;
        self
    }

    /// Sets the strategy slots from matching strategy and allocation lists.
    pub fn slots(&mut self, strategies: &[StrategyId], allocations: &[u16]) -> &mut Self {
        self.slots = strategies
            .iter()
            .zip(allocations)
            .map(|(strategy, allocation)| StrategySlot {
                strategy: *strategy,
                allocation: *allocation,
            })
            .collect();
        self
    }

    /// Sets the fees of the vault.
    pub fn fees(&mut self, fees: VaultFees) -> &mut Self {
        self.fees = fees;
        self
    }

    /// Sets the request guards of the vault.
    pub fn guards(&mut self, guards: Vec<GuardDefinition>) -> &mut Self {
        self.guards = guards;
        self
    }

    /// Validates settings of a vault that is about to be created
    pub fn validate(&self) -> ManagerResult<()> {
        if self.assets.is_empty() {
            return Err(config_err("A vault needs at least one asset."));
        }
        if self.slots.is_empty() || self.slots.len() > MAX_VAULT_STRATEGIES {
            return Err(config_err("Invalid number of vault strategies."));
        }
        if self.slots.iter().any(|slot| slot.is_ghost()) {
            return Err(config_err("A vault can not be created with a ghost strategy."));
        }
        let mut strategies: Vec<StrategyId> =
            self.slots.iter().map(|slot| slot.strategy).collect();
        strategies.sort();
        strategies.dedup();
        if strategies.len() != self.slots.len() {
            return Err(config_err("Vault strategies must be unique."));
        }
        let total: u32 = self.slots.iter().map(|slot| slot.allocation as u32).sum();
        if total != FULL_PERCENT as u32 {
            return Err(config_err("Allocations must add up to 100%."));
        }
        self.fees.validate()?;
        for guard in &self.guards {
            guard.validate(self.assets.len())?;
        }
        Ok(())
    }

    /// Slots that still point at a strategy, with their index
    pub fn live_slots(&self) -> impl Iterator<Item = (usize, &StrategySlot)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.is_ghost())
    }

    pub fn live_strategies(&self) -> Vec<StrategyId> {
        self.live_slots().map(|(_, slot)| slot.strategy).collect()
    }

    /// Replaces the strategy's slot with the ghost sentinel.
    /// Returns `false` if the vault does not hold the strategy.
    pub fn ghost_strategy(&mut self, strategy: StrategyId) -> bool {
        match self
            .slots
            .iter_mut()
            .find(|slot| slot.strategy == strategy && !slot.is_ghost())
        {
            Some(slot) => {
                *slot = StrategySlot::ghost();
                true
            }
            None => false,
        }
    }
}

impl TryFrom<(VaultId, VaultInput)> for VaultSettings {
    type Error = crate::utils::error::ManagerError;

    fn try_from((id, input): (VaultId, VaultInput)) -> Result<Self, Self::Error> {
        if input.strategies.len() != input.allocations.len() {
            return Err(config_err("Strategies and allocations have different lengths."));
        }
        let mut settings = VaultSettings::default();
        settings
            .id(id)
            .owner(input.owner)
            .assets(input.assets)
            .slots(&input.strategies, &input.allocations)
            .fees(input.fees)
            .guards(input.guards);
        settings.validate()?;
        Ok(settings)
    }
}
