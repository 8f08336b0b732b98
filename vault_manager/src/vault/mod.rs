pub(crate) mod data;
pub(crate) mod settings;

use std::collections::BTreeMap;

use data::VaultData;
use settings::VaultSettings;

use crate::{
    strategy::Strategy,
    types::{StrategyId, VaultId},
    utils::error::{ManagerError, ManagerResult},
};

/// Settlement phase of a vault, derived from its indices and the harvest state of its strategies.
///
/// ```plain
///  Idle ──flush──► Flushed ──harvest──► Harvesting ──► Harvested ──sync──► Idle
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VaultPhase {
    /// Every flushed batch is synced
    Idle,
    /// Flushed batches wait for a harvest
    Flushed,
    /// A referenced strategy awaits a harvest continuation
    Harvesting,
    /// Every referenced harvest is finalized, the vault can be synced
    Harvested,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Vault {
    pub settings: VaultSettings,
    pub data: VaultData,
}

impl Vault {
    pub fn new(settings: VaultSettings, now: u64) -> Self {
        let data = VaultData::new(settings.assets.len(), now);
        Self { settings, data }
    }

    pub fn id(&self) -> VaultId {
        self.settings.id
    }

    /// Returns Err if every strategy slot of the vault is a ghost
    pub fn ensure_live(&self) -> ManagerResult<()> {
        if self.settings.live_slots().next().is_none() {
            return Err(ManagerError::GhostVault(self.settings.id));
        }
        Ok(())
    }

    pub fn phase(&self, strategies: &BTreeMap<StrategyId, Strategy>) -> VaultPhase {
        if self.data.is_synced() {
            return VaultPhase::Idle;
        }
        let mut harvested = true;
        for record in self.data.unsynced() {
            for (id, harvest_index) in record.harvests() {
                let Some(strategy) = strategies.get(&id).filter(|strategy| strategy.is_active())
                else {
                    continue;
                };
                if strategy.lock.pending_index() == Some(harvest_index) {
                    return VaultPhase::Harvesting;
                }
                if strategy.data.record(harvest_index).is_none() {
                    harvested = false;
                }
            }
        }
        if harvested {
            VaultPhase::Harvested
        } else {
            VaultPhase::Flushed
        }
    }
}
