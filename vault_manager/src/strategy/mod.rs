pub(crate) mod adapter;
pub(crate) mod data;
pub(crate) mod ledger;
pub(crate) mod lock;
pub(crate) mod redeem;
pub(crate) mod reported;
pub(crate) mod settings;

use data::StrategyData;
use lock::HarvestLock;
use settings::StrategySettings;

use candid::Principal;

use crate::{
    access::Role,
    types::StrategyId,
    utils::error::{ManagerError, ManagerResult},
};

/// Whether a strategy can still be operated
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StrategyStatus {
    #[default]
    Active,
    /// Removed from the protocol. Every further operation is rejected.
    Removed,
}

/// Strategy struct
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Strategy {
    /// Immutable settings and configurations
    pub settings: StrategySettings,
    /// Mutable state
    pub data: StrategyData,
    /// Continuation state of the in-flight harvest
    pub lock: HarvestLock,
    pub status: StrategyStatus,
}

impl Strategy {
    pub fn new(settings: StrategySettings) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    pub fn id(&self) -> StrategyId {
        self.settings.id
    }

    pub fn is_active(&self) -> bool {
        self.status == StrategyStatus::Active
    }

    /// Returns Err if the strategy was removed. The manager lost its permissions on it.
    pub fn ensure_active(&self, role: Role, caller: Principal) -> ManagerResult<()> {
        if !self.is_active() {
            return Err(ManagerError::MissingRole(role, caller));
        }
        Ok(())
    }
}
