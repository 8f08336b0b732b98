//! Strategy settings, fixed at registration

use crate::{
    constants::GHOST_STRATEGY_ID,
    types::{AssetId, StrategyId, StrategyInput},
    utils::error::{config_err, ManagerResult},
};

/// These settings are only set once at registration
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StrategySettings {
    /// Key of the strategy in the protocol state
    pub id: StrategyId,
    /// Human readable name
    pub name: String,
    /// Asset group the strategy accepts, in order
    pub assets: Vec<AssetId>,
    /// `true` if the external protocol always settles flows within the harvest call
    pub atomic: bool,
}

impl StrategySettings {
    /// Sets the id for the strategy.
    pub fn id(&mut self, id: StrategyId) -> &mut Self {
        self.id = id;
        self
    }

    /// Sets the name for the strategy.
    pub fn name<S: AsRef<str>>(&mut self, name: S) -> &mut Self {
        self.name = name.as_ref().to_string();
        self
    }

    /// Sets the asset group for the strategy.
    pub fn assets(&mut self, assets: Vec<AssetId>) -> &mut Self {
        self.assets = assets;
        self
    }

    /// Sets whether the strategy settles harvests atomically.
    pub fn atomic(&mut self, atomic: bool) -> &mut Self {
        self.atomic = atomic;
        self
    }

    pub fn validate(&self) -> ManagerResult<()> {
        if self.id == GHOST_STRATEGY_ID {
            return Err(config_err("The ghost strategy id is reserved."));
        }
        if self.assets.is_empty() {
            return Err(config_err("A strategy needs at least one asset."));
        }
        let mut sorted = self.assets.clone();
        sorted.sort();
        sorted.dedup();
        if sorted.len() != self.assets.len() {
            return Err(config_err("Strategy assets must be unique."));
        }
        Ok(())
    }
}

impl From<(StrategyId, StrategyInput)> for StrategySettings {
    fn from((id, input): (StrategyId, StrategyInput)) -> Self {
        let mut settings = StrategySettings::default();
        settings
            .id(id)
            .name(input.name)
            .assets(input.assets)
            .atomic(input.atomic);
        settings
    }
}
