//! Protocol wide configuration

use candid::Principal;

use crate::{
    constants::{ECOSYSTEM_FEE_MAX, TREASURY_FEE_MAX},
    types::InitArgs,
    utils::error::{config_err, ManagerResult},
};

/// Protocol level fees, taken as strategy shares on every positive harvest yield
#[derive(Clone, Debug, PartialEq)]
pub struct ProtocolConfig {
    pub ecosystem_fee_pct: u16,
    pub ecosystem_fee_recipient: Principal,
    pub treasury_fee_pct: u16,
    pub treasury_fee_recipient: Principal,
    /// Receives the strategy positions a vault gives up when a strategy is removed from it
    pub emergency_wallet: Principal,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            ecosystem_fee_pct: 0,
            ecosystem_fee_recipient: Principal::anonymous(),
            treasury_fee_pct: 0,
            treasury_fee_recipient: Principal::anonymous(),
            emergency_wallet: Principal::anonymous(),
        }
    }
}

impl ProtocolConfig {
    /// Sets the ecosystem fee, in basis points, and its recipient.
    pub fn ecosystem_fee(&mut self, pct: u16, recipient: Principal) -> &mut Self {
        self.ecosystem_fee_pct = pct;
        self.ecosystem_fee_recipient = recipient;
        self
    }

    /// Sets the treasury fee, in basis points, and its recipient.
    pub fn treasury_fee(&mut self, pct: u16, recipient: Principal) -> &mut Self {
        self.treasury_fee_pct = pct;
        self.treasury_fee_recipient = recipient;
        self
    }

    /// Sets the emergency wallet.
    pub fn emergency_wallet(&mut self, wallet: Principal) -> &mut Self {
        self.emergency_wallet = wallet;
        self
    }

    pub fn validate(&self) -> ManagerResult<()> {
        if self.ecosystem_fee_pct > ECOSYSTEM_FEE_MAX {
            return Err(config_err("Ecosystem fee is above its cap."));
        }
        if self.treasury_fee_pct > TREASURY_FEE_MAX {
            return Err(config_err("Treasury fee is above its cap."));
        }
        Ok(())
    }

    pub fn total_fee_pct(&self) -> u16 {
        self.ecosystem_fee_pct + self.treasury_fee_pct
    }
}

impl TryFrom<&InitArgs> for ProtocolConfig {
    type Error = crate::utils::error::ManagerError;

    fn try_from(args: &InitArgs) -> Result<Self, Self::Error> {
        let mut config = ProtocolConfig::default();
        config
            .ecosystem_fee(args.ecosystem_fee_pct, args.ecosystem_fee_recipient)
            .treasury_fee(args.treasury_fee_pct, args.treasury_fee_recipient)
            .emergency_wallet(args.emergency_wallet);
        config.validate()?;
        Ok(config)
    }
}
