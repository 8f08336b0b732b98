//! Role based permissions

use std::collections::BTreeSet;

use candid::{CandidType, Principal};
use serde::Deserialize;

use crate::utils::error::{ManagerError, ManagerResult};

#[derive(Clone, Copy, CandidType, Debug, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    /// Registers strategies, creates vaults and manages roles
    Admin,
    /// Runs harvest rounds
    DoHardWorker,
    /// Removes strategies and triggers emergency withdrawals
    EmergencyWithdrawalExecutor,
}

/// Set of granted (role, principal) pairs
#[derive(Clone, Default, Debug)]
pub struct RoleRegistry {
    grants: BTreeSet<(Role, Principal)>,
}

impl RoleRegistry {
    pub fn grant(&mut self, role: Role, principal: Principal) -> &mut Self {
        self.grants.insert((role, principal));
        self
    }

    pub fn revoke(&mut self, role: Role, principal: Principal) -> &mut Self {
        self.grants.remove(&(role, principal));
        self
    }

    pub fn has_role(&self, role: Role, principal: Principal) -> bool {
        self.grants.contains(&(role, principal))
    }

    /// Returns Err if the `caller` does not hold `role`
    pub fn check(&self, role: Role, caller: Principal) -> ManagerResult<()> {
        if !self.has_role(role, caller) {
            return Err(ManagerError::MissingRole(role, caller));
        }
        Ok(())
    }
}
