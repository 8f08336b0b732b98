//! Request guards evaluated before a deposit or withdrawal request is accepted

use alloy_primitives::U256;
use candid::{CandidType, Nat, Principal};
use serde::Deserialize;

use crate::utils::{
    common::nat_to_u256,
    error::{ManagerError, ManagerResult},
};

/// Kind of request a guard is evaluated for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    Deposit,
    Withdrawal,
}

/// Request context handed to every guard
pub struct GuardRequest<'a> {
    pub kind: RequestKind,
    pub owner: Principal,
    /// Deposited asset amounts. Empty for withdrawals.
    pub amounts: &'a [U256],
    /// Redeemed pool shares. Zero for deposits.
    pub shares: U256,
}

#[derive(Clone, CandidType, Debug, Deserialize, PartialEq)]
pub enum GuardDefinition {
    /// Only the listed principals may deposit
    DepositAllowList(Vec<Principal>),
    /// The listed principals may neither deposit nor withdraw
    DenyList(Vec<Principal>),
    /// Deposits must bring at least `amount` of the asset at `asset_index`
    MinimumDeposit { asset_index: u32, amount: Nat },
}

impl GuardDefinition {
    /// Validates guard arguments against the vault's asset count
    pub fn validate(&self, asset_count: usize) -> ManagerResult<()> {
        if let GuardDefinition::MinimumDeposit {
            asset_index,
            amount,
        } = self
        {
            if *asset_index as usize >= asset_count {
                return Err(ManagerError::InvalidConfiguration(
                    "Minimum deposit guard references an unknown asset.".to_string(),
                ));
            }
            nat_to_u256(amount)?;
        }
        Ok(())
    }

    fn passes(&self, request: &GuardRequest) -> ManagerResult<bool> {
        let passes = match self {
            GuardDefinition::DepositAllowList(allowed) => {
                request.kind != RequestKind::Deposit || allowed.contains(&request.owner)
            }
            GuardDefinition::DenyList(denied) => !denied.contains(&request.owner),
            GuardDefinition::MinimumDeposit {
                asset_index,
                amount,
            } => {
                if request.kind != RequestKind::Deposit {
                    true
                } else {
                    let minimum = nat_to_u256(amount)?;
                    request
                        .amounts
                        .get(*asset_index as usize)
                        .map_or(false, |deposited| *deposited >= minimum)
                }
            }
        };
        Ok(passes)
    }
}

/// Runs the guards in order and reports the index of the first one that rejects the request
pub fn run_guards(guards: &[GuardDefinition], request: &GuardRequest) -> ManagerResult<()> {
    for (index, guard) in guards.iter().enumerate() {
        if !guard.passes(request)? {
            return Err(ManagerError::GuardFailed(index as u32));
        }
    }
    Ok(())
}
