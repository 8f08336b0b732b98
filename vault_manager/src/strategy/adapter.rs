//! Interface of the external yield source behind a strategy

use alloy_primitives::U256;
use candid::CandidType;
use serde::Deserialize;

use crate::utils::error::{ManagerError, ManagerResult};

use super::lock::ContinuationToken;

/// Flows that reach the external protocol after netting
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StrategyFlows {
    /// Asset amounts to deposit
    pub deposits: Vec<U256>,
    /// Strategy shares to redeem
    pub withdrawn_shares: U256,
    /// Strategy share supply the redeemed shares are a fraction of
    pub total_shares: U256,
}

impl StrategyFlows {
    pub fn is_empty(&self) -> bool {
        self.deposits.iter().all(|amount| amount.is_zero()) && self.withdrawn_shares.is_zero()
    }
}

/// Result of an interaction with the external protocol
#[derive(Clone, Debug, PartialEq)]
pub enum ProtocolAction {
    /// Finished. Holds the asset amounts withdrawn from the protocol.
    Done(Vec<U256>),
    /// Needs another round. The token must be handed back on continuation.
    Pending(ContinuationToken),
}

/// Keeper report for strategies whose external position is observed off-canister
#[derive(Clone, CandidType, Debug, Default, Deserialize, PartialEq)]
pub struct StrategyReport {
    /// Asset amounts gained by passive appreciation
    pub gains: Vec<candid::Nat>,
    /// Asset amounts lost (slashing, depeg)
    pub losses: Vec<candid::Nat>,
    /// Claimable reward amounts, reinvested on the next compound
    pub rewards: Vec<candid::Nat>,
}

/// Black box yield source.
/// Prices are e18 scaled USD per whole asset unit, in the strategy's asset group order.
#[cfg_attr(test, mockall::automock)]
pub trait StrategyAdapter {
    /// USD value of everything the strategy holds in the external protocol
    fn total_value(&self, prices: &[U256]) -> ManagerResult<U256>;

    /// Claims and reinvests rewards. Returns the USD value added.
    fn compound(&mut self, swap_info: &[u8], prices: &[U256]) -> ManagerResult<U256>;

    /// Asset amounts `process_flows` would withdraw for the same flows
    fn preview_flows(&self, flows: &StrategyFlows) -> ManagerResult<Vec<U256>>;

    /// Deposits and/or withdraws the netted residual of a harvest
    fn process_flows(&mut self, flows: &StrategyFlows) -> ManagerResult<ProtocolAction>;

    /// Resumes an action that returned `ProtocolAction::Pending`
    fn continue_action(
        &mut self,
        token: &ContinuationToken,
        data: &[u8],
    ) -> ManagerResult<ProtocolAction>;

    /// Abandons the in-flight protocol action. Its deposits are recovered by the manager.
    fn cancel_action(&mut self) -> ManagerResult<()>;

    /// Asset amounts `redeem_fast` would return for the same arguments
    fn preview_redeem_fast(&self, shares: U256, total_shares: U256) -> ManagerResult<Vec<U256>>;

    /// Synchronously redeems `shares / total_shares` of the position
    fn redeem_fast(&mut self, shares: U256, total_shares: U256) -> ManagerResult<Vec<U256>>;

    /// Withdraws everything from the external protocol
    fn emergency_withdraw(&mut self) -> ManagerResult<Vec<U256>>;

    /// Copy of the adapter state. Operations run on copies and are committed on success.
    fn box_clone(&self) -> Box<dyn StrategyAdapter>;

    /// Applies a keeper report. Only strategies observed off-canister support it.
    fn apply_report(&mut self, _report: &StrategyReport) -> ManagerResult<()> {
        Err(ManagerError::Custom(
            "This strategy does not accept keeper reports.".to_string(),
        ))
    }
}
