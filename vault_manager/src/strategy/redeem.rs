//! Strategy share redemptions outside of vault cycles

use alloy_primitives::U256;

use crate::{
    types::Holder,
    utils::{
        common::{checked_sub, mul_div, Rounding},
        error::{config_err, ManagerError, ManagerResult},
    },
};

use super::{adapter::StrategyAdapter, Strategy};

/// Queues `shares` of the holder for the open harvest index and returns that index.
/// The shares leave the holder's balance immediately.
pub fn redeem_strategy_shares_async(
    strategy: &mut Strategy,
    holder: Holder,
    shares: U256,
) -> ManagerResult<u64> {
    strategy.lock.ensure_action_finished(strategy.settings.id)?;
    if shares.is_zero() {
        return Err(config_err("Nothing to redeem."));
    }
    strategy.data.queue_withdrawal(holder, shares)?;
    Ok(strategy.data.harvest_index)
}

/// Returns the assets the holder withdrew in a finalized harvest index and marks them collected
pub fn claim_strategy_share_withdrawal(
    strategy: &mut Strategy,
    holder: Holder,
    harvest_index: u64,
) -> ManagerResult<Vec<U256>> {
    let id = strategy.settings.id;
    let record = strategy
        .data
        .record(harvest_index)
        .ok_or(ManagerError::ProtocolActionNotFinished(id))?;
    let participant = record
        .participants
        .get(&holder)
        .filter(|participant| !participant.withdrawn_shares.is_zero())
        .ok_or(ManagerError::NonExistentValue)?;
    if strategy.data.collected.contains(&(harvest_index, holder)) {
        return Err(ManagerError::NonExistentValue);
    }
    let assets = participant.withdrawn_assets.clone();
    strategy.data.collected.insert((harvest_index, holder));
    Ok(assets)
}

/// Redeems `shares` of the holder synchronously through the adapter
pub fn redeem_fast(
    strategy: &mut Strategy,
    adapter: &mut dyn StrategyAdapter,
    holder: Holder,
    shares: U256,
) -> ManagerResult<Vec<U256>> {
    strategy.lock.ensure_ready(strategy.settings.id)?;
    if strategy.data.balance_of(&holder) < shares {
        return Err(ManagerError::InsufficientBalance);
    }
    let total_shares = strategy.data.total_shares;
    if shares.is_zero() {
        return Ok(vec![U256::ZERO; strategy.settings.assets.len()]);
    }

    let redeemed_value = mul_div(
        strategy.data.total_value,
        shares,
        total_shares,
        Rounding::Down,
    )?;
    let assets = adapter.redeem_fast(shares, total_shares)?;

    strategy.data.debit(holder, shares)?;
    strategy.data.total_shares = checked_sub(total_shares, shares, "Share supply")?;
    strategy.data.total_value =
        checked_sub(strategy.data.total_value, redeemed_value, "Strategy value")?;
    Ok(assets)
}
