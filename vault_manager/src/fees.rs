//! Vault fee calculator.
//!
//! Fees are taken by minting pool shares to the vault owner, so every holder is
//! diluted by the same ratio and no request can be ordered around them. Extraction
//! rounds up, toward the owner.

use alloy_primitives::U256;

use crate::{
    constants::{full_percent, MANAGEMENT_FEE_MAX_DILUTION, SECONDS_IN_YEAR},
    utils::{
        common::{mul_div, Rounding},
        error::{arithmetic_err, ManagerResult},
    },
    vault::settings::VaultFees,
};

/// State of the vault a sync computes its fees from
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeeInput {
    /// Pool share supply before the sync
    pub supply: U256,
    /// USD value of the position backing `supply`
    pub existing_value: U256,
    /// Positive gain of every strategy since the last sync. Losses are reported as zero.
    pub strategy_gains: Vec<U256>,
    /// USD value deposited by the synced batch
    pub deposit_value: U256,
    /// Seconds since the last fee collection
    pub elapsed: u64,
}

/// Pool shares a sync mints
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeeOutcome {
    pub management_shares: U256,
    pub performance_shares: U256,
    pub deposit_fee_shares: U256,
    /// Deposit shares claimable by the tickets of the batch
    pub user_shares: U256,
}

impl FeeOutcome {
    /// Shares minted to the vault owner
    pub fn owner_shares(&self) -> U256 {
        self.management_shares + self.performance_shares + self.deposit_fee_shares
    }
}

/// Shares to mint so that the owner holds `fee_value / value` of the supply after minting
fn dilution_shares(supply: U256, value: U256, fee_value: U256) -> ManagerResult<U256> {
    if supply.is_zero() || fee_value.is_zero() {
        return Ok(U256::ZERO);
    }
    if fee_value >= value {
        return Err(arithmetic_err("Fee value exceeds the vault value."));
    }
    mul_div(supply, fee_value, value - fee_value, Rounding::Up)
}

/// Management fee shares for `elapsed` seconds: `supply * r / (1 - r)` with
/// `r = management_pct * elapsed / year`, capped at `MANAGEMENT_FEE_MAX_DILUTION * supply`.
pub fn management_fee_shares(supply: U256, management_pct: u16, elapsed: u64) -> ManagerResult<U256> {
    if supply.is_zero() || management_pct == 0 || elapsed == 0 {
        return Ok(U256::ZERO);
    }
    let cap = supply
        .checked_mul(U256::from(MANAGEMENT_FEE_MAX_DILUTION))
        .ok_or_else(|| arithmetic_err("Management fee cap overflowed."))?;

    let rate = U256::from(management_pct) * U256::from(elapsed);
    let base = full_percent() * U256::from(SECONDS_IN_YEAR);
    // r >= 100 / 101 reaches the cap
    let dilution = U256::from(MANAGEMENT_FEE_MAX_DILUTION);
    if rate * (dilution + U256::from(1)) >= base * dilution {
        return Ok(cap);
    }
    let shares = mul_div(supply, rate, base - rate, Rounding::Up)?;
    Ok(shares.min(cap))
}

/// Performance fee shares: `performance_pct` of the summed gains, minted against `supply`
pub fn performance_fee_shares(
    supply: U256,
    value: U256,
    strategy_gains: &[U256],
    performance_pct: u16,
) -> ManagerResult<U256> {
    if performance_pct == 0 {
        return Ok(U256::ZERO);
    }
    let gains = strategy_gains.iter().try_fold(U256::ZERO, |total, gain| {
        total
            .checked_add(*gain)
            .ok_or_else(|| arithmetic_err("Strategy gains overflowed."))
    })?;
    let fee_value = mul_div(gains, U256::from(performance_pct), full_percent(), Rounding::Up)?;
    dilution_shares(supply, value, fee_value)
}

/// Computes every fee a sync mints.
///
/// Management fee first, then performance fee on the diluted supply, then the deposit
/// shares at the post-fee share price. An empty or worthless vault mints deposits 1:1 with USD.
pub fn compute_fees(input: &FeeInput, fees: &VaultFees) -> ManagerResult<FeeOutcome> {
    let management_shares =
        management_fee_shares(input.supply, fees.management_pct, input.elapsed)?;
    let diluted = input.supply + management_shares;
    let performance_shares = performance_fee_shares(
        diluted,
        input.existing_value,
        &input.strategy_gains,
        fees.performance_pct,
    )?;
    let post_fee_supply = diluted + performance_shares;

    let minted = if input.supply.is_zero() || input.existing_value.is_zero() {
        input.deposit_value
    } else {
        mul_div(
            input.deposit_value,
            post_fee_supply,
            input.existing_value,
            Rounding::Down,
        )?
    };
    let deposit_fee_shares = mul_div(
        minted,
        U256::from(fees.deposit_pct),
        full_percent(),
        Rounding::Up,
    )?;

    Ok(FeeOutcome {
        management_shares,
        performance_shares,
        deposit_fee_shares,
        user_shares: minted - deposit_fee_shares,
    })
}
