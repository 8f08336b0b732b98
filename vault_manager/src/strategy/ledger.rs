//! Harvest processing of a single strategy.
//!
//! A harvest values the position, compounds rewards, mints the protocol fee shares,
//! nets the queued deposits against the queued withdrawals at the harvest share price
//! and hands only the residual to the external protocol. Strategies that cannot settle
//! in one round are left locked with a [`StagedHarvest`] until `harvest_continue`
//! reports the action as done.

use std::collections::BTreeMap;

use alloy_primitives::U256;
use candid::CandidType;
use serde::Deserialize;

use crate::{
    config::ProtocolConfig,
    constants::{full_percent, scale},
    types::{HarvestParams, Holder, StrategyId},
    utils::{
        common::{
            add_assign_assets, all_zero, assets_value, checked_sub, mul_div, nats_to_u256s,
            split_pro_rata, Rounding,
        },
        error::{arithmetic_err, config_err, ManagerError, ManagerResult},
    },
};

use super::{
    adapter::{ProtocolAction, StrategyAdapter, StrategyFlows},
    data::{HarvestRecord, ParticipantResult, PendingFlow, StrategyData, YieldChange},
    lock::ContinuationToken,
    Strategy,
};

/// Computation of a harvest between staging and finalization
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StagedHarvest {
    pub harvest_index: u64,
    /// Token of the pending protocol action, `None` until the adapter hands one out
    pub token: Option<ContinuationToken>,
    pub prices: Vec<U256>,
    pub base_yield: YieldChange,
    pub compound_yield: U256,
    /// Protocol fee shares per recipient
    pub fee_shares: Vec<(Holder, U256)>,
    /// Share supply after minting the protocol fee shares
    pub supply: U256,
    pub share_price: U256,
    /// Flows of the harvest index, per holder
    pub flows: BTreeMap<Holder, PendingFlow>,
    /// Deposited assets handed directly to withdrawers
    pub netted_assets: Vec<U256>,
    /// Shares minted for all deposits of the index
    pub minted_shares: U256,
    /// Shares burned for all withdrawals of the index
    pub burned_shares: U256,
    /// Lower bounds for the withdrawn asset amounts. Empty means no bound.
    pub min_amounts: Vec<U256>,
}

impl StagedHarvest {
    pub fn protocol_fee_shares(&self) -> U256 {
        self.fee_shares
            .iter()
            .fold(U256::ZERO, |total, (_, shares)| total + *shares)
    }
}

/// Result of a harvest round
#[derive(Clone, CandidType, Debug, Deserialize, PartialEq)]
pub enum HarvestOutcome {
    /// The harvest index was finalized
    Completed(u64),
    /// The harvest index awaits a continuation with the given token
    Pending(u64, ContinuationToken),
}

impl HarvestOutcome {
    pub fn harvest_index(&self) -> u64 {
        match self {
            HarvestOutcome::Completed(index) | HarvestOutcome::Pending(index, _) => *index,
        }
    }
}

/// Harvests the open index of the strategy.
///
/// Works on copies of the strategy state and commits them only when every step succeeds.
/// The adapter is moved along the way, so callers hand in a staged copy of it.
pub fn harvest(
    strategy: &mut Strategy,
    adapter: &mut dyn StrategyAdapter,
    config: &ProtocolConfig,
    params: &HarvestParams,
    prices: &[U256],
    now: u64,
) -> ManagerResult<HarvestOutcome> {
    let id = strategy.settings.id;
    strategy.lock.ensure_ready(id)?;

    let asset_count = strategy.settings.assets.len();
    if prices.len() != asset_count {
        return Err(config_err("Prices do not match the strategy's asset group."));
    }
    let min_amounts = nats_to_u256s(&params.slippages)?;
    if !min_amounts.is_empty() && min_amounts.len() != asset_count {
        return Err(config_err("Slippages do not match the strategy's asset group."));
    }

    let mut data = strategy.data.clone();
    let harvest_index = data.harvest_index;
    if data.records.contains_key(&harvest_index) {
        return Err(ManagerError::AlreadyHarvested(id, harvest_index));
    }

    let valuation = adapter.total_value(prices)?;
    let base_yield = YieldChange::between(data.total_value, valuation);
    let compound_yield = adapter.compound(&params.swap_info, prices)?;
    let value = valuation
        .checked_add(compound_yield)
        .ok_or_else(|| arithmetic_err("Strategy valuation overflowed."))?;

    // Protocol fees are taken on the whole positive change, base and compound yield alike.
    let gain = YieldChange::between(data.total_value, value).gain();
    let fee_shares = protocol_fee_shares(config, data.total_shares, value, gain)?;
    let supply = fee_shares
        .iter()
        .fold(data.total_shares, |total, (_, shares)| total + *shares);
    let share_price = share_price(value, supply)?;

    let flows = std::mem::take(&mut data.pending);
    let netting = net_flows(&flows, asset_count, prices, share_price)?;

    let mut staged = StagedHarvest {
        harvest_index,
        token: None,
        prices: prices.to_vec(),
        base_yield,
        compound_yield,
        fee_shares,
        supply,
        share_price,
        flows,
        netted_assets: netting.netted_assets,
        minted_shares: netting.minted_shares,
        burned_shares: netting.burned_shares,
        min_amounts,
    };
    // Flows queued from now on belong to the next index.
    data.harvest_index += 1;

    let protocol_flows = StrategyFlows {
        deposits: netting.residual_deposits,
        withdrawn_shares: netting.unmatched_shares,
        total_shares: supply,
    };
    if !staged.burned_shares.is_zero() && !staged.min_amounts.is_empty() {
        let mut expected = staged.netted_assets.clone();
        if !protocol_flows.withdrawn_shares.is_zero() {
            add_assign_assets(&mut expected, &adapter.preview_flows(&protocol_flows)?)?;
        }
        check_slippage(&expected, &staged.min_amounts)?;
    }
    let action = if protocol_flows.is_empty() {
        ProtocolAction::Done(vec![U256::ZERO; asset_count])
    } else {
        adapter.process_flows(&protocol_flows)?
    };

    let mut lock = strategy.lock.clone();
    let outcome = match action {
        ProtocolAction::Done(withdrawn) => {
            let min_amounts = staged.min_amounts.clone();
            finalize(id, &mut data, &staged, &withdrawn, &min_amounts, adapter, now)?;
            HarvestOutcome::Completed(harvest_index)
        }
        ProtocolAction::Pending(token) => {
            if strategy.settings.atomic {
                return Err(ManagerError::Custom(format!(
                    "Atomic strategy {} returned a pending protocol action.",
                    id
                )));
            }
            staged.token = Some(token.clone());
            lock.lock(staged);
            HarvestOutcome::Pending(harvest_index, token)
        }
    };

    strategy.data = data;
    strategy.lock = lock;
    Ok(outcome)
}

/// Resumes the harvest the strategy is locked on.
///
/// The slippage bound was checked on the preview when the action started. Once the
/// external protocol reports the action as done, the harvest is finalized as is.
pub fn harvest_continue(
    strategy: &mut Strategy,
    adapter: &mut dyn StrategyAdapter,
    continuation_data: &[u8],
    now: u64,
) -> ManagerResult<HarvestOutcome> {
    let id = strategy.settings.id;
    let mut lock = strategy.lock.clone();
    let mut staged = lock.unlock().ok_or_else(|| {
        ManagerError::Custom(format!("Strategy {} is not awaiting a continuation.", id))
    })?;
    let token = staged.token.clone().ok_or(ManagerError::NonExistentValue)?;

    let mut data = strategy.data.clone();
    let outcome = match adapter.continue_action(&token, continuation_data)? {
        ProtocolAction::Done(withdrawn) => {
            finalize(id, &mut data, &staged, &withdrawn, &[], adapter, now)?;
            HarvestOutcome::Completed(staged.harvest_index)
        }
        ProtocolAction::Pending(next) => {
            let harvest_index = staged.harvest_index;
            staged.token = Some(next.clone());
            lock.lock(staged);
            HarvestOutcome::Pending(harvest_index, next)
        }
    };

    strategy.data = data;
    strategy.lock = lock;
    Ok(outcome)
}

/// Split of the queued flows into what is settled internally and what reaches the protocol
struct Netting {
    netted_assets: Vec<U256>,
    residual_deposits: Vec<U256>,
    unmatched_shares: U256,
    minted_shares: U256,
    burned_shares: U256,
}

fn net_flows(
    flows: &BTreeMap<Holder, PendingFlow>,
    asset_count: usize,
    prices: &[U256],
    share_price: U256,
) -> ManagerResult<Netting> {
    let mut deposits = vec![U256::ZERO; asset_count];
    let mut burned_shares = U256::ZERO;
    for flow in flows.values() {
        if !flow.deposits.is_empty() {
            add_assign_assets(&mut deposits, &flow.deposits)?;
        }
        burned_shares = burned_shares
            .checked_add(flow.withdrawn_shares)
            .ok_or_else(|| arithmetic_err("Withdrawn shares overflowed."))?;
    }

    let deposit_value = assets_value(&deposits, prices)?;
    let withdrawal_value = mul_div(burned_shares, share_price, scale(), Rounding::Down)?;
    let minted_shares = if deposit_value.is_zero() {
        U256::ZERO
    } else {
        mul_div(deposit_value, scale(), share_price, Rounding::Down)?
    };

    let mut netted_assets = vec![U256::ZERO; asset_count];
    let mut unmatched_shares = U256::ZERO;
    if !withdrawal_value.is_zero() && !deposit_value.is_zero() {
        if deposit_value >= withdrawal_value {
            // Withdrawers are paid entirely out of the deposits.
            for (netted, deposited) in netted_assets.iter_mut().zip(&deposits) {
                *netted = mul_div(*deposited, withdrawal_value, deposit_value, Rounding::Down)?;
            }
        } else {
            netted_assets = deposits.clone();
            let missing_value = withdrawal_value - deposit_value;
            unmatched_shares =
                mul_div(burned_shares, missing_value, withdrawal_value, Rounding::Down)?;
        }
    } else if !burned_shares.is_zero() && deposit_value.is_zero() {
        unmatched_shares = burned_shares;
    }

    let residual_deposits = deposits
        .iter()
        .zip(&netted_assets)
        .map(|(deposited, netted)| checked_sub(*deposited, *netted, "Residual deposit"))
        .collect::<ManagerResult<Vec<U256>>>()?;

    Ok(Netting {
        netted_assets,
        residual_deposits,
        unmatched_shares,
        minted_shares,
        burned_shares,
    })
}

/// Ecosystem and treasury fee shares for a positive valuation change
fn protocol_fee_shares(
    config: &ProtocolConfig,
    total_shares: U256,
    value: U256,
    gain: U256,
) -> ManagerResult<Vec<(Holder, U256)>> {
    let total_pct = config.total_fee_pct();
    if gain.is_zero() || total_shares.is_zero() || total_pct == 0 {
        return Ok(vec![]);
    }
    let fee_value = mul_div(gain, U256::from(total_pct), full_percent(), Rounding::Up)?;
    if fee_value >= value {
        return Err(arithmetic_err("Protocol fee exceeds the strategy value."));
    }
    let fee_shares = mul_div(total_shares, fee_value, value - fee_value, Rounding::Up)?;
    let ecosystem = mul_div(
        fee_shares,
        U256::from(config.ecosystem_fee_pct),
        U256::from(total_pct),
        Rounding::Down,
    )?;
    let treasury = fee_shares - ecosystem;

    Ok(vec![
        (Holder::Account(config.ecosystem_fee_recipient), ecosystem),
        (Holder::Account(config.treasury_fee_recipient), treasury),
    ]
    .into_iter()
    .filter(|(_, shares)| !shares.is_zero())
    .collect())
}

/// USD value of one share. An empty or worthless strategy restarts at 1:1.
fn share_price(value: U256, supply: U256) -> ManagerResult<U256> {
    if supply.is_zero() || value.is_zero() {
        return Ok(scale());
    }
    let price = mul_div(value, scale(), supply, Rounding::Down)?;
    Ok(price.max(U256::from(1)))
}

/// Returns Err with the first asset index below its lower bound
fn check_slippage(amounts: &[U256], min_amounts: &[U256]) -> ManagerResult<()> {
    for (index, (amount, minimum)) in amounts.iter().zip(min_amounts).enumerate() {
        if amount < minimum {
            return Err(ManagerError::SlippageExceeded(index as u32));
        }
    }
    Ok(())
}

/// Applies a staged harvest to `data` once the protocol action is done.
/// An empty `min_amounts` skips the slippage check.
fn finalize(
    id: StrategyId,
    data: &mut StrategyData,
    staged: &StagedHarvest,
    protocol_assets: &[U256],
    min_amounts: &[U256],
    adapter: &mut dyn StrategyAdapter,
    now: u64,
) -> ManagerResult<()> {
    if data.records.contains_key(&staged.harvest_index) {
        return Err(ManagerError::AlreadyHarvested(id, staged.harvest_index));
    }
    let asset_count = staged.prices.len();

    let mut withdrawn = staged.netted_assets.clone();
    if !protocol_assets.is_empty() {
        add_assign_assets(&mut withdrawn, protocol_assets)?;
    }
    if !staged.burned_shares.is_zero() {
        check_slippage(&withdrawn, min_amounts)?;
    }

    let holders: Vec<Holder> = staged.flows.keys().copied().collect();
    let deposit_weights = staged
        .flows
        .values()
        .map(|flow| {
            if flow.deposits.is_empty() {
                Ok(U256::ZERO)
            } else {
                assets_value(&flow.deposits, &staged.prices)
            }
        })
        .collect::<ManagerResult<Vec<U256>>>()?;
    let minted = split_pro_rata(staged.minted_shares, &deposit_weights)?;

    let share_weights: Vec<U256> = staged
        .flows
        .values()
        .map(|flow| flow.withdrawn_shares)
        .collect();
    let mut withdrawn_per_holder = vec![vec![U256::ZERO; asset_count]; holders.len()];
    if !all_zero(&share_weights) {
        for (asset, total) in withdrawn.iter().enumerate() {
            let parts = split_pro_rata(*total, &share_weights)?;
            for (holder_assets, part) in withdrawn_per_holder.iter_mut().zip(parts) {
                holder_assets[asset] = part;
            }
        }
    }

    data.total_shares = checked_sub(
        staged
            .supply
            .checked_add(staged.minted_shares)
            .ok_or_else(|| arithmetic_err("Share supply overflowed."))?,
        staged.burned_shares,
        "Share supply",
    )?;
    for (holder, shares) in &staged.fee_shares {
        data.credit(*holder, *shares)?;
    }
    for (holder, shares) in holders.iter().zip(&minted) {
        data.credit(*holder, *shares)?;
    }
    data.total_value = adapter.total_value(&staged.prices)?;

    let participants = holders
        .iter()
        .zip(staged.flows.values())
        .zip(minted.into_iter().zip(withdrawn_per_holder))
        .map(|((holder, flow), (minted_shares, withdrawn_assets))| {
            let deposits = if flow.deposits.is_empty() {
                vec![U256::ZERO; asset_count]
            } else {
                flow.deposits.clone()
            };
            let result = ParticipantResult {
                deposits,
                minted_shares,
                withdrawn_shares: flow.withdrawn_shares,
                withdrawn_assets,
                balance_after: data.balance_of(holder),
            };
            (*holder, result)
        })
        .collect();

    data.records.insert(
        staged.harvest_index,
        HarvestRecord {
            harvest_index: staged.harvest_index,
            prices: staged.prices.clone(),
            base_yield: staged.base_yield,
            compound_yield: staged.compound_yield,
            protocol_fee_shares: staged.protocol_fee_shares(),
            share_price: staged.share_price,
            total_shares: data.total_shares,
            total_value: data.total_value,
            participants,
            finalized_at: now,
        },
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{adapter::MockStrategyAdapter, settings::StrategySettings};
    use candid::Principal;
    use mockall::predicate::eq;

    fn e18(value: u64) -> U256 {
        U256::from(value) * scale()
    }

    fn strategy(atomic: bool) -> Strategy {
        let mut settings = StrategySettings::default();
        settings
            .id(1)
            .name("single asset")
            .assets(vec![Principal::from_slice(&[10])])
            .atomic(atomic);
        Strategy::new(settings)
    }

    fn fee_config() -> ProtocolConfig {
        let mut config = ProtocolConfig::default();
        config
            .ecosystem_fee(10_00, Principal::from_slice(&[20]))
            .treasury_fee(5_00, Principal::from_slice(&[21]));
        config
    }

    #[test]
    fn test_first_harvest_mints_one_to_one() {
        let mut strategy = strategy(true);
        let vault = Holder::Vault(1);
        strategy.data.queue_deposit(vault, &[e18(100)]).unwrap();

        let mut adapter = MockStrategyAdapter::new();
        let mut valuations = vec![U256::ZERO, e18(100)].into_iter();
        adapter
            .expect_total_value()
            .times(2)
            .returning(move |_| Ok(valuations.next().unwrap_or_default()));
        adapter.expect_compound().returning(|_, _| Ok(U256::ZERO));
        adapter
            .expect_process_flows()
            .withf(|flows| flows.deposits == vec![e18(100)] && flows.withdrawn_shares.is_zero())
            .times(1)
            .returning(|_| Ok(ProtocolAction::Done(vec![U256::ZERO])));

        let outcome = harvest(
            &mut strategy,
            &mut adapter,
            &ProtocolConfig::default(),
            &HarvestParams::default(),
            &[scale()],
            10,
        )
        .unwrap();

        assert_eq!(outcome, HarvestOutcome::Completed(0));
        assert_eq!(strategy.data.harvest_index, 1);
        assert_eq!(strategy.data.total_shares, e18(100));
        assert_eq!(strategy.data.balance_of(&vault), e18(100));
        let record = strategy.data.record(0).unwrap();
        assert_eq!(record.share_price, scale());
        assert_eq!(record.participants[&vault].balance_after, e18(100));
        assert_eq!(record.finalized_at, 10);
    }

    #[test]
    fn test_protocol_fees_are_minted_on_yield() {
        let mut strategy = strategy(true);
        let vault = Holder::Vault(1);
        strategy.data.total_shares = e18(100);
        strategy.data.total_value = e18(100);
        strategy.data.credit(vault, e18(100)).unwrap();

        let mut adapter = MockStrategyAdapter::new();
        adapter.expect_total_value().returning(|_| Ok(e18(110)));
        adapter.expect_compound().returning(|_, _| Ok(e18(10)));
        adapter.expect_process_flows().never();

        harvest(
            &mut strategy,
            &mut adapter,
            &fee_config(),
            &HarvestParams::default(),
            &[scale()],
            10,
        )
        .unwrap();

        // 20 USD gain, 15% protocol fee = 3 USD of a 120 USD strategy
        let record = strategy.data.record(0).unwrap();
        assert_eq!(record.base_yield, YieldChange::Gain(e18(10)));
        assert_eq!(record.compound_yield, e18(10));
        let fee_value = mul_div(
            record.protocol_fee_shares,
            e18(120),
            strategy.data.total_shares,
            Rounding::Down,
        )
        .unwrap();
        assert!(fee_value >= e18(3) && fee_value - e18(3) < U256::from(1_000));

        let ecosystem = strategy
            .data
            .balance_of(&Holder::Account(Principal::from_slice(&[20])));
        let treasury = strategy
            .data
            .balance_of(&Holder::Account(Principal::from_slice(&[21])));
        assert_eq!(ecosystem + treasury, record.protocol_fee_shares);
        assert!(ecosystem > treasury);
        assert_eq!(
            strategy.data.credited_shares() + strategy.data.escrowed_shares(),
            strategy.data.total_shares
        );
    }

    #[test]
    fn test_deposits_are_netted_against_withdrawals() {
        let mut strategy = strategy(true);
        let leaving = Holder::Vault(1);
        let joining = Holder::Vault(2);
        strategy.data.total_shares = e18(100);
        strategy.data.total_value = e18(100);
        strategy.data.credit(leaving, e18(100)).unwrap();
        strategy.data.queue_withdrawal(leaving, e18(40)).unwrap();
        strategy.data.queue_deposit(joining, &[e18(50)]).unwrap();

        let mut adapter = MockStrategyAdapter::new();
        let mut valuations = vec![e18(100), e18(110)].into_iter();
        adapter
            .expect_total_value()
            .returning(move |_| Ok(valuations.next().unwrap_or_default()));
        adapter.expect_compound().returning(|_, _| Ok(U256::ZERO));
        // Only the residual 10 reaches the protocol, no shares are redeemed there.
        adapter
            .expect_process_flows()
            .with(eq(StrategyFlows {
                deposits: vec![e18(10)],
                withdrawn_shares: U256::ZERO,
                total_shares: e18(100),
            }))
            .times(1)
            .returning(|_| Ok(ProtocolAction::Done(vec![U256::ZERO])));

        harvest(
            &mut strategy,
            &mut adapter,
            &ProtocolConfig::default(),
            &HarvestParams::default(),
            &[scale()],
            10,
        )
        .unwrap();

        let record = strategy.data.record(0).unwrap();
        assert_eq!(record.participants[&leaving].withdrawn_assets, vec![e18(40)]);
        assert_eq!(record.participants[&joining].minted_shares, e18(50));
        assert_eq!(strategy.data.total_shares, e18(110));
        assert_eq!(strategy.data.balance_of(&leaving), e18(60));
        assert_eq!(strategy.data.total_value, e18(110));
    }

    #[test]
    fn test_unmatched_withdrawals_reach_the_protocol() {
        let mut strategy = strategy(true);
        let leaving = Holder::Vault(1);
        let joining = Holder::Vault(2);
        strategy.data.total_shares = e18(100);
        strategy.data.total_value = e18(100);
        strategy.data.credit(leaving, e18(100)).unwrap();
        strategy.data.queue_withdrawal(leaving, e18(40)).unwrap();
        strategy.data.queue_deposit(joining, &[e18(10)]).unwrap();

        let mut adapter = MockStrategyAdapter::new();
        let mut valuations = vec![e18(100), e18(70)].into_iter();
        adapter
            .expect_total_value()
            .returning(move |_| Ok(valuations.next().unwrap_or_default()));
        adapter.expect_compound().returning(|_, _| Ok(U256::ZERO));
        adapter
            .expect_process_flows()
            .with(eq(StrategyFlows {
                deposits: vec![U256::ZERO],
                withdrawn_shares: e18(30),
                total_shares: e18(100),
            }))
            .returning(|_| Ok(ProtocolAction::Done(vec![e18(30)])));

        harvest(
            &mut strategy,
            &mut adapter,
            &ProtocolConfig::default(),
            &HarvestParams::default(),
            &[scale()],
            10,
        )
        .unwrap();

        let record = strategy.data.record(0).unwrap();
        assert_eq!(record.participants[&leaving].withdrawn_assets, vec![e18(40)]);
        assert_eq!(strategy.data.total_shares, e18(70));
    }

    #[test]
    fn test_non_atomic_harvest_waits_for_continuation() {
        let mut strategy = strategy(false);
        let vault = Holder::Vault(1);
        strategy.data.queue_deposit(vault, &[e18(5)]).unwrap();

        let mut adapter = MockStrategyAdapter::new();
        let mut valuations = vec![U256::ZERO, e18(5)].into_iter();
        adapter
            .expect_total_value()
            .returning(move |_| Ok(valuations.next().unwrap_or_default()));
        adapter.expect_compound().returning(|_, _| Ok(U256::ZERO));
        adapter
            .expect_process_flows()
            .returning(|_| Ok(ProtocolAction::Pending(ContinuationToken(vec![1]))));
        let mut rounds = vec![
            ProtocolAction::Pending(ContinuationToken(vec![2])),
            ProtocolAction::Done(vec![U256::ZERO]),
        ]
        .into_iter();
        adapter
            .expect_continue_action()
            .times(2)
            .returning(move |_, _| Ok(rounds.next().unwrap_or(ProtocolAction::Done(vec![]))));

        let params = HarvestParams::default();
        let outcome = harvest(
            &mut strategy,
            &mut adapter,
            &ProtocolConfig::default(),
            &params,
            &[scale()],
            10,
        )
        .unwrap();
        assert_eq!(outcome, HarvestOutcome::Pending(0, ContinuationToken(vec![1])));
        assert!(strategy.lock.is_locked());
        assert!(strategy.data.record(0).is_none());
        assert_eq!(
            harvest(
                &mut strategy,
                &mut adapter,
                &ProtocolConfig::default(),
                &params,
                &[scale()],
                11,
            ),
            Err(ManagerError::StrategyNotReady(1))
        );

        let outcome = harvest_continue(&mut strategy, &mut adapter, &[], 12).unwrap();
        assert_eq!(outcome, HarvestOutcome::Pending(0, ContinuationToken(vec![2])));
        assert_eq!(strategy.lock.token(), Some(&ContinuationToken(vec![2])));

        let outcome = harvest_continue(&mut strategy, &mut adapter, &[], 13).unwrap();
        assert_eq!(outcome, HarvestOutcome::Completed(0));
        assert!(!strategy.lock.is_locked());
        assert_eq!(strategy.data.record(0).unwrap().finalized_at, 13);
        assert_eq!(strategy.data.balance_of(&vault), e18(5));
    }

    #[test]
    fn test_atomic_strategy_rejects_pending_action() {
        let mut strategy = strategy(true);
        strategy
            .data
            .queue_deposit(Holder::Vault(1), &[e18(5)])
            .unwrap();
        let before = strategy.clone();

        let mut adapter = MockStrategyAdapter::new();
        adapter.expect_total_value().returning(|_| Ok(U256::ZERO));
        adapter.expect_compound().returning(|_, _| Ok(U256::ZERO));
        adapter
            .expect_process_flows()
            .returning(|_| Ok(ProtocolAction::Pending(ContinuationToken(vec![1]))));

        let result = harvest(
            &mut strategy,
            &mut adapter,
            &ProtocolConfig::default(),
            &HarvestParams::default(),
            &[scale()],
            10,
        );
        assert!(matches!(result, Err(ManagerError::Custom(_))));
        assert_eq!(strategy, before);
    }

    #[test]
    fn test_slippage_bound_rejects_harvest() {
        let mut strategy = strategy(true);
        let vault = Holder::Vault(1);
        strategy.data.total_shares = e18(10);
        strategy.data.total_value = e18(10);
        strategy.data.credit(vault, e18(10)).unwrap();
        strategy.data.queue_withdrawal(vault, e18(10)).unwrap();

        let mut adapter = MockStrategyAdapter::new();
        adapter.expect_total_value().returning(|_| Ok(e18(10)));
        adapter.expect_compound().returning(|_, _| Ok(U256::ZERO));
        adapter
            .expect_preview_flows()
            .withf(|flows| flows.withdrawn_shares == e18(10))
            .times(1)
            .returning(|_| Ok(vec![e18(9)]));
        // The bound fails on the preview, nothing reaches the protocol.
        adapter.expect_process_flows().never();

        let params = HarvestParams {
            swap_info: vec![],
            slippages: vec![candid::Nat::from(9_500_000_000_000_000_000_u128)],
        };
        let result = harvest(
            &mut strategy,
            &mut adapter,
            &ProtocolConfig::default(),
            &params,
            &[scale()],
            10,
        );
        assert_eq!(result, Err(ManagerError::SlippageExceeded(0)));
        assert_eq!(strategy.data.harvest_index, 0);
        assert_eq!(strategy.data.escrowed_shares(), e18(10));
    }

    #[test]
    fn test_continue_without_pending_harvest() {
        let mut strategy = strategy(false);
        let mut adapter = MockStrategyAdapter::new();
        adapter.expect_continue_action().never();
        assert!(matches!(
            harvest_continue(&mut strategy, &mut adapter, &[], 1),
            Err(ManagerError::Custom(_))
        ));
    }
}
