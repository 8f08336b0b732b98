//! Mutable strategy data: share ledger, queued flows and harvest history

use std::collections::{BTreeMap, BTreeSet};

use alloy_primitives::U256;

use crate::{
    types::Holder,
    utils::{
        common::add_assign_assets,
        error::{arithmetic_err, ManagerError, ManagerResult},
    },
};

/// Flows a single holder queued for the open harvest index
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PendingFlow {
    /// Deposited asset amounts
    pub deposits: Vec<U256>,
    /// Strategy shares to redeem. Already removed from the holder's balance.
    pub withdrawn_shares: U256,
}

/// Outcome of a finalized harvest for one holder
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParticipantResult {
    pub deposits: Vec<U256>,
    pub minted_shares: U256,
    pub withdrawn_shares: U256,
    pub withdrawn_assets: Vec<U256>,
    /// Holder balance right after the harvest was finalized
    pub balance_after: U256,
}

/// Signed valuation change between two harvests
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum YieldChange {
    #[default]
    Flat,
    Gain(U256),
    Loss(U256),
}

impl YieldChange {
    pub fn between(previous: U256, current: U256) -> Self {
        if current > previous {
            YieldChange::Gain(current - previous)
        } else if current < previous {
            YieldChange::Loss(previous - current)
        } else {
            YieldChange::Flat
        }
    }

    pub fn gain(&self) -> U256 {
        match self {
            YieldChange::Gain(gain) => *gain,
            _ => U256::ZERO,
        }
    }
}

impl std::fmt::Display for YieldChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            YieldChange::Flat => write!(f, "0"),
            YieldChange::Gain(gain) => write!(f, "+{}", gain),
            YieldChange::Loss(loss) => write!(f, "-{}", loss),
        }
    }
}

/// Immutable result of a finalized harvest index
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HarvestRecord {
    pub harvest_index: u64,
    /// Prices the harvest was valued at
    pub prices: Vec<U256>,
    /// Valuation change since the previous harvest, before compounding
    pub base_yield: YieldChange,
    /// USD value added by compounding rewards
    pub compound_yield: U256,
    /// Ecosystem and treasury shares minted on positive yield
    pub protocol_fee_shares: U256,
    /// USD value (e18) of one strategy share (e18) when flows were settled
    pub share_price: U256,
    /// Share supply after the harvest
    pub total_shares: U256,
    /// Valuation after the harvest
    pub total_value: U256,
    pub participants: BTreeMap<Holder, ParticipantResult>,
    pub finalized_at: u64,
}

/// Struct containing all mutable data of a strategy
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StrategyData {
    /// Strategy share supply, including shares escrowed in pending withdrawals
    pub total_shares: U256,
    /// Share balances per holder
    pub balances: BTreeMap<Holder, U256>,
    /// Flows queued for the open harvest index
    pub pending: BTreeMap<Holder, PendingFlow>,
    /// Open harvest index. Every lower index is either finalized or in flight.
    pub harvest_index: u64,
    /// Valuation at the end of the last finalized harvest
    pub total_value: U256,
    /// Finalized harvests
    pub records: BTreeMap<u64, HarvestRecord>,
    /// (harvest index, holder) pairs whose withdrawn assets were collected
    pub collected: BTreeSet<(u64, Holder)>,
}

impl StrategyData {
    pub fn balance_of(&self, holder: &Holder) -> U256 {
        self.balances.get(holder).copied().unwrap_or_default()
    }

    /// Credits freshly minted shares to the holder. Does not touch the supply.
    pub fn credit(&mut self, holder: Holder, shares: U256) -> ManagerResult<()> {
        if shares.is_zero() {
            return Ok(());
        }
        let balance = self.balances.entry(holder).or_default();
        *balance = balance
            .checked_add(shares)
            .ok_or_else(|| arithmetic_err("Share balance overflowed."))?;
        Ok(())
    }

    /// Removes shares from the holder's balance. Does not touch the supply.
    pub fn debit(&mut self, holder: Holder, shares: U256) -> ManagerResult<()> {
        let balance = self.balance_of(&holder);
        if balance < shares {
            return Err(ManagerError::InsufficientBalance);
        }
        if balance == shares {
            self.balances.remove(&holder);
        } else {
            self.balances.insert(holder, balance - shares);
        }
        Ok(())
    }

    /// Queues deposited assets of the holder for the open harvest index
    pub fn queue_deposit(&mut self, holder: Holder, amounts: &[U256]) -> ManagerResult<()> {
        let flow = self.pending.entry(holder).or_default();
        if flow.deposits.is_empty() {
            flow.deposits = vec![U256::ZERO; amounts.len()];
        }
        add_assign_assets(&mut flow.deposits, amounts)
    }

    /// Moves shares of the holder into the pending withdrawal escrow of the open harvest index
    pub fn queue_withdrawal(&mut self, holder: Holder, shares: U256) -> ManagerResult<()> {
        self.debit(holder, shares)?;
        let flow = self.pending.entry(holder).or_default();
        flow.withdrawn_shares = flow
            .withdrawn_shares
            .checked_add(shares)
            .ok_or_else(|| arithmetic_err("Pending withdrawal overflowed."))?;
        Ok(())
    }

    /// Registers the holder as participant of the open harvest index without any flow,
    /// so the harvest record carries its position.
    pub fn touch(&mut self, holder: Holder, asset_count: usize) {
        self.pending.entry(holder).or_insert_with(|| PendingFlow {
            deposits: vec![U256::ZERO; asset_count],
            withdrawn_shares: U256::ZERO,
        });
    }

    /// Shares held in pending withdrawal escrow
    pub fn escrowed_shares(&self) -> U256 {
        self.pending
            .values()
            .fold(U256::ZERO, |total, flow| total + flow.withdrawn_shares)
    }

    /// Sum of all holder balances
    pub fn credited_shares(&self) -> U256 {
        self.balances
            .values()
            .fold(U256::ZERO, |total, balance| total + *balance)
    }

    pub fn record(&self, harvest_index: u64) -> Option<&HarvestRecord> {
        self.records.get(&harvest_index)
    }

    /// Latest finalized share price, if the strategy was ever harvested
    pub fn latest_share_price(&self) -> Option<U256> {
        self.records
            .last_key_value()
            .map(|(_, record)| record.share_price)
    }
}
