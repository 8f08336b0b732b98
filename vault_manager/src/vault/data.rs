//! Mutable vault data: pool share ledger, flush batches and their records

use std::collections::BTreeMap;

use alloy_primitives::U256;
use candid::Principal;

use crate::{
    types::StrategyId,
    utils::{
        common::{add_assign_assets, all_zero, checked_sub},
        error::{arithmetic_err, ManagerError, ManagerResult},
    },
};

/// Pool share bookkeeping.
///
/// `total_supply` covers the holder balances, the shares escrowed by pending
/// withdrawal requests and the minted shares not claimed by their deposit tickets yet.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShareLedger {
    pub total_supply: U256,
    pub balances: BTreeMap<Principal, U256>,
    pub escrowed: U256,
    pub unclaimed: U256,
}

impl ShareLedger {
    pub fn balance_of(&self, owner: &Principal) -> U256 {
        self.balances.get(owner).copied().unwrap_or_default()
    }

    /// Mints shares straight into the owner's balance
    pub fn mint(&mut self, owner: Principal, shares: U256) -> ManagerResult<()> {
        if shares.is_zero() {
            return Ok(());
        }
        self.total_supply = self
            .total_supply
            .checked_add(shares)
            .ok_or_else(|| arithmetic_err("Pool share supply overflowed."))?;
        let balance = self.balances.entry(owner).or_default();
        *balance += shares;
        Ok(())
    }

    /// Mints shares that stay unclaimed until their tickets are claimed
    pub fn mint_unclaimed(&mut self, shares: U256) -> ManagerResult<()> {
        self.total_supply = self
            .total_supply
            .checked_add(shares)
            .ok_or_else(|| arithmetic_err("Pool share supply overflowed."))?;
        self.unclaimed += shares;
        Ok(())
    }

    /// Moves unclaimed shares into the owner's balance
    pub fn release_unclaimed(&mut self, owner: Principal, shares: U256) -> ManagerResult<()> {
        self.unclaimed = checked_sub(self.unclaimed, shares, "Unclaimed pool shares")?;
        let balance = self.balances.entry(owner).or_default();
        *balance += shares;
        Ok(())
    }

    fn debit(&mut self, owner: Principal, shares: U256) -> ManagerResult<()> {
        let balance = self.balance_of(&owner);
        if balance < shares {
            return Err(ManagerError::InsufficientBalance);
        }
        if balance == shares {
            self.balances.remove(&owner);
        } else {
            self.balances.insert(owner, balance - shares);
        }
        Ok(())
    }

    /// Moves shares of the owner into the withdrawal escrow
    pub fn escrow(&mut self, owner: Principal, shares: U256) -> ManagerResult<()> {
        self.debit(owner, shares)?;
        self.escrowed += shares;
        Ok(())
    }

    /// Burns escrowed shares
    pub fn burn_escrowed(&mut self, shares: U256) -> ManagerResult<()> {
        self.escrowed = checked_sub(self.escrowed, shares, "Escrowed pool shares")?;
        self.total_supply = checked_sub(self.total_supply, shares, "Pool share supply")?;
        Ok(())
    }

    /// Burns shares straight from the owner's balance
    pub fn burn(&mut self, owner: Principal, shares: U256) -> ManagerResult<()> {
        self.debit(owner, shares)?;
        self.total_supply = checked_sub(self.total_supply, shares, "Pool share supply")?;
        Ok(())
    }
}

/// Requests collected for the open flush index
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlushBatch {
    pub deposits: Vec<U256>,
    /// Escrowed pool shares
    pub withdrawn_shares: U256,
}

impl FlushBatch {
    pub fn new(asset_count: usize) -> Self {
        Self {
            deposits: vec![U256::ZERO; asset_count],
            withdrawn_shares: U256::ZERO,
        }
    }

    pub fn is_empty(&self) -> bool {
        all_zero(&self.deposits) && self.withdrawn_shares.is_zero()
    }

    pub fn add_deposit(&mut self, amounts: &[U256]) -> ManagerResult<()> {
        add_assign_assets(&mut self.deposits, amounts)
    }

    pub fn add_withdrawal(&mut self, shares: U256) -> ManagerResult<()> {
        self.withdrawn_shares = self
            .withdrawn_shares
            .checked_add(shares)
            .ok_or_else(|| arithmetic_err("Batch withdrawal overflowed."))?;
        Ok(())
    }
}

/// Fee shares minted to the vault owner by a sync
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MintedFees {
    pub management: U256,
    pub performance: U256,
    pub deposit: U256,
}

/// Settlement of a flushed batch
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncRecord {
    /// Prices the batch was settled at
    pub prices: Vec<U256>,
    /// USD value of the batch deposits at `prices`
    pub deposit_value: U256,
    /// Pool shares claimable by the deposit tickets of the batch
    pub minted_user_shares: U256,
    pub claimed_shares: U256,
    /// Assets claimable by the withdrawal tickets of the batch
    pub withdrawn_assets: Vec<U256>,
    pub claimed_assets: Vec<U256>,
    pub fees: MintedFees,
    pub synced_at: u64,
}

/// Immutable snapshot of a flushed batch, settled by a later sync
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlushRecord {
    pub flush_index: u64,
    /// Strategy per slot at flush time. Ghost slots are kept.
    pub strategies: Vec<StrategyId>,
    /// Harvest index the batch was queued into, per slot. `None` for skipped slots.
    pub harvest_indexes: Vec<Option<u64>>,
    pub deposits: Vec<U256>,
    pub withdrawn_shares: U256,
    pub flushed_at: u64,
    pub synced: Option<SyncRecord>,
}

impl FlushRecord {
    /// Referenced (strategy, harvest index) pairs
    pub fn harvests(&self) -> impl Iterator<Item = (StrategyId, u64)> + '_ {
        self.strategies
            .iter()
            .zip(&self.harvest_indexes)
            .filter_map(|(strategy, index)| index.map(|index| (*strategy, index)))
    }

    pub fn sync_record(&self) -> Option<&SyncRecord> {
        self.synced.as_ref()
    }
}

/// Struct containing all mutable data of a vault
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VaultData {
    pub shares: ShareLedger,
    /// Open flush index
    pub flush_index: u64,
    /// Every flush index below this one is synced
    pub last_synced: u64,
    pub last_fee_collection: u64,
    /// Strategy share price at the last sync, per strategy. Acts as the performance fee high-water mark.
    pub last_share_prices: BTreeMap<StrategyId, U256>,
    pub open_batch: FlushBatch,
    pub records: BTreeMap<u64, FlushRecord>,
}

impl VaultData {
    pub fn new(asset_count: usize, now: u64) -> Self {
        Self {
            open_batch: FlushBatch::new(asset_count),
            last_fee_collection: now,
            ..Default::default()
        }
    }

    pub fn is_synced(&self) -> bool {
        self.last_synced == self.flush_index
    }

    pub fn record(&self, flush_index: u64) -> Option<&FlushRecord> {
        self.records.get(&flush_index)
    }

    /// Unsynced flush records, in flush order
    pub fn unsynced(&self) -> impl Iterator<Item = &FlushRecord> {
        self.records.range(self.last_synced..self.flush_index).map(|(_, record)| record)
    }
}
