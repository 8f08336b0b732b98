use candid::{CandidType, Nat, Principal};
use serde::Deserialize;

use crate::{
    guards::GuardDefinition,
    strategy::lock::ContinuationToken,
    vault::settings::VaultFees,
};

pub type StrategyId = u32;
pub type VaultId = u32;
pub type TicketId = u64;
/// Asset identifier (token ledger principal in the canister deployment)
pub type AssetId = Principal;

/// Owner of strategy shares
#[derive(Clone, Copy, CandidType, Debug, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Holder {
    /// Position of a vault
    Vault(VaultId),
    /// Position of a plain account (fee recipients, direct holders)
    Account(Principal),
}

#[derive(CandidType, Deserialize)]
pub struct InitArgs {
    pub admin: Principal,
    pub ecosystem_fee_recipient: Principal,
    pub ecosystem_fee_pct: u16,
    pub treasury_fee_recipient: Principal,
    pub treasury_fee_pct: u16,
    pub emergency_wallet: Principal,
}

#[derive(CandidType, Deserialize)]
pub struct StrategyInput {
    pub name: String,
    pub assets: Vec<AssetId>,
    pub atomic: bool,
}

#[derive(CandidType, Deserialize)]
pub struct VaultInput {
    pub owner: Principal,
    pub assets: Vec<AssetId>,
    pub strategies: Vec<StrategyId>,
    pub allocations: Vec<u16>,
    pub fees: VaultFees,
    pub guards: Vec<GuardDefinition>,
}

/// Per strategy harvest parameters
#[derive(Clone, CandidType, Debug, Default, Deserialize, PartialEq)]
pub struct HarvestParams {
    /// Opaque swap routing passed to the adapter when compounding rewards
    #[serde(with = "serde_bytes")]
    pub swap_info: Vec<u8>,
    /// Minimum asset amounts that must be returned by the external protocol on withdrawal.
    /// Empty means no bound.
    pub slippages: Vec<Nat>,
}

#[derive(CandidType)]
pub struct StrategyQuery {
    pub id: StrategyId,
    pub name: String,
    pub assets: Vec<AssetId>,
    pub atomic: bool,
    pub removed: bool,
    pub total_shares: Nat,
    pub total_value: Nat,
    pub harvest_index: u64,
    pub awaiting_continuation: Option<ContinuationToken>,
}

#[derive(CandidType)]
pub struct VaultQuery {
    pub id: VaultId,
    pub owner: Principal,
    pub strategies: Vec<StrategyId>,
    pub allocations: Vec<u16>,
    pub total_supply: Nat,
    pub flush_index: u64,
    pub last_synced: u64,
    pub last_fee_collection: u64,
    pub fees: VaultFees,
}

#[derive(CandidType)]
pub struct TicketQuery {
    pub id: TicketId,
    pub owner: Principal,
    pub flush_index: u64,
    pub amounts: Vec<Nat>,
    pub fraction: u64,
    pub claimable: bool,
}

#[derive(CandidType)]
pub struct FlushRecordQuery {
    pub flush_index: u64,
    pub strategies: Vec<StrategyId>,
    pub harvest_indexes: Vec<Option<u64>>,
    pub deposits: Vec<Nat>,
    pub withdrawn_shares: Nat,
    pub synced: bool,
    pub minted_user_shares: Nat,
    pub withdrawn_assets: Vec<Nat>,
}

#[derive(CandidType)]
pub struct HarvestRecordQuery {
    pub strategy: StrategyId,
    pub harvest_index: u64,
    pub prices: Vec<Nat>,
    pub share_price: Nat,
    pub total_shares: Nat,
    pub total_value: Nat,
    pub base_yield: String,
    pub compound_yield: Nat,
    pub protocol_fee_shares: Nat,
    pub finalized_at: u64,
}
