use candid::{CandidType, Principal};
use serde::Deserialize;

use crate::{
    access::Role,
    types::{StrategyId, TicketId, VaultId},
};

/// Vault Manager Result
pub type ManagerResult<T> = Result<T, ManagerError>;

/// Vault Manager Errors
#[derive(Clone, CandidType, Debug, Deserialize, PartialEq)]
pub enum ManagerError {
    /// The open flush batch holds neither deposits nor withdrawals
    NothingToFlush,
    /// Every flushed batch of the vault is already synced
    NothingToSync,
    /// The strategy has not finished (or not started) the harvest a caller depends on
    StrategyNotReady(StrategyId),
    /// The strategy is awaiting a harvest continuation, direct share redemption is blocked
    ProtocolActionNotFinished(StrategyId),
    /// The vault has flushed batches that are not synced yet
    VaultNotSynced(VaultId),
    /// The harvest record for this index is already finalized
    AlreadyHarvested(StrategyId, u64),
    /// Unknown, foreign, unsynced or over-claimed deposit ticket
    InvalidDepositNftId(TicketId),
    /// Unknown, foreign, unsynced or over-claimed withdrawal ticket
    InvalidWithdrawalNftId(TicketId),
    /// The caller lacks the role required by the operation
    MissingRole(Role, Principal),
    /// The vault has no live strategy left
    GhostVault(VaultId),
    /// A guard rejected the request. Holds the index of the failing guard.
    GuardFailed(u32),
    /// Redeemed amount of the asset at the given index is below the caller's bound
    SlippageExceeded(u32),
    /// The holder does not own enough shares
    InsufficientBalance,
    /// Invalid settings or arguments
    InvalidConfiguration(String),
    /// A requested value does not exist
    NonExistentValue,
    /// Decoding issue
    DecodingError(String),
    /// Arithmetic error
    Arithmetic(String),
    /// Unknown/Custom error
    Custom(String),
}

pub fn arithmetic_err<S: AsRef<str>>(s: S) -> ManagerError {
    ManagerError::Arithmetic(format!("{:#?}", s.as_ref()))
}

pub fn config_err<S: AsRef<str>>(s: S) -> ManagerError {
    ManagerError::InvalidConfiguration(s.as_ref().to_string())
}
