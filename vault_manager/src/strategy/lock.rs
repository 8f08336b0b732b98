//! Strategy Harvest Lock
//!
//! A strategy whose external protocol cannot settle a harvest in one round stays
//! locked between `harvest` and `harvest_continue`. The gap may be arbitrarily long,
//! there is no timeout. While locked, every operation that depends on the in-flight
//! harvest is rejected instead of queued.
//!
//! ```plain
//! Harvest Lock State Machine:
//!
//!                   ┌──────┐
//!              ┌────► Idle │◄──────────────┐
//!              │    └──────┘               │
//!              │        │                  │
//!        Done  │   harvest (Pending)   removal
//!              │        │                  │
//!              │        ▼                  │
//!              │  ┌───────────────────────┐│
//!              └──┤ AwaitingContinuation  ├┘
//!                 └───────────────────────┘
//!                   ▲      │
//!                   └──────┘ harvest_continue (Pending)
//! ```

use candid::CandidType;
use serde::Deserialize;

use crate::{
    types::StrategyId,
    utils::error::{ManagerError, ManagerResult},
};

use super::ledger::StagedHarvest;

/// Opaque state handed out by the external protocol and handed back on continuation
#[derive(Clone, CandidType, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct ContinuationToken(#[serde(with = "serde_bytes")] pub Vec<u8>);

impl ContinuationToken {
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

/// Continuation state of a strategy
#[derive(Clone, Debug, Default, PartialEq)]
pub enum HarvestLock {
    #[default]
    Idle,
    /// Holds the staged computation of the in-flight harvest
    AwaitingContinuation(Box<StagedHarvest>),
}

impl HarvestLock {
    pub fn is_locked(&self) -> bool {
        matches!(self, HarvestLock::AwaitingContinuation(_))
    }

    /// Harvest index the lock is waiting on, if any
    pub fn pending_index(&self) -> Option<u64> {
        match self {
            HarvestLock::Idle => None,
            HarvestLock::AwaitingContinuation(staged) => Some(staged.harvest_index),
        }
    }

    pub fn token(&self) -> Option<&ContinuationToken> {
        match self {
            HarvestLock::Idle => None,
            HarvestLock::AwaitingContinuation(staged) => staged.token.as_ref(),
        }
    }

    /// Readiness check for harvests, syncs and fast redemptions
    pub fn ensure_ready(&self, strategy: StrategyId) -> ManagerResult<()> {
        if self.is_locked() {
            return Err(ManagerError::StrategyNotReady(strategy));
        }
        Ok(())
    }

    /// Readiness check for direct strategy share redemptions
    pub fn ensure_action_finished(&self, strategy: StrategyId) -> ManagerResult<()> {
        if self.is_locked() {
            return Err(ManagerError::ProtocolActionNotFinished(strategy));
        }
        Ok(())
    }

    /// Locks the strategy with the staged harvest
    pub fn lock(&mut self, staged: StagedHarvest) -> &mut Self {
        *self = HarvestLock::AwaitingContinuation(Box::new(staged));
        self
    }

    /// Releases the lock and returns the staged harvest it held
    pub fn unlock(&mut self) -> Option<StagedHarvest> {
        match std::mem::take(self) {
            HarvestLock::Idle => None,
            HarvestLock::AwaitingContinuation(staged) => Some(*staged),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_state_machine() {
        let mut lock = HarvestLock::default();
        assert!(lock.ensure_ready(7).is_ok());
        assert!(lock.ensure_action_finished(7).is_ok());
        assert_eq!(lock.pending_index(), None);

        let staged = StagedHarvest {
            harvest_index: 3,
            token: Some(ContinuationToken(vec![0xab, 0xcd])),
            ..Default::default()
        };
        lock.lock(staged);

        assert_eq!(lock.ensure_ready(7), Err(ManagerError::StrategyNotReady(7)));
        assert_eq!(
            lock.ensure_action_finished(7),
            Err(ManagerError::ProtocolActionNotFinished(7))
        );
        assert_eq!(lock.pending_index(), Some(3));
        assert_eq!(lock.token().map(|token| token.to_hex()), Some("abcd".to_string()));

        let released = lock.unlock().expect("lock held a staged harvest");
        assert_eq!(released.harvest_index, 3);
        assert!(!lock.is_locked());
        assert_eq!(lock.unlock(), None);
    }
}
