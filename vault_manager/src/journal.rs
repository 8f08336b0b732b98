//! Operation journal
//!
//! Every endpoint opens a `JournalCollection`, appends one entry per noteworthy step and
//! lets it drop. Closing the collection stores it in stable memory under the next sequence
//! number, so a collection with entries is persisted on every return path.

use std::borrow::Cow;

use candid::{CandidType, Decode, Encode};
use ic_stable_structures::{storable::Bound, Storable};
use serde::Deserialize;

use crate::{
    state::JOURNAL,
    types::{StrategyId, VaultId},
    utils::{common::current_time, error::ManagerResult},
};

#[derive(Clone, Copy, CandidType, Debug, Deserialize, PartialEq, Eq)]
pub enum LogType {
    Info,
    /// Deposit and withdrawal requests
    Request,
    Flush,
    Harvest,
    Sync,
    Claim,
    Fee,
    StrategyRemoval,
}

/// Component an operation is about
#[derive(Clone, Copy, CandidType, Debug, Deserialize, PartialEq, Eq)]
pub enum JournalScope {
    Vault(VaultId),
    Strategy(StrategyId),
}

/// Journal entry
#[derive(Clone, CandidType, Debug, Deserialize)]
pub struct JournalEntry {
    pub timestamp: u64,
    pub entry: ManagerResult<()>,
    pub log_type: LogType,
    pub note: Option<String>,
}

impl JournalEntry {
    /// Create a new instance of a journal entry
    /// Fills the `timestamp`, `entry` and `log_type` fields
    pub fn new(entry: ManagerResult<()>, log_type: LogType) -> Self {
        Self {
            timestamp: current_time(),
            entry,
            log_type,
            note: None,
        }
    }

    /// Fills the `note` field of the entry
    pub fn note<S: AsRef<str>>(mut self, text: S) -> Self {
        self.note = Some(text.as_ref().to_string());
        self
    }
}

/// Stored entries of a single operation
#[derive(Clone, CandidType, Debug, Deserialize)]
pub struct JournalRecord {
    pub start_date_and_time: u64,
    pub end_date_and_time: u64,
    pub scope: Option<JournalScope>,
    pub entries: Vec<JournalEntry>,
}

impl JournalRecord {
    /// `true` if any entry holds an error
    pub fn has_error(&self) -> bool {
        self.entries.iter().any(|entry| entry.entry.is_err())
    }
}

impl Storable for JournalRecord {
    fn to_bytes(&self) -> Cow<[u8]> {
        Cow::Owned(Encode!(self).unwrap())
    }

    fn from_bytes(bytes: Cow<[u8]>) -> Self {
        Decode!(bytes.as_ref(), Self).unwrap()
    }

    const BOUND: Bound = Bound::Unbounded;
}

/// Open journal of the running operation, stored when dropped
#[derive(Debug)]
pub struct JournalCollection {
    record: JournalRecord,
}

impl JournalCollection {
    pub fn open(scope: Option<JournalScope>) -> Self {
        let now = current_time();
        Self {
            record: JournalRecord {
                start_date_and_time: now,
                end_date_and_time: now,
                scope,
                entries: vec![],
            },
        }
    }

    pub fn append_note<S: AsRef<str>>(
        &mut self,
        entry: ManagerResult<()>,
        log_type: LogType,
        note: S,
    ) -> &mut Self {
        self.record
            .entries
            .push(JournalEntry::new(entry, log_type).note(note));
        self
    }

    /// Appends the outcome of an operation, keeping only its error
    pub fn append_result<T, S: AsRef<str>>(
        &mut self,
        result: &ManagerResult<T>,
        log_type: LogType,
        note: S,
    ) -> &mut Self {
        let entry = result.as_ref().map(|_| ()).map_err(Clone::clone);
        self.append_note(entry, log_type, note)
    }

    pub fn is_empty(&self) -> bool {
        self.record.entries.is_empty()
    }

    pub fn has_error(&self) -> bool {
        self.record.has_error()
    }

    fn close(&mut self) {
        if self.is_empty() {
            return;
        }
        let mut stored = JournalRecord {
            entries: std::mem::take(&mut self.record.entries),
            ..self.record.clone()
        };
        stored.end_date_and_time = current_time();
        JOURNAL.with(|journal| {
            let mut journal = journal.borrow_mut();
            let key = journal
                .last_key_value()
                .map(|(key, _)| key + 1)
                .unwrap_or_default();
            journal.insert(key, stored);
        });
    }
}

impl Drop for JournalCollection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{state::journal_collections, utils::error::ManagerError};

    #[test]
    fn test_collection_is_stored_on_drop() {
        let before = journal_collections().len();
        {
            let mut journal = JournalCollection::open(Some(JournalScope::Vault(3)));
            journal
                .append_note(Ok(()), LogType::Flush, "Flushed index 0.")
                .append_result(&Err::<u64, _>(ManagerError::NothingToSync), LogType::Sync, "");
            assert!(journal.has_error());
        }
        {
            // Empty collections are dropped silently.
            JournalCollection::open(None);
        }

        let collections = journal_collections();
        assert_eq!(collections.len(), before + 1);
        let (_, stored) = collections.last().unwrap();
        assert_eq!(stored.scope, Some(JournalScope::Vault(3)));
        assert_eq!(stored.entries.len(), 2);
        assert_eq!(stored.entries[1].entry, Err(ManagerError::NothingToSync));
    }

    #[test]
    fn test_storable_encoding() {
        let record = JournalRecord {
            start_date_and_time: 1,
            end_date_and_time: 2,
            scope: Some(JournalScope::Strategy(1)),
            entries: vec![JournalEntry::new(Ok(()), LogType::Harvest).note("token 0a0b")],
        };
        let decoded = JournalRecord::from_bytes(record.to_bytes());
        assert_eq!(decoded.scope, Some(JournalScope::Strategy(1)));
        assert_eq!(decoded.entries[0].note.as_deref(), Some("token 0a0b"));
        assert_eq!(decoded.entries[0].log_type, LogType::Harvest);
        assert!(!decoded.has_error());
    }
}
