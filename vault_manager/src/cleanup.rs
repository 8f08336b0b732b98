//! Journal retention
//!
//! The journal grows with every endpoint call. `journal_cleanup` prunes collections that
//! fell out of the retention window and trims the rest to the most recent
//! `MAX_JOURNAL_COLLECTIONS`.

use chrono::Duration;

use crate::{
    constants::{JOURNAL_RETENTION_DAYS, MAX_JOURNAL_COLLECTIONS},
    journal::{JournalCollection, JournalRecord, LogType},
    state::JOURNAL,
};

/// Prunes the journal relative to `now` (seconds). Returns the number of removed collections.
pub fn journal_cleanup(now: u64) -> u64 {
    let retention = Duration::days(JOURNAL_RETENTION_DAYS).num_seconds() as u64;
    let cutoff = now.saturating_sub(retention);

    let removed = JOURNAL.with(|journal| {
        let mut journal = journal.borrow_mut();
        let mut expired: Vec<u64> = journal
            .iter()
            .filter(|(_, collection)| collection.end_date_and_time < cutoff)
            .map(|(key, _)| key)
            .collect();

        let remaining = journal.len() - expired.len() as u64;
        if remaining > MAX_JOURNAL_COLLECTIONS {
            let excess = (remaining - MAX_JOURNAL_COLLECTIONS) as usize;
            let oldest = journal
                .iter()
                .map(|(key, _)| key)
                .filter(|key| !expired.contains(key))
                .take(excess)
                .collect::<Vec<u64>>();
            expired.extend(oldest);
        }

        for key in &expired {
            journal.remove(key);
        }
        expired.len() as u64
    });

    let mut journal = JournalCollection::open(None);
    journal.append_note(
        Ok(()),
        LogType::Info,
        format!("Journal cleanup removed {} collections.", removed),
    );
    removed
}
