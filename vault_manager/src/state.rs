use std::cell::RefCell;

use ic_stable_structures::{BTreeMap as StableBTreeMap, DefaultMemoryImpl};

use crate::{journal::JournalRecord, protocol::Protocol};

thread_local! {
    pub static PROTOCOL: RefCell<Protocol> = RefCell::new(Protocol::default());
    pub static JOURNAL: RefCell<StableBTreeMap<u64, JournalRecord, DefaultMemoryImpl>> =
        RefCell::new(StableBTreeMap::init(DefaultMemoryImpl::default()));
}

/// Runs `f` on the protocol state
pub fn with_protocol<R>(f: impl FnOnce(&Protocol) -> R) -> R {
    PROTOCOL.with(|protocol| f(&protocol.borrow()))
}

/// Runs `f` on the mutable protocol state
pub fn with_protocol_mut<R>(f: impl FnOnce(&mut Protocol) -> R) -> R {
    PROTOCOL.with(|protocol| f(&mut protocol.borrow_mut()))
}

/// Stored journal collections in insertion order
pub fn journal_collections() -> Vec<(u64, JournalRecord)> {
    JOURNAL.with(|journal| journal.borrow().iter().collect())
}
