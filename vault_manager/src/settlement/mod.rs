//! Settlement of vault batches: flush, harvest, sync and fast redemption.
//!
//! A vault's open batch is locked by `flush`, which queues its flows into the open
//! harvest index of every live strategy. `harvest` settles those indexes, and `sync`
//! reconciles the vault's pool shares with the finalized harvest records.

pub(crate) mod flush;
pub(crate) mod harvest;
pub(crate) mod redeem_fast;
pub(crate) mod sync;
