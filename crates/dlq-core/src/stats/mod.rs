//! Admission statistics: per-entity limit counters and the ledger that owns them.
//!
//! Every site and group has a global [`LimitCounter`]; every user that has
//! touched a site or group gets a scoped one, created lazily and evicted by
//! [`AdmissionLedger::flush`] once idle. Counters track waiting and running
//! tasks, running tasks per proxy bucket, and the last launch per proxy.
//!
//! Only launch timestamps ("rate marks") outlive the process: they are loaded
//! into the ledger at startup and written back through `store::RateStore`.
//! Waiting and running counts are rebuilt by replaying persisted requests.

mod counter;
mod key;
mod ledger;
mod persist;

pub use counter::{CounterSnapshot, Limits, LimitCounter, RateMarks};
pub use key::{CounterKey, EntityKind, Scope};
pub use ledger::{AdmissionLedger, FlushOutcome, LedgerSnapshot, ScopeSnapshot};
pub use persist::{decode_marks, encode_marks, RateSnapshot};

#[cfg(test)]
mod tests;
