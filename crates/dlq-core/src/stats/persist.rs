//! Rate-mark persistence glue: the snapshot loaded at startup and the marks
//! handed back to the rate store.

use std::collections::HashMap;

use anyhow::{Context, Result};

use super::counter::{LimitCounter, RateMarks};
use super::key::{CounterKey, Scope};
use super::ledger::AdmissionLedger;

/// Marks loaded from the rate store, keyed by `CounterKey::to_string_key`.
/// Counters created later pick up their marks from here.
#[derive(Debug, Clone, Default)]
pub struct RateSnapshot {
    entries: HashMap<String, RateMarks>,
}

impl RateSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one persisted entry; keys that do not parse are ignored.
    pub fn insert(&mut self, key: &str, marks: RateMarks) {
        if CounterKey::from_string_key(key).is_none() {
            tracing::debug!(key, "ignoring unknown rate key");
            return;
        }
        self.entries.insert(key.to_string(), marks);
    }

    pub fn marks_for(&self, key: &CounterKey) -> Option<&RateMarks> {
        self.entries.get(&key.to_string_key())
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// JSON form stored in the rate table.
pub fn encode_marks(marks: &RateMarks) -> Result<String> {
    serde_json::to_string(marks).context("serialize rate marks")
}

pub fn decode_marks(raw: &str) -> Result<RateMarks> {
    serde_json::from_str(raw).context("parse rate marks")
}

impl AdmissionLedger {
    /// Install marks restored from the rate store. Counters that already exist
    /// are seeded immediately; the rest pick them up on creation.
    pub fn restore(&mut self, snapshot: RateSnapshot) {
        let seed = |c: &mut LimitCounter, snapshot: &RateSnapshot| {
            if let Some(marks) = snapshot.marks_for(c.key()) {
                *c = c.clone().with_marks(marks);
            }
        };
        for c in self
            .global
            .groups
            .values_mut()
            .chain(self.global.sites.values_mut())
        {
            seed(c, &snapshot);
        }
        for set in self.users.values_mut() {
            for c in set.groups.values_mut().chain(set.sites.values_mut()) {
                seed(c, &snapshot);
            }
        }
        tracing::debug!(entries = snapshot.len(), "restored rate marks");
        self.restored = snapshot;
    }

    /// Marks of every counter that has launched at least once.
    pub fn collect_marks(&self) -> Vec<(String, RateMarks)> {
        self.global
            .counters()
            .chain(self.users.values().flat_map(|set| set.counters()))
            .filter(|c| !c.marks().is_empty())
            .map(|c| (c.key().to_string_key(), c.marks().clone()))
            .collect()
    }

    /// Marks changed by launches and finishes since the last call.
    pub fn take_dirty_marks(&mut self) -> Vec<(String, RateMarks)> {
        let dirty: Vec<CounterKey> = self.dirty.drain().collect();
        dirty
            .into_iter()
            .filter_map(|key| {
                let counter = match key.scope {
                    Scope::Global => self.counter(key.kind, &key.name),
                    Scope::PerUser(user) => self.user_counter(user, key.kind, &key.name),
                }?;
                Some((key.to_string_key(), counter.marks().clone()))
            })
            .collect()
    }
}
