//! Global and per-user counters for every site and group, with fan-out updates.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use crate::config::LimitConfig;
use crate::task::UserId;

use super::counter::{CounterSnapshot, LimitCounter, Limits, RateMarks};
use super::key::{CounterKey, EntityKind, Scope};
use super::persist::RateSnapshot;

/// Site and group counters for one scope.
#[derive(Debug, Clone, Default)]
pub(super) struct CounterSet {
    pub(super) groups: HashMap<String, LimitCounter>,
    pub(super) sites: HashMap<String, LimitCounter>,
}

impl CounterSet {
    fn map(&self, kind: EntityKind) -> &HashMap<String, LimitCounter> {
        match kind {
            EntityKind::Group => &self.groups,
            EntityKind::Site => &self.sites,
        }
    }

    fn map_mut(&mut self, kind: EntityKind) -> &mut HashMap<String, LimitCounter> {
        match kind {
            EntityKind::Group => &mut self.groups,
            EntityKind::Site => &mut self.sites,
        }
    }

    pub(super) fn counters(&self) -> impl Iterator<Item = &LimitCounter> {
        self.groups.values().chain(self.sites.values())
    }

    fn is_idle(&self, now: f64) -> bool {
        self.counters().all(|c| c.is_idle(now))
    }

    fn snapshot(&self) -> ScopeSnapshot {
        ScopeSnapshot {
            groups: self
                .groups
                .iter()
                .map(|(k, c)| (k.clone(), c.snapshot()))
                .collect(),
            sites: self
                .sites
                .iter()
                .map(|(k, c)| (k.clone(), c.snapshot()))
                .collect(),
        }
    }
}

/// Counters of one scope, as exported.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScopeSnapshot {
    pub groups: BTreeMap<String, CounterSnapshot>,
    pub sites: BTreeMap<String, CounterSnapshot>,
}

/// Ledger view returned by `export_queue`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedgerSnapshot {
    #[serde(flatten)]
    pub global: ScopeSnapshot,
    pub users: BTreeMap<UserId, ScopeSnapshot>,
}

/// Result of a periodic flush: which users were evicted and the marks to persist.
#[derive(Debug, Clone, Default)]
pub struct FlushOutcome {
    pub evicted: Vec<UserId>,
    pub marks: Vec<(String, RateMarks)>,
}

/// Owns every limit counter.
///
/// Checks against an entity the ledger has never been told about pass for
/// starts and fail for adds: running work is never stranded by a stale
/// configuration, but nothing new is queued behind it.
#[derive(Debug, Default)]
pub struct AdmissionLedger {
    pub(super) global: CounterSet,
    pub(super) users: HashMap<UserId, CounterSet>,
    group_limits: HashMap<String, LimitConfig>,
    site_limits: HashMap<String, LimitConfig>,
    pub(super) restored: RateSnapshot,
    pub(super) dirty: HashSet<CounterKey>,
    /// Entities dropped from the config whose counters are still draining.
    retired: HashSet<(EntityKind, String)>,
}

impl AdmissionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn limits_for(&self, kind: EntityKind) -> &HashMap<String, LimitConfig> {
        match kind {
            EntityKind::Group => &self.group_limits,
            EntityKind::Site => &self.site_limits,
        }
    }

    fn limits_for_mut(&mut self, kind: EntityKind) -> &mut HashMap<String, LimitConfig> {
        match kind {
            EntityKind::Group => &mut self.group_limits,
            EntityKind::Site => &mut self.site_limits,
        }
    }

    fn fresh_counter(&self, key: CounterKey, config: &LimitConfig) -> LimitCounter {
        let limits = Limits::resolve(config, key.scope);
        let counter = LimitCounter::new(key.clone(), limits);
        match self.restored.marks_for(&key) {
            Some(marks) => counter.with_marks(marks),
            None => counter,
        }
    }

    fn init(&mut self, kind: EntityKind, name: &str, config: &LimitConfig) {
        self.retired.remove(&(kind, name.to_string()));
        self.limits_for_mut(kind)
            .insert(name.to_string(), config.clone());

        let key = CounterKey::new(kind, name, Scope::Global);
        let fresh = self.fresh_counter(key, config);
        self.global
            .map_mut(kind)
            .entry(name.to_string())
            .and_modify(|c| c.set_limits(Limits::resolve(config, Scope::Global)))
            .or_insert(fresh);

        for (user, set) in self.users.iter_mut() {
            if let Some(c) = set.map_mut(kind).get_mut(name) {
                c.set_limits(Limits::resolve(config, Scope::PerUser(*user)));
            }
        }
    }

    fn destroy(&mut self, kind: EntityKind, name: &str) -> bool {
        if !self.not_busy(kind, name) {
            tracing::debug!(kind = kind.as_str(), name, "keeping busy counter on destroy");
            return false;
        }
        self.global.map_mut(kind).remove(name);
        for set in self.users.values_mut() {
            set.map_mut(kind).remove(name);
        }
        self.limits_for_mut(kind).remove(name);
        self.retired.remove(&(kind, name.to_string()));
        true
    }

    /// Like `destroy`, but a busy counter is kept and marked retired: it
    /// refuses new waiting work while its tasks drain.
    fn retire(&mut self, kind: EntityKind, name: &str) -> bool {
        if self.destroy(kind, name) {
            return true;
        }
        self.retired.insert((kind, name.to_string()));
        false
    }

    fn is_retired(&self, kind: EntityKind, name: &str) -> bool {
        self.retired.contains(&(kind, name.to_string()))
    }

    fn not_busy(&self, kind: EntityKind, name: &str) -> bool {
        let global = self
            .global
            .map(kind)
            .get(name)
            .map_or(true, LimitCounter::not_busy);
        global
            && self
                .users
                .values()
                .all(|set| set.map(kind).get(name).map_or(true, LimitCounter::not_busy))
    }

    /// Register or refresh a group's limits. Existing counts and marks are kept.
    pub fn group_init(&mut self, name: &str, config: &LimitConfig) {
        self.init(EntityKind::Group, name, config);
    }

    /// Register or refresh a site's limits. Existing counts and marks are kept.
    pub fn site_init(&mut self, name: &str, config: &LimitConfig) {
        self.init(EntityKind::Site, name, config);
    }

    /// Drop a group's counters. Refused (returns false) while it has waiting or running tasks.
    pub fn group_destroy(&mut self, name: &str) -> bool {
        self.destroy(EntityKind::Group, name)
    }

    /// Drop a site's counters. Refused (returns false) while it has waiting or running tasks.
    pub fn site_destroy(&mut self, name: &str) -> bool {
        self.destroy(EntityKind::Site, name)
    }

    /// Destroy the group, or retire it while it is busy. Returns true when destroyed.
    pub fn group_retire(&mut self, name: &str) -> bool {
        self.retire(EntityKind::Group, name)
    }

    /// Destroy the site, or retire it while it is busy. Returns true when destroyed.
    pub fn site_retire(&mut self, name: &str) -> bool {
        self.retire(EntityKind::Site, name)
    }

    pub fn group_is_retired(&self, name: &str) -> bool {
        self.is_retired(EntityKind::Group, name)
    }

    pub fn group_not_busy(&self, name: &str) -> bool {
        self.not_busy(EntityKind::Group, name)
    }

    pub fn site_not_busy(&self, name: &str) -> bool {
        self.not_busy(EntityKind::Site, name)
    }

    pub fn groups(&self) -> Vec<String> {
        self.global.groups.keys().cloned().collect()
    }

    pub fn sites(&self) -> Vec<String> {
        self.global.sites.keys().cloned().collect()
    }

    pub fn counter(&self, kind: EntityKind, name: &str) -> Option<&LimitCounter> {
        self.global.map(kind).get(name)
    }

    pub fn user_counter(
        &self,
        user: UserId,
        kind: EntityKind,
        name: &str,
    ) -> Option<&LimitCounter> {
        self.users.get(&user)?.map(kind).get(name)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn group_can_add(&self, name: &str) -> bool {
        !self.is_retired(EntityKind::Group, name)
            && self
                .counter(EntityKind::Group, name)
                .is_some_and(LimitCounter::can_add)
    }

    pub fn site_can_add(&self, name: &str) -> bool {
        !self.is_retired(EntityKind::Site, name)
            && self
                .counter(EntityKind::Site, name)
                .is_some_and(LimitCounter::can_add)
    }

    /// The user's own site and group counters both accept one more waiting task.
    pub fn user_can_add(&self, user: UserId, site: &str, group: &str) -> bool {
        [(EntityKind::Site, site), (EntityKind::Group, group)]
            .into_iter()
            .all(|(kind, name)| {
                self.user_view(user, kind, name)
                    .is_some_and(|c| c.can_add())
            })
    }

    /// Group-wide running ceiling only; proxy buckets and spacing are checked per task.
    pub fn group_has_capacity(&self, name: &str) -> bool {
        self.counter(EntityKind::Group, name).map_or(true, |c| {
            let max = c.limits().max_one_time;
            max == 0 || c.running() < max
        })
    }

    pub fn group_can_start(&self, name: &str, proxy: &str, now: f64) -> bool {
        self.counter(EntityKind::Group, name)
            .map_or(true, |c| c.can_start(proxy, now))
    }

    pub fn site_can_start(&self, name: &str, proxy: &str, now: f64) -> bool {
        self.counter(EntityKind::Site, name)
            .map_or(true, |c| c.can_start(proxy, now))
    }

    pub fn user_can_start(
        &self,
        user: UserId,
        site: &str,
        group: &str,
        proxy: &str,
        now: f64,
    ) -> bool {
        [(EntityKind::Site, site), (EntityKind::Group, group)]
            .into_iter()
            .all(|(kind, name)| {
                self.user_view(user, kind, name)
                    .map_or(true, |c| c.can_start(proxy, now))
            })
    }

    /// Existing user counter, or the one that would be created on first use.
    fn user_view(&self, user: UserId, kind: EntityKind, name: &str) -> Option<Cow<'_, LimitCounter>> {
        if let Some(c) = self.user_counter(user, kind, name) {
            return Some(Cow::Borrowed(c));
        }
        let config = self.limits_for(kind).get(name)?;
        let key = CounterKey::new(kind, name, Scope::PerUser(user));
        Some(Cow::Owned(self.fresh_counter(key, config)))
    }

    fn user_counter_mut(
        &mut self,
        user: UserId,
        kind: EntityKind,
        name: &str,
    ) -> Option<&mut LimitCounter> {
        let exists = self.user_counter(user, kind, name).is_some();
        if !exists {
            let config = self.limits_for(kind).get(name)?.clone();
            let key = CounterKey::new(kind, name, Scope::PerUser(user));
            let counter = self.fresh_counter(key, &config);
            self.users
                .entry(user)
                .or_default()
                .map_mut(kind)
                .insert(name.to_string(), counter);
        }
        self.users.get_mut(&user)?.map_mut(kind).get_mut(name)
    }

    /// Apply `f` to the site, group, user-site and user-group counters. User
    /// counters are created on demand only when `create_user` is set.
    fn fan_out(
        &mut self,
        user: UserId,
        site: &str,
        group: &str,
        create_user: bool,
        mut f: impl FnMut(&mut LimitCounter),
    ) {
        for (kind, name) in [(EntityKind::Site, site), (EntityKind::Group, group)] {
            if let Some(c) = self.global.map_mut(kind).get_mut(name) {
                f(c);
            }
            let user_counter = if create_user {
                self.user_counter_mut(user, kind, name)
            } else {
                self.users
                    .get_mut(&user)
                    .and_then(|set| set.map_mut(kind).get_mut(name))
            };
            match user_counter {
                Some(c) => f(c),
                None => tracing::debug!(user, kind = kind.as_str(), name, "no user counter"),
            }
        }
    }

    fn mark_dirty(&mut self, user: UserId, site: &str, group: &str) {
        for (kind, name) in [(EntityKind::Site, site), (EntityKind::Group, group)] {
            self.dirty
                .insert(CounterKey::new(kind, name, Scope::Global));
            self.dirty
                .insert(CounterKey::new(kind, name, Scope::PerUser(user)));
        }
    }

    pub fn add_waiting(&mut self, user: UserId, site: &str, group: &str) {
        self.fan_out(user, site, group, true, LimitCounter::add_waiting);
    }

    pub fn remove_waiting(&mut self, user: UserId, site: &str, group: &str) {
        self.fan_out(user, site, group, false, LimitCounter::remove_waiting);
    }

    pub fn add_run(&mut self, user: UserId, site: &str, group: &str, proxy: &str, now: f64) {
        self.fan_out(user, site, group, true, |c| c.add_run(proxy, now));
        self.mark_dirty(user, site, group);
    }

    pub fn remove_run(&mut self, user: UserId, site: &str, group: &str, proxy: &str, now: f64) {
        self.fan_out(user, site, group, false, |c| c.remove_run(proxy, now));
        self.mark_dirty(user, site, group);
    }

    /// Evict users whose counters are all idle, then collect every counter's
    /// marks for persistence.
    pub fn flush(&mut self, now: f64) -> FlushOutcome {
        let evicted: Vec<UserId> = self
            .users
            .iter()
            .filter(|(_, set)| set.is_idle(now))
            .map(|(user, _)| *user)
            .collect();

        for user in &evicted {
            if let Some(set) = self.users.remove(user) {
                for c in set.counters() {
                    self.restored.remove(&c.key().to_string_key());
                    self.dirty.remove(c.key());
                }
            }
        }
        if !evicted.is_empty() {
            tracing::debug!(count = evicted.len(), "evicted idle users from ledger");
        }

        let marks = self.collect_marks();
        self.dirty.clear();
        FlushOutcome { evicted, marks }
    }

    pub fn export(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            global: self.global.snapshot(),
            users: self
                .users
                .iter()
                .map(|(user, set)| (*user, set.snapshot()))
                .collect(),
        }
    }
}
