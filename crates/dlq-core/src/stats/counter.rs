//! One limit counter: waiting/running counts plus per-proxy launch marks.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::config::LimitConfig;

use super::key::{CounterKey, Scope};

/// Last launch (unix seconds) per proxy bucket. The empty key is the direct bucket.
pub type RateMarks = HashMap<String, f64>;

/// Limits resolved for one scope. Chosen once when the counter is created or
/// its configuration changes; never re-dispatched per call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Limits {
    pub max_one_time: u32,
    pub one_time: u32,
    pub delay: u64,
    pub max_waiting: u32,
    pub waiting: u32,
}

impl Limits {
    pub fn resolve(config: &LimitConfig, scope: Scope) -> Self {
        match scope {
            Scope::Global => Self {
                max_one_time: config.max_one_time,
                one_time: config.one_time,
                delay: config.delay,
                max_waiting: config.max_waiting,
                waiting: config.waiting,
            },
            Scope::PerUser(_) => Self {
                max_one_time: config.max_one_time,
                one_time: config.one_time_per_user,
                delay: config.delay_per_user,
                max_waiting: config.max_waiting,
                waiting: config.waiting_per_user,
            },
        }
    }
}

/// Serializable view used by `export_queue`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterSnapshot {
    pub waiting: u32,
    pub running: u32,
    pub running_by_proxy: BTreeMap<String, u32>,
    pub last_launch: BTreeMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct LimitCounter {
    key: CounterKey,
    limits: Limits,
    waiting: u32,
    running: u32,
    running_by_proxy: HashMap<String, u32>,
    last_launch: RateMarks,
}

impl LimitCounter {
    pub fn new(key: CounterKey, limits: Limits) -> Self {
        Self {
            key,
            limits,
            waiting: 0,
            running: 0,
            running_by_proxy: HashMap::new(),
            last_launch: HashMap::new(),
        }
    }

    /// Seed launch marks restored from the rate store. Marks already recorded in
    /// this process win over restored ones.
    pub fn with_marks(mut self, marks: &RateMarks) -> Self {
        for (proxy, at) in marks {
            self.last_launch.entry(proxy.clone()).or_insert(*at);
        }
        self
    }

    pub fn key(&self) -> &CounterKey {
        &self.key
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    pub fn set_limits(&mut self, limits: Limits) {
        self.limits = limits;
    }

    pub fn waiting(&self) -> u32 {
        self.waiting
    }

    pub fn running(&self) -> u32 {
        self.running
    }

    pub fn running_for(&self, proxy: &str) -> u32 {
        self.running_by_proxy.get(proxy).copied().unwrap_or(0)
    }

    pub fn marks(&self) -> &RateMarks {
        &self.last_launch
    }

    /// Waiting ceiling check against the scoped and global limits.
    pub fn can_add(&self) -> bool {
        let by_max = self.limits.max_waiting == 0 || self.waiting < self.limits.max_waiting;
        let by_scope = self.limits.waiting == 0 || self.waiting < self.limits.waiting;
        by_max && by_scope
    }

    /// Running ceiling, proxy bucket ceiling and launch spacing for `proxy`.
    pub fn can_start(&self, proxy: &str, now: f64) -> bool {
        let by_max = self.limits.max_one_time == 0 || self.running < self.limits.max_one_time;
        let by_bucket = self.limits.one_time == 0 || self.running_for(proxy) < self.limits.one_time;
        by_max && by_bucket && self.delay_elapsed(proxy, now)
    }

    /// No prior launch through `proxy` always passes.
    fn delay_elapsed(&self, proxy: &str, now: f64) -> bool {
        if self.limits.delay == 0 {
            return true;
        }
        match self.last_launch.get(proxy) {
            Some(last) => *last < now - self.limits.delay as f64,
            None => true,
        }
    }

    pub fn add_run(&mut self, proxy: &str, now: f64) {
        *self.running_by_proxy.entry(proxy.to_string()).or_insert(0) += 1;
        self.running += 1;
        self.last_launch.insert(proxy.to_string(), now);
    }

    /// Release one running slot. The finish time is stamped too, so the next
    /// launch through the same proxy still honours the delay.
    pub fn remove_run(&mut self, proxy: &str, now: f64) {
        let bucket = self.running_by_proxy.get(proxy).copied().unwrap_or(0);
        debug_assert!(
            bucket > 0 && self.running > 0,
            "remove_run without matching add_run on {} proxy {:?}",
            self.key.to_string_key(),
            proxy
        );
        if bucket == 0 || self.running == 0 {
            tracing::warn!(
                counter = %self.key.to_string_key(),
                proxy,
                "remove_run without matching add_run; clamping at zero"
            );
        }
        if bucket <= 1 {
            self.running_by_proxy.remove(proxy);
        } else {
            self.running_by_proxy.insert(proxy.to_string(), bucket - 1);
        }
        self.running = self.running.saturating_sub(1);
        self.last_launch.insert(proxy.to_string(), now);
    }

    pub fn add_waiting(&mut self) {
        self.waiting += 1;
    }

    pub fn remove_waiting(&mut self) {
        self.waiting = self.waiting.saturating_sub(1);
    }

    /// Nothing queued and nothing running.
    pub fn not_busy(&self) -> bool {
        self.waiting == 0 && self.running == 0
    }

    /// Not busy and every launch mark is outside its delay window.
    pub fn is_idle(&self, now: f64) -> bool {
        self.not_busy()
            && self
                .last_launch
                .keys()
                .all(|proxy| self.delay_elapsed(proxy, now))
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            waiting: self.waiting,
            running: self.running,
            running_by_proxy: self
                .running_by_proxy
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            last_launch: self
                .last_launch
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        }
    }
}
