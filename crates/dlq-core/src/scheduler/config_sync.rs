//! Keep counters, waiting lists and routes in step with the queue config.

use std::collections::HashSet;

use anyhow::Result;

use super::state::QueueState;
use super::Scheduler;
use crate::config::QueueConfig;

impl QueueState {
    /// Install a new snapshot. New and changed groups and sites take effect
    /// at once. Removed ones are pruned only when nothing is queued or
    /// running against them; otherwise they are retired: no new work is
    /// routed to them, existing tasks drain, and pruning is retried on the
    /// next reload.
    pub(super) fn apply_config(&mut self, config: QueueConfig) {
        let groups: HashSet<&str> = config.groups.iter().map(|g| g.name.as_str()).collect();
        for g in &config.groups {
            self.ledger.group_init(&g.name, &g.limits);
            self.waiting.group_init(&g.name);
            self.router.group_init(&g.name, &g.formats);
        }

        let active: HashSet<&str> = config
            .sites
            .iter()
            .filter(|s| s.active)
            .map(|s| s.name.as_str())
            .collect();
        for s in config.sites.iter().filter(|s| s.active) {
            self.ledger.site_init(&s.name, &s.limits);
            self.router.site_init(&s.name, &s.allowed_groups);
        }

        for name in self.ledger.groups() {
            if groups.contains(name.as_str()) {
                continue;
            }
            if self.ledger.group_retire(&name) && self.waiting.group_len(&name) == 0 {
                self.waiting.group_destroy(&name);
                self.router.group_destroy(&name);
                tracing::info!(group = %name, "group removed");
            } else {
                self.router.group_retire(&name);
                tracing::info!(group = %name, "group removed from config but still busy; draining");
            }
        }

        let mut known_sites: Vec<String> = self.ledger.sites();
        known_sites.extend(self.router.sites());
        known_sites.sort();
        known_sites.dedup();
        for name in known_sites {
            if active.contains(name.as_str()) {
                continue;
            }
            if self.ledger.site_retire(&name) {
                self.router.site_destroy(&name);
                tracing::info!(site = %name, "site deactivated");
            } else {
                tracing::info!(site = %name, "site deactivated but still busy; draining");
            }
        }

        self.proxies.update(&config.proxies);
        self.config = config;
    }
}

impl Scheduler {
    /// Apply a new queue config snapshot.
    pub async fn update_config(&self, config: QueueConfig) -> Result<()> {
        config.validate()?;
        {
            let mut state = self.inner.state.lock().await;
            state.apply_config(config);
            tracing::info!(
                groups = state.config.groups.len(),
                sites = state.config.sites.len(),
                "queue config applied"
            );
        }
        self.inner.wake.notify_one();
        Ok(())
    }
}
