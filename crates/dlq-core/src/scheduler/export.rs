//! Read-only views of the queue for clients.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::Scheduler;
use crate::queue::{RunningView, WaitingTask};
use crate::stats::LedgerSnapshot;
use crate::store::SiteStat;

/// Counters, waiting lists per group and running tasks.
#[derive(Debug, Clone, Serialize)]
pub struct QueueExport {
    pub stats: LedgerSnapshot,
    pub waiting: BTreeMap<String, Vec<WaitingTask>>,
    pub running: Vec<RunningView>,
}

/// Whether a site currently accepts requests, and with what.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteCheck {
    pub allowed: bool,
    pub parameters: Vec<String>,
    /// Format name to its human-readable parameters.
    pub formats: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteLists {
    pub active: Vec<String>,
    pub auth: Vec<String>,
}

impl Scheduler {
    pub async fn export_queue(&self) -> QueueExport {
        let state = self.inner.state.lock().await;
        QueueExport {
            stats: state.ledger.export(),
            waiting: state.waiting.export(),
            running: state.running.export(),
        }
    }

    /// A site is allowed when it is active and routed to at least one group.
    /// Its formats are its own list, or everything its groups produce.
    pub async fn check_site(&self, site: &str) -> SiteCheck {
        let state = self.inner.state.lock().await;
        let Some(config) = state.config.site(site).filter(|s| s.active) else {
            return SiteCheck::default();
        };
        let groups = state.router.site_groups(site);
        if groups.is_empty() {
            return SiteCheck::default();
        }

        let names: BTreeSet<String> = if config.formats.is_empty() {
            groups
                .iter()
                .flat_map(|g| state.router.group_formats(g).iter().cloned())
                .collect()
        } else {
            config.formats.iter().cloned().collect()
        };
        let formats = names
            .into_iter()
            .map(|name| {
                let params = state.config.formats_params.get(&name).cloned().unwrap_or_default();
                (name, params)
            })
            .collect();

        SiteCheck {
            allowed: true,
            parameters: config.parameters.clone(),
            formats,
        }
    }

    pub async fn active_sites(&self) -> Vec<String> {
        self.inner.state.lock().await.active_sites()
    }

    /// Active sites that accept login credentials.
    pub async fn auth_sites(&self) -> Vec<String> {
        self.inner.state.lock().await.auth_sites()
    }

    pub async fn sites(&self) -> SiteLists {
        let state = self.inner.state.lock().await;
        SiteLists {
            active: state.active_sites(),
            auth: state.auth_sites(),
        }
    }

    pub async fn site_stats(&self) -> Result<Vec<SiteStat>> {
        self.inner.db.site_stats().await
    }
}
