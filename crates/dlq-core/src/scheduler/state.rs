//! The scheduler's single-writer state and its synchronous admission checks.

use crate::config::QueueConfig;
use crate::error::Rejection;
use crate::proxy::ProxyPool;
use crate::queue::{RunningRegistry, SiteRouter, WaitingRegistry};
use crate::stats::AdmissionLedger;
use crate::task::TaskRequest;

/// How strictly a request is checked on its way into the waiting registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum AdmitMode {
    /// Fresh submission: every limit and the duplicate check apply.
    New,
    /// Replay of a persisted request at startup: it was admitted once
    /// already, so only routing is checked.
    Restore,
}

/// Everything guarded by the scheduler mutex.
#[derive(Debug, Default)]
pub(crate) struct QueueState {
    pub(super) ledger: AdmissionLedger,
    pub(super) waiting: WaitingRegistry,
    pub(super) running: RunningRegistry,
    pub(super) router: SiteRouter,
    pub(super) config: QueueConfig,
    pub(super) proxies: ProxyPool,
}

impl QueueState {
    pub(super) fn new(config: &QueueConfig) -> Self {
        let mut state = Self::default();
        state.apply_config(config.clone());
        state
    }

    /// Groups in scheduling order: configured order first, then groups
    /// dropped from the config that still hold waiting tasks.
    pub(super) fn group_order(&self) -> Vec<String> {
        let mut order: Vec<String> = self.config.groups.iter().map(|g| g.name.clone()).collect();
        let mut stale: Vec<String> = self
            .waiting
            .groups()
            .into_iter()
            .filter(|g| !order.contains(g) && self.waiting.group_len(g) > 0)
            .collect();
        stale.sort();
        order.extend(stale);
        order
    }

    /// Route the request, settle its proxy and (for new submissions) check
    /// limits and duplicates. Returns the group it belongs to. May set
    /// `request.proxy`.
    pub(super) fn admit(
        &mut self,
        request: &mut TaskRequest,
        mode: AdmitMode,
    ) -> Result<String, Rejection> {
        let site = match self.config.site(&request.site) {
            Some(site) if site.active => site,
            Some(_) => return Err(Rejection::SiteInactive(request.site.clone())),
            None => {
                return Err(Rejection::Unroutable {
                    site: request.site.clone(),
                    format: request.format.clone(),
                })
            }
        };
        let group = self
            .router
            .site_group(&request.site, &request.format)
            .ok_or_else(|| Rejection::Unroutable {
                site: request.site.clone(),
                format: request.format.clone(),
            })?;

        if request.proxy.is_empty() {
            if !site.proxy.is_empty() {
                request.proxy = site.proxy.clone();
            } else if site.proxy_required {
                request.proxy = self
                    .proxies
                    .acquire()
                    .ok_or_else(|| Rejection::NoProxy(request.site.clone()))?;
            }
        }

        if mode == AdmitMode::New {
            self.check_capacity(&group, request)?;
        }
        Ok(group)
    }

    /// Waiting ceilings (group, site, user in that order) and duplicates.
    pub(super) fn check_capacity(&self, group: &str, request: &TaskRequest) -> Result<(), Rejection> {
        if !self.ledger.group_can_add(group) {
            return Err(Rejection::GroupFull(group.to_string()));
        }
        if !self.ledger.site_can_add(&request.site) {
            return Err(Rejection::SiteFull(request.site.clone()));
        }
        if !self.ledger.user_can_add(request.user_id, &request.site, group) {
            return Err(Rejection::UserFull(request.site.clone()));
        }
        if self.waiting.check_duplicate(group, request) || self.running.check_duplicate(request) {
            return Err(Rejection::Duplicate);
        }
        Ok(())
    }

    /// Same checks again after the lock was released for persistence; the
    /// route must not have changed in between.
    pub(super) fn recheck(
        &self,
        group: &str,
        request: &TaskRequest,
        mode: AdmitMode,
    ) -> Result<(), Rejection> {
        match self.router.site_group(&request.site, &request.format) {
            Some(g) if g == group => {}
            _ => {
                return Err(Rejection::Unroutable {
                    site: request.site.clone(),
                    format: request.format.clone(),
                })
            }
        }
        if request.task_id.is_some_and(|id| self.waiting.contains(id) || self.running.contains(id)) {
            return Err(Rejection::Duplicate);
        }
        match mode {
            AdmitMode::New => self.check_capacity(group, request),
            AdmitMode::Restore => Ok(()),
        }
    }

    pub(super) fn active_sites(&self) -> Vec<String> {
        self.config
            .sites
            .iter()
            .filter(|s| s.active)
            .map(|s| s.name.clone())
            .collect()
    }

    pub(super) fn auth_sites(&self) -> Vec<String> {
        self.config
            .sites
            .iter()
            .filter(|s| s.active && s.parameters.iter().any(|p| p == "auth"))
            .map(|s| s.name.clone())
            .collect()
    }
}
