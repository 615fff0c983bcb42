//! Site → group routing by requested format.

use std::collections::{HashMap, HashSet};

/// Maps each active site to its allowed groups, and each group to the formats it produces.
#[derive(Debug, Default)]
pub struct SiteRouter {
    sites: HashMap<String, Vec<String>>,
    group_formats: HashMap<String, Vec<String>>,
    /// Groups dropped from the config that still hold tasks. Never routed to.
    retired: HashSet<String>,
}

impl SiteRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group_init(&mut self, group: &str, formats: &[String]) {
        self.retired.remove(group);
        self.group_formats
            .insert(group.to_string(), formats.to_vec());
    }

    pub fn group_destroy(&mut self, group: &str) {
        self.group_formats.remove(group);
        self.retired.remove(group);
    }

    /// Stop routing to `group` but keep its formats so queued tasks can drain.
    pub fn group_retire(&mut self, group: &str) {
        if self.group_formats.contains_key(group) {
            self.retired.insert(group.to_string());
        }
    }

    fn is_routable(&self, group: &str) -> bool {
        self.group_formats.contains_key(group) && !self.retired.contains(group)
    }

    /// Set (or replace) the groups a site may route to, in preference order.
    pub fn site_init(&mut self, site: &str, allowed_groups: &[String]) {
        self.sites
            .insert(site.to_string(), allowed_groups.to_vec());
    }

    pub fn site_destroy(&mut self, site: &str) {
        self.sites.remove(site);
    }

    pub fn sites(&self) -> Vec<String> {
        self.sites.keys().cloned().collect()
    }

    /// First allowed, non-retired group whose formats include `format`.
    pub fn site_group(&self, site: &str, format: &str) -> Option<String> {
        self.sites.get(site)?.iter().find_map(|group| {
            self.group_formats
                .get(group)
                .filter(|formats| !self.retired.contains(group) && formats.iter().any(|f| f == format))
                .map(|_| group.clone())
        })
    }

    /// Whether a task queued in `group` may still run there. A retired group
    /// keeps running what it already holds as long as it produces the format.
    pub fn still_routes(&self, site: &str, format: &str, group: &str) -> bool {
        if self.retired.contains(group) {
            return self.group_formats(group).iter().any(|f| f == format);
        }
        self.site_group(site, format).as_deref() == Some(group)
    }

    /// Every allowed group of the site that is currently routable.
    pub fn site_groups(&self, site: &str) -> Vec<String> {
        self.sites
            .get(site)
            .map(|groups| {
                groups
                    .iter()
                    .filter(|g| self.is_routable(g))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn group_formats(&self, group: &str) -> &[String] {
        self.group_formats
            .get(group)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
