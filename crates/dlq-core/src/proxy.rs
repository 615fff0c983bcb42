//! Proxy pool for sites that must not be fetched directly.

/// Hands out configured proxies round-robin.
#[derive(Debug, Clone, Default)]
pub struct ProxyPool {
    proxies: Vec<String>,
    next: usize,
}

impl ProxyPool {
    pub fn new(proxies: &[String]) -> Self {
        Self {
            proxies: proxies
                .iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            next: 0,
        }
    }

    /// Next proxy in rotation; None when the pool is empty.
    pub fn acquire(&mut self) -> Option<String> {
        if self.proxies.is_empty() {
            return None;
        }
        let proxy = self.proxies[self.next % self.proxies.len()].clone();
        self.next = (self.next + 1) % self.proxies.len();
        Some(proxy)
    }

    /// Replace the pool, keeping the rotation position when possible.
    pub fn update(&mut self, proxies: &[String]) {
        let next = self.next;
        *self = Self::new(proxies);
        if !self.proxies.is_empty() {
            self.next = next % self.proxies.len();
        }
    }

    pub fn proxies(&self) -> &[String] {
        &self.proxies
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}
