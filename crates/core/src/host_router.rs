//! Per-family round-robin host selection.
//!
//! A [`HostRouter`] is built once per compiled batch from the parsed
//! globals and owned by the caller of that batch. Selection mutates the
//! rotation queues, so it takes `&mut self`; concurrent runs each hold
//! their own router.

use std::collections::{BTreeMap, VecDeque};

use crate::config_parser::ConfigModel;
use crate::job_family::{HostGroup, JobFamily};

/// Turn a bare `host:port` into an `http://` URL and drop trailing slashes.
pub fn normalize_host(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

/// Round-robin router over the configured worker pools.
#[derive(Debug, Clone)]
pub struct HostRouter {
    pools: BTreeMap<HostGroup, VecDeque<String>>,
    fallback: String,
}

impl HostRouter {
    /// Build pools from the host lists derived at parse time.
    pub fn from_model(model: &ConfigModel) -> Self {
        let mut router = Self::with_fallback(model.fallback_host.clone());
        for group in HostGroup::ALL {
            router.set_pool(group, model.hosts(group).to_vec());
        }
        router
    }

    /// Router with no pools; every request resolves to `fallback`.
    pub fn with_fallback(fallback: impl Into<String>) -> Self {
        Self {
            pools: BTreeMap::new(),
            fallback: fallback.into(),
        }
    }

    /// Replace one group's pool. An empty list removes the pool.
    pub fn set_pool(&mut self, group: HostGroup, hosts: Vec<String>) {
        if hosts.is_empty() {
            self.pools.remove(&group);
        } else {
            self.pools.insert(group, hosts.into_iter().collect());
        }
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    pub fn pool(&self, group: HostGroup) -> Option<&VecDeque<String>> {
        self.pools.get(&group)
    }

    /// Next host for `family`: pop the front of its pool and push it back.
    pub fn next_host(&mut self, family: JobFamily) -> String {
        let group = family.host_group();
        match self.pools.get_mut(&group) {
            Some(queue) if !queue.is_empty() => {
                let host = queue.pop_front().unwrap_or_default();
                queue.push_back(host.clone());
                tracing::debug!(family = %family, host = %host, "Selected pooled host");
                host
            }
            _ => {
                tracing::debug!(family = %family, host = %self.fallback, "Selected fallback host");
                self.fallback.clone()
            }
        }
    }

    /// Tag-based lookup; unrecognized tags receive the fallback host.
    pub fn next_host_for_tag(&mut self, tag: &str) -> String {
        match JobFamily::from_tag(tag) {
            Some(family) => self.next_host(family),
            None => self.fallback.clone(),
        }
    }
}
