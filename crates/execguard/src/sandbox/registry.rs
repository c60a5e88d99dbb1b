//! In-memory registry of sandbox and browser containers.
//!
//! The registry lives for the life of the host process and is not reconciled
//! with the container engine after a restart.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Minimum spacing between two prune passes.
pub const PRUNE_INTERVAL_MS: u64 = 5 * 60 * 1000;

const HOUR_MS: u64 = 60 * 60 * 1000;
const DAY_MS: u64 = 24 * HOUR_MS;

/// What a container is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    /// Command sandbox.
    Sandbox,
    /// Headless browser.
    Browser,
}

/// One tracked container.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerEntry {
    /// Container name, unique across the registry.
    pub name: String,
    /// Session the container belongs to.
    pub session_key: String,
    /// What the container is for.
    pub kind: ContainerKind,
    /// Image the container runs.
    pub image: String,
    /// Milliseconds since the Unix epoch.
    pub created_at_ms: u64,
    /// Bumped by [`ContainerRegistry::touch`].
    pub last_used_at_ms: u64,
}

/// Age limits for pruning. Zero disables a limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrunePolicy {
    /// Idle time after which a container is pruned.
    #[serde(default = "default_idle_hours")]
    pub idle_hours: u64,
    /// Age after which a container is pruned regardless of use.
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u64,
}

fn default_idle_hours() -> u64 {
    24
}

fn default_max_age_days() -> u64 {
    7
}

impl Default for PrunePolicy {
    fn default() -> Self {
        Self {
            idle_hours: default_idle_hours(),
            max_age_days: default_max_age_days(),
        }
    }
}

impl PrunePolicy {
    fn is_expired(&self, entry: &ContainerEntry, now_ms: u64) -> bool {
        let idle = self.idle_hours > 0
            && now_ms.saturating_sub(entry.last_used_at_ms) > self.idle_hours.saturating_mul(HOUR_MS);
        let old = self.max_age_days > 0
            && now_ms.saturating_sub(entry.created_at_ms) > self.max_age_days.saturating_mul(DAY_MS);
        idle || old
    }
}

/// Containers the host has started, keyed by name.
#[derive(Debug, Default)]
pub struct ContainerRegistry {
    entries: BTreeMap<String, ContainerEntry>,
    last_prune_at_ms: Option<u64>,
}

impl ContainerRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry, keeping the original creation time.
    pub fn upsert(&mut self, mut entry: ContainerEntry) {
        if let Some(existing) = self.entries.get(&entry.name) {
            entry.created_at_ms = existing.created_at_ms.min(entry.created_at_ms);
        }
        self.entries.insert(entry.name.clone(), entry);
    }

    /// Mark a container as used. Returns `false` for unknown names.
    pub fn touch(&mut self, name: &str, now_ms: u64) -> bool {
        match self.entries.get_mut(name) {
            Some(entry) => {
                entry.last_used_at_ms = entry.last_used_at_ms.max(now_ms);
                true
            }
            None => false,
        }
    }

    /// Forget a container. Returns the entry if it was known.
    pub fn remove(&mut self, name: &str) -> Option<ContainerEntry> {
        self.entries.remove(name)
    }

    /// Look up a container by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ContainerEntry> {
        self.entries.get(name)
    }

    /// Entries sorted by name.
    #[must_use]
    pub fn list(&self) -> Vec<ContainerEntry> {
        self.entries.values().cloned().collect()
    }

    /// Number of tracked containers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries, at most once per [`PRUNE_INTERVAL_MS`].
    ///
    /// Returns the removed entries so the caller can stop and remove the
    /// containers themselves. Calls inside the interval return nothing.
    pub fn prune_if_due(&mut self, now_ms: u64, policy: &PrunePolicy) -> Vec<ContainerEntry> {
        if let Some(last) = self.last_prune_at_ms {
            if now_ms.saturating_sub(last) < PRUNE_INTERVAL_MS {
                return Vec::new();
            }
        }
        self.last_prune_at_ms = Some(now_ms);

        let expired: Vec<String> = self
            .entries
            .values()
            .filter(|entry| policy.is_expired(entry, now_ms))
            .map(|entry| entry.name.clone())
            .collect();
        let removed: Vec<ContainerEntry> = expired.iter().filter_map(|name| self.entries.remove(name)).collect();
        if !removed.is_empty() {
            tracing::info!(pruned = removed.len(), "pruned sandbox containers");
        }
        removed
    }
}
