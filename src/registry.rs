//! Agent Registry (C4): the in-memory catalog of discovered specialists.
//!
//! Entries are immutable once constructed; the whole registry is replaced
//! wholesale on re-discovery via [`arc_swap::ArcSwap`] so readers never see
//! a torn mix of old and new entries.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Describes a remote specialist, as returned by its well-known agent card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCard {
    pub name: String,
    pub description: String,
    pub endpoint: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub auth_hint: Option<String>,
}

/// A card plus the routing metadata the planning prompt and the
/// keyword-fallback router both consume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRegistryEntry {
    pub card: AgentCard,
    pub routing_description: String,
    pub keywords: Vec<String>,
    pub examples: Vec<String>,
}

impl AgentRegistryEntry {
    pub fn new(card: AgentCard, keywords: Vec<String>, examples: Vec<String>) -> Self {
        let routing_description = card.description.clone();
        Self {
            card,
            routing_description,
            keywords,
            examples,
        }
    }

    pub fn name(&self) -> &str {
        &self.card.name
    }
}

/// One immutable snapshot of the registry, swapped in atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Snapshot {
    entries: BTreeMap<String, AgentRegistryEntry>,
}

/// In-memory catalog of specialists. `List`/`Get`/`Describe` are
/// case-sensitive lookups over the current snapshot.
pub struct AgentRegistry {
    snapshot: ArcSwap<Snapshot>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
        }
    }

    pub fn from_entries(entries: Vec<AgentRegistryEntry>) -> Self {
        let registry = Self::new();
        registry.replace(entries);
        registry
    }

    /// Atomically replace the whole registry. Readers mid-flight keep
    /// seeing their own snapshot; there is no lock on the read path.
    pub fn replace(&self, entries: Vec<AgentRegistryEntry>) {
        let mut map = BTreeMap::new();
        for entry in entries {
            map.insert(entry.name().to_string(), entry);
        }
        self.snapshot.store(Arc::new(Snapshot { entries: map }));
    }

    /// List all registered specialists, name-sorted for determinism.
    pub fn list(&self) -> Vec<AgentRegistryEntry> {
        self.snapshot.load().entries.values().cloned().collect()
    }

    /// Case-sensitive lookup by name.
    pub fn get(&self, name: &str) -> Option<AgentRegistryEntry> {
        self.snapshot.load().entries.get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.load().entries.is_empty()
    }

    /// Stable, numbered, newline-joined summary fed to the planning prompt:
    /// `"1. Name - description"` per entry.
    pub fn describe(&self) -> String {
        self.snapshot
            .load()
            .entries
            .values()
            .enumerate()
            .map(|(i, entry)| format!("{}. {} - {}", i + 1, entry.name(), entry.routing_description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, desc: &str, keywords: &[&str]) -> AgentRegistryEntry {
        AgentRegistryEntry::new(
            AgentCard {
                name: name.to_string(),
                description: desc.to_string(),
                endpoint: format!("http://localhost/{name}"),
                capabilities: vec![],
                auth_hint: None,
            },
            keywords.iter().map(|s| s.to_string()).collect(),
            vec![],
        )
    }

    #[test]
    fn get_is_case_sensitive() {
        let registry = AgentRegistry::from_entries(vec![entry("ADXAgent", "queries ADX", &["adx"])]);
        assert!(registry.get("ADXAgent").is_some());
        assert!(registry.get("adxagent").is_none());
    }

    #[test]
    fn describe_is_stable_numbered_list() {
        let registry = AgentRegistry::from_entries(vec![
            entry("ADXAgent", "queries ADX databases", &["adx"]),
            entry("DocumentAgent", "reads documents", &["document"]),
        ]);
        let description = registry.describe();
        assert!(description.contains("ADXAgent - queries ADX databases"));
        assert!(description.contains("DocumentAgent - reads documents"));
    }

    #[test]
    fn replace_is_atomic_and_whole() {
        let registry = AgentRegistry::from_entries(vec![entry("A", "first", &[])]);
        assert_eq!(registry.list().len(), 1);

        registry.replace(vec![entry("B", "second", &[]), entry("C", "third", &[])]);
        assert!(registry.get("A").is_none());
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn discovering_same_set_twice_is_idempotent_by_value() {
        let entries = vec![entry("A", "first", &["a"]), entry("B", "second", &["b"])];
        let r1 = AgentRegistry::from_entries(entries.clone());
        let r2 = AgentRegistry::from_entries(entries);

        let mut l1 = r1.list();
        let mut l2 = r2.list();
        l1.sort_by(|a, b| a.name().cmp(b.name()));
        l2.sort_by(|a, b| a.name().cmp(b.name()));
        assert_eq!(l1, l2);
    }

    #[test]
    fn empty_registry_reports_empty() {
        let registry = AgentRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.describe(), "");
    }
}
