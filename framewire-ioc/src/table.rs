//! Dependency tables and the local-over-global merge

use std::collections::HashMap;
use std::sync::Arc;

use crate::dependency::{Dependency, DependencyKey};
use crate::error::{DiError, DiResult};

/// Insertion-ordered `key -> slot` map
#[derive(Debug, Default, Clone)]
pub struct DependencyTable {
    entries: HashMap<DependencyKey, Arc<Dependency>>,
    order: Vec<DependencyKey>,
}

impl DependencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a slot under its own key, refusing duplicates
    pub fn insert(&mut self, dependency: Arc<Dependency>) -> DiResult<()> {
        let key = dependency.key();
        if self.entries.contains_key(&key) {
            return Err(DiError::DuplicateBinding {
                key: key.name().to_string(),
            });
        }
        self.entries.insert(key, dependency);
        self.order.push(key);
        Ok(())
    }

    pub fn get(&self, key: &DependencyKey) -> Option<&Arc<Dependency>> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &DependencyKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove a slot, keeping the order of the rest
    pub fn remove(&mut self, key: &DependencyKey) -> Option<Arc<Dependency>> {
        let removed = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(removed)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Slots in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Dependency>> + '_ {
        self.order.iter().filter_map(move |key| self.entries.get(key))
    }

    /// Keys in insertion order
    pub fn keys(&self) -> &[DependencyKey] {
        &self.order
    }
}

/// Snapshot of the effective table: local entries shadow global ones
#[derive(Debug, Default, Clone)]
pub struct MergedView {
    table: DependencyTable,
}

impl MergedView {
    pub fn get(&self, key: &DependencyKey) -> Option<&Arc<Dependency>> {
        self.table.get(key)
    }

    pub fn contains(&self, key: &DependencyKey) -> bool {
        self.table.contains(key)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Effective slots: local insertion order first, then unshadowed global entries
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Dependency>> + '_ {
        self.table.iter()
    }
}

/// Merge two tables; a key present in `local` hides the `global` entry
pub fn merged(local: &DependencyTable, global: &DependencyTable) -> MergedView {
    let mut table = DependencyTable::new();
    for dependency in local.iter().chain(global.iter()) {
        let key = dependency.key();
        if table.contains(&key) {
            continue;
        }
        table.entries.insert(key, dependency.clone());
        table.order.push(key);
    }
    MergedView { table }
}
