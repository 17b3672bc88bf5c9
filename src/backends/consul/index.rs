use std::collections::BTreeMap;

use super::config_entries::{ConfigEntry, ConfigEntryKey};

/// A snapshot of config entries, at most one per kind and name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfigEntryIndex {
    entries: BTreeMap<ConfigEntryKey, ConfigEntry>,
}

impl ConfigEntryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the entry, replacing any entry with the same key.
    pub fn add(&mut self, entry: ConfigEntry) {
        self.entries.insert(entry.key(), entry);
    }

    /// Union of both snapshots; entries of `other` win on key clashes.
    pub fn merge(&self, other: &ConfigEntryIndex) -> ConfigEntryIndex {
        let mut merged = self.clone();
        for entry in other.entries.values() {
            merged.add(entry.clone());
        }
        merged
    }

    /// Entries of this snapshot whose key is absent from `other`.
    pub fn difference(&self, other: &ConfigEntryIndex) -> ConfigEntryIndex {
        let entries = self.entries.iter().filter(|(key, _)| !other.entries.contains_key(key)).map(|(key, entry)| (key.clone(), entry.clone())).collect();
        ConfigEntryIndex { entries }
    }

    /// Entries that are new or differ from the ones in `previous`.
    pub fn changed<'a>(&'a self, previous: &'a ConfigEntryIndex) -> impl Iterator<Item = &'a ConfigEntry> + 'a {
        self.entries.iter().filter(|(key, entry)| previous.entries.get(key) != Some(entry)).map(|(_, entry)| entry)
    }

    pub fn of_kind(&self, kind: &str) -> ConfigEntryIndex {
        let entries = self.entries.iter().filter(|(key, _)| key.kind == kind).map(|(key, entry)| (key.clone(), entry.clone())).collect();
        ConfigEntryIndex { entries }
    }

    pub fn get(&self, key: &ConfigEntryKey) -> Option<&ConfigEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &ConfigEntryKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn entries(&self) -> impl Iterator<Item = &ConfigEntry> {
        self.entries.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ConfigEntryKey> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<ConfigEntry> for ConfigEntryIndex {
    fn from_iter<T: IntoIterator<Item = ConfigEntry>>(iter: T) -> Self {
        let mut index = ConfigEntryIndex::new();
        for entry in iter {
            index.add(entry);
        }
        index
    }
}
