//! The backing key-value map.

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

/// The server's key-value store: a reader-writer-locked map of strings.
///
/// The store is constructed explicitly and shared by reference, never
/// reached through a global. It knows nothing about blocked readers; the
/// server pairs it with a
/// [`WaitRegistry`](handoff_sync::WaitRegistry) and delivers to that
/// registry after every [`set`](Self::set).
#[derive(Debug, Default)]
pub struct Store {
    map: RwLock<HashMap<String, String>>,
}

impl Store {
    /// Returns a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn set(&self, key: String, value: String) {
        self.map
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, value);
    }

    /// Returns the value stored under `key`, if any.
    pub fn get(&self, key: &str) -> Option<String> {
        self.map
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Returns `true` if `key` currently has a value.
    pub fn contains_key(&self, key: &str) -> bool {
        self.map
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Returns every key in the store, sorted so listings are stable.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .map
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Returns the number of keys in the store.
    pub fn len(&self) -> usize {
        self.map
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_roundtrip() {
        let store = Store::new();
        assert_eq!(store.get("k"), None);
        store.set("k".to_string(), "v".to_string());
        assert_eq!(store.get("k"), Some("v".to_string()));
        assert!(store.contains_key("k"));
    }

    #[test]
    fn set_replaces() {
        let store = Store::new();
        store.set("k".to_string(), "old".to_string());
        store.set("k".to_string(), "new".to_string());
        assert_eq!(store.get("k"), Some("new".to_string()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn keys_are_sorted() {
        let store = Store::new();
        for key in ["banana", "apple", "cherry"] {
            store.set(key.to_string(), "x".to_string());
        }
        assert_eq!(store.keys(), ["apple", "banana", "cherry"]);
    }
}
