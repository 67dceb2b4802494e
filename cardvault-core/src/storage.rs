//! Host storage behind the vault.
//!
//! The browser's local storage is modeled as a string key-value store. The
//! vault swallows storage failures per its degrade-don't-crash contract, but
//! the trait reports them so fakes can inject quota exhaustion and tests can
//! assert on the swallowing instead of only on the absence of panics.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

/// Legacy unscoped storage key for the card list.
pub(crate) const LEGACY_CARDS_KEY: &str = "userCards";

/// Legacy unscoped storage key for the selected-card preference.
pub(crate) const LEGACY_SELECTED_KEY: &str = "selectedPaymentCard";

/// Failures surfaced by a [`KeyValueStore`] implementation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store rejected a write (quota exhausted or similar).
    #[error("storage write rejected: {0}")]
    WriteRejected(String),
    /// The backing store could not be reached at all.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Result alias for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// String key-value storage with the shape of browser local storage.
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `key`, `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backing store cannot be read.
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the write is rejected, typically for
    /// quota exhaustion.
    fn put(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Removes `key`. Removing an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backing store cannot be written.
    fn remove(&self, key: &str) -> StoreResult<()>;
}

/// Which user's storage keys the vault reads and writes.
///
/// Signed-in users get per-user keys (`userCards_<id>`); when no user
/// identifier is available the legacy unscoped keys are used directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageScope {
    user_id: Option<String>,
}

impl StorageScope {
    /// Scope for a signed-in user. A blank identifier collapses to the
    /// unscoped legacy keys, matching how an absent identifier behaves.
    #[must_use]
    pub fn for_user(user_id: impl Into<String>) -> Self {
        let id = user_id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            Self::unscoped()
        } else {
            Self {
                user_id: Some(trimmed.to_string()),
            }
        }
    }

    /// Scope without a user identifier; reads and writes the legacy keys.
    #[must_use]
    pub const fn unscoped() -> Self {
        Self { user_id: None }
    }

    /// Whether this scope has a per-user key distinct from the legacy one.
    pub(crate) const fn is_scoped(&self) -> bool {
        self.user_id.is_some()
    }

    /// Storage key holding the card list.
    pub(crate) fn cards_key(&self) -> String {
        self.user_id
            .as_ref()
            .map_or_else(|| LEGACY_CARDS_KEY.to_string(), |id| format!("userCards_{id}"))
    }

    /// Storage key holding the selected-card preference.
    pub(crate) fn selected_key(&self) -> String {
        self.user_id.as_ref().map_or_else(
            || LEGACY_SELECTED_KEY.to_string(),
            |id| format!("selectedPaymentCard_{id}"),
        )
    }
}

/// In-memory [`KeyValueStore`] for hosts without persistence and for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

// Panics here are lock poisoning only, which tests treat as fatal anyway.
#[allow(clippy::missing_panics_doc)]
impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Whether the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }

    /// Drops every stored key.
    pub fn reset(&self) {
        self.entries.write().unwrap().clear();
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.entries.read().unwrap().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> StoreResult<()> {
        self.entries
            .write()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.entries.write().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_keys_embed_the_user_id() {
        let scope = StorageScope::for_user("42");
        assert!(scope.is_scoped());
        assert_eq!(scope.cards_key(), "userCards_42");
        assert_eq!(scope.selected_key(), "selectedPaymentCard_42");
    }

    #[test]
    fn unscoped_keys_are_the_legacy_names() {
        let scope = StorageScope::unscoped();
        assert!(!scope.is_scoped());
        assert_eq!(scope.cards_key(), "userCards");
        assert_eq!(scope.selected_key(), "selectedPaymentCard");
    }

    #[test]
    fn blank_user_id_collapses_to_unscoped() {
        assert_eq!(StorageScope::for_user("  "), StorageScope::unscoped());
        assert_eq!(StorageScope::for_user(""), StorageScope::unscoped());
    }

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").expect("readable"), None);
        store.put("k", "v").expect("writable");
        assert_eq!(store.get("k").expect("readable"), Some("v".to_string()));
        store.put("k", "w").expect("writable");
        assert_eq!(store.get("k").expect("readable"), Some("w".to_string()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn removing_an_absent_key_is_fine() {
        let store = MemoryStore::new();
        store.remove("missing").expect("no-op remove");
        store.put("k", "v").expect("writable");
        store.remove("k").expect("removable");
        assert!(store.is_empty());
    }

    #[test]
    fn reset_clears_everything() {
        let store = MemoryStore::new();
        store.put("a", "1").expect("writable");
        store.put("b", "2").expect("writable");
        store.reset();
        assert!(store.is_empty());
    }
}
