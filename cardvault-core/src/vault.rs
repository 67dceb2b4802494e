//! The card vault: list ownership, persistence and rehydration.
//!
//! One [`CardVault`] instance owns one user's in-memory card list. All
//! mutation funnels through it (entry appends, reveal sets the transient
//! payload, deletion removes by position) and every mutation persists
//! immediately. Storage failures degrade to "nothing persisted this session"
//! per the vault's contract; they are logged and reported through typed
//! outcomes, never surfaced as panics.

use std::sync::Arc;

use serde_json::Value;

use crate::crypto::CryptoSuite;
use crate::migration::{migrate, MigrationReport};
use crate::record::{CardId, CardRecord, RevealedCard};
use crate::storage::{KeyValueStore, StorageScope, StoreError, StoreResult, LEGACY_CARDS_KEY};

/// Where [`CardVault::reload`] found the stored list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    /// The scope's own storage key held data.
    Primary,
    /// The scope's key was empty; the legacy unscoped key held data.
    LegacyFallback,
    /// Nothing usable was stored anywhere.
    Empty,
}

/// Outcome of rehydrating the vault from storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSummary {
    /// Where the stored text came from.
    pub source: LoadSource,
    /// Whether stored text existed but was not a JSON array. The vault
    /// starts empty in that case and leaves the stored text untouched.
    pub corrupt: bool,
    /// What migration did to the parsed records.
    pub migration: MigrationReport,
}

/// Owns one user's card list and its persistence.
pub struct CardVault<S, C> {
    store: Arc<S>,
    crypto: Arc<C>,
    scope: StorageScope,
    cards: Vec<CardRecord>,
}

impl<S: KeyValueStore, C: CryptoSuite> CardVault<S, C> {
    /// Creates an empty vault bound to `scope`. Nothing is read from storage
    /// until [`CardVault::reload`] runs.
    #[must_use]
    pub const fn new(store: Arc<S>, crypto: Arc<C>, scope: StorageScope) -> Self {
        Self {
            store,
            crypto,
            scope,
            cards: Vec::new(),
        }
    }

    /// Creates a vault and immediately rehydrates it from storage.
    #[must_use]
    pub fn load(
        store: Arc<S>,
        crypto: Arc<C>,
        scope: StorageScope,
        now_ms: u64,
    ) -> (Self, LoadSummary) {
        let mut vault = Self::new(store, crypto, scope);
        let summary = vault.reload(now_ms);
        (vault, summary)
    }

    /// Replaces the in-memory list with current storage contents.
    ///
    /// Whatever is stored wins over previous in-memory state, including any
    /// transient revealed payloads, which do not survive a reload. Raw
    /// records run through migration and the migrated form is persisted
    /// back. Malformed stored JSON yields an empty list and is left in
    /// place rather than overwritten.
    pub fn reload(&mut self, now_ms: u64) -> LoadSummary {
        let (text, source) = self.read_stored_text();
        let mut corrupt = false;
        let mut persist_back = false;
        let raw: Vec<Value> = match text {
            None => Vec::new(),
            Some(text) => match serde_json::from_str(&text) {
                Ok(values) => {
                    persist_back = true;
                    values
                }
                Err(err) => {
                    corrupt = true;
                    log::warn!("stored card list is not readable JSON, starting empty: {err}");
                    Vec::new()
                }
            },
        };

        let (records, migration) = migrate(&raw, self.crypto.as_ref(), now_ms);
        self.cards = records;
        if persist_back {
            self.save();
        }
        LoadSummary {
            source,
            corrupt,
            migration,
        }
    }

    /// Serializes the current list (without transient fields) to the scope's
    /// storage key, removing the now-orphaned legacy key when the scope has
    /// its own. Failures are logged and swallowed.
    pub fn save(&self) {
        if let Err(err) = self.persist() {
            log::warn!("card list not persisted this session: {err}");
        }
    }

    /// Adds a record to the end of the list and persists.
    pub fn append(&mut self, record: CardRecord) {
        self.cards.push(record);
        self.save();
    }

    /// Removes the record at `index`, preserving the order of the rest, and
    /// persists. Answers `None` (and stores nothing) for an out-of-range
    /// index.
    pub fn delete(&mut self, index: usize) -> Option<CardRecord> {
        if index >= self.cards.len() {
            return None;
        }
        let removed = self.cards.remove(index);
        self.save();
        Some(removed)
    }

    /// All records in insertion order.
    #[must_use]
    pub fn cards(&self) -> &[CardRecord] {
        &self.cards
    }

    /// Record at `index`, if any.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&CardRecord> {
        self.cards.get(index)
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    /// Whether the vault holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Whether a record with `id` currently exists.
    #[must_use]
    pub fn contains(&self, id: &CardId) -> bool {
        self.cards.iter().any(|record| record.id() == id)
    }

    pub(crate) fn crypto(&self) -> &C {
        self.crypto.as_ref()
    }

    /// Sets the transient revealed payload on the record at `index`, but
    /// only if that position still holds the record identified by
    /// `expected`. Answers whether the payload was applied.
    pub(crate) fn set_revealed(
        &mut self,
        index: usize,
        expected: &CardId,
        payload: RevealedCard,
    ) -> bool {
        match self.cards.get_mut(index) {
            Some(record) if record.id() == expected => {
                record.set_revealed(payload);
                self.save();
                true
            }
            _ => false,
        }
    }

    fn persist(&self) -> StoreResult<()> {
        let json = match serde_json::to_string(&self.cards) {
            Ok(json) => json,
            Err(err) => {
                return Err(StoreError::WriteRejected(format!(
                    "card list not encodable: {err}"
                )))
            }
        };
        self.store.put(&self.scope.cards_key(), &json)?;
        if self.scope.is_scoped() {
            if let Err(err) = self.store.remove(LEGACY_CARDS_KEY) {
                log::debug!("legacy card key not removed: {err}");
            }
        }
        Ok(())
    }

    /// Reads the scope's key, falling back to the legacy unscoped key for
    /// scoped users. Blank values count as absent. Read failures degrade to
    /// an empty vault.
    fn read_stored_text(&self) -> (Option<String>, LoadSource) {
        let primary = self
            .read_key(&self.scope.cards_key())
            .filter(|text| !text.trim().is_empty());
        if let Some(text) = primary {
            return (Some(text), LoadSource::Primary);
        }
        if self.scope.is_scoped() {
            let legacy = self
                .read_key(LEGACY_CARDS_KEY)
                .filter(|text| !text.trim().is_empty());
            if let Some(text) = legacy {
                return (Some(text), LoadSource::LegacyFallback);
            }
        }
        (None, LoadSource::Empty)
    }

    fn read_key(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => value,
            Err(err) => {
                log::warn!("storage read failed for {key}: {err}");
                None
            }
        }
    }
}
