//! Which card pays: a persisted preference kept separately from the vault.
//!
//! The preference is one storage value holding a record id, scoped per user
//! like the card list and with the same one-time legacy-key migration. It is
//! reconciled against the live vault on every read: a stored id that no
//! longer matches a record falls back to the first card in list order, and
//! the fallback is persisted so the next read agrees.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::crypto::CryptoSuite;
use crate::record::{CardId, Last4};
use crate::storage::{KeyValueStore, StorageScope, LEGACY_SELECTED_KEY};
use crate::vault::CardVault;

/// Payment was attempted with no card in the vault.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("add a payment card before paying")]
pub struct NoCardAvailable;

/// What the payment surface should show after a vault change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionView {
    /// The active card, present whenever the vault holds any card.
    pub selected: Option<CardId>,
    /// Whether a selector control is worth showing (two or more cards).
    pub selector_visible: bool,
    /// Whether payment submission is allowed (at least one card).
    pub payment_enabled: bool,
}

/// The fields a payment request carries to name its card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentCardBinding {
    /// Identifier of the record being charged.
    pub card_id: CardId,
    /// Clear digits echoed alongside the id for display on receipts.
    pub card_last4: Last4,
}

/// Tracks the active card for one user.
pub struct CardSelection<S> {
    store: Arc<S>,
    scope: StorageScope,
}

impl<S: KeyValueStore> CardSelection<S> {
    /// A selection backed by `store`, keyed by `scope`.
    #[must_use]
    pub const fn new(store: Arc<S>, scope: StorageScope) -> Self {
        Self { store, scope }
    }

    /// Reconciles the persisted preference with the vault.
    ///
    /// With no cards, nothing is selected and payment is disabled. With
    /// exactly one card it is auto-selected and the selector hides. With
    /// several, the persisted id wins if its record still exists; otherwise
    /// the first card becomes the selection and is persisted as such.
    #[must_use]
    pub fn sync<C: CryptoSuite>(&self, vault: &CardVault<S, C>) -> SelectionView {
        if vault.is_empty() {
            return SelectionView {
                selected: None,
                selector_visible: false,
                payment_enabled: false,
            };
        }
        SelectionView {
            selected: self.resolve(vault),
            selector_visible: vault.len() >= 2,
            payment_enabled: true,
        }
    }

    /// Persists `id` as the active card if the vault knows it. Answers
    /// whether the selection was accepted.
    #[must_use]
    pub fn select<C: CryptoSuite>(&self, vault: &CardVault<S, C>, id: &CardId) -> bool {
        if vault.contains(id) {
            self.persist(id);
            true
        } else {
            false
        }
    }

    /// Resolves the card a payment should charge.
    ///
    /// # Errors
    ///
    /// Returns [`NoCardAvailable`] when the vault is empty; the caller shows
    /// the add-a-card prompt instead of submitting anything.
    pub fn binding_for_payment<C: CryptoSuite>(
        &self,
        vault: &CardVault<S, C>,
    ) -> Result<PaymentCardBinding, NoCardAvailable> {
        let selected = self.resolve(vault).ok_or(NoCardAvailable)?;
        let record = vault
            .cards()
            .iter()
            .find(|record| *record.id() == selected)
            .ok_or(NoCardAvailable)?;
        Ok(PaymentCardBinding {
            card_id: record.id().clone(),
            card_last4: record.last4().clone(),
        })
    }

    /// The stored preference if its record survives, else the first card
    /// (persisted). `None` only for an empty vault.
    fn resolve<C: CryptoSuite>(&self, vault: &CardVault<S, C>) -> Option<CardId> {
        if let Some(id) = self.read_key(&self.scope.selected_key()) {
            if vault.contains(&id) {
                return Some(id);
            }
        } else if self.scope.is_scoped() {
            if let Some(id) = self.read_key(LEGACY_SELECTED_KEY) {
                if vault.contains(&id) {
                    self.persist(&id);
                    return Some(id);
                }
            }
        }
        let first = vault.get(0)?.id().clone();
        self.persist(&first);
        Some(first)
    }

    /// Writes the preference under the scoped key as a raw id string and
    /// retires the legacy key. Storage failures degrade to an unpersisted
    /// selection.
    fn persist(&self, id: &CardId) {
        if let Err(err) = self.store.put(&self.scope.selected_key(), id.as_str()) {
            log::warn!("selected card not persisted: {err}");
        }
        if self.scope.is_scoped() {
            if let Err(err) = self.store.remove(LEGACY_SELECTED_KEY) {
                log::debug!("legacy selected key not removed: {err}");
            }
        }
    }

    fn read_key(&self, key: &str) -> Option<CardId> {
        match self.store.get(key) {
            Ok(value) => value
                .filter(|value| !value.trim().is_empty())
                .map(CardId::new),
            Err(err) => {
                log::warn!("selected card not readable: {err}");
                None
            }
        }
    }
}
