//! Card records and their persisted shape.
//!
//! A [`CardRecord`] keeps only `last4` and `brand` in the clear. The full
//! number, holder and expiry live in the sealed payload, decryptable only
//! with the CVV, and surface transiently through [`RevealedCard`] which is
//! never serialized. Records cannot be built by hosts: they enter the vault
//! through card entry or legacy migration, which is what keeps the
//! `last4`-always-valid invariant structural.

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Display label used when a record carries no brand of its own.
pub const DEFAULT_BRAND: &str = "Bank card";

/// Opaque, stable identifier of a card record.
///
/// Generated client-side at enrollment (or backfilled by migration) and
/// unique within one user's collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CardId(String);

impl CardId {
    /// Wraps an identifier string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Exactly four decimal digits, the only part of the card number kept in the
/// clear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Last4(String);

impl Last4 {
    /// Extracts the trailing four digits from `text`, ignoring separators.
    ///
    /// Answers `None` when fewer than four digits are present, which callers
    /// treat as "this cannot become a usable record".
    #[must_use]
    pub fn from_text(text: &str) -> Option<Self> {
        let digits: Vec<char> = text.chars().filter(char::is_ascii_digit).collect();
        if digits.len() < 4 {
            return None;
        }
        Some(Self(digits[digits.len() - 4..].iter().collect()))
    }

    /// The four digits as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Last4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decrypted card details, held in memory only.
///
/// Populated by a successful reveal, cleared whenever the vault reloads from
/// storage, and excluded from every persisted representation.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct RevealedCard {
    /// Full card number.
    pub number: String,
    /// Normalized holder name. Legacy payloads may lack it.
    #[serde(default)]
    pub holder: String,
    /// Expiry in `MM/YY` form.
    pub expiry: String,
}

impl fmt::Debug for RevealedCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RevealedCard([REDACTED])")
    }
}

/// The encrypted card payload and its cryptographic companions.
///
/// Three co-located storage fields forming one unit; a record has either all
/// three or none of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct SealedPayload {
    /// Base64 AES-GCM ciphertext (tag appended) of the payload JSON.
    pub(crate) enc: String,
    /// Base64 12-byte nonce, unique per encryption.
    pub(crate) enc_iv: String,
    /// Base64 16-byte key-derivation salt, unique per encryption.
    pub(crate) enc_salt: String,
}

/// A card known to this client.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct CardRecord {
    id: CardId,
    last4: Last4,
    brand: String,
    created_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    cvv_hash: Option<String>,
    #[serde(flatten)]
    sealed: Option<SealedPayload>,
    #[serde(skip)]
    revealed: Option<RevealedCard>,
}

impl CardRecord {
    pub(crate) fn new(
        id: CardId,
        last4: Last4,
        brand: Option<String>,
        created_at: u64,
        cvv_hash: Option<String>,
        sealed: Option<SealedPayload>,
    ) -> Self {
        let brand = brand
            .map(|label| label.trim().to_string())
            .filter(|label| !label.is_empty())
            .unwrap_or_else(|| DEFAULT_BRAND.to_string());
        Self {
            id,
            last4,
            brand,
            created_at,
            cvv_hash,
            sealed,
            revealed: None,
        }
    }

    /// Stable record identifier.
    #[must_use]
    pub const fn id(&self) -> &CardId {
        &self.id
    }

    /// The four clear digits shown in lists and hints.
    #[must_use]
    pub const fn last4(&self) -> &Last4 {
        &self.last4
    }

    /// Display label for the card.
    #[must_use]
    pub fn brand(&self) -> &str {
        &self.brand
    }

    /// Insertion timestamp in epoch milliseconds, informational only.
    #[must_use]
    pub const fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Whether this record can ever be revealed: it must carry both the CVV
    /// gate hash and the sealed payload. Records enrolled on platforms
    /// without cryptographic support, and legacy records, answer `false`.
    #[must_use]
    pub const fn supports_reveal(&self) -> bool {
        self.cvv_hash.is_some() && self.sealed.is_some()
    }

    /// Decrypted details from the last successful reveal, if any.
    #[must_use]
    pub const fn revealed(&self) -> Option<&RevealedCard> {
        self.revealed.as_ref()
    }

    pub(crate) fn cvv_hash(&self) -> Option<&str> {
        self.cvv_hash.as_deref()
    }

    pub(crate) const fn sealed(&self) -> Option<&SealedPayload> {
        self.sealed.as_ref()
    }

    pub(crate) fn set_revealed(&mut self, payload: RevealedCard) {
        self.revealed = Some(payload);
    }
}

impl fmt::Debug for CardRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardRecord")
            .field("id", &self.id)
            .field("last4", &self.last4)
            .field("brand", &self.brand)
            .field("created_at", &self.created_at)
            .field("cvv_hash", &self.cvv_hash.as_ref().map(|_| "[REDACTED]"))
            .field("sealed", &self.sealed.is_some())
            .field("revealed", &self.revealed.is_some())
            .finish()
    }
}
