//! Card entry: validation, normalization and enrollment.
//!
//! Validation is a fixed pipeline (number, holder, expiry, CVV); the first
//! failing check reports its specific message and nothing runs after it. No
//! cryptography happens until every check has passed. The full number and
//! holder exist only inside the entry values and the one sealing operation;
//! both carriers zeroize on drop.

use std::fmt;

use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::{to_base64, CryptoSuite, Cvv, InvalidCvv, Iv, Salt, IV_LEN, SALT_LEN};
use crate::record::{CardRecord, Last4, RevealedCard, SealedPayload};

/// Why an entry was refused. The `Display` strings are the user-facing
/// validation messages; nothing is mutated when validation fails.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EntryError {
    /// The card number did not contain exactly 16 digits.
    #[error("card number must be 16 digits")]
    InvalidNumber,
    /// The holder name was shorter than two characters after normalization.
    #[error("enter the card holder name")]
    InvalidHolder,
    /// The expiry did not contain exactly four digits.
    #[error("expiry must be 4 digits (MMYY)")]
    InvalidExpiry,
    /// The expiry month was outside 01 through 12.
    #[error("expiry month must be between 01 and 12")]
    InvalidExpiryMonth,
    /// The CVV did not contain exactly three digits.
    #[error(transparent)]
    Cvv(#[from] InvalidCvv),
}

/// Raw values captured from the entry form, separators and all.
#[derive(Default, Zeroize, ZeroizeOnDrop)]
pub struct CardEntry {
    /// Card number as typed.
    pub number: String,
    /// Holder name as typed.
    pub holder: String,
    /// Expiry as typed (`MMYY` digits, separators allowed).
    pub expiry: String,
    /// CVV as typed.
    pub cvv: String,
}

impl CardEntry {
    /// Runs the validation pipeline.
    ///
    /// # Errors
    ///
    /// Returns the first failing check's [`EntryError`]; later fields are
    /// not examined.
    pub fn validate(&self) -> Result<ValidatedEntry, EntryError> {
        let number: String = digits_of(&self.number);
        if number.len() != 16 {
            return Err(EntryError::InvalidNumber);
        }
        let last4 = Last4::from_text(&number).ok_or(EntryError::InvalidNumber)?;

        let holder = normalize_holder(&self.holder);
        if holder.chars().count() < 2 {
            return Err(EntryError::InvalidHolder);
        }

        let expiry = digits_of(&self.expiry);
        if expiry.len() != 4 {
            return Err(EntryError::InvalidExpiry);
        }
        let month: u8 = expiry[..2].parse().map_err(|_| EntryError::InvalidExpiry)?;
        if !(1..=12).contains(&month) {
            return Err(EntryError::InvalidExpiryMonth);
        }
        let year: u8 = expiry[2..].parse().map_err(|_| EntryError::InvalidExpiry)?;

        let cvv = Cvv::parse(&self.cvv)?;

        Ok(ValidatedEntry {
            number: Zeroizing::new(number),
            holder: Zeroizing::new(holder),
            last4,
            month,
            year,
            cvv,
        })
    }
}

impl fmt::Debug for CardEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CardEntry([REDACTED])")
    }
}

/// An entry that passed every validation check.
///
/// The sensitive carriers zeroize themselves on drop; the struct is consumed
/// by [`ValidatedEntry::into_record`] so nothing lingers after enrollment.
pub struct ValidatedEntry {
    number: Zeroizing<String>,
    holder: Zeroizing<String>,
    last4: Last4,
    month: u8,
    year: u8,
    cvv: Cvv,
}

impl ValidatedEntry {
    /// The clear digits the new record will carry.
    #[must_use]
    pub const fn last4(&self) -> &Last4 {
        &self.last4
    }

    /// Builds the vault record, sealing the payload when the platform can.
    ///
    /// On platforms without cryptographic support the record is created
    /// bare: `last4`, brand and id only, no gate hash and no sealed payload,
    /// so reveal is permanently unavailable for it. Enrollment itself never
    /// fails for that reason.
    #[must_use]
    pub fn into_record<C: CryptoSuite>(self, crypto: &C, now_ms: u64) -> CardRecord {
        let id = crypto.new_card_id(now_ms);
        let last4 = self.last4.clone();
        if let Some(sealed) = self.seal_payload(crypto) {
            let cvv_hash = crypto.hash_hex(&self.cvv.gate_string());
            CardRecord::new(id, last4, None, now_ms, Some(cvv_hash), Some(sealed))
        } else {
            log::warn!("payload sealing unavailable; card enrolled without reveal support");
            CardRecord::new(id, last4, None, now_ms, None, None)
        }
    }

    fn seal_payload<C: CryptoSuite>(&self, crypto: &C) -> Option<SealedPayload> {
        let mut salt: Salt = [0; SALT_LEN];
        crypto.fill_random(&mut salt);
        let mut iv: Iv = [0; IV_LEN];
        crypto.fill_random(&mut iv);

        let key = crypto.derive_seal_key(&self.cvv, &salt)?;
        let payload = RevealedCard {
            number: self.number.as_str().to_string(),
            holder: self.holder.as_str().to_string(),
            expiry: format!("{:02}/{:02}", self.month, self.year),
        };
        let plaintext = Zeroizing::new(serde_json::to_vec(&payload).ok()?);
        let ciphertext = crypto.seal(&key, &iv, &plaintext).ok()?;

        Some(SealedPayload {
            enc: to_base64(&ciphertext),
            enc_iv: to_base64(&iv),
            enc_salt: to_base64(&salt),
        })
    }
}

impl fmt::Debug for ValidatedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValidatedEntry([REDACTED])")
    }
}

fn digits_of(text: &str) -> String {
    text.chars().filter(char::is_ascii_digit).collect()
}

/// Trims, collapses inner whitespace and uppercases the holder name.
fn normalize_holder(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}
