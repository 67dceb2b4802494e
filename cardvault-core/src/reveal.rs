//! The CVV-gated reveal protocol.
//!
//! A challenge targets one record at a time, captured by position and
//! identifier when the modal opens. Submission re-checks the target against
//! the live vault before anything else touches it, so a record deleted while
//! the modal was open is refused rather than acted on. The entered CVV is
//! tested against the stored gate hash first; decryption only runs after the
//! gate passes. Gate mismatch, decryption failure and payload corruption are
//! distinct outcomes internally but share one user-facing message, so a
//! caller relaying `Display` strings leaks nothing about which check failed.

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::crypto::{from_base64, from_base64_exact, CryptoSuite, Cvv, InvalidCvv, IV_LEN, SALT_LEN};
use crate::record::{CardId, CardRecord, Last4, RevealedCard};
use crate::storage::KeyValueStore;
use crate::vault::CardVault;

/// Why a reveal attempt did not produce a payload.
///
/// `WrongCvv`, `RevealFailed` and `CorruptPayload` intentionally render the
/// same text; only the variant differs, for callers that branch on outcome.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RevealError {
    /// No challenge is open; nothing was submitted or cancelled.
    #[error("no card is awaiting a CVV challenge")]
    NoChallenge,
    /// The targeted record is gone or no longer at its captured position.
    #[error("this card is no longer available")]
    TargetGone,
    /// The entered CVV is not exactly three digits.
    #[error(transparent)]
    Cvv(#[from] InvalidCvv),
    /// The record carries no gate hash, so it can never be revealed.
    #[error("this card cannot be revealed; delete it and add it again")]
    UnsupportedRecord,
    /// The entered CVV does not match the stored gate hash.
    #[error("could not reveal the card; check the CVV and try again")]
    WrongCvv,
    /// Key derivation or decryption failed after the gate passed.
    #[error("could not reveal the card; check the CVV and try again")]
    RevealFailed,
    /// The sealed fields are missing, not valid base64, or the decrypted
    /// payload does not carry a card number and expiry.
    #[error("could not reveal the card; check the CVV and try again")]
    CorruptPayload,
}

/// Where the protocol currently stands, for rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealState {
    /// No challenge open.
    Idle,
    /// A record is targeted and the CVV prompt is showing.
    AwaitingCvv,
    /// The last challenge succeeded; the payload sits on the vault record.
    Revealed,
}

#[derive(Debug)]
struct Challenge {
    index: usize,
    card_id: CardId,
    entered: SecretString,
}

#[derive(Debug, Default)]
enum ChallengeState {
    #[default]
    Idle,
    AwaitingCvv(Challenge),
    Revealed,
}

/// Drives `Idle -> AwaitingCvv -> Revealed` for one vault.
///
/// The protocol holds no vault reference; `open` and `submit` take the vault
/// so a single flow instance can outlive reloads. At most one challenge is
/// live at a time, and opening a new one discards the previous target along
/// with any partially entered CVV.
#[derive(Debug, Default)]
pub struct RevealProtocol {
    state: ChallengeState,
}

impl RevealProtocol {
    /// A protocol with no challenge open.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: ChallengeState::Idle,
        }
    }

    /// Current state, for rendering.
    #[must_use]
    pub const fn state(&self) -> RevealState {
        match self.state {
            ChallengeState::Idle => RevealState::Idle,
            ChallengeState::AwaitingCvv(_) => RevealState::AwaitingCvv,
            ChallengeState::Revealed => RevealState::Revealed,
        }
    }

    /// Identifier of the currently challenged record, if any.
    #[must_use]
    pub const fn target(&self) -> Option<&CardId> {
        match &self.state {
            ChallengeState::AwaitingCvv(challenge) => Some(&challenge.card_id),
            _ => None,
        }
    }

    /// Opens a challenge against the record at `index`, replacing any
    /// previous target and clearing any partially entered CVV.
    ///
    /// Returns the record's clear digits for the prompt hint. Records that
    /// cannot be revealed still open; submission reports the reason.
    ///
    /// # Errors
    ///
    /// [`RevealError::TargetGone`] when no record sits at `index`.
    pub fn open<'v, S: KeyValueStore, C: CryptoSuite>(
        &mut self,
        vault: &'v CardVault<S, C>,
        index: usize,
    ) -> Result<&'v Last4, RevealError> {
        let Some(record) = vault.get(index) else {
            self.state = ChallengeState::Idle;
            return Err(RevealError::TargetGone);
        };
        self.state = ChallengeState::AwaitingCvv(Challenge {
            index,
            card_id: record.id().clone(),
            entered: SecretString::from(String::new()),
        });
        Ok(record.last4())
    }

    /// Replaces the CVV buffer with the digits of `text`, truncated to
    /// three. Callers render the buffer masked; the clear digits live only
    /// here. Ignored unless a challenge is open.
    pub fn set_input(&mut self, text: &str) {
        if let ChallengeState::AwaitingCvv(challenge) = &mut self.state {
            let digits: String = text.chars().filter(char::is_ascii_digit).take(3).collect();
            challenge.entered = SecretString::from(digits);
        }
    }

    /// Submits the entered CVV against the challenged record.
    ///
    /// Checks run in order: CVV shape, target still present, gate hash,
    /// sealed payload decryption and parse. On success the payload is set on
    /// the vault record, the vault persists, and the challenge closes. On
    /// gate or decryption failure the challenge stays open for retry with
    /// the buffer intact; the record is never mutated on failure.
    ///
    /// # Errors
    ///
    /// Any [`RevealError`]; see the variant docs for which check refused.
    pub fn submit<'v, S: KeyValueStore, C: CryptoSuite>(
        &mut self,
        vault: &'v mut CardVault<S, C>,
    ) -> Result<&'v RevealedCard, RevealError> {
        let (index, card_id, cvv) = match &self.state {
            ChallengeState::AwaitingCvv(challenge) => {
                let cvv = Cvv::parse(challenge.entered.expose_secret())?;
                (challenge.index, challenge.card_id.clone(), cvv)
            }
            _ => return Err(RevealError::NoChallenge),
        };

        let Some(record) = vault.get(index).filter(|record| *record.id() == card_id) else {
            self.state = ChallengeState::Idle;
            return Err(RevealError::TargetGone);
        };

        let Some(stored_hash) = record.cvv_hash() else {
            return Err(RevealError::UnsupportedRecord);
        };
        if !crate::crypto::gate_matches(vault.crypto(), &cvv, stored_hash) {
            return Err(RevealError::WrongCvv);
        }

        let Some(sealed) = record.sealed() else {
            return Err(RevealError::CorruptPayload);
        };
        let salt =
            from_base64_exact::<SALT_LEN>(&sealed.enc_salt).ok_or(RevealError::CorruptPayload)?;
        let iv = from_base64_exact::<IV_LEN>(&sealed.enc_iv).ok_or(RevealError::CorruptPayload)?;
        let ciphertext = from_base64(&sealed.enc).ok_or(RevealError::CorruptPayload)?;

        let key = vault
            .crypto()
            .derive_seal_key(&cvv, &salt)
            .ok_or(RevealError::RevealFailed)?;
        let plaintext = vault.crypto().open(&key, &iv, &ciphertext).map_err(|error| {
            log::debug!("sealed payload did not open: {error}");
            RevealError::RevealFailed
        })?;
        let plaintext = Zeroizing::new(plaintext);
        let payload: RevealedCard =
            serde_json::from_slice(&plaintext).map_err(|_| RevealError::CorruptPayload)?;
        if payload.number.is_empty() || payload.expiry.is_empty() {
            return Err(RevealError::CorruptPayload);
        }

        if !vault.set_revealed(index, &card_id, payload) {
            self.state = ChallengeState::Idle;
            return Err(RevealError::TargetGone);
        }
        self.state = ChallengeState::Revealed;
        vault
            .get(index)
            .and_then(CardRecord::revealed)
            .ok_or(RevealError::TargetGone)
    }

    /// Closes any open challenge, discarding the entered CVV. The targeted
    /// record is left untouched.
    pub fn cancel(&mut self) {
        self.state = ChallengeState::Idle;
    }
}
