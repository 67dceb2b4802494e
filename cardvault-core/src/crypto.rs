//! Platform cryptography behind the vault.
//!
//! Everything the vault needs from the platform goes through [`CryptoSuite`]:
//! random bytes, the digest that gates reveal attempts, CVV-based key
//! derivation and the AEAD that seals card payloads. Hosts inject
//! [`StandardCrypto`] on capable platforms and [`DegradedCrypto`] where the
//! cryptographic subsystem is missing, so the rest of the crate never probes
//! for capabilities itself.

use std::fmt;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::record::CardId;

/// Size of the per-record key-derivation salt in bytes.
pub const SALT_LEN: usize = 16;

/// Size of the AEAD nonce in bytes (96 bits).
pub const IV_LEN: usize = 12;

/// Size of the derived sealing key in bytes (AES-256).
pub const KEY_LEN: usize = 32;

/// PBKDF2 work factor used when deriving a sealing key from a CVV.
pub const KDF_ROUNDS: u32 = 100_000;

/// Per-record key-derivation salt.
pub type Salt = [u8; SALT_LEN];

/// AEAD nonce stored alongside each sealed payload.
pub type Iv = [u8; IV_LEN];

/// Failures inside the cryptographic backend.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Authenticated encryption is not available on this platform.
    #[error("authenticated encryption is not available on this platform")]
    Unavailable,
    /// The AEAD backend failed to encrypt.
    #[error("encryption failed: {0}")]
    Encryption(String),
    /// The ciphertext failed authentication (wrong key or tampered data).
    #[error("decryption failed: {0}")]
    Decryption(String),
}

/// The entered CVV was not exactly three digits.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("CVV must be exactly 3 digits")]
pub struct InvalidCvv;

/// A validated three-digit CVV.
///
/// The buffer zeroizes on drop and never appears in `Debug` output. The CVV
/// is only ever consumed transiently, to compute the reveal gate or derive a
/// sealing key; nothing in the crate stores one past the operation using it.
pub struct Cvv(Zeroizing<String>);

impl Cvv {
    /// Parses user input into a CVV, keeping only ASCII digits.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidCvv`] unless exactly three digits remain after
    /// stripping separators and other non-digit characters.
    pub fn parse(input: &str) -> Result<Self, InvalidCvv> {
        let digits: String = input.chars().filter(char::is_ascii_digit).collect();
        if digits.len() == 3 {
            Ok(Self(Zeroizing::new(digits)))
        } else {
            Err(InvalidCvv)
        }
    }

    /// The string hashed to gate reveal attempts.
    pub(crate) fn gate_string(&self) -> Zeroizing<String> {
        Zeroizing::new(format!("cvv:{}", self.0.as_str()))
    }

    /// Raw digits, used as the key-derivation password.
    pub(crate) fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for Cvv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cvv([REDACTED])")
    }
}

/// A 256-bit sealing key derived from a CVV and a per-record salt.
///
/// The key is zeroized when dropped and is deliberately opaque: it can only
/// be produced by [`CryptoSuite::derive_seal_key`] and consumed by
/// [`CryptoSuite::seal`] / [`CryptoSuite::open`].
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SealKey([u8; KEY_LEN]);

impl SealKey {
    /// Wraps raw key bytes produced by a key-derivation function.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes for the AEAD backend.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SealKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SealKey([REDACTED])")
    }
}

/// Platform cryptographic primitives used by the vault.
///
/// Implementations must be `Send + Sync` so a single suite can be shared by
/// the vault and the flows that borrow it.
pub trait CryptoSuite: Send + Sync {
    /// Fills `dest` with cryptographically secure random bytes.
    fn fill_random(&self, dest: &mut [u8]);

    /// Hex digest of the UTF-8 encoding of `text`.
    ///
    /// Never fails: platforms without a cryptographic subsystem answer with
    /// the non-cryptographic fallback digest instead of an error, trading
    /// strength for availability. Used purely as an equality gate.
    fn hash_hex(&self, text: &str) -> String;

    /// Derives the sealing key for `cvv` under `salt`.
    ///
    /// Answers `None` when the platform cannot do authenticated encryption;
    /// callers treat that as a capability gap, not a failure.
    fn derive_seal_key(&self, cvv: &Cvv, salt: &Salt) -> Option<SealKey>;

    /// Encrypts `plaintext` under `key` and `iv`, returning ciphertext with
    /// the authentication tag appended.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Unavailable`] on platforms without AEAD
    /// support, or [`CryptoError::Encryption`] if the backend rejects the
    /// operation.
    fn seal(&self, key: &SealKey, iv: &Iv, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Decrypts `ciphertext` (tag appended) under `key` and `iv`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Unavailable`] on platforms without AEAD
    /// support, or [`CryptoError::Decryption`] when authentication fails.
    /// A wrong key always fails verifiably; garbage is never returned.
    fn open(&self, key: &SealKey, iv: &Iv, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Generates a fresh record identifier.
    ///
    /// `now_ms` (epoch milliseconds) feeds the degraded fallback format and
    /// is ignored by platforms with proper random identifiers.
    fn new_card_id(&self, now_ms: u64) -> CardId;
}

/// Full-strength suite backed by the RustCrypto primitives.
#[derive(Debug, Clone, Copy)]
pub struct StandardCrypto {
    kdf_rounds: u32,
}

impl StandardCrypto {
    /// Suite with the production work factor ([`KDF_ROUNDS`]).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            kdf_rounds: KDF_ROUNDS,
        }
    }

    /// Suite with a custom work factor.
    ///
    /// Exists so exhaustive tests (every possible CVV) stay fast; production
    /// callers use [`StandardCrypto::new`].
    #[must_use]
    pub const fn with_kdf_rounds(rounds: u32) -> Self {
        Self { kdf_rounds: rounds }
    }
}

impl Default for StandardCrypto {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptoSuite for StandardCrypto {
    fn fill_random(&self, dest: &mut [u8]) {
        OsRng.fill_bytes(dest);
    }

    fn hash_hex(&self, text: &str) -> String {
        hex::encode(Sha256::digest(text.as_bytes()))
    }

    fn derive_seal_key(&self, cvv: &Cvv, salt: &Salt) -> Option<SealKey> {
        let mut key = [0u8; KEY_LEN];
        pbkdf2_hmac::<Sha256>(cvv.as_bytes(), salt, self.kdf_rounds, &mut key);
        Some(SealKey::from_bytes(key))
    }

    fn seal(&self, key: &SealKey, iv: &Iv, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;
        cipher
            .encrypt(Nonce::from_slice(iv), plaintext)
            .map_err(|e| CryptoError::Encryption(e.to_string()))
    }

    fn open(&self, key: &SealKey, iv: &Iv, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::Decryption(e.to_string()))?;
        cipher
            .decrypt(Nonce::from_slice(iv), ciphertext)
            .map_err(|e| CryptoError::Decryption(e.to_string()))
    }

    fn new_card_id(&self, _now_ms: u64) -> CardId {
        CardId::new(Uuid::new_v4().to_string())
    }
}

/// Suite for platforms without a cryptographic subsystem.
///
/// Hashing degrades to a 32-bit FNV-1a digest and key derivation answers
/// `None`, so records enrolled through this suite carry no sealed payload and
/// can never be revealed. This is an accepted, documented weakening chosen by
/// the host at construction time; nothing falls back to it at runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct DegradedCrypto;

impl CryptoSuite for DegradedCrypto {
    fn fill_random(&self, dest: &mut [u8]) {
        // Entropy for identifiers is still available; only the AEAD and
        // digest primitives are modeled as missing.
        OsRng.fill_bytes(dest);
    }

    fn hash_hex(&self, text: &str) -> String {
        fnv1a_hex(text)
    }

    fn derive_seal_key(&self, _cvv: &Cvv, _salt: &Salt) -> Option<SealKey> {
        None
    }

    fn seal(&self, _key: &SealKey, _iv: &Iv, _plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Err(CryptoError::Unavailable)
    }

    fn open(&self, _key: &SealKey, _iv: &Iv, _ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Err(CryptoError::Unavailable)
    }

    fn new_card_id(&self, now_ms: u64) -> CardId {
        let mut suffix = [0u8; 6];
        self.fill_random(&mut suffix);
        CardId::new(format!("card_{now_ms}_{}", hex::encode(suffix)))
    }
}

/// 32-bit FNV-1a over the UTF-8 bytes of `text`, as eight lowercase hex
/// characters. The degraded digest behind [`DegradedCrypto::hash_hex`].
fn fnv1a_hex(text: &str) -> String {
    let mut acc: u32 = 0x811c_9dc5;
    for byte in text.bytes() {
        acc ^= u32::from(byte);
        acc = acc.wrapping_mul(0x0100_0193);
    }
    format!("{acc:08x}")
}

/// Encodes bytes for a storage-bound field (standard base64 alphabet).
#[must_use]
pub fn to_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decodes a storage field back into bytes.
///
/// Answers `None` on malformed input; callers treat that as record-level
/// corruption rather than an error.
#[must_use]
pub fn from_base64(text: &str) -> Option<Vec<u8>> {
    BASE64.decode(text).ok()
}

/// Decodes a storage field that must hold exactly `N` bytes.
pub(crate) fn from_base64_exact<const N: usize>(text: &str) -> Option<[u8; N]> {
    from_base64(text)?.try_into().ok()
}

/// Whether the gate digest for `cvv` equals a stored hash, compared in
/// constant time so timing reveals nothing about how much of it matched.
pub(crate) fn gate_matches<C: CryptoSuite>(crypto: &C, cvv: &Cvv, stored: &str) -> bool {
    let gate = crypto.hash_hex(&cvv.gate_string());
    bool::from(gate.as_bytes().ct_eq(stored.as_bytes()))
}
