//! Common fixtures shared across integration tests.

use std::sync::Arc;

use cardvault_core::{CardEntry, CardVault, MemoryStore, StandardCrypto};

/// Fixed enrollment timestamp (epoch milliseconds).
pub const NOW: u64 = 1_725_000_000_000;

/// Production key derivation is deliberately slow; tests use a small work
/// factor so suites that derive several keys stay fast.
pub fn test_crypto() -> Arc<StandardCrypto> {
    Arc::new(StandardCrypto::with_kdf_rounds(32))
}

/// Builds a [`CardEntry`] from the given field values.
pub fn entry(number: &str, holder: &str, expiry: &str, cvv: &str) -> CardEntry {
    CardEntry {
        number: number.to_string(),
        holder: holder.to_string(),
        expiry: expiry.to_string(),
        cvv: cvv.to_string(),
    }
}

/// The card most tests enroll: Visa test number, lowercase holder, `MMYY`
/// expiry with a separator-free CVV.
pub fn sample_entry() -> CardEntry {
    entry("4111111111111111", "ivan petrov", "0930", "123")
}

/// Validates `new_card` and appends the resulting record to `vault`.
pub fn enroll(
    vault: &mut CardVault<MemoryStore, StandardCrypto>,
    crypto: &StandardCrypto,
    new_card: CardEntry,
) {
    let record = new_card
        .validate()
        .expect("entry validates")
        .into_record(crypto, NOW);
    vault.append(record);
}
