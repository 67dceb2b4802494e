//! Client-side payment-card vault with CVV-gated reveal.
//!
//! Cards are stored locally, one JSON list per user, with only the last four
//! digits and a display brand in the clear. The full number, holder and
//! expiry are sealed with AES-GCM under a key derived from the card's CVV;
//! re-entering the CVV is the only way to see them again, and a one-way hash
//! of the CVV gates each attempt so the common wrong-CVV case never reaches
//! the AEAD. Legacy records are salvaged on load: a usable `last4` is kept,
//! missing identifiers are backfilled, and anything unusable is dropped.
//!
//! Hosts inject two platform seams: a [`KeyValueStore`] for persistence and
//! a [`CryptoSuite`] for primitives ([`StandardCrypto`] on capable
//! platforms, [`DegradedCrypto`] where the cryptographic subsystem is
//! missing). Everything else is plain state: [`CardVault`] owns the record
//! list, [`CardEntry`] validates and seals new cards, [`RevealProtocol`]
//! drives the CVV challenge, and [`CardSelection`] tracks which card pays.

mod crypto;
pub use crypto::*;

mod entry;
pub use entry::*;

mod migration;
pub use migration::*;

mod record;
pub use record::*;

mod reveal;
pub use reveal::*;

mod selection;
pub use selection::*;

mod storage;
pub use storage::*;

mod vault;
pub use vault::*;
