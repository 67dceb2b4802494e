//! Forward migration of stored card lists.
//!
//! Storage contents are never deserialized straight into [`CardRecord`]s.
//! Every load passes the raw JSON values through [`migrate`], which repairs
//! what it can (missing ids, `last4` recoverable from a legacy raw number),
//! drops what it cannot, and collapses duplicate ids, so one malformed legacy
//! record can never poison the rest of the list. Unsafe legacy fields (raw
//! number, holder, CVV) are never copied onto the migrated record.

use std::collections::HashSet;

use serde_json::Value;

use crate::crypto::CryptoSuite;
use crate::record::{CardId, CardRecord, Last4, SealedPayload};

/// What a migration pass did to the raw stored list.
///
/// Cleanup is best-effort and silent toward the user; the counts exist so
/// hosts can log them and tests can assert on them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Records kept, possibly after repair.
    pub kept: usize,
    /// Records whose `last4` was recovered from a legacy raw number field.
    pub salvaged_last4: usize,
    /// Records that were assigned a freshly generated id.
    pub ids_generated: usize,
    /// Records dropped because no usable `last4` could be derived.
    pub dropped: usize,
    /// Records dropped because an earlier record already used their id.
    pub duplicate_ids: usize,
}

impl MigrationReport {
    /// Whether the pass changed anything beyond re-encoding.
    #[must_use]
    pub const fn repaired_anything(&self) -> bool {
        self.salvaged_last4 > 0
            || self.ids_generated > 0
            || self.dropped > 0
            || self.duplicate_ids > 0
    }
}

/// Migrates raw stored values into well-formed records.
///
/// `now_ms` stamps records that lack a usable `created_at` and feeds
/// generated fallback ids on degraded platforms.
pub(crate) fn migrate<C: CryptoSuite>(
    raw: &[Value],
    crypto: &C,
    now_ms: u64,
) -> (Vec<CardRecord>, MigrationReport) {
    let mut report = MigrationReport::default();
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut records = Vec::new();

    for value in raw {
        if !value.is_object() {
            report.dropped += 1;
            continue;
        }

        let last4 = if let Some(last4) =
            Last4::from_text(&string_of(value, "last4").unwrap_or_default())
        {
            last4
        } else if let Some(salvaged) =
            Last4::from_text(&string_of(value, "number").unwrap_or_default())
        {
            report.salvaged_last4 += 1;
            salvaged
        } else {
            report.dropped += 1;
            continue;
        };

        let id = match string_of(value, "id").map(|id| id.trim().to_string()) {
            Some(id) if !id.is_empty() => CardId::new(id),
            _ => {
                report.ids_generated += 1;
                crypto.new_card_id(now_ms)
            }
        };
        if !seen_ids.insert(id.as_str().to_string()) {
            report.duplicate_ids += 1;
            continue;
        }

        let brand = string_of(value, "brand")
            .filter(|label| !label.is_empty())
            .or_else(|| string_of(value, "card_brand").filter(|label| !label.is_empty()));

        let created_at = u64_of(value, "created_at")
            .filter(|&ms| ms > 0)
            .unwrap_or(now_ms);

        let cvv_hash = string_of(value, "cvv_hash")
            .map(|hash| hash.trim().to_string())
            .filter(|hash| !hash.is_empty());

        report.kept += 1;
        records.push(CardRecord::new(
            id,
            last4,
            brand,
            created_at,
            cvv_hash,
            sealed_of(value),
        ));
    }

    if report.repaired_anything() {
        log::debug!(
            "card migration repaired stored list: kept {}, salvaged {}, new ids {}, dropped {}, duplicates {}",
            report.kept,
            report.salvaged_last4,
            report.ids_generated,
            report.dropped,
            report.duplicate_ids,
        );
    }
    (records, report)
}

/// The sealed triple is all-or-nothing: a partial triple is stripped rather
/// than carried forward as corrupt data.
fn sealed_of(value: &Value) -> Option<SealedPayload> {
    let enc = string_of(value, "enc").filter(|field| !field.is_empty())?;
    let enc_iv = string_of(value, "enc_iv").filter(|field| !field.is_empty())?;
    let enc_salt = string_of(value, "enc_salt").filter(|field| !field.is_empty())?;
    Some(SealedPayload {
        enc,
        enc_iv,
        enc_salt,
    })
}

/// Reads `key` as text, coercing stored numbers the way the legacy client's
/// string conversion did. Other shapes answer `None`.
fn string_of(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn u64_of(value: &Value, key: &str) -> Option<u64> {
    value.get(key)?.as_u64()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::crypto::StandardCrypto;

    const NOW: u64 = 1_700_000_000_000;

    fn run(raw: Value) -> (Vec<CardRecord>, MigrationReport) {
        let array = raw.as_array().expect("test input is an array").clone();
        migrate(&array, &StandardCrypto::new(), NOW)
    }

    #[test]
    fn salvages_last4_from_a_legacy_raw_number() {
        let (records, report) = run(json!([
            { "id": "a", "number": "4111 1111 1111 1234", "holder": "IVAN" }
        ]));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].last4().as_str(), "1234");
        assert_eq!(report.salvaged_last4, 1);
        assert_eq!(report.kept, 1);
    }

    #[test]
    fn unsafe_legacy_fields_never_survive() {
        let (records, _) = run(json!([
            { "id": "a", "number": "4111111111111234", "holder": "IVAN", "cvv": "123" }
        ]));
        let value = serde_json::to_value(&records).expect("serializable");
        let rendered = value.to_string();
        assert!(!rendered.contains("4111111111111234"));
        assert!(!rendered.contains("IVAN"));
        assert!(!rendered.contains("\"cvv\""));
    }

    #[test]
    fn drops_records_without_a_usable_last4() {
        let (records, report) = run(json!([
            { "id": "a", "last4": "12" },
            { "id": "b", "number": "12" },
            "not even an object",
            { "id": "keep", "last4": "1234" }
        ]));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id().as_str(), "keep");
        assert_eq!(report.dropped, 3);
    }

    #[test]
    fn collapses_duplicate_ids_to_the_first_occurrence() {
        let (records, report) = run(json!([
            { "id": "dup", "last4": "1111", "brand": "First" },
            { "id": "dup", "last4": "2222", "brand": "Second" },
            { "id": "other", "last4": "3333" }
        ]));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].brand(), "First");
        assert_eq!(report.duplicate_ids, 1);
    }

    #[test]
    fn generates_distinct_ids_for_records_missing_one() {
        let (records, report) = run(json!([
            { "last4": "1111" },
            { "id": "   ", "last4": "2222" }
        ]));
        assert_eq!(report.ids_generated, 2);
        assert_ne!(records[0].id(), records[1].id());
        assert!(!records[0].id().as_str().is_empty());
    }

    #[test]
    fn numeric_ids_and_last4_are_coerced_like_the_legacy_client() {
        let (records, _) = run(json!([
            { "id": 77, "last4": 9999 }
        ]));
        assert_eq!(records[0].id().as_str(), "77");
        assert_eq!(records[0].last4().as_str(), "9999");
    }

    #[test]
    fn legacy_card_brand_field_is_honored() {
        let (records, _) = run(json!([
            { "id": "a", "last4": "1111", "card_brand": "Mir" },
            { "id": "b", "last4": "2222", "brand": "", "card_brand": "Visa" },
            { "id": "c", "last4": "3333" }
        ]));
        assert_eq!(records[0].brand(), "Mir");
        assert_eq!(records[1].brand(), "Visa");
        assert_eq!(records[2].brand(), crate::record::DEFAULT_BRAND);
    }

    #[test]
    fn missing_or_zero_created_at_is_stamped_with_now() {
        let (records, _) = run(json!([
            { "id": "a", "last4": "1111" },
            { "id": "b", "last4": "2222", "created_at": 0 },
            { "id": "c", "last4": "3333", "created_at": 123 }
        ]));
        assert_eq!(records[0].created_at(), NOW);
        assert_eq!(records[1].created_at(), NOW);
        assert_eq!(records[2].created_at(), 123);
    }

    #[test]
    fn crypto_fields_survive_and_partial_triples_are_stripped() {
        let (records, _) = run(json!([
            {
                "id": "full", "last4": "1111", "cvv_hash": "abc",
                "enc": "AQID", "enc_iv": "BBBB", "enc_salt": "CCCC"
            },
            { "id": "partial", "last4": "2222", "cvv_hash": "def", "enc": "AQID" }
        ]));
        assert!(records[0].supports_reveal());
        assert!(!records[1].supports_reveal());
        let value = serde_json::to_value(&records[1]).expect("serializable");
        assert!(value.get("enc").is_none());
        assert_eq!(value["cvv_hash"], "def");
    }

    #[test]
    fn migration_is_idempotent_over_its_own_output() {
        let (first, first_report) = run(json!([
            { "id": "a", "number": "4111111111111234", "cvv_hash": "h1" },
            { "last4": "5678", "brand": "Mir", "created_at": 5,
              "enc": "AQID", "enc_iv": "BBBB", "enc_salt": "CCCC", "cvv_hash": "h2" }
        ]));
        assert!(first_report.repaired_anything());

        let reencoded = serde_json::to_value(&first).expect("serializable");
        let array = reencoded.as_array().expect("an array").clone();
        let (second, second_report) = migrate(&array, &StandardCrypto::new(), NOW + 1);

        assert_eq!(
            serde_json::to_value(&second).expect("serializable"),
            reencoded,
            "a second pass must not change anything"
        );
        assert!(!second_report.repaired_anything());
        assert_eq!(second_report.kept, 2);
    }
}
