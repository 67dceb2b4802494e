//! End-to-end integration tests for the card vault flows.

mod common;

use std::sync::Arc;

use cardvault_core::{
    CardId, CardSelection, CardVault, DegradedCrypto, KeyValueStore, LoadSource, MemoryStore,
    NoCardAvailable, RevealError, RevealProtocol, RevealState, StorageScope,
};

fn stored_json(store: &MemoryStore, key: &str) -> serde_json::Value {
    let text = store
        .get(key)
        .expect("store readable")
        .expect("key present");
    serde_json::from_str(&text).expect("stored text is JSON")
}

#[test]
fn test_enroll_persist_reveal_end_to_end() {
    let store = Arc::new(MemoryStore::new());
    let crypto = common::test_crypto();
    let scope = StorageScope::for_user("7");

    let (mut vault, summary) =
        CardVault::load(Arc::clone(&store), Arc::clone(&crypto), scope.clone(), common::NOW);
    assert_eq!(summary.source, LoadSource::Empty);

    // Nothing enrolled yet: payment is refused with the add-a-card prompt.
    let selection = CardSelection::new(Arc::clone(&store), scope);
    let view = selection.sync(&vault);
    assert!(!view.payment_enabled);
    assert_eq!(
        selection
            .binding_for_payment(&vault)
            .expect_err("no card yet"),
        NoCardAvailable
    );

    common::enroll(&mut vault, &crypto, common::sample_entry());

    let persisted = stored_json(&store, "userCards_7");
    let records = persisted.as_array().expect("an array");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["last4"], "1111");
    assert_eq!(records[0]["brand"], "Bank card");
    let mut keys: Vec<_> = records[0]
        .as_object()
        .expect("an object")
        .keys()
        .map(String::as_str)
        .collect();
    keys.sort_unstable();
    assert_eq!(
        keys,
        ["brand", "created_at", "cvv_hash", "enc", "enc_iv", "enc_salt", "id", "last4"]
    );
    let text = persisted.to_string();
    assert!(!text.contains("4111111111111111"));
    assert!(!text.contains("IVAN"));

    // One card: auto-selected, selector hidden, payment allowed.
    let view = selection.sync(&vault);
    assert!(view.payment_enabled);
    assert!(!view.selector_visible);
    let binding = selection
        .binding_for_payment(&vault)
        .expect("one card available");
    assert_eq!(binding.card_last4.as_str(), "1111");
    assert_eq!(&binding.card_id, vault.get(0).expect("enrolled").id());

    let mut flow = RevealProtocol::new();
    let hint = flow.open(&vault, 0).expect("record exists");
    assert_eq!(hint.as_str(), "1111");

    flow.set_input("000");
    assert_eq!(
        flow.submit(&mut vault).expect_err("wrong CVV"),
        RevealError::WrongCvv
    );
    assert_eq!(flow.state(), RevealState::AwaitingCvv);

    flow.set_input("123");
    let payload = flow.submit(&mut vault).expect("correct CVV reveals");
    assert_eq!(payload.number, "4111111111111111");
    assert_eq!(payload.holder, "IVAN PETROV");
    assert_eq!(payload.expiry, "09/30");
    assert_eq!(flow.state(), RevealState::Revealed);

    // Reveals are transient: the next rehydration drops them.
    let reloaded = vault.reload(common::NOW + 1);
    assert_eq!(reloaded.source, LoadSource::Primary);
    let record = vault.get(0).expect("still stored");
    assert!(record.revealed().is_none());
    assert!(record.supports_reveal());
}

#[test]
fn test_entry_keeps_only_the_last_four_digits() {
    for number in [
        "4111111111111111",
        "5105105105105100",
        "2200330044005566",
        "9999888877776666",
    ] {
        let store = Arc::new(MemoryStore::new());
        let crypto = common::test_crypto();
        let mut vault = CardVault::new(
            Arc::clone(&store),
            Arc::clone(&crypto),
            StorageScope::for_user("7"),
        );
        common::enroll(
            &mut vault,
            &crypto,
            common::entry(number, "ivan petrov", "0930", "123"),
        );

        let expected = &number[number.len() - 4..];
        assert_eq!(vault.get(0).expect("enrolled").last4().as_str(), expected);

        let text = store
            .get("userCards_7")
            .expect("store readable")
            .expect("list persisted");
        assert!(
            !text.contains(number),
            "full number {number} must never be persisted"
        );
    }
}

#[test]
fn test_legacy_list_migrates_on_first_load() {
    let store = Arc::new(MemoryStore::new());
    let crypto = common::test_crypto();
    store
        .put(
            "userCards",
            r#"[
                {"number":"5555 6666 7777 8888","holder":"anna k","cvv":"321"},
                {"id":"keep-1","last4":"1111","brand":"Mir","created_at":5},
                {"id":"keep-1","last4":"2222"},
                {"holder":"no digits at all"}
            ]"#,
        )
        .expect("seed legacy list");
    store
        .put("selectedPaymentCard", "keep-1")
        .expect("seed legacy selection");

    let scope = StorageScope::for_user("9");
    let (vault, summary) = CardVault::load(
        Arc::clone(&store),
        Arc::clone(&crypto),
        scope.clone(),
        common::NOW,
    );

    assert_eq!(summary.source, LoadSource::LegacyFallback);
    assert!(!summary.corrupt);
    assert_eq!(summary.migration.kept, 2);
    assert_eq!(summary.migration.salvaged_last4, 1);
    assert_eq!(summary.migration.ids_generated, 1);
    assert_eq!(summary.migration.duplicate_ids, 1);
    assert_eq!(summary.migration.dropped, 1);

    assert_eq!(vault.len(), 2);
    assert_eq!(vault.get(0).expect("salvaged").last4().as_str(), "8888");
    assert_eq!(vault.get(1).expect("kept").brand(), "Mir");

    // The migrated list moved under the scoped key; the legacy key is gone
    // and none of the unsafe legacy fields survived.
    assert_eq!(store.get("userCards").expect("store readable"), None);
    let persisted = stored_json(&store, "userCards_9");
    let salvaged = persisted[0].as_object().expect("an object");
    assert!(salvaged.get("number").is_none());
    assert!(salvaged.get("holder").is_none());
    assert!(salvaged.get("cvv").is_none());

    // The selection preference migrates off its legacy key the same way.
    let selection = CardSelection::new(Arc::clone(&store), scope.clone());
    let view = selection.sync(&vault);
    assert_eq!(view.selected, Some(CardId::new("keep-1")));
    assert!(view.selector_visible);
    assert_eq!(
        store
            .get("selectedPaymentCard_9")
            .expect("store readable")
            .as_deref(),
        Some("keep-1")
    );
    assert_eq!(
        store.get("selectedPaymentCard").expect("store readable"),
        None
    );

    // A second load finds an already-migrated list and repairs nothing.
    let (vault, summary) = CardVault::load(store, crypto, scope, common::NOW + 60_000);
    assert_eq!(summary.source, LoadSource::Primary);
    assert!(!summary.migration.repaired_anything());
    assert_eq!(vault.len(), 2);
}

#[test]
fn test_degraded_platform_still_enrolls_and_pays() {
    let store = Arc::new(MemoryStore::new());
    let crypto = Arc::new(DegradedCrypto);
    let scope = StorageScope::for_user("7");
    let mut vault = CardVault::new(Arc::clone(&store), Arc::clone(&crypto), scope.clone());

    let record = common::sample_entry()
        .validate()
        .expect("entry validates")
        .into_record(crypto.as_ref(), common::NOW);
    vault.append(record);

    // The bare record persists without any of the crypto fields.
    let persisted = stored_json(&store, "userCards_7");
    let object = persisted[0].as_object().expect("an object");
    assert_eq!(object["last4"], "1111");
    assert!(object.get("cvv_hash").is_none());
    assert!(object.get("enc").is_none());

    // Payment still works on it; reveal never will.
    let selection = CardSelection::new(Arc::clone(&store), scope);
    let binding = selection
        .binding_for_payment(&vault)
        .expect("card available");
    assert_eq!(binding.card_last4.as_str(), "1111");

    let mut flow = RevealProtocol::new();
    flow.open(&vault, 0).expect("record exists");
    flow.set_input("123");
    assert_eq!(
        flow.submit(&mut vault).expect_err("bare records never reveal"),
        RevealError::UnsupportedRecord
    );
}

#[test]
fn test_selection_defaults_then_follows_deletions() {
    let store = Arc::new(MemoryStore::new());
    let crypto = common::test_crypto();
    let scope = StorageScope::for_user("7");
    let mut vault = CardVault::new(Arc::clone(&store), Arc::clone(&crypto), scope.clone());
    let selection = CardSelection::new(Arc::clone(&store), scope);

    common::enroll(&mut vault, &crypto, common::sample_entry());
    common::enroll(
        &mut vault,
        &crypto,
        common::entry("5105105105105100", "anna karenina", "1127", "456"),
    );

    // No prior preference: the first card wins and the choice persists.
    let first_id = vault.get(0).expect("present").id().clone();
    let view = selection.sync(&vault);
    assert_eq!(view.selected, Some(first_id.clone()));
    assert!(view.selector_visible);
    assert_eq!(
        store
            .get("selectedPaymentCard_7")
            .expect("store readable")
            .as_deref(),
        Some(first_id.as_str())
    );

    // An explicit switch is honored...
    let second_id = vault.get(1).expect("present").id().clone();
    assert!(selection.select(&vault, &second_id));
    let binding = selection
        .binding_for_payment(&vault)
        .expect("card available");
    assert_eq!(binding.card_id, second_id);
    assert_eq!(binding.card_last4.as_str(), "5100");

    // ...until its record is deleted, after which the first card returns.
    vault.delete(1).expect("second card removed");
    let view = selection.sync(&vault);
    assert_eq!(view.selected, Some(first_id.clone()));
    assert!(!view.selector_visible, "one card left hides the selector");
    assert_eq!(
        store
            .get("selectedPaymentCard_7")
            .expect("store readable")
            .as_deref(),
        Some(first_id.as_str())
    );
}

#[test]
fn test_each_reload_trusts_current_storage() {
    let store = Arc::new(MemoryStore::new());
    let crypto = common::test_crypto();
    let scope = StorageScope::for_user("7");

    // Two vaults over one store, like two tabs sharing local storage.
    let (mut tab_a, _) = CardVault::load(
        Arc::clone(&store),
        Arc::clone(&crypto),
        scope.clone(),
        common::NOW,
    );
    let (mut tab_b, _) =
        CardVault::load(Arc::clone(&store), Arc::clone(&crypto), scope, common::NOW);

    common::enroll(&mut tab_a, &crypto, common::sample_entry());
    assert!(tab_b.is_empty(), "the other tab has not reloaded yet");

    tab_b.reload(common::NOW + 1);
    assert_eq!(tab_b.len(), 1);

    tab_b.delete(0).expect("record removed");
    tab_a.reload(common::NOW + 2);
    assert!(tab_a.is_empty(), "storage contents win over in-memory state");
}
