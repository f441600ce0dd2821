// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! End-to-end rekey scenarios against the in-memory KDC and store doubles.

use std::collections::BTreeSet;
use std::sync::Arc;

use keywarden_core::keytab::Keytab;
use keywarden_core::{
	Credential, CredKind, Declaration, EventReason, KdcAdmin, KeyMetadata, MemoryBackends,
	MockKdcAdmin, OperatorConfig, ReconcileError, ReconcileOutcome, Reconciler, SecretLocation,
	SecretStore, StoreError, TrustEnvelope,
};

const PRINCIPAL: &str = "svc@EXAMPLE.COM";

fn local(name: &str) -> SecretLocation {
	SecretLocation::Local {
		namespace: "factory".to_string(),
		name: name.to_string(),
		key: "svc".to_string(),
	}
}

fn sealed(name: &str) -> SecretLocation {
	SecretLocation::Sealed {
		namespace: "factory".to_string(),
		name: name.to_string(),
		key: "svc".to_string(),
		cert: "sealed-secrets/tls.crt".to_string(),
	}
}

fn decl(kind: CredKind, preset: bool, keep_old: bool, secret: SecretLocation) -> Declaration {
	Declaration {
		principals: BTreeSet::from([PRINCIPAL.to_string()]),
		kind,
		preset,
		keep_old,
		secret: Some(secret),
	}
}

fn disabled() -> Declaration {
	Declaration {
		principals: BTreeSet::new(),
		kind: CredKind::Disabled,
		preset: false,
		keep_old: false,
		secret: None,
	}
}

struct Harness {
	kadm: Arc<MockKdcAdmin>,
	stores: Arc<MemoryBackends>,
	reconciler: Reconciler,
}

fn harness() -> Harness {
	let kadm = Arc::new(MockKdcAdmin::new());
	let stores = Arc::new(MemoryBackends::new());
	let reconciler = Reconciler::new(kadm.clone(), stores.clone(), OperatorConfig::default());
	Harness {
		kadm,
		stores,
		reconciler,
	}
}

#[tokio::test]
async fn unchanged_update_is_a_complete_no_op() {
	let h = harness();
	let d = decl(CredKind::Password, false, false, local("passwords"));
	let store = h.stores.store(d.secret.as_ref().unwrap());

	let outcome = h
		.reconciler
		.rekey(Some(&d), Some(&d), EventReason::Update, false)
		.await
		.unwrap();

	assert_eq!(outcome, ReconcileOutcome::unchanged());
	assert!(h.kadm.calls().is_empty(), "no KDC traffic expected");
	assert_eq!(store.reads(), 0, "no store traffic expected");
}

#[tokio::test]
async fn creation_generates_and_stores_a_working_password() {
	let h = harness();
	let d = decl(CredKind::Password, false, false, local("passwords"));

	let outcome = h
		.reconciler
		.rekey(None, Some(&d), EventReason::Create, false)
		.await
		.unwrap();

	assert!(outcome.clear_force);
	assert_eq!(outcome.has_old_keys, Some(false));

	let store = h.stores.store(d.secret.as_ref().unwrap());
	let stored = store.value().expect("password was stored");
	let password = String::from_utf8(stored).unwrap();
	assert!(h
		.kadm
		.try_authenticate(PRINCIPAL, Credential::Password(&password))
		.await
		.unwrap());
}

#[tokio::test]
async fn switching_to_disabled_tears_the_credential_down() {
	let h = harness();
	let old = decl(CredKind::Password, false, false, local("passwords"));
	let store = h.stores.store(old.secret.as_ref().unwrap());

	h.reconciler
		.rekey(None, Some(&old), EventReason::Create, false)
		.await
		.unwrap();
	assert!(h.kadm.is_enabled(PRINCIPAL));
	assert!(store.value().is_some());

	let new = disabled();
	let outcome = h
		.reconciler
		.rekey(Some(&old), Some(&new), EventReason::Update, false)
		.await
		.unwrap();

	assert!(outcome.clear_force);
	assert!(!h.kadm.is_enabled(PRINCIPAL), "principal should be disabled");
	assert!(store.value().is_none(), "secret should be removed");
}

#[tokio::test]
async fn deletion_reason_ignores_the_passed_new_declaration() {
	let h = harness();
	let d = decl(CredKind::Password, false, false, local("passwords"));
	let store = h.stores.store(d.secret.as_ref().unwrap());

	h.reconciler
		.rekey(None, Some(&d), EventReason::Create, false)
		.await
		.unwrap();

	// The dispatcher hands the deleted object as both old and new.
	h.reconciler
		.rekey(Some(&d), Some(&d), EventReason::Delete, false)
		.await
		.unwrap();

	assert!(!h.kadm.is_enabled(PRINCIPAL));
	assert!(store.value().is_none());
}

#[tokio::test]
async fn keep_old_rotation_retains_the_previous_key_version() {
	let h = harness();
	let d = decl(CredKind::RotatingKeytab, false, true, local("keytabs"));
	let store = h.stores.store(d.secret.as_ref().unwrap());

	h.reconciler
		.rekey(None, Some(&d), EventReason::Create, false)
		.await
		.unwrap();
	let first = Keytab::parse(&store.value().unwrap()).unwrap();
	let first_kvno = first.entries[0].kvno;

	let outcome = h
		.reconciler
		.rekey(Some(&d), Some(&d), EventReason::Update, true)
		.await
		.unwrap();

	assert_eq!(outcome.has_old_keys, Some(true));
	let rotated = Keytab::parse(&store.value().unwrap()).unwrap();
	let kvnos: Vec<u32> = rotated.entries.iter().map(|e| e.kvno).collect();
	assert_eq!(kvnos, vec![first_kvno, first_kvno + 1]);
}

#[tokio::test]
async fn resume_of_identical_sealed_declaration_reads_nothing() {
	let h = harness();
	let d = decl(CredKind::Password, false, false, sealed("sealed-passwords"));
	let store = h.stores.store(d.secret.as_ref().unwrap());

	let outcome = h
		.reconciler
		.rekey(Some(&d), Some(&d), EventReason::Resume, false)
		.await
		.unwrap();

	assert_eq!(outcome, ReconcileOutcome::unchanged());
	assert!(!store.can_read());
	assert_eq!(store.reads(), 0, "resume must not touch a sealed store");
	assert!(h.kadm.calls().is_empty());
}

#[tokio::test]
async fn resume_self_heals_an_invalid_stored_password() {
	let h = harness();
	let d = decl(CredKind::Password, false, false, local("passwords"));
	let store = h.stores.store(d.secret.as_ref().unwrap());

	h.reconciler
		.rekey(None, Some(&d), EventReason::Create, false)
		.await
		.unwrap();

	// Corrupt the stored password behind the reconciler's back.
	store.set_value(b"wrong-password".to_vec());

	h.reconciler
		.rekey(Some(&d), Some(&d), EventReason::Resume, false)
		.await
		.unwrap();

	let healed = String::from_utf8(store.value().unwrap()).unwrap();
	assert_ne!(healed, "wrong-password");
	assert!(h
		.kadm
		.try_authenticate(PRINCIPAL, Credential::Password(&healed))
		.await
		.unwrap());
}

#[tokio::test]
async fn resume_with_a_valid_password_regenerates_nothing() {
	let h = harness();
	let d = decl(CredKind::Password, false, false, local("passwords"));
	let store = h.stores.store(d.secret.as_ref().unwrap());

	h.reconciler
		.rekey(None, Some(&d), EventReason::Create, false)
		.await
		.unwrap();
	let before = store.value().unwrap();
	let set_password_calls = |calls: Vec<String>| {
		calls
			.iter()
			.filter(|c| c.starts_with("set_password"))
			.count()
	};
	let baseline = set_password_calls(h.kadm.calls());

	let outcome = h
		.reconciler
		.rekey(Some(&d), Some(&d), EventReason::Resume, false)
		.await
		.unwrap();

	assert!(outcome.clear_force);
	assert_eq!(outcome.has_old_keys, None);
	assert_eq!(store.value().unwrap(), before, "material must be untouched");
	assert_eq!(set_password_calls(h.kadm.calls()), baseline);
}

#[tokio::test]
async fn force_regenerates_even_when_the_key_is_valid() {
	let h = harness();
	let d = decl(CredKind::Password, false, false, local("passwords"));
	let store = h.stores.store(d.secret.as_ref().unwrap());

	h.reconciler
		.rekey(None, Some(&d), EventReason::Create, false)
		.await
		.unwrap();
	let before = store.value().unwrap();

	let outcome = h
		.reconciler
		.rekey(Some(&d), Some(&d), EventReason::Update, true)
		.await
		.unwrap();

	assert!(outcome.clear_force);
	assert_ne!(store.value().unwrap(), before, "password must rotate");
}

#[tokio::test]
async fn preset_password_is_pushed_not_generated() {
	let h = harness();
	let d = decl(CredKind::Password, true, false, local("presets"));
	let store = h.stores.store(d.secret.as_ref().unwrap());
	store.set_value(b"externally-chosen".to_vec());

	let outcome = h
		.reconciler
		.rekey(None, Some(&d), EventReason::Create, false)
		.await
		.unwrap();

	assert!(outcome.clear_force);
	assert_eq!(
		h.kadm.password_of(PRINCIPAL).as_deref(),
		Some("externally-chosen")
	);
	assert_eq!(store.writes(), 0, "preset material is never written back");
}

#[tokio::test]
async fn preset_without_material_fails_before_any_key_change() {
	let h = harness();
	let d = decl(CredKind::Password, true, false, local("presets"));

	let err = h
		.reconciler
		.rekey(None, Some(&d), EventReason::Create, false)
		.await
		.unwrap_err();

	assert!(matches!(err, ReconcileError::MissingPresetMaterial));
	assert!(h.kadm.password_of(PRINCIPAL).is_none());
}

#[tokio::test]
async fn preset_trust_consistency_failure_stores_nothing() {
	let h = harness();
	h.kadm.create_principal(PRINCIPAL).await.unwrap();
	h.kadm.refuse_forced_kvno();

	let d = decl(CredKind::Trust, true, false, local("trusts"));
	let store = h.stores.store(d.secret.as_ref().unwrap());
	let envelope = TrustEnvelope::new(
		"peer-password".to_string(),
		&KeyMetadata::new(9, vec![17, 18]),
	);
	store.set_value(envelope.to_material().unwrap().as_bytes().to_vec());

	let err = h
		.reconciler
		.rekey(None, Some(&d), EventReason::Create, false)
		.await
		.unwrap_err();

	assert!(matches!(err, ReconcileError::Consistency { .. }));
	assert_eq!(store.writes(), 0, "no material may be updated");
}

#[tokio::test]
async fn unwritable_store_aborts_before_the_kdc_keys_change() {
	let h = harness();
	let d = decl(CredKind::Password, false, false, local("passwords"));
	let store = h.stores.store(d.secret.as_ref().unwrap());
	store.deny_writes();

	let err = h
		.reconciler
		.rekey(None, Some(&d), EventReason::Create, false)
		.await
		.unwrap_err();

	assert!(matches!(
		err,
		ReconcileError::Store(StoreError::PermissionDenied { .. })
	));
	// Principal bookkeeping is idempotent and allowed; the key itself must
	// not have been rotated.
	assert!(h
		.kadm
		.calls()
		.iter()
		.all(|call| !call.starts_with("set_password")));
}

#[tokio::test]
async fn moving_the_secret_location_removes_the_old_copy() {
	let h = harness();
	let old = decl(CredKind::Password, false, false, local("old-passwords"));
	let old_store = h.stores.store(old.secret.as_ref().unwrap());

	h.reconciler
		.rekey(None, Some(&old), EventReason::Create, false)
		.await
		.unwrap();
	assert!(old_store.value().is_some());

	let new = decl(CredKind::Password, false, false, local("new-passwords"));
	let new_store = h.stores.store(new.secret.as_ref().unwrap());

	h.reconciler
		.rekey(Some(&old), Some(&new), EventReason::Update, false)
		.await
		.unwrap();

	assert!(old_store.value().is_none(), "old location must be cleaned up");
	assert!(new_store.value().is_some(), "new location must be populated");
}

#[tokio::test]
async fn a_preset_declaration_never_owns_its_secret() {
	let h = harness();
	h.kadm.create_principal(PRINCIPAL).await.unwrap();

	let old = decl(CredKind::Password, true, false, local("presets"));
	let old_store = h.stores.store(old.secret.as_ref().unwrap());
	old_store.set_value(b"externally-chosen".to_vec());

	let new = disabled();
	h.reconciler
		.rekey(Some(&old), Some(&new), EventReason::Update, false)
		.await
		.unwrap();

	assert_eq!(old_store.removes(), 0, "preset secrets are left alone");
	assert!(old_store.value().is_some());
	assert!(!h.kadm.is_enabled(PRINCIPAL));
}
