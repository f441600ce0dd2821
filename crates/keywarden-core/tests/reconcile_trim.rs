// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Trim-tick scenarios: marker management and write-back behaviour.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use keywarden_core::keytab::{Keytab, KeytabEntry};
use keywarden_core::{
	CredKind, Declaration, MemoryBackends, MockKdcAdmin, OperatorConfig, Reconciler,
	SecretLocation,
};

const PRINCIPAL: &str = "svc@EXAMPLE.COM";

fn keytab_decl(secret: SecretLocation) -> Declaration {
	Declaration {
		principals: BTreeSet::from([PRINCIPAL.to_string()]),
		kind: CredKind::RotatingKeytab,
		preset: false,
		keep_old: false,
		secret: Some(secret),
	}
}

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

fn entry(kvno: u32, age: Duration) -> KeytabEntry {
	KeytabEntry {
		principal: PRINCIPAL.to_string(),
		kvno,
		timestamp: Utc::now() - age,
		enctype: 18,
		key: vec![kvno as u8; 8],
	}
}

fn harness() -> (Arc<MemoryBackends>, Reconciler) {
	let kadm = Arc::new(MockKdcAdmin::new());
	let stores = Arc::new(MemoryBackends::new());
	let reconciler = Reconciler::new(kadm, stores.clone(), OperatorConfig::default());
	(stores, reconciler)
}

#[tokio::test]
async fn non_keytab_declarations_clear_the_marker() {
	let (_, reconciler) = harness();
	let decl = Declaration {
		principals: BTreeSet::from([PRINCIPAL.to_string()]),
		kind: CredKind::Password,
		preset: false,
		keep_old: false,
		secret: Some(local("passwords")),
	};

	let outcome = reconciler.trim_keys(&decl).await.unwrap();
	assert_eq!(outcome.has_old_keys, Some(false));
	assert!(!outcome.clear_force);
}

#[tokio::test]
async fn unreadable_keytab_clears_the_marker() {
	let (stores, reconciler) = harness();
	let decl = keytab_decl(sealed("sealed-keytabs"));
	let store = stores.store(decl.secret.as_ref().unwrap());
	store.set_value(b"unreachable".to_vec());

	let outcome = reconciler.trim_keys(&decl).await.unwrap();
	assert_eq!(outcome.has_old_keys, Some(false));
	assert_eq!(store.writes(), 0);
}

#[tokio::test]
async fn missing_keytab_clears_the_marker() {
	let (stores, reconciler) = harness();
	let decl = keytab_decl(local("keytabs"));
	let store = stores.store(decl.secret.as_ref().unwrap());

	let outcome = reconciler.trim_keys(&decl).await.unwrap();
	assert_eq!(outcome.has_old_keys, Some(false));
	assert_eq!(store.writes(), 0);
}

#[tokio::test]
async fn expired_entries_are_pruned_and_written_back() {
	let (stores, reconciler) = harness();
	let decl = keytab_decl(local("keytabs"));
	let store = stores.store(decl.secret.as_ref().unwrap());

	// kvno 1 was replaced two days ago; the default window is one day.
	let keytab = Keytab {
		entries: vec![
			entry(1, Duration::days(3)),
			entry(2, Duration::days(2)),
		],
	};
	store.set_value(keytab.to_bytes().unwrap());

	let outcome = reconciler.trim_keys(&decl).await.unwrap();
	assert_eq!(outcome.has_old_keys, Some(false));
	assert_eq!(store.writes(), 1);

	let pruned = Keytab::parse(&store.value().unwrap()).unwrap();
	assert_eq!(pruned.entries.len(), 1);
	assert_eq!(pruned.entries[0].kvno, 2);
}

#[tokio::test]
async fn entries_inside_the_window_are_kept_and_keep_the_marker() {
	let (stores, reconciler) = harness();
	let decl = keytab_decl(local("keytabs"));
	let store = stores.store(decl.secret.as_ref().unwrap());

	// kvno 1 was replaced ten minutes ago; still inside the window.
	let keytab = Keytab {
		entries: vec![
			entry(1, Duration::hours(1)),
			entry(2, Duration::minutes(10)),
		],
	};
	store.set_value(keytab.to_bytes().unwrap());

	let outcome = reconciler.trim_keys(&decl).await.unwrap();
	assert_eq!(outcome.has_old_keys, Some(true));
	assert_eq!(store.writes(), 0, "unchanged keytab is not written back");
}

#[tokio::test]
async fn trim_tick_is_idempotent() {
	let (stores, reconciler) = harness();
	let decl = keytab_decl(local("keytabs"));
	let store = stores.store(decl.secret.as_ref().unwrap());

	let keytab = Keytab {
		entries: vec![
			entry(1, Duration::days(3)),
			entry(2, Duration::days(2)),
		],
	};
	store.set_value(keytab.to_bytes().unwrap());

	reconciler.trim_keys(&decl).await.unwrap();
	let after_first = store.value().unwrap();

	let outcome = reconciler.trim_keys(&decl).await.unwrap();
	assert_eq!(outcome.has_old_keys, Some(false));
	assert_eq!(store.writes(), 1, "second tick must not write");
	assert_eq!(store.value().unwrap(), after_first);
}
