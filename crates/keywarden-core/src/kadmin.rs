// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! KDC admin capability consumed by the credential strategies.
//!
//! The actual kadmin transport lives outside this crate; everything here is
//! expressed against the [`KdcAdmin`] trait. [`MockKdcAdmin`] provides a
//! small in-memory KDC model for tests.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::KdcError;
use crate::material::KeyMetadata;

/// A credential presented to the initial-credential verification probe.
#[derive(Debug, Clone, Copy)]
pub enum Credential<'a> {
	Password(&'a str),
	Keytab(&'a [u8]),
}

/// Administrative capability against the KDC's principal database.
///
/// All operations are expected to be idempotent at the call site:
/// `create_principal` on an existing principal and `enable_principal` on an
/// enabled one must both succeed.
#[async_trait]
pub trait KdcAdmin: Send + Sync {
	async fn principal_exists(&self, principal: &str) -> Result<bool, KdcError>;

	async fn create_principal(&self, principal: &str) -> Result<(), KdcError>;

	async fn enable_principal(&self, principal: &str) -> Result<(), KdcError>;

	async fn disable_principal(&self, principal: &str) -> Result<(), KdcError>;

	/// Change the principal's password and report the resulting key state.
	async fn set_password(&self, principal: &str, password: &str)
		-> Result<KeyMetadata, KdcError>;

	/// Extract fresh keys for the given principals into a keytab container.
	///
	/// Extraction randomizes each principal's key, bumping its kvno. When
	/// `seed` holds an existing container the new entries are appended to
	/// it, so superseded versions stay usable.
	async fn extract_keytab(
		&self,
		principals: &[String],
		seed: Option<&[u8]>,
	) -> Result<(Vec<u8>, BTreeMap<String, u32>), KdcError>;

	async fn get_key_metadata(&self, principal: &str) -> Result<KeyMetadata, KdcError>;

	/// Force the principal's key version to a caller-chosen value.
	///
	/// Not every KDC honours client-specified key versions; callers must
	/// read the metadata back and check rather than trust this call.
	async fn force_key_version(&self, principal: &str, kvno: u32) -> Result<(), KdcError>;

	/// Obtain an initial credential as a verification probe.
	///
	/// Returns `Ok(false)` when the KDC rejects the credential; errors are
	/// reserved for transport and admin-surface failures.
	async fn try_authenticate(
		&self,
		principal: &str,
		credential: Credential<'_>,
	) -> Result<bool, KdcError>;
}

/// In-memory KDC model for tests.
///
/// Tracks per-principal key versions, key bytes, and passwords, and records
/// every mutating call so tests can assert that no-op reconciliations leave
/// the KDC untouched.
#[derive(Debug, Default)]
pub struct MockKdcAdmin {
	state: std::sync::Mutex<MockState>,
}

#[derive(Debug)]
struct MockState {
	principals: BTreeMap<String, MockPrincipal>,
	calls: Vec<String>,
	etypes: Vec<i32>,
	refuse_forced_kvno: bool,
}

impl Default for MockState {
	fn default() -> Self {
		Self {
			principals: BTreeMap::new(),
			calls: Vec::new(),
			etypes: vec![17, 18],
			refuse_forced_kvno: false,
		}
	}
}

#[derive(Debug, Clone)]
struct MockPrincipal {
	enabled: bool,
	kvno: u32,
	key: Vec<u8>,
	password: Option<String>,
}

fn random_key() -> Vec<u8> {
	use rand::RngCore;
	let mut key = vec![0u8; 16];
	rand::thread_rng().fill_bytes(&mut key);
	key
}

impl MockKdcAdmin {
	pub fn new() -> Self {
		Self::default()
	}

	/// Make subsequent `force_key_version` calls silently ineffective,
	/// modelling a KDC that refuses client-chosen key versions.
	pub fn refuse_forced_kvno(&self) {
		self.state.lock().unwrap().refuse_forced_kvno = true;
	}

	/// Every mutating call made so far, in order.
	pub fn calls(&self) -> Vec<String> {
		self.state.lock().unwrap().calls.clone()
	}

	pub fn principal_kvno(&self, principal: &str) -> Option<u32> {
		self
			.state
			.lock()
			.unwrap()
			.principals
			.get(principal)
			.map(|p| p.kvno)
	}

	pub fn is_enabled(&self, principal: &str) -> bool {
		self
			.state
			.lock()
			.unwrap()
			.principals
			.get(principal)
			.is_some_and(|p| p.enabled)
	}

	pub fn password_of(&self, principal: &str) -> Option<String> {
		self
			.state
			.lock()
			.unwrap()
			.principals
			.get(principal)
			.and_then(|p| p.password.clone())
	}
}

#[async_trait]
impl KdcAdmin for MockKdcAdmin {
	async fn principal_exists(&self, principal: &str) -> Result<bool, KdcError> {
		Ok(self.state.lock().unwrap().principals.contains_key(principal))
	}

	async fn create_principal(&self, principal: &str) -> Result<(), KdcError> {
		let mut state = self.state.lock().unwrap();
		state.calls.push(format!("create {principal}"));
		state
			.principals
			.entry(principal.to_string())
			.or_insert_with(|| MockPrincipal {
				enabled: true,
				kvno: 1,
				key: random_key(),
				password: None,
			});
		Ok(())
	}

	async fn enable_principal(&self, principal: &str) -> Result<(), KdcError> {
		let mut state = self.state.lock().unwrap();
		state.calls.push(format!("enable {principal}"));
		match state.principals.get_mut(principal) {
			Some(entry) => {
				entry.enabled = true;
				Ok(())
			}
			None => Err(KdcError::Admin {
				message: format!("no such principal: {principal}"),
			}),
		}
	}

	async fn disable_principal(&self, principal: &str) -> Result<(), KdcError> {
		let mut state = self.state.lock().unwrap();
		state.calls.push(format!("disable {principal}"));
		// Disabling an unknown principal is a no-op, matching kadmin
		// behaviour for already-removed accounts.
		if let Some(entry) = state.principals.get_mut(principal) {
			entry.enabled = false;
		}
		Ok(())
	}

	async fn set_password(
		&self,
		principal: &str,
		password: &str,
	) -> Result<KeyMetadata, KdcError> {
		let mut state = self.state.lock().unwrap();
		state.calls.push(format!("set_password {principal}"));
		let etypes = state.etypes.clone();
		let entry = state
			.principals
			.get_mut(principal)
			.ok_or_else(|| KdcError::Admin {
				message: format!("no such principal: {principal}"),
			})?;
		entry.kvno += 1;
		entry.key = random_key();
		entry.password = Some(password.to_string());
		Ok(KeyMetadata::new(entry.kvno, etypes))
	}

	async fn extract_keytab(
		&self,
		principals: &[String],
		seed: Option<&[u8]>,
	) -> Result<(Vec<u8>, BTreeMap<String, u32>), KdcError> {
		use crate::keytab::{Keytab, KeytabEntry};

		let mut state = self.state.lock().unwrap();
		state
			.calls
			.push(format!("extract_keytab {}", principals.join(",")));

		let mut keytab = match seed {
			Some(bytes) => Keytab::parse(bytes).map_err(|e| KdcError::Admin {
				message: format!("bad seed keytab: {e}"),
			})?,
			None => Keytab::default(),
		};

		let mut keys = BTreeMap::new();
		for principal in principals {
			let entry = state
				.principals
				.get_mut(principal)
				.ok_or_else(|| KdcError::Admin {
					message: format!("no such principal: {principal}"),
				})?;
			entry.kvno += 1;
			entry.key = random_key();
			entry.password = None;
			keytab.entries.push(KeytabEntry {
				principal: principal.clone(),
				kvno: entry.kvno,
				timestamp: chrono::Utc::now(),
				enctype: 18,
				key: entry.key.clone(),
			});
			keys.insert(principal.clone(), entry.kvno);
		}

		let bytes = keytab.to_bytes().map_err(|e| KdcError::Admin {
			message: format!("unserializable keytab: {e}"),
		})?;
		Ok((bytes, keys))
	}

	async fn get_key_metadata(&self, principal: &str) -> Result<KeyMetadata, KdcError> {
		let state = self.state.lock().unwrap();
		let entry = state.principals.get(principal).ok_or_else(|| KdcError::Admin {
			message: format!("no such principal: {principal}"),
		})?;
		Ok(KeyMetadata::new(entry.kvno, state.etypes.clone()))
	}

	async fn force_key_version(&self, principal: &str, kvno: u32) -> Result<(), KdcError> {
		let mut state = self.state.lock().unwrap();
		state.calls.push(format!("force_kvno {principal} {kvno}"));
		if state.refuse_forced_kvno {
			return Ok(());
		}
		match state.principals.get_mut(principal) {
			Some(entry) => {
				entry.kvno = kvno;
				Ok(())
			}
			None => Err(KdcError::Admin {
				message: format!("no such principal: {principal}"),
			}),
		}
	}

	async fn try_authenticate(
		&self,
		principal: &str,
		credential: Credential<'_>,
	) -> Result<bool, KdcError> {
		let state = self.state.lock().unwrap();
		let Some(entry) = state.principals.get(principal) else {
			return Ok(false);
		};
		if !entry.enabled {
			return Ok(false);
		}

		match credential {
			Credential::Password(password) => {
				Ok(entry.password.as_deref() == Some(password))
			}
			Credential::Keytab(bytes) => {
				let Ok(keytab) = crate::keytab::Keytab::parse(bytes) else {
					return Ok(false);
				};
				Ok(keytab.entries.iter().any(|kte| {
					kte.principal == principal && kte.kvno == entry.kvno && kte.key == entry.key
				}))
			}
		}
	}
}
