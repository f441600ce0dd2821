// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Secret-storage abstraction.
//!
//! The reconciler decides when a location is read, written, or removed;
//! backends only move bytes. Concrete backends live in `keywarden-store`;
//! this module holds the contract plus an in-memory double for tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::declaration::SecretLocation;
use crate::error::StoreError;
use crate::material::KeyMaterial;

/// Uniform capability over one named secret value.
#[async_trait]
pub trait SecretStore: Send + Sync {
	/// Whether this backend can read material back. Only the Local backend
	/// can; sealed and remote destinations are write-only from here.
	fn can_read(&self) -> bool;

	/// Read the current material. Absent when the backend is unreadable or
	/// the value does not exist; "not found" is never an error.
	async fn maybe_read(&self) -> Result<Option<KeyMaterial>, StoreError>;

	/// Cheap writability precondition, checked before any KDC mutation so
	/// an unwritable destination aborts before KDC state is burned.
	async fn verify_writable(&self) -> Result<(), StoreError>;

	async fn write(&self, material: &KeyMaterial) -> Result<(), StoreError>;

	/// Remove the value. Removing an already-absent value succeeds.
	async fn remove(&self) -> Result<(), StoreError>;
}

/// Maps a resolved [`SecretLocation`] to the backend that serves it.
pub trait StoreProvider: Send + Sync {
	fn store_for(&self, location: &SecretLocation) -> Result<Arc<dyn SecretStore>, StoreError>;
}

/// In-memory secret store for tests.
///
/// Tracks read/write/remove counts so tests can assert that no-op
/// reconciliations perform no store traffic.
#[derive(Debug, Default)]
pub struct MemoryStore {
	inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
	value: Option<Vec<u8>>,
	readable: bool,
	deny_write: bool,
	reads: u32,
	writes: u32,
	removes: u32,
}

impl MemoryStore {
	/// A readable, writable store, like the Local backend.
	pub fn readable() -> Arc<Self> {
		let store = Self::default();
		store.inner.lock().unwrap().readable = true;
		Arc::new(store)
	}

	/// A write-only store, like the Sealed and RemoteCluster backends.
	pub fn write_only() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn set_value(&self, value: Vec<u8>) {
		self.inner.lock().unwrap().value = Some(value);
	}

	pub fn value(&self) -> Option<Vec<u8>> {
		self.inner.lock().unwrap().value.clone()
	}

	/// Make `verify_writable` and `write` fail with PermissionDenied.
	pub fn deny_writes(&self) {
		self.inner.lock().unwrap().deny_write = true;
	}

	pub fn reads(&self) -> u32 {
		self.inner.lock().unwrap().reads
	}

	pub fn writes(&self) -> u32 {
		self.inner.lock().unwrap().writes
	}

	pub fn removes(&self) -> u32 {
		self.inner.lock().unwrap().removes
	}
}

#[async_trait]
impl SecretStore for MemoryStore {
	fn can_read(&self) -> bool {
		self.inner.lock().unwrap().readable
	}

	async fn maybe_read(&self) -> Result<Option<KeyMaterial>, StoreError> {
		let mut inner = self.inner.lock().unwrap();
		inner.reads += 1;
		if !inner.readable {
			return Ok(None);
		}
		Ok(inner.value.clone().map(KeyMaterial::new))
	}

	async fn verify_writable(&self) -> Result<(), StoreError> {
		let inner = self.inner.lock().unwrap();
		if inner.deny_write {
			return Err(StoreError::PermissionDenied {
				message: "writes denied by test".to_string(),
			});
		}
		Ok(())
	}

	async fn write(&self, material: &KeyMaterial) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().unwrap();
		if inner.deny_write {
			return Err(StoreError::PermissionDenied {
				message: "writes denied by test".to_string(),
			});
		}
		inner.writes += 1;
		inner.value = Some(material.as_bytes().to_vec());
		Ok(())
	}

	async fn remove(&self) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().unwrap();
		inner.removes += 1;
		inner.value = None;
		Ok(())
	}
}

/// [`StoreProvider`] over [`MemoryStore`]s, for tests.
///
/// Stores are created on first use, keyed by the location's display form:
/// readable for Local locations, write-only otherwise, matching the real
/// backends' capabilities.
#[derive(Default)]
pub struct MemoryBackends {
	stores: Mutex<BTreeMap<String, Arc<MemoryStore>>>,
}

impl MemoryBackends {
	pub fn new() -> Self {
		Self::default()
	}

	/// The store serving `location`, creating it if needed.
	pub fn store(&self, location: &SecretLocation) -> Arc<MemoryStore> {
		let mut stores = self.stores.lock().unwrap();
		stores
			.entry(location.to_string())
			.or_insert_with(|| match location {
				SecretLocation::Local { .. } => MemoryStore::readable(),
				_ => MemoryStore::write_only(),
			})
			.clone()
	}
}

impl StoreProvider for MemoryBackends {
	fn store_for(&self, location: &SecretLocation) -> Result<Arc<dyn SecretStore>, StoreError> {
		Ok(self.store(location))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn local() -> SecretLocation {
		SecretLocation::Local {
			namespace: "ns".to_string(),
			name: "secret".to_string(),
			key: "key".to_string(),
		}
	}

	#[tokio::test]
	async fn memory_store_round_trips() {
		let store = MemoryStore::readable();
		store
			.write(&KeyMaterial::new(b"value".to_vec()))
			.await
			.unwrap();
		let material = store.maybe_read().await.unwrap().unwrap();
		assert_eq!(material.as_bytes(), b"value");

		store.remove().await.unwrap();
		assert!(store.maybe_read().await.unwrap().is_none());
	}

	#[tokio::test]
	async fn write_only_store_reads_absent() {
		let store = MemoryStore::write_only();
		store
			.write(&KeyMaterial::new(b"value".to_vec()))
			.await
			.unwrap();
		assert!(!store.can_read());
		assert!(store.maybe_read().await.unwrap().is_none());
	}

	#[tokio::test]
	async fn deny_writes_surfaces_permission_denied() {
		let store = MemoryStore::readable();
		store.deny_writes();
		assert!(matches!(
			store.verify_writable().await,
			Err(StoreError::PermissionDenied { .. })
		));
	}

	#[test]
	fn backends_reuse_stores_per_location() {
		let backends = MemoryBackends::new();
		let a = backends.store(&local());
		let b = backends.store(&local());
		assert!(Arc::ptr_eq(&a, &b));
	}
}
