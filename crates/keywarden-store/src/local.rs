// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! The Local backend: one key inside an operator-owned Kubernetes secret.
//!
//! The only backend that can read material back, which makes it the only
//! one eligible for resume-time self-healing.

use std::sync::Arc;

use async_trait::async_trait;

use keywarden_core::error::StoreError;
use keywarden_core::material::KeyMaterial;
use keywarden_core::store::SecretStore;

use crate::secrets::KubeSecrets;

pub struct LocalStore {
	secrets: Arc<KubeSecrets>,
	namespace: String,
	name: String,
	key: String,
}

impl LocalStore {
	pub fn new(secrets: Arc<KubeSecrets>, namespace: String, name: String, key: String) -> Self {
		Self {
			secrets,
			namespace,
			name,
			key,
		}
	}
}

#[async_trait]
impl SecretStore for LocalStore {
	fn can_read(&self) -> bool {
		true
	}

	async fn maybe_read(&self) -> Result<Option<KeyMaterial>, StoreError> {
		let bytes = self
			.secrets
			.read_key(&self.namespace, &self.name, &self.key)
			.await?;
		Ok(bytes.map(KeyMaterial::new))
	}

	async fn verify_writable(&self) -> Result<(), StoreError> {
		self.secrets.is_writable(&self.namespace, &self.name).await
	}

	async fn write(&self, material: &KeyMaterial) -> Result<(), StoreError> {
		self
			.secrets
			.write_key(&self.namespace, &self.name, &self.key, material.as_bytes())
			.await
	}

	async fn remove(&self) -> Result<(), StoreError> {
		self
			.secrets
			.remove_key(&self.namespace, &self.name, &self.key)
			.await
	}
}
