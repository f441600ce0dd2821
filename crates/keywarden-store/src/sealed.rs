// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! The Sealed backend: asymmetrically encrypted, write-only secrets.
//!
//! Material is sealed against a public certificate and patched into the
//! `encryptedData` map of a SealedSecret custom resource; only the
//! cluster-side controller can decrypt it, so `can_read` is always false
//! here.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, DynamicObject, Patch, PatchParams, PostParams};
use kube::core::{ApiResource, GroupVersionKind};
use kube::Client;
use serde_json::json;
use tracing::{debug, info};

use keywarden_core::error::StoreError;
use keywarden_core::material::KeyMaterial;
use keywarden_core::store::SecretStore;

/// External sealing capability: certificate fetch plus the asymmetric
/// encryption itself, scoped to the target namespace and name.
#[async_trait]
pub trait Sealer: Send + Sync {
	async fn fetch_certificate(&self, cert: &str) -> Result<Vec<u8>, StoreError>;

	async fn seal(
		&self,
		certificate: &[u8],
		namespace: &str,
		name: &str,
		plaintext: &[u8],
	) -> Result<String, StoreError>;
}

pub struct SealedStore {
	client: Client,
	sealer: Arc<dyn Sealer>,
	namespace: String,
	name: String,
	key: String,
	cert: String,
}

impl SealedStore {
	pub fn new(
		client: Client,
		sealer: Arc<dyn Sealer>,
		namespace: String,
		name: String,
		key: String,
		cert: String,
	) -> Self {
		Self {
			client,
			sealer,
			namespace,
			name,
			key,
			cert,
		}
	}

	fn api(&self) -> Api<DynamicObject> {
		let gvk = GroupVersionKind::gvk("bitnami.com", "v1alpha1", "SealedSecret");
		let resource = ApiResource::from_gvk(&gvk);
		Api::namespaced_with(self.client.clone(), &self.namespace, &resource)
	}

	/// `{"spec": {"encryptedData": {<key>: value}}}` with the dynamic key.
	fn encrypted_data_patch(&self, value: serde_json::Value) -> serde_json::Value {
		let mut encrypted = serde_json::Map::new();
		encrypted.insert(self.key.clone(), value);
		json!({ "spec": { "encryptedData": encrypted } })
	}
}

#[async_trait]
impl SecretStore for SealedStore {
	fn can_read(&self) -> bool {
		// No decryption capability on this side of the seal.
		false
	}

	async fn maybe_read(&self) -> Result<Option<KeyMaterial>, StoreError> {
		Ok(None)
	}

	async fn verify_writable(&self) -> Result<(), StoreError> {
		// Sealing is the only gate: without the certificate nothing can be
		// written, with it the patch below will create the object.
		self.sealer.fetch_certificate(&self.cert).await.map(|_| ())
	}

	async fn write(&self, material: &KeyMaterial) -> Result<(), StoreError> {
		let certificate = self.sealer.fetch_certificate(&self.cert).await?;
		let sealed = self
			.sealer
			.seal(&certificate, &self.namespace, &self.name, material.as_bytes())
			.await?;

		info!(namespace = %self.namespace, name = %self.name, key = %self.key, "patching sealed secret");
		let api = self.api();
		let patch = self.encrypted_data_patch(serde_json::Value::String(sealed));
		match api
			.patch(&self.name, &PatchParams::default(), &Patch::Merge(&patch))
			.await
		{
			Ok(_) => Ok(()),
			Err(kube::Error::Api(err)) if err.code == 404 => {
				debug!(name = %self.name, "sealed secret absent, creating");
				let gvk = GroupVersionKind::gvk("bitnami.com", "v1alpha1", "SealedSecret");
				let resource = ApiResource::from_gvk(&gvk);
				let mut object = DynamicObject::new(&self.name, &resource).within(&self.namespace);
				let mut data = patch;
				data["spec"]["template"] = json!({
					"metadata": { "name": &self.name, "namespace": &self.namespace },
				});
				object.data = data;
				api
					.create(&PostParams::default(), &object)
					.await
					.map(|_| ())
					.map_err(map_kube_err)
			}
			Err(e) => Err(map_kube_err(e)),
		}
	}

	async fn remove(&self) -> Result<(), StoreError> {
		info!(namespace = %self.namespace, name = %self.name, key = %self.key, "removing sealed secret entry");
		let patch = self.encrypted_data_patch(serde_json::Value::Null);
		match self
			.api()
			.patch(&self.name, &PatchParams::default(), &Patch::Merge(&patch))
			.await
		{
			Ok(_) => Ok(()),
			// Already gone is fine; removal is idempotent.
			Err(kube::Error::Api(err)) if err.code == 404 => Ok(()),
			Err(e) => Err(map_kube_err(e)),
		}
	}
}

fn map_kube_err(err: kube::Error) -> StoreError {
	match err {
		kube::Error::Api(ref response) if response.code == 403 => StoreError::PermissionDenied {
			message: response.message.clone(),
		},
		other => StoreError::Transport {
			message: other.to_string(),
		},
	}
}
