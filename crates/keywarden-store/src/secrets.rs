// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Kubernetes secret transport for the Local backend.
//!
//! Writes go through a read-modify-replace cycle so the API server's
//! resourceVersion check catches concurrent writers; conflicts are retried
//! with a bounded budget and randomized delay. Secrets created here are
//! tagged with the managed-by label and the transport refuses to touch
//! secrets that carry someone else's tag.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, ObjectMeta, PostParams, Preconditions};
use kube::Client;
use tracing::{debug, info};

use keywarden_core::error::StoreError;
use keywarden_core::idents;

/// Bounded retry budget for optimistic-concurrency conflicts.
const WRITE_ATTEMPTS: u32 = 100;
/// Conflict retry delay is drawn uniformly from this interval.
const CONFLICT_DELAY_MS: std::ops::Range<u64> = 100..600;

enum Attempt {
	Done,
	Conflict,
}

/// Namespaced key/value secret transport over the Kubernetes API.
pub struct KubeSecrets {
	client: Client,
}

impl KubeSecrets {
	pub fn new(client: Client) -> Self {
		Self { client }
	}

	fn api(&self, namespace: &str) -> Api<Secret> {
		Api::namespaced(self.client.clone(), namespace)
	}

	async fn find(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError> {
		match self.api(namespace).get(name).await {
			Ok(secret) => Ok(Some(secret)),
			Err(kube::Error::Api(err)) if err.code == 404 => Ok(None),
			Err(e) => Err(map_kube_err(e)),
		}
	}

	/// Read one key out of a secret. Absent object, absent data map, and
	/// absent key all read as `None`.
	pub async fn read_key(
		&self,
		namespace: &str,
		name: &str,
		key: &str,
	) -> Result<Option<Vec<u8>>, StoreError> {
		let Some(secret) = self.find(namespace, name).await? else {
			return Ok(None);
		};
		Ok(secret
			.data
			.and_then(|mut data| data.remove(key))
			.map(|ByteString(bytes)| bytes))
	}

	/// Check that a write to `name` would be allowed to proceed.
	///
	/// An absent secret is writable (it will be created and tagged); an
	/// existing secret must carry this operator's managed-by label.
	pub async fn is_writable(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
		match self.find(namespace, name).await? {
			Some(secret) if !is_mine(&secret) => Err(StoreError::NotOwned {
				name: name.to_string(),
			}),
			_ => Ok(()),
		}
	}

	/// Write one key, creating and tagging the secret if needed.
	pub async fn write_key(
		&self,
		namespace: &str,
		name: &str,
		key: &str,
		value: &[u8],
	) -> Result<(), StoreError> {
		info!(%namespace, %name, %key, "updating secret key");
		for _ in 0..WRITE_ATTEMPTS {
			match self.write_once(namespace, name, key, value).await? {
				Attempt::Done => return Ok(()),
				Attempt::Conflict => backoff().await,
			}
		}
		Err(StoreError::ConflictExceeded {
			attempts: WRITE_ATTEMPTS,
		})
	}

	async fn write_once(
		&self,
		namespace: &str,
		name: &str,
		key: &str,
		value: &[u8],
	) -> Result<Attempt, StoreError> {
		let api = self.api(namespace);

		let Some(mut secret) = self.find(namespace, name).await? else {
			debug!(%name, "creating secret");
			let secret = Secret {
				metadata: ObjectMeta {
					name: Some(name.to_string()),
					labels: Some(BTreeMap::from([(
						idents::MANAGED_BY.to_string(),
						idents::APP_ID.to_string(),
					)])),
					..Default::default()
				},
				data: Some(BTreeMap::from([(
					key.to_string(),
					ByteString(value.to_vec()),
				)])),
				..Default::default()
			};
			return match api.create(&PostParams::default(), &secret).await {
				Ok(_) => Ok(Attempt::Done),
				// Lost the creation race; the retry will find the object.
				Err(kube::Error::Api(err)) if err.code == 409 => Ok(Attempt::Conflict),
				Err(e) => Err(map_kube_err(e)),
			};
		};

		if !is_mine(&secret) {
			return Err(StoreError::NotOwned {
				name: name.to_string(),
			});
		}

		secret
			.data
			.get_or_insert_with(BTreeMap::new)
			.insert(key.to_string(), ByteString(value.to_vec()));

		match api.replace(name, &PostParams::default(), &secret).await {
			Ok(_) => Ok(Attempt::Done),
			Err(kube::Error::Api(err)) if err.code == 409 => Ok(Attempt::Conflict),
			Err(e) => Err(map_kube_err(e)),
		}
	}

	/// Remove one key. Deletes the whole secret when this is the last key,
	/// guarded by uid/resourceVersion preconditions. Absence at any level
	/// is not an error.
	pub async fn remove_key(
		&self,
		namespace: &str,
		name: &str,
		key: &str,
	) -> Result<(), StoreError> {
		for _ in 0..WRITE_ATTEMPTS {
			match self.remove_once(namespace, name, key).await? {
				Attempt::Done => return Ok(()),
				Attempt::Conflict => backoff().await,
			}
		}
		Err(StoreError::ConflictExceeded {
			attempts: WRITE_ATTEMPTS,
		})
	}

	async fn remove_once(
		&self,
		namespace: &str,
		name: &str,
		key: &str,
	) -> Result<Attempt, StoreError> {
		let api = self.api(namespace);

		let Some(mut secret) = self.find(namespace, name).await? else {
			debug!(%name, %key, "secret already gone");
			return Ok(Attempt::Done);
		};
		if !is_mine(&secret) {
			return Err(StoreError::NotOwned {
				name: name.to_string(),
			});
		}

		let Some(data) = secret.data.as_mut() else {
			return Ok(Attempt::Done);
		};
		if !data.contains_key(key) {
			debug!(%name, %key, "key already gone");
			return Ok(Attempt::Done);
		}

		if data.len() == 1 {
			info!(%namespace, %name, "removing secret");
			let params = DeleteParams {
				preconditions: Some(Preconditions {
					uid: secret.metadata.uid.clone(),
					resource_version: secret.metadata.resource_version.clone(),
				}),
				..Default::default()
			};
			return match api.delete(name, &params).await {
				Ok(_) => Ok(Attempt::Done),
				Err(kube::Error::Api(err)) if err.code == 404 => Ok(Attempt::Done),
				Err(kube::Error::Api(err)) if err.code == 409 => Ok(Attempt::Conflict),
				Err(e) => Err(map_kube_err(e)),
			};
		}

		info!(%namespace, %name, %key, "removing secret key");
		data.remove(key);
		match api.replace(name, &PostParams::default(), &secret).await {
			Ok(_) => Ok(Attempt::Done),
			Err(kube::Error::Api(err)) if err.code == 409 => Ok(Attempt::Conflict),
			Err(e) => Err(map_kube_err(e)),
		}
	}

}

async fn backoff() {
	debug!("retrying secret operation after conflict");
	tokio::time::sleep(Duration::from_millis(fastrand::u64(CONFLICT_DELAY_MS))).await;
}

fn is_mine(secret: &Secret) -> bool {
	secret
		.metadata
		.labels
		.as_ref()
		.and_then(|labels| labels.get(idents::MANAGED_BY))
		.is_some_and(|owner| owner == idents::APP_ID)
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

#[cfg(test)]
mod tests {
	use super::*;
	use kube::core::ErrorResponse;

	fn secret_with_labels(labels: Option<BTreeMap<String, String>>) -> Secret {
		Secret {
			metadata: ObjectMeta {
				name: Some("krb-keytabs".to_string()),
				labels,
				..Default::default()
			},
			..Default::default()
		}
	}

	#[test]
	fn owned_secrets_are_recognized() {
		let secret = secret_with_labels(Some(BTreeMap::from([(
			idents::MANAGED_BY.to_string(),
			idents::APP_ID.to_string(),
		)])));
		assert!(is_mine(&secret));
	}

	#[test]
	fn unlabelled_secrets_are_not_mine() {
		assert!(!is_mine(&secret_with_labels(None)));

		let foreign = secret_with_labels(Some(BTreeMap::from([(
			idents::MANAGED_BY.to_string(),
			"someone-else".to_string(),
		)])));
		assert!(!is_mine(&foreign));
	}

	#[test]
	fn forbidden_maps_to_permission_denied() {
		let err = kube::Error::Api(ErrorResponse {
			status: "Failure".to_string(),
			message: "secrets is forbidden".to_string(),
			reason: "Forbidden".to_string(),
			code: 403,
		});
		assert!(matches!(
			map_kube_err(err),
			StoreError::PermissionDenied { .. }
		));
	}

	#[test]
	fn other_api_errors_map_to_transport() {
		let err = kube::Error::Api(ErrorResponse {
			status: "Failure".to_string(),
			message: "boom".to_string(),
			reason: "InternalError".to_string(),
			code: 500,
		});
		assert!(matches!(map_kube_err(err), StoreError::Transport { .. }));
	}
}
