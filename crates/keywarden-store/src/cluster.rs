// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! The RemoteCluster backend: secrets delegated to a sibling deployment
//! service addressed by cluster id.
//!
//! The remote side does not expose read-back, so this backend is
//! write-only; writability is proven with a dry-run request.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use keywarden_core::error::StoreError;
use keywarden_core::material::KeyMaterial;
use keywarden_core::store::SecretStore;

/// Verb/path interface of the cluster-manager's secret endpoint.
#[async_trait]
pub trait ClusterOps: Send + Sync {
	async fn put_secret(
		&self,
		cluster: &str,
		namespace: &str,
		name: &str,
		key: &str,
		value: &[u8],
		dry_run: bool,
	) -> Result<(), StoreError>;

	async fn delete_secret(
		&self,
		cluster: &str,
		namespace: &str,
		name: &str,
		key: &str,
	) -> Result<(), StoreError>;
}

/// HTTP client for the cluster-manager service.
pub struct ClusterManagerClient {
	http: reqwest::Client,
	base_url: String,
	token: Option<String>,
}

impl ClusterManagerClient {
	pub fn new(base_url: impl Into<String>) -> Self {
		Self {
			http: reqwest::Client::new(),
			base_url: base_url.into(),
			token: None,
		}
	}

	pub fn with_token(mut self, token: impl Into<String>) -> Self {
		self.token = Some(token.into());
		self
	}

	fn secret_url(&self, cluster: &str, namespace: &str, name: &str, key: &str) -> String {
		format!(
			"{}/v1/cluster/{cluster}/secret/{namespace}/{name}/{key}",
			self.base_url.trim_end_matches('/')
		)
	}

	fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
		match &self.token {
			Some(token) => request.bearer_auth(token),
			None => request,
		}
	}
}

#[async_trait]
impl ClusterOps for ClusterManagerClient {
	async fn put_secret(
		&self,
		cluster: &str,
		namespace: &str,
		name: &str,
		key: &str,
		value: &[u8],
		dry_run: bool,
	) -> Result<(), StoreError> {
		let mut url = self.secret_url(cluster, namespace, name, key);
		if dry_run {
			url.push_str("?dryrun=true");
		}

		let response = self
			.authorize(self.http.put(&url))
			.body(value.to_vec())
			.send()
			.await
			.map_err(map_reqwest_err)?;
		check_status(response.status())
	}

	async fn delete_secret(
		&self,
		cluster: &str,
		namespace: &str,
		name: &str,
		key: &str,
	) -> Result<(), StoreError> {
		let url = self.secret_url(cluster, namespace, name, key);
		let response = self
			.authorize(self.http.delete(&url))
			.send()
			.await
			.map_err(map_reqwest_err)?;

		// The remote value may already be gone; that is not an error.
		if response.status() == reqwest::StatusCode::NOT_FOUND {
			return Ok(());
		}
		check_status(response.status())
	}
}

fn map_reqwest_err(err: reqwest::Error) -> StoreError {
	StoreError::Transport {
		message: err.to_string(),
	}
}

fn check_status(status: reqwest::StatusCode) -> Result<(), StoreError> {
	if status.is_success() {
		return Ok(());
	}
	if status == reqwest::StatusCode::FORBIDDEN {
		return Err(StoreError::PermissionDenied {
			message: format!("cluster manager refused: {status}"),
		});
	}
	Err(StoreError::Transport {
		message: format!("cluster manager returned {status}"),
	})
}

/// Secret store facade over one remote cluster location.
pub struct RemoteStore {
	ops: Arc<dyn ClusterOps>,
	cluster: String,
	namespace: String,
	name: String,
	key: String,
}

impl RemoteStore {
	pub fn new(
		ops: Arc<dyn ClusterOps>,
		cluster: String,
		namespace: String,
		name: String,
		key: String,
	) -> Self {
		Self {
			ops,
			cluster,
			namespace,
			name,
			key,
		}
	}
}

#[async_trait]
impl SecretStore for RemoteStore {
	fn can_read(&self) -> bool {
		false
	}

	async fn maybe_read(&self) -> Result<Option<KeyMaterial>, StoreError> {
		Ok(None)
	}

	async fn verify_writable(&self) -> Result<(), StoreError> {
		debug!(cluster = %self.cluster, "dry-run write to remote cluster");
		self
			.ops
			.put_secret(
				&self.cluster,
				&self.namespace,
				&self.name,
				&self.key,
				&[],
				true,
			)
			.await
	}

	async fn write(&self, material: &KeyMaterial) -> Result<(), StoreError> {
		info!(cluster = %self.cluster, namespace = %self.namespace, name = %self.name, key = %self.key, "writing secret to remote cluster");
		self
			.ops
			.put_secret(
				&self.cluster,
				&self.namespace,
				&self.name,
				&self.key,
				material.as_bytes(),
				false,
			)
			.await
	}

	async fn remove(&self) -> Result<(), StoreError> {
		info!(cluster = %self.cluster, namespace = %self.namespace, name = %self.name, key = %self.key, "removing secret from remote cluster");
		self
			.ops
			.delete_secret(&self.cluster, &self.namespace, &self.name, &self.key)
			.await
	}
}
