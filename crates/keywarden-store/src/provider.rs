// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Maps resolved secret locations onto the concrete backends.

use std::sync::Arc;

use kube::Client;

use keywarden_core::declaration::SecretLocation;
use keywarden_core::error::StoreError;
use keywarden_core::store::{SecretStore, StoreProvider};

use crate::cluster::{ClusterOps, RemoteStore};
use crate::local::LocalStore;
use crate::sealed::{SealedStore, Sealer};
use crate::secrets::KubeSecrets;

/// The production [`StoreProvider`]: Local and Sealed backends over the
/// Kubernetes API, RemoteCluster over the cluster-manager service.
pub struct Backends {
	client: Client,
	secrets: Arc<KubeSecrets>,
	sealer: Arc<dyn Sealer>,
	cluster: Arc<dyn ClusterOps>,
}

impl Backends {
	pub fn new(client: Client, sealer: Arc<dyn Sealer>, cluster: Arc<dyn ClusterOps>) -> Self {
		let secrets = Arc::new(KubeSecrets::new(client.clone()));
		Self {
			client,
			secrets,
			sealer,
			cluster,
		}
	}
}

impl StoreProvider for Backends {
	fn store_for(&self, location: &SecretLocation) -> Result<Arc<dyn SecretStore>, StoreError> {
		Ok(match location {
			SecretLocation::Local {
				namespace,
				name,
				key,
			} => Arc::new(LocalStore::new(
				self.secrets.clone(),
				namespace.clone(),
				name.clone(),
				key.clone(),
			)),
			SecretLocation::Sealed {
				namespace,
				name,
				key,
				cert,
			} => Arc::new(SealedStore::new(
				self.client.clone(),
				self.sealer.clone(),
				namespace.clone(),
				name.clone(),
				key.clone(),
				cert.clone(),
			)),
			SecretLocation::Remote {
				cluster,
				namespace,
				name,
				key,
			} => Arc::new(RemoteStore::new(
				self.cluster.clone(),
				cluster.clone(),
				namespace.clone(),
				name.clone(),
				key.clone(),
			)),
		})
	}
}
