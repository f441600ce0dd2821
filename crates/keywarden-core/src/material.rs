// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Secret payloads exchanged between strategies and storage backends.
//!
//! Strategies never touch a store and stores never interpret a payload;
//! [`KeyMaterial`] is the opaque boundary between the two.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::ReconcileError;

/// Opaque secret bytes written to or read from a secret location.
///
/// Debug output is redacted so material cannot leak through tracing.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial(Vec<u8>);

impl KeyMaterial {
	pub fn new(bytes: Vec<u8>) -> Self {
		Self(bytes)
	}

	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl From<Vec<u8>> for KeyMaterial {
	fn from(bytes: Vec<u8>) -> Self {
		Self(bytes)
	}
}

impl From<&[u8]> for KeyMaterial {
	fn from(bytes: &[u8]) -> Self {
		Self(bytes.to_vec())
	}
}

impl fmt::Debug for KeyMaterial {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "KeyMaterial([REDACTED]; {} bytes)", self.0.len())
	}
}

/// Key metadata as reported by the KDC for one principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMetadata {
	pub kvno: u32,
	/// Encryption type numbers, kept sorted for comparison.
	pub etypes: Vec<i32>,
}

impl KeyMetadata {
	pub fn new(kvno: u32, mut etypes: Vec<i32>) -> Self {
		etypes.sort_unstable();
		Self { kvno, etypes }
	}
}

/// Structured payload for a trust-handshake secret.
///
/// Bundles the password with the KDC metadata a peer realm needs to decide
/// whether the blob is still current without contacting this KDC.
#[derive(Clone, Serialize, Deserialize)]
pub struct TrustEnvelope {
	pub password: String,
	pub kvno: u32,
	pub etypes: Vec<i32>,
}

impl TrustEnvelope {
	pub fn new(password: String, metadata: &KeyMetadata) -> Self {
		Self {
			password,
			kvno: metadata.kvno,
			etypes: metadata.etypes.clone(),
		}
	}

	/// The KDC metadata recorded in this envelope.
	pub fn metadata(&self) -> KeyMetadata {
		KeyMetadata::new(self.kvno, self.etypes.clone())
	}

	pub fn parse(material: &KeyMaterial) -> Result<Self, ReconcileError> {
		serde_json::from_slice(material.as_bytes()).map_err(|e| ReconcileError::Envelope {
			message: e.to_string(),
		})
	}

	pub fn to_material(&self) -> Result<KeyMaterial, ReconcileError> {
		let bytes = serde_json::to_vec(self).map_err(|e| ReconcileError::Envelope {
			message: e.to_string(),
		})?;
		Ok(KeyMaterial::new(bytes))
	}
}

impl fmt::Debug for TrustEnvelope {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TrustEnvelope")
			.field("password", &"[REDACTED]")
			.field("kvno", &self.kvno)
			.field("etypes", &self.etypes)
			.finish()
	}
}

impl Drop for TrustEnvelope {
	fn drop(&mut self) {
		self.password.zeroize();
	}
}

/// Output of a generate/verify/set/trim operation.
#[derive(Debug, Clone, Default)]
pub struct KeyOpResult {
	/// New material to store, when the operation produced any.
	pub material: Option<KeyMaterial>,
	/// Principal to key-version map reported by the KDC.
	pub keys: Option<BTreeMap<String, u32>>,
	/// Whether superseded key versions remain live.
	pub has_old: bool,
}

impl KeyOpResult {
	/// An operation that changed nothing.
	pub fn unchanged() -> Self {
		Self::default()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn material_debug_is_redacted() {
		let material = KeyMaterial::new(b"hunter2".to_vec());
		let rendered = format!("{material:?}");
		assert!(!rendered.contains("hunter2"));
		assert!(rendered.contains("7 bytes"));
	}

	#[test]
	fn envelope_round_trips_through_material() {
		let metadata = KeyMetadata::new(4, vec![18, 17]);
		let envelope = TrustEnvelope::new("s3cret".to_string(), &metadata);
		let material = envelope.to_material().unwrap();
		let parsed = TrustEnvelope::parse(&material).unwrap();
		assert_eq!(parsed.password, "s3cret");
		assert_eq!(parsed.metadata(), metadata);
	}

	#[test]
	fn envelope_parse_rejects_garbage() {
		let material = KeyMaterial::new(b"not json".to_vec());
		assert!(TrustEnvelope::parse(&material).is_err());
	}

	#[test]
	fn metadata_etypes_are_order_insensitive() {
		assert_eq!(KeyMetadata::new(1, vec![18, 17]), KeyMetadata::new(1, vec![17, 18]));
	}

	#[test]
	fn envelope_debug_is_redacted() {
		let envelope = TrustEnvelope::new("s3cret".to_string(), &KeyMetadata::new(1, vec![18]));
		assert!(!format!("{envelope:?}").contains("s3cret"));
	}
}
