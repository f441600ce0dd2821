// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Per-credential-kind verify/generate/set/trim operations.
//!
//! Strategies speak to the KDC through the injected [`KdcAdmin`] capability
//! and exchange opaque payloads with the caller; they never touch a secret
//! store. Dispatch is a closed match over [`CredKind`], so an unsupported
//! kind/operation combination cannot slip through at runtime.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::declaration::{CredKind, Declaration};
use crate::error::{ReconcileError, ReconcileResult};
use crate::kadmin::{Credential, KdcAdmin};
use crate::keytab::Keytab;
use crate::material::{KeyMaterial, KeyOpResult, TrustEnvelope};
use crate::trim;

/// Whether `material` still authenticates every principal of `decl`.
///
/// A `false` result is a normal input to the rekey decision procedure, not
/// an error; it triggers regeneration.
pub async fn verify_key(
	kadm: &dyn KdcAdmin,
	decl: &Declaration,
	material: &KeyMaterial,
) -> ReconcileResult<bool> {
	match decl.kind {
		CredKind::Disabled => Ok(true),
		CredKind::RotatingKeytab => {
			for principal in &decl.principals {
				debug!(%principal, "verifying keytab");
				if !kadm
					.try_authenticate(principal, Credential::Keytab(material.as_bytes()))
					.await?
				{
					return Ok(false);
				}
			}
			Ok(true)
		}
		CredKind::Password => {
			let principal = decl.principal();
			debug!(%principal, "verifying password");
			let Some(password) = utf8_password(material) else {
				return Ok(false);
			};
			kadm
				.try_authenticate(principal, Credential::Password(&password))
				.await
				.map_err(Into::into)
		}
		CredKind::Trust => {
			let principal = decl.principal();
			debug!(%principal, "verifying trust key");
			let Ok(envelope) = TrustEnvelope::parse(material) else {
				warn!(%principal, "stored trust envelope is malformed");
				return Ok(false);
			};
			// A stale blob whose password coincidentally still authenticates
			// must not pass; the recorded key metadata has to match first.
			let current = kadm.get_key_metadata(principal).await?;
			if current != envelope.metadata() {
				return Ok(false);
			}
			kadm
				.try_authenticate(principal, Credential::Password(&envelope.password))
				.await
				.map_err(Into::into)
		}
	}
}

/// Generate fresh key material, pushing new keys into the KDC.
///
/// `prior` seeds the new container for rotating keytabs with `keep_old`
/// set, so superseded and fresh key versions coexist.
pub async fn generate_key(
	kadm: &dyn KdcAdmin,
	decl: &Declaration,
	prior: Option<&KeyMaterial>,
) -> ReconcileResult<KeyOpResult> {
	match decl.kind {
		CredKind::Disabled => Ok(KeyOpResult::unchanged()),
		CredKind::RotatingKeytab => {
			let principals: Vec<String> = decl.principals.iter().cloned().collect();
			info!(count = principals.len(), "extracting fresh keytab");
			let (bytes, keys) = kadm
				.extract_keytab(&principals, prior.map(KeyMaterial::as_bytes))
				.await?;
			Ok(KeyOpResult {
				material: Some(KeyMaterial::new(bytes)),
				keys: Some(keys),
				has_old: prior.is_some(),
			})
		}
		CredKind::Password => {
			let principal = decl.principal();
			info!(%principal, "setting new random password");
			let password = random_password();
			let metadata = kadm.set_password(principal, &password).await?;
			Ok(KeyOpResult {
				material: Some(KeyMaterial::new(password.as_bytes().to_vec())),
				keys: Some([(principal.to_string(), metadata.kvno)].into()),
				has_old: false,
			})
		}
		CredKind::Trust => {
			let principal = decl.principal();
			info!(%principal, "creating new trust key");
			let password = random_password();
			let metadata = kadm.set_password(principal, &password).await?;
			let envelope = TrustEnvelope::new(password.to_string(), &metadata);
			Ok(KeyOpResult {
				material: Some(envelope.to_material()?),
				keys: Some([(principal.to_string(), metadata.kvno)].into()),
				has_old: false,
			})
		}
	}
}

/// Push caller-supplied material into the KDC (preset declarations only).
pub async fn set_key(
	kadm: &dyn KdcAdmin,
	decl: &Declaration,
	material: &KeyMaterial,
) -> ReconcileResult<KeyOpResult> {
	match decl.kind {
		CredKind::Disabled | CredKind::RotatingKeytab => Ok(KeyOpResult::unchanged()),
		CredKind::Password => {
			let principal = decl.principal();
			info!(%principal, "setting preset password");
			let password = utf8_password(material).ok_or_else(|| ReconcileError::Envelope {
				message: "preset password is not valid UTF-8".to_string(),
			})?;
			let metadata = kadm.set_password(principal, &password).await?;
			Ok(KeyOpResult {
				material: None,
				keys: Some([(principal.to_string(), metadata.kvno)].into()),
				has_old: false,
			})
		}
		CredKind::Trust => {
			let principal = decl.principal();
			info!(%principal, "setting preset trust key");
			let envelope = TrustEnvelope::parse(material)?;

			kadm.set_password(principal, &envelope.password).await?;
			// The envelope records the key version the peer realm expects;
			// the KDC assigned its own on the password change, so force it
			// back and prove the result matches.
			kadm.force_key_version(principal, envelope.kvno).await?;
			let actual = kadm.get_key_metadata(principal).await?;
			let wanted = envelope.metadata();
			if actual != wanted {
				return Err(ReconcileError::Consistency {
					principal: principal.to_string(),
					message: format!(
						"kvno/etypes after forcing: wanted {}/{:?}, got {}/{:?}",
						wanted.kvno, wanted.etypes, actual.kvno, actual.etypes
					),
				});
			}
			Ok(KeyOpResult {
				material: None,
				keys: Some([(principal.to_string(), actual.kvno)].into()),
				has_old: false,
			})
		}
	}
}

/// Prune superseded keytab entries past the retention window.
///
/// Only meaningful for rotating keytabs; every other kind reports
/// "unchanged, nothing old".
pub fn trim_keys(
	decl: &Declaration,
	material: &KeyMaterial,
	now: DateTime<Utc>,
	window: Duration,
) -> ReconcileResult<KeyOpResult> {
	if decl.kind != CredKind::RotatingKeytab {
		return Ok(KeyOpResult::unchanged());
	}

	info!(window_secs = window.num_seconds(), "trimming keytab");
	let keytab = Keytab::parse(material.as_bytes())?;
	let outcome = trim::trim(&keytab, now, window);

	let material = match outcome.keytab {
		Some(pruned) => Some(KeyMaterial::new(pruned.to_bytes()?)),
		None => None,
	};
	Ok(KeyOpResult {
		material,
		keys: None,
		has_old: outcome.has_old,
	})
}

fn utf8_password(material: &KeyMaterial) -> Option<Zeroizing<String>> {
	std::str::from_utf8(material.as_bytes())
		.ok()
		.map(|s| Zeroizing::new(s.to_string()))
}

/// A fresh random password: 24 bytes of OS entropy, URL-safe base64.
fn random_password() -> Zeroizing<String> {
	use base64::Engine;

	let mut raw = Zeroizing::new([0u8; 24]);
	rand::thread_rng().fill_bytes(raw.as_mut());
	Zeroizing::new(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw.as_ref()))
}
