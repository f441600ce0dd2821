// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Rekey and trim reconciliation procedures.
//!
//! Procedures are pure with respect to the declaration object: they mutate
//! the KDC and the secret store, but the force-flag and has-old-keys
//! markers come back as patch directives for the dispatcher to apply.
//!
//! Invocations are at-least-once and may overlap; every step is safe to
//! repeat. A crash between the KDC mutation and the store write is
//! recovered by the next pass re-running generation.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument};

use crate::config::OperatorConfig;
use crate::declaration::{CredKind, Declaration};
use crate::error::{DeclarationError, ReconcileError, ReconcileResult};
use crate::kadmin::KdcAdmin;
use crate::keyops;
use crate::store::StoreProvider;

/// Why the dispatcher delivered this invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventReason {
	Create,
	Update,
	Resume,
	Delete,
}

/// Patch directives returned to the dispatcher.
///
/// The dispatcher applies these to the declaration's annotations and
/// labels; the core never writes them itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
	/// Clear the one-shot force-rekey annotation.
	pub clear_force: bool,
	/// Set (`Some(true)`) or clear (`Some(false)`) the has-old-keys label;
	/// `None` leaves it untouched.
	pub has_old_keys: Option<bool>,
}

impl ReconcileOutcome {
	/// Nothing happened; leave every marker as it is.
	pub fn unchanged() -> Self {
		Self {
			clear_force: false,
			has_old_keys: None,
		}
	}

	fn completed(has_old_keys: Option<bool>) -> Self {
		Self {
			clear_force: true,
			has_old_keys,
		}
	}

	fn clear_marker() -> Self {
		Self {
			clear_force: false,
			has_old_keys: Some(false),
		}
	}
}

/// Credential-lifecycle reconciler.
///
/// All collaborators are injected; the reconciler holds no ambient state
/// beyond its configuration.
pub struct Reconciler {
	kadm: Arc<dyn KdcAdmin>,
	stores: Arc<dyn StoreProvider>,
	config: OperatorConfig,
}

impl Reconciler {
	pub fn new(
		kadm: Arc<dyn KdcAdmin>,
		stores: Arc<dyn StoreProvider>,
		config: OperatorConfig,
	) -> Self {
		Self {
			kadm,
			stores,
			config,
		}
	}

	/// Reconcile a declaration change, a resume tick, or a deletion.
	///
	/// `old` is absent on first creation; `new` is absent when the object
	/// is being deleted. `force` is the one-shot override read from the
	/// force-rekey annotation.
	#[instrument(skip_all, fields(reason = ?reason, force = force))]
	pub async fn rekey(
		&self,
		old: Option<&Declaration>,
		new: Option<&Declaration>,
		reason: EventReason,
		force: bool,
	) -> ReconcileResult<ReconcileOutcome> {
		// On deletion the dispatcher hands us the deleted object as both
		// old and new; only old is meaningful.
		let new = if reason == EventReason::Delete { None } else { new };

		if !force && !self.rekey_needed(old, new, reason)? {
			return Ok(ReconcileOutcome::unchanged());
		}

		if let Some(old_decl) = old {
			self.remove_old(old_decl, new).await?;
		}

		let Some(new_decl) = new else {
			return Ok(ReconcileOutcome::completed(None));
		};
		if new_decl.kind == CredKind::Disabled {
			return Ok(ReconcileOutcome::completed(None));
		}

		for principal in &new_decl.principals {
			if !self.kadm.principal_exists(principal).await? {
				info!(%principal, "creating principal");
				self.kadm.create_principal(principal).await?;
			}
			self.kadm.enable_principal(principal).await?;
		}

		let location = new_decl
			.secret
			.as_ref()
			.ok_or(DeclarationError::MissingSecret)?;
		let store = self.stores.store_for(location)?;
		let current = store.maybe_read().await?;

		if !force {
			if let Some(material) = &current {
				if keyops::verify_key(self.kadm.as_ref(), new_decl, material).await? {
					debug!("current key verified, nothing to do");
					return Ok(ReconcileOutcome::completed(None));
				}
			}
		}

		if new_decl.preset {
			let material = current.ok_or(ReconcileError::MissingPresetMaterial)?;
			let result = keyops::set_key(self.kadm.as_ref(), new_decl, &material).await?;
			return Ok(ReconcileOutcome::completed(Some(result.has_old)));
		}

		// Writability is proven before the KDC's keys are touched, so a
		// denied destination cannot strand a rotated key.
		store.verify_writable().await?;

		let prior = if new_decl.keep_old { current } else { None };
		let result = keyops::generate_key(self.kadm.as_ref(), new_decl, prior.as_ref()).await?;
		if let Some(material) = &result.material {
			store.write(material).await?;
		}

		Ok(ReconcileOutcome::completed(Some(result.has_old)))
	}

	/// Periodic trim tick, gated by the has-old-keys label.
	#[instrument(skip_all)]
	pub async fn trim_keys(&self, decl: &Declaration) -> ReconcileResult<ReconcileOutcome> {
		if decl.kind != CredKind::RotatingKeytab || decl.preset {
			debug!("declaration does not rotate a keytab, clearing marker");
			return Ok(ReconcileOutcome::clear_marker());
		}
		let Some(location) = &decl.secret else {
			return Ok(ReconcileOutcome::clear_marker());
		};

		let store = self.stores.store_for(location)?;
		let Some(material) = store.maybe_read().await? else {
			debug!("keytab is unreadable, clearing marker");
			return Ok(ReconcileOutcome::clear_marker());
		};

		let result =
			keyops::trim_keys(decl, &material, Utc::now(), self.config.expire_old_keys)?;
		if let Some(material) = &result.material {
			store.write(material).await?;
		}

		Ok(ReconcileOutcome {
			clear_force: false,
			has_old_keys: Some(result.has_old),
		})
	}

	/// Whether anything needs doing for this invocation.
	///
	/// Resume ticks on an unchanged declaration attempt a self-heal, but
	/// only when the backend can be read back; sealed and remote secrets
	/// are skipped silently.
	fn rekey_needed(
		&self,
		old: Option<&Declaration>,
		new: Option<&Declaration>,
		reason: EventReason,
	) -> ReconcileResult<bool> {
		if old != new {
			return Ok(true);
		}
		if reason != EventReason::Resume {
			debug!("no change");
			return Ok(false);
		}

		let Some(new_decl) = new else {
			return Ok(false);
		};
		if new_decl.kind == CredKind::Disabled {
			return Ok(false);
		}
		let Some(location) = &new_decl.secret else {
			return Ok(false);
		};
		if !self.stores.store_for(location)?.can_read() {
			debug!("cannot verify current key");
			return Ok(false);
		}
		Ok(true)
	}

	/// Tear down whatever `old` declared that `new` no longer wants.
	///
	/// Principals that are no longer desired are disabled, not deleted;
	/// the KDC stays the system of record for their history. The old
	/// secret is removed only when the effective location changed and the
	/// old declaration actually owned it (presets never do).
	async fn remove_old(
		&self,
		old: &Declaration,
		new: Option<&Declaration>,
	) -> ReconcileResult<()> {
		for principal in &old.principals {
			let still_wanted = new.is_some_and(|n| n.principals.contains(principal));
			if !still_wanted {
				info!(%principal, "disabling principal no longer declared");
				self.kadm.disable_principal(principal).await?;
			}
		}

		if let Some(location) = &old.secret {
			let replaced = new.and_then(|n| n.secret.as_ref()) != Some(location);
			if replaced && !old.preset {
				info!(%location, "removing superseded secret");
				self.stores.store_for(location)?.remove().await?;
			}
		}

		Ok(())
	}
}
