// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use thiserror::Error;

/// Result type alias for reconciliation operations.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Errors raised while normalizing a raw key declaration.
///
/// These are all fatal to the current invocation and are raised before any
/// KDC or store mutation; retrying without changing the declaration will not
/// help.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeclarationError {
	#[error("preset declarations cannot also request keepOldKeys")]
	PresetWithKeepOld,

	#[error("{kind} declarations require exactly one principal, got {count}")]
	WrongPrincipalCount { kind: String, count: usize },

	#[error("declaration names no principal")]
	MissingPrincipal,

	#[error("additional principals are only valid for rotating keytabs")]
	ExtraPrincipals,

	#[error("declaration names no secret location")]
	MissingSecret,

	#[error("malformed secret reference: {value:?} (expected \"name/key\")")]
	BadSecretRef { value: String },
}

/// Errors from a secret-storage backend.
#[derive(Error, Debug)]
pub enum StoreError {
	#[error("permission denied: {message}")]
	PermissionDenied { message: String },

	#[error("secret {name} is not owned by this operator")]
	NotOwned { name: String },

	#[error("gave up after {attempts} conflicting writes")]
	ConflictExceeded { attempts: u32 },

	#[error("store transport error: {message}")]
	Transport { message: String },
}

/// Errors from the KDC admin capability.
///
/// A failed authentication probe is NOT an error; `try_authenticate` reports
/// it as `Ok(false)`. This type covers admin-surface and transport failures
/// only.
#[derive(Error, Debug)]
pub enum KdcError {
	#[error("KDC admin error: {message}")]
	Admin { message: String },

	#[error("KDC unreachable: {message}")]
	Unreachable { message: String },
}

/// Errors from the keytab byte codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeytabError {
	#[error("not a keytab: bad magic byte {found:#x}")]
	BadMagic { found: u8 },

	#[error("unsupported keytab format version {found}")]
	BadVersion { found: u8 },

	#[error("truncated keytab record")]
	Truncated,

	#[error("malformed keytab record: {message}")]
	BadRecord { message: String },

	#[error("malformed principal name: {name:?}")]
	BadPrincipal { name: String },
}

/// Top-level error for a reconciliation invocation.
///
/// The dispatcher surfaces these on the declaration's status and re-invokes
/// on its own schedule; nothing here is retried locally except the
/// optimistic-concurrency conflicts handled inside the Local backend.
#[derive(Error, Debug)]
pub enum ReconcileError {
	#[error(transparent)]
	Declaration(#[from] DeclarationError),

	#[error(transparent)]
	Store(#[from] StoreError),

	#[error(transparent)]
	Kdc(#[from] KdcError),

	#[error(transparent)]
	Keytab(#[from] KeytabError),

	#[error("malformed trust envelope: {message}")]
	Envelope { message: String },

	#[error("preset declaration has no material to push")]
	MissingPresetMaterial,

	#[error("key consistency failure for {principal}: {message}")]
	Consistency { principal: String, message: String },
}
