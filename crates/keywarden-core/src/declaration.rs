// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Normalized desired state for one credential object.
//!
//! A [`Declaration`] is a view constructed fresh on every reconciliation
//! invocation from the raw desired-state record; it is never persisted.
//! Structural equality over the whole value drives the "no change" decision
//! in the rekey procedure.

use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;

use crate::config::OperatorConfig;
use crate::error::DeclarationError;

/// Credential kind, a closed set.
///
/// `preset` is carried separately on [`Declaration`]; the raw wire type
/// names (`PresetPassword`, `PresetTrust`) collapse onto these kinds. There
/// is deliberately no preset rotating keytab: the wire format cannot
/// express one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredKind {
	Disabled,
	RotatingKeytab,
	Password,
	Trust,
}

impl fmt::Display for CredKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			CredKind::Disabled => "Disabled",
			CredKind::RotatingKeytab => "RotatingKeytab",
			CredKind::Password => "Password",
			CredKind::Trust => "Trust",
		};
		f.write_str(name)
	}
}

/// Wire-level credential type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum DeclaredType {
	Disabled,
	Random,
	Password,
	PresetPassword,
	Trust,
	PresetTrust,
}

impl DeclaredType {
	fn kind(self) -> CredKind {
		match self {
			DeclaredType::Disabled => CredKind::Disabled,
			DeclaredType::Random => CredKind::RotatingKeytab,
			DeclaredType::Password | DeclaredType::PresetPassword => CredKind::Password,
			DeclaredType::Trust | DeclaredType::PresetTrust => CredKind::Trust,
		}
	}

	fn preset(self) -> bool {
		matches!(self, DeclaredType::PresetPassword | DeclaredType::PresetTrust)
	}
}

/// Reference to a secret on a sibling cluster.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClusterRef {
	/// Cluster id as registered with the cluster-manager service.
	pub uuid: String,
	/// Namespace on the remote cluster; defaults to the declaration's own.
	#[serde(default)]
	pub namespace: Option<String>,
}

/// Raw desired-state record as it appears on the declaration object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyDeclarationSpec {
	#[serde(rename = "type")]
	pub declared_type: DeclaredType,
	#[serde(default)]
	pub principal: Option<String>,
	#[serde(default)]
	pub additional_principals: Vec<String>,
	#[serde(default)]
	pub keep_old_keys: bool,
	/// `"name/key"` within the declaration's namespace.
	#[serde(default)]
	pub secret: Option<String>,
	/// Sealing-certificate reference; presence selects the Sealed backend.
	#[serde(default)]
	pub seal_with: Option<String>,
	/// Remote cluster; presence selects the RemoteCluster backend.
	#[serde(default)]
	pub cluster: Option<ClusterRef>,
}

/// Identifies where secret bytes live. Immutable once resolved for a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretLocation {
	Local {
		namespace: String,
		name: String,
		key: String,
	},
	Sealed {
		namespace: String,
		name: String,
		key: String,
		/// Reference to the sealing public certificate.
		cert: String,
	},
	Remote {
		cluster: String,
		namespace: String,
		name: String,
		key: String,
	},
}

impl fmt::Display for SecretLocation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SecretLocation::Local { namespace, name, key } => {
				write!(f, "{namespace}/{name}/{key}")
			}
			SecretLocation::Sealed { namespace, name, key, .. } => {
				write!(f, "sealed:{namespace}/{name}/{key}")
			}
			SecretLocation::Remote { cluster, namespace, name, key } => {
				write!(f, "cluster:{cluster}:{namespace}/{name}/{key}")
			}
		}
	}
}

/// Normalized desired state for one credential object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
	/// Unique principal names; more than one only for rotating keytabs.
	pub principals: BTreeSet<String>,
	pub kind: CredKind,
	/// Secret material is supplied externally and pushed into the KDC.
	pub preset: bool,
	/// Retain superseded key versions in the keytab (rotating keytab only).
	pub keep_old: bool,
	/// Absent only for `Disabled`.
	pub secret: Option<SecretLocation>,
}

impl Declaration {
	/// Normalize a raw record into a validated declaration.
	///
	/// `namespace` is the namespace of the declaration object itself. All
	/// validation happens here, before any KDC or store mutation anywhere
	/// else in the engine.
	pub fn from_spec(
		namespace: &str,
		spec: &KeyDeclarationSpec,
		config: &OperatorConfig,
	) -> Result<Self, DeclarationError> {
		let kind = spec.declared_type.kind();
		let preset = spec.declared_type.preset();

		// Disabled is a sentinel: every other field is erased so that two
		// disabled declarations always compare equal.
		if kind == CredKind::Disabled {
			return Ok(Self {
				principals: BTreeSet::new(),
				kind,
				preset: false,
				keep_old: false,
				secret: None,
			});
		}

		if preset && spec.keep_old_keys {
			return Err(DeclarationError::PresetWithKeepOld);
		}

		let mut principals = BTreeSet::new();
		match &spec.principal {
			Some(principal) => {
				principals.insert(principal.clone());
			}
			None => return Err(DeclarationError::MissingPrincipal),
		}
		for extra in &spec.additional_principals {
			principals.insert(extra.clone());
		}

		match kind {
			CredKind::RotatingKeytab => {}
			_ if !spec.additional_principals.is_empty() => {
				return Err(DeclarationError::ExtraPrincipals);
			}
			_ if principals.len() != 1 => {
				return Err(DeclarationError::WrongPrincipalCount {
					kind: kind.to_string(),
					count: principals.len(),
				});
			}
			_ => {}
		}

		let keep_old = spec.keep_old_keys && kind == CredKind::RotatingKeytab;
		let secret = Some(Self::resolve_location(namespace, spec, config)?);

		Ok(Self {
			principals,
			kind,
			preset,
			keep_old,
			secret,
		})
	}

	fn resolve_location(
		namespace: &str,
		spec: &KeyDeclarationSpec,
		config: &OperatorConfig,
	) -> Result<SecretLocation, DeclarationError> {
		let reference = spec
			.secret
			.as_deref()
			.ok_or(DeclarationError::MissingSecret)?;
		let (name, key) = match reference.split_once('/') {
			Some((name, key)) if !name.is_empty() && !key.is_empty() => (name, key),
			_ => {
				return Err(DeclarationError::BadSecretRef {
					value: reference.to_string(),
				})
			}
		};

		let namespace = if namespace.is_empty() {
			config
				.default_namespace
				.clone()
				.unwrap_or_else(|| namespace.to_string())
		} else {
			namespace.to_string()
		};

		if let Some(cluster) = &spec.cluster {
			return Ok(SecretLocation::Remote {
				cluster: cluster.uuid.clone(),
				namespace: cluster.namespace.clone().unwrap_or(namespace),
				name: name.to_string(),
				key: key.to_string(),
			});
		}

		if let Some(cert) = &spec.seal_with {
			return Ok(SecretLocation::Sealed {
				namespace,
				name: name.to_string(),
				key: key.to_string(),
				cert: cert.clone(),
			});
		}

		Ok(SecretLocation::Local {
			namespace,
			name: name.to_string(),
			key: key.to_string(),
		})
	}

	/// The single principal of a Password or Trust declaration.
	///
	/// Validation guarantees exactly one principal for those kinds.
	pub fn principal(&self) -> &str {
		self
			.principals
			.iter()
			.next()
			.map(String::as_str)
			.unwrap_or_default()
	}
}
