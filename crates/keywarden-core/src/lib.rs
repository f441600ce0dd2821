// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Kerberos credential-lifecycle reconciliation engine.
//!
//! This crate reconciles declared credential intentions against the actual
//! state of a KDC and a secret-storage backend. It owns the normalized
//! declaration model, the per-credential-kind strategies, the keytab codec
//! and expiry trimmer, and the rekey/trim decision procedures. The KDC admin
//! transport and the concrete secret backends are injected behind traits.

pub mod config;
pub mod declaration;
pub mod error;
pub mod idents;
pub mod kadmin;
pub mod keyops;
pub mod keytab;
pub mod material;
pub mod reconcile;
pub mod store;
pub mod trim;

pub use config::OperatorConfig;
pub use declaration::{ClusterRef, CredKind, Declaration, DeclaredType, KeyDeclarationSpec, SecretLocation};
pub use error::{DeclarationError, KdcError, ReconcileError, ReconcileResult, StoreError};
pub use kadmin::{Credential, KdcAdmin, MockKdcAdmin};
pub use material::{KeyMaterial, KeyMetadata, KeyOpResult, TrustEnvelope};
pub use reconcile::{EventReason, ReconcileOutcome, Reconciler};
pub use store::{MemoryBackends, MemoryStore, SecretStore, StoreProvider};
