// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Well-known annotation and label names shared with the dispatcher.
//!
//! The reconciliation procedures return patch directives; the dispatcher
//! applies them to the declaration object under these names.

/// Application id, also used as the managed-by label value on owned secrets.
pub const APP_ID: &str = "keywarden.ghuntley.com";

/// One-shot annotation requesting an unconditional rekey.
pub const FORCE_REKEY: &str = "keywarden.ghuntley.com/force-rekey";

/// Label marking declarations whose keytab still carries superseded keys.
/// The dispatcher's trim timer is gated on this label.
pub const HAS_OLD_KEYS: &str = "keywarden.ghuntley.com/has-old-keys";

/// Standard Kubernetes managed-by label key.
pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
