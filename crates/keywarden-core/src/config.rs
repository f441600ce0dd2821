// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use chrono::Duration;
use tracing::warn;

const DEFAULT_EXPIRE_OLD_KEYS_SECS: i64 = 86_400;

/// Operator configuration, carried by value into the reconciler.
///
/// Loaded once at startup; there is no ambient context. Every procedure that
/// needs configuration receives it explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
	/// Namespace assumed for declarations that do not name one.
	pub default_namespace: Option<String>,
	/// Retention window for superseded keytab entries.
	pub expire_old_keys: Duration,
}

impl OperatorConfig {
	/// Read configuration from the environment.
	///
	/// `DEFAULT_NAMESPACE` and `EXPIRE_OLD_KEYS` (seconds) are honoured;
	/// anything unparseable falls back to the default with a warning.
	pub fn from_env() -> Self {
		let default_namespace = std::env::var("DEFAULT_NAMESPACE").ok();
		let expire_old_keys = match std::env::var("EXPIRE_OLD_KEYS") {
			Ok(raw) => match raw.parse::<i64>() {
				Ok(secs) if secs > 0 => Duration::seconds(secs),
				_ => {
					warn!(value = %raw, "invalid EXPIRE_OLD_KEYS, using default");
					Duration::seconds(DEFAULT_EXPIRE_OLD_KEYS_SECS)
				}
			},
			Err(_) => Duration::seconds(DEFAULT_EXPIRE_OLD_KEYS_SECS),
		};

		Self {
			default_namespace,
			expire_old_keys,
		}
	}

	/// Interval at which the dispatcher should fire the trim timer.
	pub fn trim_interval(&self) -> Duration {
		self.expire_old_keys / 2
	}
}

impl Default for OperatorConfig {
	fn default() -> Self {
		Self {
			default_namespace: None,
			expire_old_keys: Duration::seconds(DEFAULT_EXPIRE_OLD_KEYS_SECS),
		}
	}
}
