// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Expiry trimming for rotating keytabs.
//!
//! A superseded key is pruned by its *replacement* time, not its own
//! timestamp: clients that fetched the old keytab get a full retention
//! window after its successor appears to pick the new key up. The rule
//! also behaves correctly when more than two versions of the same
//! principal are live at once.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::keytab::Keytab;

/// Outcome of a trim pass.
#[derive(Debug, Clone)]
pub struct TrimOutcome {
	/// The pruned container, present only when at least one entry was
	/// removed.
	pub keytab: Option<Keytab>,
	/// Whether any superseded-but-unexpired entries remain; drives the
	/// periodic trim timer.
	pub has_old: bool,
}

/// Prune entries whose replacement happened more than `window` ago.
///
/// For every entry, the replacement time is the minimum timestamp among
/// entries of the same principal with a strictly higher kvno; an entry with
/// no successor is the active version and is never a candidate. Running the
/// trimmer twice with the same `now` removes nothing on the second pass.
pub fn trim(keytab: &Keytab, now: DateTime<Utc>, window: Duration) -> TrimOutcome {
	let cutoff = now - window;

	let mut kept = Vec::with_capacity(keytab.entries.len());
	let mut removed = false;
	let mut has_old = false;

	for entry in &keytab.entries {
		let replacement = keytab
			.entries
			.iter()
			.filter(|other| other.principal == entry.principal && other.kvno > entry.kvno)
			.map(|other| other.timestamp)
			.min();

		match replacement {
			Some(replaced_at) if replaced_at < cutoff => {
				debug!(principal = %entry.principal, kvno = entry.kvno, "removing expired keytab entry");
				removed = true;
			}
			Some(_) => {
				// Superseded but still inside the retention window.
				has_old = true;
				kept.push(entry.clone());
			}
			None => kept.push(entry.clone()),
		}
	}

	TrimOutcome {
		keytab: removed.then(|| Keytab { entries: kept }),
		has_old,
	}
}
