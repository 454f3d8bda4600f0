//! Diagnostic counters
//!
//! Outcomes that are deliberately not errors (stale or duplicate deliveries, ignored acks)
//! are still counted here so they stay observable.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct Diagnostics {
	pub local_submissions: AtomicU64,
	pub messages_received: AtomicU64,
	pub remote_records_applied: AtomicU64,
	pub stale_records_discarded: AtomicU64,
	pub exhausted_records_rejected: AtomicU64,
	pub duplicate_records: AtomicU64,
	pub duplicate_updates: AtomicU64,
	pub conflicts_resolved: AtomicU64,
	pub updates_appended: AtomicU64,
	pub deliveries_handed_off: AtomicU64,
	pub deliveries_acked: AtomicU64,
	pub deliveries_failed: AtomicU64,
	pub superseded_reports: AtomicU64,
	pub flushes: AtomicU64,
	pub flush_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticsSnapshot {
	pub local_submissions: u64,
	pub messages_received: u64,
	pub remote_records_applied: u64,
	pub stale_records_discarded: u64,
	pub exhausted_records_rejected: u64,
	pub duplicate_records: u64,
	pub duplicate_updates: u64,
	pub conflicts_resolved: u64,
	pub updates_appended: u64,
	pub deliveries_handed_off: u64,
	pub deliveries_acked: u64,
	pub deliveries_failed: u64,
	pub superseded_reports: u64,
	pub flushes: u64,
	pub flush_failures: u64,
}

pub(crate) fn bump(counter: &AtomicU64) {
	counter.fetch_add(1, Ordering::Relaxed);
}

impl Diagnostics {
	#[must_use]
	pub fn snapshot(&self) -> DiagnosticsSnapshot {
		let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

		DiagnosticsSnapshot {
			local_submissions: load(&self.local_submissions),
			messages_received: load(&self.messages_received),
			remote_records_applied: load(&self.remote_records_applied),
			stale_records_discarded: load(&self.stale_records_discarded),
			exhausted_records_rejected: load(&self.exhausted_records_rejected),
			duplicate_records: load(&self.duplicate_records),
			duplicate_updates: load(&self.duplicate_updates),
			conflicts_resolved: load(&self.conflicts_resolved),
			updates_appended: load(&self.updates_appended),
			deliveries_handed_off: load(&self.deliveries_handed_off),
			deliveries_acked: load(&self.deliveries_acked),
			deliveries_failed: load(&self.deliveries_failed),
			superseded_reports: load(&self.superseded_reports),
			flushes: load(&self.flushes),
			flush_failures: load(&self.flush_failures),
		}
	}
}
