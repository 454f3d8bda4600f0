//! Per-key propagation state machine
//!
//! ```text
//! pending -> syncing -> synced
//!               |
//!               +----> failed -> pending (retry)
//! ```
//!
//! Leaving `synced` is only possible through a new local mutation of the same key, which
//! resets it to `pending`. Every hand-off bumps the entry's attempt counter, so reports for
//! an older hand-off or an older version can be told apart and ignored.

use std::{
	collections::HashMap,
	fmt,
	hash::Hash,
	sync::{Mutex, MutexGuard, PoisonError},
};

use fm_model::{SyncStatus, Timestamp};
use serde::Serialize;

use crate::config::RetryPolicy;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
	#[error("no sync state tracked <key='{key}'>")]
	Untracked { key: String },
	#[error("invalid sync transition <key='{key}'>: {from} -> {to}")]
	Invalid {
		key: String,
		from: SyncStatus,
		to: SyncStatus,
	},
}

/// What became of a delivery report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
	Acknowledged,
	Failed { failures: u32 },
	/// The report refers to a hand-off that is no longer current, nothing changed.
	Superseded,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounts {
	pub pending: usize,
	pub syncing: usize,
	pub synced: usize,
	pub failed: usize,
}

impl SyncCounts {
	#[must_use]
	pub const fn total(&self) -> usize {
		self.pending + self.syncing + self.synced + self.failed
	}

	#[must_use]
	pub const fn get(&self, status: SyncStatus) -> usize {
		match status {
			SyncStatus::Pending => self.pending,
			SyncStatus::Syncing => self.syncing,
			SyncStatus::Synced => self.synced,
			SyncStatus::Failed => self.failed,
		}
	}
}

#[derive(Debug, Clone)]
struct Entry {
	status: SyncStatus,
	version: u64,
	attempt: u64,
	failures: u32,
	last_failure: Option<Timestamp>,
}

#[derive(Debug)]
struct Inner<K> {
	entries: HashMap<K, Entry>,
	counts: [usize; 4],
}

impl<K: Hash + Eq> Inner<K> {
	fn set(&mut self, key: K, entry: Entry) -> Option<SyncStatus> {
		self.counts[entry.status.index()] += 1;
		let previous = self.entries.insert(key, entry).map(|old| old.status);
		if let Some(previous) = previous {
			self.counts[previous.index()] -= 1;
		}
		previous
	}

	fn transition(entry: &mut Entry, counts: &mut [usize; 4], to: SyncStatus) {
		counts[entry.status.index()] -= 1;
		counts[to.index()] += 1;
		entry.status = to;
	}
}

#[derive(Debug)]
pub struct SyncTracker<K> {
	inner: Mutex<Inner<K>>,
}

impl<K> Default for SyncTracker<K> {
	fn default() -> Self {
		Self {
			inner: Mutex::new(Inner {
				entries: HashMap::new(),
				counts: [0; 4],
			}),
		}
	}
}

impl<K: Hash + Eq + Clone + fmt::Display> SyncTracker<K> {
	fn inner(&self) -> MutexGuard<'_, Inner<K>> {
		self.inner.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// A new local mutation of `key`: whatever was in flight for it is abandoned.
	pub fn mark_pending(&self, key: K, version: u64) -> Option<SyncStatus> {
		let mut inner = self.inner();
		let attempt = inner.entries.get(&key).map_or(0, |entry| entry.attempt);

		inner.set(
			key,
			Entry {
				status: SyncStatus::Pending,
				version,
				attempt,
				failures: 0,
				last_failure: None,
			},
		)
	}

	/// State known to be propagated already, like loaded or adopted remote state.
	pub fn mark_synced(&self, key: K, version: u64) -> Option<SyncStatus> {
		let mut inner = self.inner();
		let attempt = inner.entries.get(&key).map_or(0, |entry| entry.attempt);

		inner.set(
			key,
			Entry {
				status: SyncStatus::Synced,
				version,
				attempt,
				failures: 0,
				last_failure: None,
			},
		)
	}

	/// `pending -> syncing`, returns the attempt number identifying this hand-off.
	pub fn begin_delivery(&self, key: &K, version: u64) -> Result<u64, TransitionError> {
		let mut inner = self.inner();
		let Inner { entries, counts } = &mut *inner;

		let entry = entries
			.get_mut(key)
			.ok_or_else(|| TransitionError::Untracked {
				key: key.to_string(),
			})?;

		if entry.status != SyncStatus::Pending || entry.version != version {
			return Err(TransitionError::Invalid {
				key: key.to_string(),
				from: entry.status,
				to: SyncStatus::Syncing,
			});
		}

		entry.attempt += 1;
		Inner::<K>::transition(entry, counts, SyncStatus::Syncing);

		Ok(entry.attempt)
	}

	/// `syncing -> synced`, if `(version, attempt)` is still the current hand-off.
	pub fn acknowledge(&self, key: &K, version: u64, attempt: u64) -> Delivery {
		let mut inner = self.inner();
		let Inner { entries, counts } = &mut *inner;

		match entries.get_mut(key) {
			Some(entry) if entry.is_current(version, attempt) => {
				entry.failures = 0;
				entry.last_failure = None;
				Inner::<K>::transition(entry, counts, SyncStatus::Synced);
				Delivery::Acknowledged
			}
			_ => Delivery::Superseded,
		}
	}

	/// `syncing -> failed`, if `(version, attempt)` is still the current hand-off.
	pub fn fail(&self, key: &K, version: u64, attempt: u64, at: Timestamp) -> Delivery {
		let mut inner = self.inner();
		let Inner { entries, counts } = &mut *inner;

		match entries.get_mut(key) {
			Some(entry) if entry.is_current(version, attempt) => {
				entry.failures = entry.failures.saturating_add(1);
				entry.last_failure = Some(at);
				Inner::<K>::transition(entry, counts, SyncStatus::Failed);
				Delivery::Failed {
					failures: entry.failures,
				}
			}
			_ => Delivery::Superseded,
		}
	}

	/// `failed -> pending`. Returns the version to hand off again.
	pub fn retry(&self, key: &K) -> Result<u64, TransitionError> {
		let mut inner = self.inner();
		let Inner { entries, counts } = &mut *inner;

		let entry = entries
			.get_mut(key)
			.ok_or_else(|| TransitionError::Untracked {
				key: key.to_string(),
			})?;

		if entry.status != SyncStatus::Failed {
			return Err(TransitionError::Invalid {
				key: key.to_string(),
				from: entry.status,
				to: SyncStatus::Pending,
			});
		}

		Inner::<K>::transition(entry, counts, SyncStatus::Pending);

		Ok(entry.version)
	}

	/// Failed keys whose backoff delay has elapsed at `now`.
	pub fn due_for_retry(&self, now: Timestamp, policy: &RetryPolicy) -> Vec<K> {
		self.inner()
			.entries
			.iter()
			.filter(|(_, entry)| {
				entry.status == SyncStatus::Failed
					&& policy.allows(entry.failures)
					&& entry.last_failure.map_or(true, |at| {
						let delay = i64::try_from(policy.delay_for(entry.failures).as_millis())
							.unwrap_or(i64::MAX);
						now.timestamp_millis() >= at.timestamp_millis().saturating_add(delay)
					})
			})
			.map(|(key, _)| key.clone())
			.collect()
	}

	pub fn failed(&self) -> Vec<K> {
		self.inner()
			.entries
			.iter()
			.filter(|(_, entry)| entry.status == SyncStatus::Failed)
			.map(|(key, _)| key.clone())
			.collect()
	}

	/// Everything not yet confirmed, with the version it refers to.
	pub fn unsynced(&self) -> Vec<(K, u64)> {
		self.inner()
			.entries
			.iter()
			.filter(|(_, entry)| entry.status != SyncStatus::Synced)
			.map(|(key, entry)| (key.clone(), entry.version))
			.collect()
	}

	pub fn remove(&self, key: &K) -> Option<SyncStatus> {
		let mut inner = self.inner();
		let removed = inner.entries.remove(key).map(|entry| entry.status);
		if let Some(status) = removed {
			inner.counts[status.index()] -= 1;
		}
		removed
	}

	#[must_use]
	pub fn status(&self, key: &K) -> Option<SyncStatus> {
		self.inner().entries.get(key).map(|entry| entry.status)
	}

	#[must_use]
	pub fn version(&self, key: &K) -> Option<u64> {
		self.inner().entries.get(key).map(|entry| entry.version)
	}

	#[must_use]
	pub fn counts(&self) -> SyncCounts {
		let [pending, syncing, synced, failed] = self.inner().counts;

		SyncCounts {
			pending,
			syncing,
			synced,
			failed,
		}
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.inner().entries.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl Entry {
	fn is_current(&self, version: u64, attempt: u64) -> bool {
		self.status == SyncStatus::Syncing && self.version == version && self.attempt == attempt
	}
}
