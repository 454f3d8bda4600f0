use std::{
	collections::VecDeque,
	sync::{Mutex, MutexGuard, PoisonError},
};

use crate::transport::SyncKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OutboxEntry {
	pub key: SyncKey,
	pub version: u64,
	/// Write buffer generation that must be durable before this entry may leave the device
	pub generation: u64,
}

/// Deliveries waiting to be handed to the transport, oldest first.
#[derive(Debug, Default)]
pub(crate) struct Outbox {
	entries: Mutex<VecDeque<OutboxEntry>>,
}

impl Outbox {
	fn entries(&self) -> MutexGuard<'_, VecDeque<OutboxEntry>> {
		self.entries.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Queues `key`, replacing any older entry for it in place.
	pub fn push(&self, key: SyncKey, version: u64, generation: u64) {
		let mut entries = self.entries();

		if let Some(entry) = entries.iter_mut().find(|entry| entry.key == key) {
			entry.version = version;
			entry.generation = entry.generation.max(generation);
		} else {
			entries.push_back(OutboxEntry {
				key,
				version,
				generation,
			});
		}
	}

	pub fn remove(&self, key: &SyncKey) -> bool {
		let mut entries = self.entries();
		let before = entries.len();
		entries.retain(|entry| &entry.key != key);
		entries.len() != before
	}

	/// Takes every entry whose generation is already durable, keeping the rest queued.
	pub fn take_ready(&self, durable_generation: u64) -> Vec<OutboxEntry> {
		let mut entries = self.entries();
		let (ready, waiting) = entries
			.drain(..)
			.partition::<Vec<_>, _>(|entry| entry.generation <= durable_generation);
		entries.extend(waiting);
		ready
	}

	pub fn len(&self) -> usize {
		self.entries().len()
	}
}
