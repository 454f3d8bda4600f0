use std::sync::{
	atomic::{AtomicBool, AtomicUsize, Ordering},
	Arc, Mutex, MutexGuard, PoisonError,
};

use async_trait::async_trait;
use fm_model::{MedicalUpdate, PatientRecord};

use super::{Snapshot, Store, StoreError, Undelivered};

#[derive(Debug, Default)]
struct Inner {
	snapshot: Mutex<Snapshot>,
	fail_writes: AtomicBool,
	saves: AtomicUsize,
}

/// In-memory store. Clones share the same contents, so a test can keep a handle on what an
/// engine persisted and make its writes fail on demand.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
	inner: Arc<Inner>,
}

impl MemoryStore {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn with_snapshot(snapshot: Snapshot) -> Self {
		let store = Self::default();
		*store.snapshot_mut() = snapshot;
		store
	}

	fn snapshot_mut(&self) -> MutexGuard<'_, Snapshot> {
		self.inner
			.snapshot
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
	}

	/// Makes every following save fail until switched back off.
	pub fn fail_writes(&self, fail: bool) {
		self.inner.fail_writes.store(fail, Ordering::Relaxed);
	}

	/// What a reload would see right now.
	#[must_use]
	pub fn persisted(&self) -> Snapshot {
		self.snapshot_mut().clone()
	}

	/// Successful saves so far, of any blob.
	#[must_use]
	pub fn saves(&self) -> usize {
		self.inner.saves.load(Ordering::Relaxed)
	}

	fn write(&self, apply: impl FnOnce(&mut Snapshot)) -> Result<(), StoreError> {
		if self.inner.fail_writes.load(Ordering::Relaxed) {
			return Err(StoreError::Unavailable("injected write failure".to_string()));
		}

		apply(&mut self.snapshot_mut());
		self.inner.saves.fetch_add(1, Ordering::Relaxed);

		Ok(())
	}
}

#[async_trait]
impl Store for MemoryStore {
	async fn load(&self) -> Result<Snapshot, StoreError> {
		Ok(self.persisted())
	}

	async fn save_patients(&self, patients: &[PatientRecord]) -> Result<(), StoreError> {
		self.write(|snapshot| snapshot.patients = patients.to_vec())
	}

	async fn save_updates(&self, updates: &[MedicalUpdate]) -> Result<(), StoreError> {
		self.write(|snapshot| snapshot.updates = updates.to_vec())
	}

	async fn save_outbox(&self, undelivered: &[Undelivered]) -> Result<(), StoreError> {
		self.write(|snapshot| snapshot.undelivered = undelivered.to_vec())
	}
}
