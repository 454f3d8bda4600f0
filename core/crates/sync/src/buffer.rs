use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, Notify};

/// Which persisted blobs a mutation touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Dirty {
	pub patients: bool,
	pub updates: bool,
	pub outbox: bool,
}

impl Dirty {
	pub const PATIENTS: Self = Self {
		patients: true,
		updates: false,
		outbox: false,
	};
	pub const UPDATES: Self = Self {
		patients: false,
		updates: true,
		outbox: false,
	};
	pub const ALL: Self = Self {
		patients: true,
		updates: true,
		outbox: true,
	};

	/// Also rewrite the outbox, for mutations that change what is left to deliver.
	pub const fn with_outbox(self) -> Self {
		Self {
			outbox: true,
			..self
		}
	}

	const fn any(self) -> bool {
		self.patients || self.updates || self.outbox
	}

	fn merge(&mut self, other: Self) {
		self.patients |= other.patients;
		self.updates |= other.updates;
		self.outbox |= other.outbox;
	}
}

#[derive(Debug, Default)]
struct Inner {
	dirty: Dirty,
	staged: usize,
	/// Admitted mutations that have not staged or backed out yet
	reserved: usize,
	generation: u64,
	durable: u64,
}

/// Coalesces mutations into batched writes.
///
/// Mutations only mark blobs dirty and bump the generation; a flush writes every dirty blob
/// at once and then declares everything up to its generation durable.
///
/// Every mutation first takes a [`Reservation`]. No reservation is handed out while staged
/// plus reserved writes reach the capacity, so concurrent mutations cannot stage past it.
#[derive(Debug)]
pub(crate) struct WriteBuffer {
	inner: Mutex<Inner>,
	capacity: usize,
	/// Signalled whenever a reservation is given back
	released: Notify,
	/// Serializes flushes, held across the store calls
	pub io: AsyncMutex<()>,
}

/// Room for one staged write, held for the whole mutation.
#[derive(Debug)]
pub(crate) struct Reservation<'buf> {
	buffer: &'buf WriteBuffer,
}

impl Drop for Reservation<'_> {
	fn drop(&mut self) {
		self.buffer.inner().reserved -= 1;
		self.buffer.released.notify_one();
	}
}

/// A flush in progress. Dropping it without [`Flush::complete`] puts everything it covered
/// back to dirty, so a failed or cancelled flush is retried by the next one.
#[derive(Debug)]
pub(crate) struct Flush<'buf> {
	buffer: &'buf WriteBuffer,
	pub dirty: Dirty,
	pub generation: u64,
	done: bool,
}

impl Flush<'_> {
	pub fn complete(mut self) {
		self.done = true;
		let mut inner = self.buffer.inner();
		inner.durable = inner.durable.max(self.generation);
	}
}

impl Drop for Flush<'_> {
	fn drop(&mut self) {
		if !self.done {
			let mut inner = self.buffer.inner();
			inner.dirty.merge(self.dirty);
			inner.staged = inner.staged.max(
				usize::try_from(inner.generation - inner.durable).unwrap_or(usize::MAX),
			);
		}
	}
}

impl WriteBuffer {
	pub fn new(capacity: usize) -> Self {
		Self {
			inner: Mutex::default(),
			capacity: capacity.max(1),
			released: Notify::new(),
			io: AsyncMutex::new(()),
		}
	}

	fn inner(&self) -> MutexGuard<'_, Inner> {
		self.inner.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Records a mutation, returning the generation it belongs to.
	pub fn stage(&self, dirty: Dirty) -> u64 {
		let mut inner = self.inner();
		inner.dirty.merge(dirty);
		inner.staged += 1;
		inner.generation += 1;
		inner.generation
	}

	/// Claims room for one mutation, `None` while staged and reserved writes fill the buffer.
	pub fn try_reserve(&self) -> Option<Reservation<'_>> {
		let mut inner = self.inner();
		if inner.staged + inner.reserved >= self.capacity {
			return None;
		}

		inner.reserved += 1;
		Some(Reservation { buffer: self })
	}

	/// Resolves once some reservation was given back since the last call.
	pub async fn released(&self) {
		self.released.notified().await;
	}

	/// Marks the outbox blob stale without counting as a staged mutation.
	pub fn touch_outbox(&self) {
		self.inner().dirty.outbox = true;
	}

	pub fn is_full(&self) -> bool {
		self.inner().staged >= self.capacity
	}

	pub fn staged(&self) -> usize {
		self.inner().staged
	}

	pub fn durable_generation(&self) -> u64 {
		self.inner().durable
	}

	pub fn begin_flush(&self) -> Option<Flush<'_>> {
		let mut inner = self.inner();
		if !inner.dirty.any() {
			return None;
		}

		let flush = Flush {
			buffer: self,
			dirty: inner.dirty,
			generation: inner.generation,
			done: false,
		};
		inner.dirty = Dirty::default();
		inner.staged = 0;

		Some(flush)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn flush_makes_staged_generations_durable() {
		let buffer = WriteBuffer::new(8);
		assert!(buffer.begin_flush().is_none());

		let first = buffer.stage(Dirty::PATIENTS.with_outbox());
		let second = buffer.stage(Dirty::UPDATES);
		assert!(second > first);
		assert_eq!(buffer.durable_generation(), 0);

		let flush = buffer.begin_flush().unwrap();
		assert_eq!(flush.dirty, Dirty::ALL);

		// Staged while the flush is running, not covered by it
		let third = buffer.stage(Dirty::PATIENTS);

		flush.complete();
		assert_eq!(buffer.durable_generation(), second);
		assert!(buffer.durable_generation() < third);
		assert_eq!(buffer.staged(), 1);
	}

	#[test]
	fn dropped_flush_keeps_everything_dirty() {
		let buffer = WriteBuffer::new(2);
		buffer.stage(Dirty::UPDATES);
		buffer.stage(Dirty::UPDATES);
		assert!(buffer.is_full());

		let flush = buffer.begin_flush().unwrap();
		assert!(!buffer.is_full());
		drop(flush);

		assert!(buffer.is_full());
		assert_eq!(buffer.durable_generation(), 0);
		assert_eq!(buffer.begin_flush().unwrap().dirty, Dirty::UPDATES);
	}

	#[test]
	fn reservations_count_against_capacity() {
		let buffer = WriteBuffer::new(2);

		let first = buffer.try_reserve().unwrap();
		let second = buffer.try_reserve().unwrap();
		assert!(buffer.try_reserve().is_none());

		// A mutation that backed out frees its room
		drop(first);
		let third = buffer.try_reserve().unwrap();

		// Staged writes keep theirs until flushed
		buffer.stage(Dirty::PATIENTS);
		drop(second);
		assert!(buffer.try_reserve().is_none());
		buffer.stage(Dirty::PATIENTS);
		drop(third);
		assert!(buffer.try_reserve().is_none());
		assert_eq!(buffer.staged(), 2);

		buffer.begin_flush().unwrap().complete();
		assert!(buffer.try_reserve().is_some());
	}

	#[tokio::test]
	async fn giving_back_a_reservation_wakes_a_waiter() {
		let buffer = WriteBuffer::new(1);
		let held = buffer.try_reserve().unwrap();
		assert!(buffer.try_reserve().is_none());

		drop(held);
		// Released before anyone waited, the wake-up is kept
		tokio::time::timeout(std::time::Duration::from_secs(1), buffer.released())
			.await
			.unwrap();
		assert!(buffer.try_reserve().is_some());
	}

	#[test]
	fn outbox_touch_does_not_fill_the_buffer() {
		let buffer = WriteBuffer::new(1);
		buffer.touch_outbox();

		assert!(!buffer.is_full());
		assert!(buffer.begin_flush().unwrap().dirty.outbox);
	}
}
