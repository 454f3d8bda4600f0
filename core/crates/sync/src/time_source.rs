//! Time source abstraction
//!
//! Every instant the engine stamps on records, updates and delivery deadlines comes from a
//! [`TimeSource`], so tests can drive the clock (including backwards, for skew scenarios).

use std::sync::{
	atomic::{AtomicI64, Ordering},
	Arc,
};

use chrono::{DateTime, TimeDelta, Utc};
use fm_model::{truncate_to_millis, Timestamp};

pub trait TimeSource: Send + Sync {
	/// Current instant, millisecond precision.
	fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
	fn now(&self) -> Timestamp {
		truncate_to_millis(Utc::now())
	}
}

/// Manually driven clock shared between clones.
///
/// ## Example
/// ```rust
/// use fm_core_sync::{FakeTimeSource, TimeSource};
///
/// let time = FakeTimeSource::new(1_000);
/// assert_eq!(time.now().timestamp_millis(), 1_000);
///
/// time.advance_ms(500);
/// assert_eq!(time.now().timestamp_millis(), 1_500);
/// ```
#[derive(Debug, Clone)]
pub struct FakeTimeSource {
	millis: Arc<AtomicI64>,
}

impl Default for FakeTimeSource {
	fn default() -> Self {
		// 2024-01-01T00:00:00Z
		Self::new(1_704_067_200_000)
	}
}

impl FakeTimeSource {
	/// Starts at `initial_ms` milliseconds since the Unix epoch.
	#[must_use]
	pub fn new(initial_ms: i64) -> Self {
		Self {
			millis: Arc::new(AtomicI64::new(initial_ms)),
		}
	}

	pub fn advance_ms(&self, delta_ms: i64) {
		self.millis.fetch_add(delta_ms, Ordering::SeqCst);
	}

	pub fn advance(&self, delta: TimeDelta) {
		self.advance_ms(delta.num_milliseconds());
	}

	/// Can go backwards.
	pub fn set_ms(&self, millis: i64) {
		self.millis.store(millis, Ordering::SeqCst);
	}

	#[must_use]
	pub fn get_ms(&self) -> i64 {
		self.millis.load(Ordering::SeqCst)
	}
}

impl TimeSource for FakeTimeSource {
	fn now(&self) -> Timestamp {
		DateTime::from_timestamp_millis(self.get_ms()).unwrap_or_default()
	}
}
