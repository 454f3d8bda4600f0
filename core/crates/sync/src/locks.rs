use std::{
	collections::HashMap,
	hash::Hash,
	sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap<K> = HashMap<K, Arc<AsyncMutex<()>>>;

/// One async mutex per key: work on the same key is serialized, different keys never wait
/// on each other.
///
/// A key's mutex only lives while someone holds or waits for it, so ids that are no longer
/// touched (deleted records included) leave nothing behind.
#[derive(Debug)]
pub(crate) struct KeyedLocks<K> {
	locks: Mutex<LockMap<K>>,
}

/// Held lock on one key. Dropping it releases the key and prunes its mutex once nobody else
/// is waiting on it.
#[derive(Debug)]
pub(crate) struct KeyGuard<'locks, K: Hash + Eq> {
	locks: &'locks KeyedLocks<K>,
	key: K,
	guard: Option<OwnedMutexGuard<()>>,
}

impl<K> Default for KeyedLocks<K> {
	fn default() -> Self {
		Self {
			locks: Mutex::new(HashMap::new()),
		}
	}
}

impl<K: Hash + Eq + Clone> KeyedLocks<K> {
	fn map(&self) -> MutexGuard<'_, LockMap<K>> {
		self.locks.lock().unwrap_or_else(PoisonError::into_inner)
	}

	pub async fn lock(&self, key: &K) -> KeyGuard<'_, K> {
		// Cloned under the map lock, so the count seen when pruning includes every waiter
		let lock = Arc::clone(self.map().entry(key.clone()).or_default());

		KeyGuard {
			locks: self,
			key: key.clone(),
			guard: Some(lock.lock_owned().await),
		}
	}

	/// Keys currently holding a mutex.
	#[cfg(test)]
	pub fn len(&self) -> usize {
		self.map().len()
	}
}

impl<K: Hash + Eq> Drop for KeyGuard<'_, K> {
	fn drop(&mut self) {
		drop(self.guard.take());

		let mut map = self.locks.locks.lock().unwrap_or_else(PoisonError::into_inner);
		if map
			.get(&self.key)
			.is_some_and(|lock| Arc::strong_count(lock) == 1)
		{
			map.remove(&self.key);
		}
	}
}
