use std::{
	collections::HashMap,
	fmt,
	sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_channel as chan;
use fm_model::{
	MedicalUpdate, PatientRecord, RecordId, SyncStatus, Timestamp, UpdateId, Validate,
	ValidationError, WireMessage,
};
use tokio::sync::{broadcast, Mutex as AsyncMutex, Notify, RwLock};
use tracing::{debug, info, instrument, trace, warn};

use crate::{
	actor::ActorHandle,
	buffer::{Dirty, Reservation, WriteBuffer},
	config::EngineConfig,
	dispatch, ingest,
	event::{ChangeOrigin, EngineEvent, EventBus},
	locks::KeyedLocks,
	merge::{self, MergeDecision},
	metrics::{bump, Diagnostics, DiagnosticsSnapshot},
	outbox::Outbox,
	state::State,
	store::{FileStore, Snapshot, Store, StoreError, Undelivered},
	time_source::{SystemTimeSource, TimeSource},
	tracker::SyncTracker,
	transport::{DeliveryTicket, SyncKey, Transport},
	Error,
};

/// Updates are immutable, every tracked update is at its first and only version.
pub(crate) const UPDATE_VERSION: u64 = 1;

/// What an accepted mutation did to the local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
	Created { version: u64 },
	Updated { version: u64 },
	/// A concurrent edit was resolved into a new version, queued for broadcast.
	Resolved { version: u64 },
	/// Older than what is held locally, discarded.
	Stale,
	/// Already held, nothing changed.
	Duplicate,
	Appended,
}

#[derive(Debug, Clone)]
pub(crate) struct InFlight {
	pub ticket: DeliveryTicket,
	pub deadline: Timestamp,
}

pub(crate) struct Actors {
	dispatcher: ActorHandle,
	ingest: ActorHandle,
}

pub(crate) struct Inner {
	pub config: EngineConfig,
	pub clock: Arc<dyn TimeSource>,
	pub store: Arc<dyn Store>,
	pub transport: Option<Arc<dyn Transport>>,
	pub state: RwLock<State>,
	pub locks: KeyedLocks<RecordId>,
	pub writes: WriteBuffer,
	pub outbox: Outbox,
	pub in_flight: Mutex<HashMap<SyncKey, InFlight>>,
	pub records_sync: SyncTracker<RecordId>,
	pub updates_sync: SyncTracker<UpdateId>,
	pub events: EventBus,
	pub metrics: Diagnostics,
	/// Wakes the dispatcher ahead of its next tick
	pub wake: Notify,
	pub inbound_tx: chan::Sender<Vec<u8>>,
	pub inbound_rx: chan::Receiver<Vec<u8>>,
	actors: AsyncMutex<Option<Actors>>,
}

/// The reconciliation engine: owns the merged local state and drives its propagation.
///
/// Cheap to clone, every clone drives the same engine.
#[derive(Clone)]
pub struct Engine {
	pub(crate) inner: Arc<Inner>,
}

impl fmt::Debug for Engine {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Engine")
			.field("device", &self.inner.config.device_fingerprint)
			.finish_non_exhaustive()
	}
}

pub struct EngineBuilder {
	config: EngineConfig,
	store: Option<Arc<dyn Store>>,
	transport: Option<Arc<dyn Transport>>,
	clock: Option<Arc<dyn TimeSource>>,
}

impl EngineBuilder {
	/// Defaults to a [`FileStore`] under [`EngineConfig::store_dir`].
	#[must_use]
	pub fn store(mut self, store: Arc<dyn Store>) -> Self {
		self.store = Some(store);
		self
	}

	/// Without a transport the engine runs single-device: durable state counts as synced.
	#[must_use]
	pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
		self.transport = Some(transport);
		self
	}

	#[must_use]
	pub fn clock(mut self, clock: Arc<dyn TimeSource>) -> Self {
		self.clock = Some(clock);
		self
	}

	/// Loads the persisted state and builds the engine. Background actors are not started,
	/// see [`Engine::start`].
	#[instrument(skip(self), fields(device = %self.config.device_fingerprint), err)]
	pub async fn open(self) -> Result<Engine, Error> {
		let Self {
			config,
			store,
			transport,
			clock,
		} = self;

		let store = store.unwrap_or_else(|| Arc::new(FileStore::new(config.store_dir())));
		let clock = clock.unwrap_or_else(|| Arc::new(SystemTimeSource));

		let Snapshot {
			patients,
			updates,
			undelivered,
		} = store.load().await?;

		let state = State::from_snapshot(patients, updates);
		let records_sync = SyncTracker::default();
		let updates_sync = SyncTracker::default();
		let outbox = Outbox::default();

		for record in state.records.values() {
			records_sync.mark_synced(record.id.clone(), record.version);
		}

		// Whatever was never confirmed goes out again; receivers deduplicate
		for Undelivered { key, .. } in undelivered {
			match &key {
				SyncKey::Record(id) => {
					let Some(record) = state.records.get(id) else {
						debug!(%key, "Dropping undelivered entry for a missing record");
						continue;
					};
					records_sync.mark_pending(id.clone(), record.version);
					outbox.push(key, record.version, 0);
				}
				SyncKey::Update(id) => {
					if !state.updates.contains(id) {
						debug!(%key, "Dropping undelivered entry for a missing update");
						continue;
					}
					updates_sync.mark_pending(id.clone(), UPDATE_VERSION);
					outbox.push(key, UPDATE_VERSION, 0);
				}
			}
		}

		info!(
			records = state.records.len(),
			updates = state.updates.len(),
			pending = outbox.len(),
			"Engine opened"
		);

		let (inbound_tx, inbound_rx) = chan::unbounded();

		Ok(Engine {
			inner: Arc::new(Inner {
				clock,
				store,
				transport,
				state: RwLock::new(state),
				locks: KeyedLocks::default(),
				writes: WriteBuffer::new(config.write_buffer_capacity),
				outbox,
				in_flight: Mutex::default(),
				records_sync,
				updates_sync,
				events: EventBus::new(config.event_capacity),
				metrics: Diagnostics::default(),
				wake: Notify::new(),
				inbound_tx,
				inbound_rx,
				actors: AsyncMutex::new(None),
				config,
			}),
		})
	}
}

impl Engine {
	#[must_use]
	pub fn builder(config: EngineConfig) -> EngineBuilder {
		EngineBuilder {
			config,
			store: None,
			transport: None,
			clock: None,
		}
	}

	#[must_use]
	pub fn config(&self) -> &EngineConfig {
		&self.inner.config
	}

	#[must_use]
	pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
		self.inner.events.subscribe()
	}

	#[must_use]
	pub fn diagnostics(&self) -> DiagnosticsSnapshot {
		self.inner.metrics.snapshot()
	}

	/// Queue of raw inbound peer payloads, consumed by the ingest actor once started.
	#[must_use]
	pub fn inbound(&self) -> chan::Sender<Vec<u8>> {
		self.inner.inbound_tx.clone()
	}

	/// Spawns the dispatcher and ingest actors.
	pub async fn start(&self) -> Result<(), Error> {
		let mut actors = self.inner.actors.lock().await;
		if actors.is_some() {
			return Err(Error::AlreadyStarted);
		}

		*actors = Some(Actors {
			dispatcher: dispatch::spawn(self.clone()),
			ingest: ingest::spawn(self.clone()),
		});

		debug!("Engine actors started");

		Ok(())
	}

	/// Stops the actors and flushes everything staged. Safe to call more than once.
	#[instrument(skip(self), err)]
	pub async fn shutdown(&self) -> Result<(), Error> {
		let actors = self.inner.actors.lock().await.take();
		if let Some(Actors { dispatcher, ingest }) = actors {
			ingest.stop().await;
			dispatcher.stop().await;
		}

		self.flush().await?;

		info!(staged = self.inner.writes.staged(), "Engine shut down");

		Ok(())
	}

	/// Applies a record authored on this device.
	///
	/// The engine owns the local timeline: the version is the next one after whatever is
	/// held for this id (1 for a new id), the author and `last_modified` are stamped here.
	#[instrument(skip_all, fields(record_id = %record.id), err)]
	pub async fn submit_local_record(&self, record: PatientRecord) -> Result<Outcome, Error> {
		let inner = &*self.inner;

		let mut record = record.normalized();
		record
			.author_fingerprint
			.clone_from(&inner.config.device_fingerprint);
		record.validate()?;

		let _slot = self.reserve().await?;
		let _guard = inner.locks.lock(&record.id).await;

		record.last_modified = inner.clock.now();
		let id = record.id.clone();

		let version = {
			let mut state = inner.state.write().await;
			let version = match state.records.get(&id) {
				None => 1,
				Some(existing) => merge::next_version(existing.version).ok_or_else(|| {
					Error::VersionExhausted {
						id: id.clone(),
						version: existing.version,
					}
				})?,
			};
			record.version = version;
			state.records.insert(id.clone(), record);

			self.queue_local(SyncKey::Record(id.clone()), version, Dirty::PATIENTS);

			version
		};

		bump(&inner.metrics.local_submissions);
		inner.events.emit(EngineEvent::RecordChanged {
			id,
			version,
			origin: ChangeOrigin::Local,
		});
		debug!(version, "Local record applied");

		Ok(if version == 1 {
			Outcome::Created { version }
		} else {
			Outcome::Updated { version }
		})
	}

	/// Appends an update authored on this device to an existing patient's log.
	#[instrument(skip_all, fields(update_id = %update.id, record_id = %update.patient_id), err)]
	pub async fn submit_local_update(&self, update: MedicalUpdate) -> Result<Outcome, Error> {
		let inner = &*self.inner;

		let mut update = update;
		update.notes = update.notes.trim().to_string();
		update
			.author_fingerprint
			.clone_from(&inner.config.device_fingerprint);
		update.validate()?;

		let _slot = self.reserve().await?;
		let _guard = inner.locks.lock(&update.patient_id).await;

		update.timestamp = inner.clock.now();
		let (id, patient_id) = (update.id.clone(), update.patient_id.clone());

		{
			let mut state = inner.state.write().await;
			if !state.records.contains_key(&patient_id) {
				return Err(ValidationError::UnknownPatient(patient_id).into());
			}
			if !state.updates.insert(update) {
				bump(&inner.metrics.duplicate_updates);
				return Ok(Outcome::Duplicate);
			}

			self.queue_local(SyncKey::Update(id.clone()), UPDATE_VERSION, Dirty::UPDATES);
		}

		bump(&inner.metrics.local_submissions);
		bump(&inner.metrics.updates_appended);
		inner.events.emit(EngineEvent::UpdateAppended {
			id,
			patient_id,
			origin: ChangeOrigin::Local,
		});

		Ok(Outcome::Appended)
	}

	/// Merges a record received from a peer.
	///
	/// Peer content is never range checked: a record another device accepted is not dropped
	/// here for being implausible. Its version is the exception: a version with no successor
	/// could never be superseded by a later edit or a resolution, so it is rejected.
	#[instrument(skip_all, fields(record_id = %record.id, version = record.version), err)]
	pub async fn receive_remote_record(&self, record: PatientRecord) -> Result<Outcome, Error> {
		let inner = &*self.inner;

		if merge::next_version(record.version).is_none() {
			bump(&inner.metrics.exhausted_records_rejected);
			return Err(Error::VersionExhausted {
				id: record.id,
				version: record.version,
			});
		}

		let _slot = self.reserve().await?;
		let _guard = inner.locks.lock(&record.id).await;

		let mut state = inner.state.write().await;
		let local_version = state.records.get(&record.id).map(|local| local.version);
		let decision = merge::reconcile(state.records.get(&record.id), &record);

		let outcome = match decision {
			MergeDecision::Stale => {
				bump(&inner.metrics.stale_records_discarded);
				debug!(?local_version, "Stale remote record discarded");
				Outcome::Stale
			}
			MergeDecision::Duplicate => {
				bump(&inner.metrics.duplicate_records);
				trace!("Duplicate remote record");
				Outcome::Duplicate
			}
			MergeDecision::Insert => Outcome::Created {
				version: self.apply_remote(&mut state, record),
			},
			MergeDecision::Replace => Outcome::Updated {
				version: self.apply_remote(&mut state, record),
			},
			MergeDecision::Exhausted => {
				bump(&inner.metrics.exhausted_records_rejected);
				return Err(Error::VersionExhausted {
					id: record.id,
					version: record.version,
				});
			}
			MergeDecision::Resolve(resolved) => {
				let (id, version) = (resolved.id.clone(), resolved.version);
				info!(
					?local_version,
					resolved_version = version,
					winner = %resolved.author_fingerprint,
					"Concurrent edit resolved"
				);
				state.records.insert(id.clone(), resolved);
				self.queue_local(SyncKey::Record(id.clone()), version, Dirty::PATIENTS);

				bump(&inner.metrics.conflicts_resolved);
				inner.events.emit(EngineEvent::RecordChanged {
					id,
					version,
					origin: ChangeOrigin::Merged,
				});

				Outcome::Resolved { version }
			}
		};

		Ok(outcome)
	}

	/// Adds a peer's update to the log. Updates for patients not known yet are kept, their
	/// record may still be on its way.
	#[instrument(skip_all, fields(update_id = %update.id, record_id = %update.patient_id), err)]
	pub async fn receive_remote_update(&self, update: MedicalUpdate) -> Result<Outcome, Error> {
		let inner = &*self.inner;

		let _slot = self.reserve().await?;
		let _guard = inner.locks.lock(&update.patient_id).await;

		let (id, patient_id) = (update.id.clone(), update.patient_id.clone());

		{
			let mut state = inner.state.write().await;
			if !state.records.contains_key(&patient_id) {
				debug!("Update for a patient not known yet, keeping it");
			}
			if !state.updates.insert(update) {
				bump(&inner.metrics.duplicate_updates);
				trace!("Duplicate remote update");
				return Ok(Outcome::Duplicate);
			}

			self.stage(Dirty::UPDATES);
		}

		bump(&inner.metrics.updates_appended);
		inner.events.emit(EngineEvent::UpdateAppended {
			id,
			patient_id,
			origin: ChangeOrigin::Remote,
		});

		Ok(Outcome::Appended)
	}

	/// Decodes one peer payload and merges it.
	#[instrument(skip_all, fields(bytes = payload.len()), err)]
	pub async fn on_receive(&self, payload: &[u8]) -> Result<Outcome, Error> {
		bump(&self.inner.metrics.messages_received);

		match WireMessage::decode(payload, self.inner.config.wire_format)? {
			WireMessage::Record(record) => self.receive_remote_record(record).await,
			WireMessage::Update(update) => self.receive_remote_update(update).await,
		}
	}

	/// Removes a record locally together with its update log and every sync state attached
	/// to either. Returns whether anything was removed.
	#[instrument(skip(self), err)]
	pub async fn delete_record(&self, id: &RecordId) -> Result<bool, Error> {
		let inner = &*self.inner;

		let _slot = self.reserve().await?;
		let _guard = inner.locks.lock(id).await;

		let removed_updates = {
			let mut state = inner.state.write().await;
			let existed = state.records.remove(id).is_some();
			let removed_updates = state.updates.remove_patient(id);

			if !existed && removed_updates.is_empty() {
				return Ok(false);
			}

			self.forget(&SyncKey::Record(id.clone()));
			for update_id in &removed_updates {
				self.forget(&SyncKey::Update(update_id.clone()));
			}
			self.stage(Dirty::ALL);

			removed_updates.len()
		};

		inner
			.events
			.emit(EngineEvent::RecordRemoved { id: id.clone() });
		info!(updates = removed_updates, "Record deleted");

		Ok(true)
	}

	/// Writes every staged mutation through the store.
	///
	/// On failure nothing staged is lost: the next flush writes it again.
	pub async fn flush(&self) -> Result<(), Error> {
		let inner = &*self.inner;
		let _io = inner.writes.io.lock().await;

		let (flush, patients, updates, undelivered) = {
			let state = inner.state.read().await;
			let Some(flush) = inner.writes.begin_flush() else {
				return Ok(());
			};

			let patients = flush.dirty.patients.then(|| state.records_snapshot());
			let updates = flush.dirty.updates.then(|| state.updates.snapshot());
			let undelivered = flush.dirty.outbox.then(|| self.undelivered());

			(flush, patients, updates, undelivered)
		};

		let generation = flush.generation;

		let res = async {
			if let Some(patients) = &patients {
				inner.store.save_patients(patients).await?;
			}
			if let Some(updates) = &updates {
				inner.store.save_updates(updates).await?;
			}
			if let Some(undelivered) = &undelivered {
				inner.store.save_outbox(undelivered).await?;
			}

			Ok::<_, StoreError>(())
		}
		.await;

		match res {
			Ok(()) => {
				flush.complete();
				bump(&inner.metrics.flushes);
				debug!(generation, "Flushed staged writes");
				Ok(())
			}
			Err(e) => {
				drop(flush);
				bump(&inner.metrics.flush_failures);
				warn!(?e, generation, "Failed to flush staged writes");
				Err(e.into())
			}
		}
	}

	/// Claims room in the write buffer for one mutation, flushing first when it is full, so
	/// a mutation is only applied once there is room for it. A failed flush rejects the
	/// mutation with nothing applied.
	///
	/// The reservation is held until the mutation returns, which keeps concurrent mutations
	/// from all passing the check and staging past `write_buffer_capacity`.
	async fn reserve(&self) -> Result<Reservation<'_>, Error> {
		let writes = &self.inner.writes;

		loop {
			if let Some(reservation) = writes.try_reserve() {
				return Ok(reservation);
			}

			if writes.staged() > 0 {
				debug!(staged = writes.staged(), "Write buffer full, flushing before applying");
				self.flush().await?;
			} else {
				// Every slot belongs to a mutation still running, wait for one to finish
				writes.released().await;
			}
		}
	}

	/// Tracks a new local causal point and queues it for delivery. Called with the state
	/// write lock held, right after the in-memory change.
	fn queue_local(&self, key: SyncKey, version: u64, dirty: Dirty) {
		let inner = &*self.inner;

		match &key {
			SyncKey::Record(id) => inner.records_sync.mark_pending(id.clone(), version),
			SyncKey::Update(id) => inner.updates_sync.mark_pending(id.clone(), version),
		};

		// Whatever was in flight for an older version is abandoned, its ack is ignored
		self.in_flight().remove(&key);

		let generation = self.stage(dirty.with_outbox());
		inner.outbox.push(key.clone(), version, generation);

		inner.events.emit(EngineEvent::SyncStatusChanged {
			key,
			status: SyncStatus::Pending,
		});
	}

	/// Takes a peer's record as is. It is already propagated, so any local delivery for an
	/// older version of it is dropped.
	fn apply_remote(&self, state: &mut State, record: PatientRecord) -> u64 {
		let inner = &*self.inner;
		let (id, version) = (record.id.clone(), record.version);
		let key = SyncKey::Record(id.clone());

		state.records.insert(id.clone(), record);

		let previous = inner.records_sync.mark_synced(id.clone(), version);
		inner.outbox.remove(&key);
		self.in_flight().remove(&key);
		self.stage(Dirty::PATIENTS.with_outbox());

		bump(&inner.metrics.remote_records_applied);
		inner.events.emit(EngineEvent::RecordChanged {
			id,
			version,
			origin: ChangeOrigin::Remote,
		});
		if previous.is_some_and(|status| status != SyncStatus::Synced) {
			inner.events.emit(EngineEvent::SyncStatusChanged {
				key,
				status: SyncStatus::Synced,
			});
		}

		version
	}

	/// Stages a mutation, waking the dispatcher early once the buffer is full.
	fn stage(&self, dirty: Dirty) -> u64 {
		let generation = self.inner.writes.stage(dirty);
		if self.inner.writes.is_full() {
			self.inner.wake.notify_one();
		}

		generation
	}

	fn forget(&self, key: &SyncKey) {
		let inner = &*self.inner;

		match key {
			SyncKey::Record(id) => inner.records_sync.remove(id),
			SyncKey::Update(id) => inner.updates_sync.remove(id),
		};
		inner.outbox.remove(key);
		self.in_flight().remove(key);
	}

	pub(crate) fn in_flight(&self) -> MutexGuard<'_, HashMap<SyncKey, InFlight>> {
		self.inner
			.in_flight
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
	}

	fn undelivered(&self) -> Vec<Undelivered> {
		let inner = &*self.inner;

		let mut undelivered = inner
			.records_sync
			.unsynced()
			.into_iter()
			.map(|(id, version)| Undelivered {
				key: SyncKey::Record(id),
				version,
			})
			.chain(
				inner
					.updates_sync
					.unsynced()
					.into_iter()
					.map(|(id, version)| Undelivered {
						key: SyncKey::Update(id),
						version,
					}),
			)
			.collect::<Vec<_>>();
		undelivered.sort_by_cached_key(|entry| entry.key.to_string());

		undelivered
	}
}
