//! Hand-off of durable local mutations to the transport, and the bookkeeping of what the
//! transport reports back.

use chrono::{DateTime, TimeDelta, Utc};
use fm_model::{SyncStatus, Timestamp, WireError, WireMessage};
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, instrument, trace, warn};

use crate::{
	event::EngineEvent,
	manager::{Engine, InFlight},
	metrics::bump,
	outbox::OutboxEntry,
	tracker::Delivery,
	transport::{DeliveryTicket, Envelope, SyncKey, TransportError},
	Error,
};

/// What one [`Engine::dispatch_once`] cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
	/// In-flight deliveries failed for lack of an ack
	pub expired: usize,
	/// Failed deliveries put back to pending after their backoff
	pub retried: usize,
	pub flush_failed: bool,
	pub handed_off: usize,
	/// Marked synced without a transport
	pub completed: usize,
	pub failed: usize,
}

impl DispatchReport {
	#[must_use]
	pub const fn is_idle(&self) -> bool {
		self.expired == 0
			&& self.retried == 0
			&& !self.flush_failed
			&& self.handed_off == 0
			&& self.completed == 0
			&& self.failed == 0
	}
}

impl Engine {
	/// One dispatch cycle: expire unacknowledged deliveries, schedule due retries, flush,
	/// then hand every durable outbox entry to the transport.
	///
	/// The dispatcher actor runs this on every tick; tests drive it directly.
	pub async fn dispatch_once(&self) -> DispatchReport {
		let mut report = DispatchReport::default();
		let now = self.inner.clock.now();

		report.expired = self.expire_in_flight(now);
		report.retried = self.schedule_retries(now);

		// Already logged, whatever is durable from earlier flushes still goes out
		report.flush_failed = self.flush().await.is_err();

		let ready = self
			.inner
			.outbox
			.take_ready(self.inner.writes.durable_generation());

		for entry in ready {
			self.hand_off(entry, &mut report).await;
		}

		report
	}

	/// Transport confirmed delivery of `ticket`.
	#[instrument(skip(self), fields(key = %ticket.key, version = ticket.version))]
	pub fn acknowledge(&self, ticket: &DeliveryTicket) -> Delivery {
		let delivery = match &ticket.key {
			SyncKey::Record(id) => {
				self.inner
					.records_sync
					.acknowledge(id, ticket.version, ticket.attempt)
			}
			SyncKey::Update(id) => {
				self.inner
					.updates_sync
					.acknowledge(id, ticket.version, ticket.attempt)
			}
		};

		if delivery == Delivery::Acknowledged {
			bump(&self.inner.metrics.deliveries_acked);
			self.settle(ticket, SyncStatus::Synced);
			self.inner.writes.touch_outbox();
		} else {
			self.superseded(ticket);
		}

		delivery
	}

	/// Transport gave up on `ticket`. The key waits in `failed` for a retry.
	#[instrument(skip(self), fields(key = %ticket.key, version = ticket.version))]
	pub fn delivery_failed(&self, ticket: &DeliveryTicket, error: &TransportError) -> Delivery {
		let now = self.inner.clock.now();

		let delivery = match &ticket.key {
			SyncKey::Record(id) => {
				self.inner
					.records_sync
					.fail(id, ticket.version, ticket.attempt, now)
			}
			SyncKey::Update(id) => {
				self.inner
					.updates_sync
					.fail(id, ticket.version, ticket.attempt, now)
			}
		};

		if let Delivery::Failed { failures } = delivery {
			bump(&self.inner.metrics.deliveries_failed);
			warn!(%error, failures, "Delivery failed");
			self.settle(ticket, SyncStatus::Failed);
		} else {
			self.superseded(ticket);
		}

		delivery
	}

	/// Explicit retry of a failed delivery: `failed -> pending`.
	pub fn retry(&self, key: &SyncKey) -> Result<(), Error> {
		self.requeue(key)?;
		self.inner.wake.notify_one();

		Ok(())
	}

	/// Retries every failed delivery regardless of backoff. Returns how many were requeued.
	pub fn retry_failed(&self) -> usize {
		let keys = self
			.inner
			.records_sync
			.failed()
			.into_iter()
			.map(SyncKey::Record)
			.chain(
				self.inner
					.updates_sync
					.failed()
					.into_iter()
					.map(SyncKey::Update),
			)
			.collect::<Vec<_>>();

		let retried = keys
			.iter()
			.filter(|key| self.requeue(key).is_ok())
			.count();

		if retried > 0 {
			self.inner.wake.notify_one();
		}

		retried
	}

	fn requeue(&self, key: &SyncKey) -> Result<(), Error> {
		let version = match key {
			SyncKey::Record(id) => self.inner.records_sync.retry(id)?,
			SyncKey::Update(id) => self.inner.updates_sync.retry(id)?,
		};

		// Content was durable before its first hand-off
		self.inner.outbox.push(key.clone(), version, 0);
		self.inner.events.emit(EngineEvent::SyncStatusChanged {
			key: key.clone(),
			status: SyncStatus::Pending,
		});
		debug!(%key, version, "Delivery requeued");

		Ok(())
	}

	fn expire_in_flight(&self, now: Timestamp) -> usize {
		let expired = {
			let mut in_flight = self.in_flight();
			let keys = in_flight
				.iter()
				.filter(|(_, entry)| entry.deadline <= now)
				.map(|(key, _)| key.clone())
				.collect::<Vec<_>>();

			keys.into_iter()
				.filter_map(|key| in_flight.remove(&key))
				.map(|entry| entry.ticket)
				.collect::<Vec<_>>()
		};

		expired
			.iter()
			.filter(|ticket| {
				matches!(
					self.delivery_failed(ticket, &TransportError::Timeout),
					Delivery::Failed { .. }
				)
			})
			.count()
	}

	fn schedule_retries(&self, now: Timestamp) -> usize {
		let policy = &self.inner.config.retry;

		let due = self
			.inner
			.records_sync
			.due_for_retry(now, policy)
			.into_iter()
			.map(SyncKey::Record)
			.chain(
				self.inner
					.updates_sync
					.due_for_retry(now, policy)
					.into_iter()
					.map(SyncKey::Update),
			)
			.collect::<Vec<_>>();

		due.iter().filter(|key| self.requeue(key).is_ok()).count()
	}

	async fn hand_off(&self, entry: OutboxEntry, report: &mut DispatchReport) {
		let OutboxEntry { key, version, .. } = entry;

		let begun = match &key {
			SyncKey::Record(id) => self.inner.records_sync.begin_delivery(id, version),
			SyncKey::Update(id) => self.inner.updates_sync.begin_delivery(id, version),
		};
		let attempt = match begun {
			Ok(attempt) => attempt,
			Err(e) => {
				trace!(%key, ?e, "Outbox entry no longer current");
				return;
			}
		};

		let ticket = DeliveryTicket {
			key,
			version,
			attempt,
		};
		self.inner.events.emit(EngineEvent::SyncStatusChanged {
			key: ticket.key.clone(),
			status: SyncStatus::Syncing,
		});

		let payload = match self.encode(&ticket).await {
			Ok(Some(payload)) => payload,
			// Deleted or edited again since, the tracker already moved on
			Ok(None) => return,
			Err(e) => {
				self.delivery_failed(&ticket, &TransportError::Other(e.to_string()));
				report.failed += 1;
				return;
			}
		};

		let Some(transport) = self.inner.transport.clone() else {
			// Single-device operation, durable is as good as delivered
			self.acknowledge(&ticket);
			report.completed += 1;
			return;
		};

		let now = self.inner.clock.now();
		self.in_flight().insert(
			ticket.key.clone(),
			InFlight {
				ticket: ticket.clone(),
				deadline: self.ack_deadline(now),
			},
		);
		bump(&self.inner.metrics.deliveries_handed_off);
		report.handed_off += 1;

		let envelope = Envelope {
			ticket: ticket.clone(),
			payload,
		};

		let error = match timeout(self.inner.config.ack_timeout(), transport.broadcast(envelope))
			.await
		{
			Ok(Ok(())) => {
				trace!(key = %ticket.key, version, attempt, "Handed off");
				return;
			}
			Ok(Err(e)) => e,
			Err(_) => TransportError::Timeout,
		};

		self.in_flight().remove(&ticket.key);
		if matches!(
			self.delivery_failed(&ticket, &error),
			Delivery::Failed { .. }
		) {
			report.failed += 1;
		}
	}

	async fn encode(&self, ticket: &DeliveryTicket) -> Result<Option<Vec<u8>>, WireError> {
		let message = {
			let state = self.inner.state.read().await;

			match &ticket.key {
				SyncKey::Record(id) => match state.records.get(id) {
					Some(record) if record.version == ticket.version => {
						WireMessage::Record(record.clone())
					}
					_ => return Ok(None),
				},
				SyncKey::Update(id) => match state.updates.get(id) {
					Some(update) => WireMessage::Update(update.clone()),
					None => return Ok(None),
				},
			}
		};

		message.encode(self.inner.config.wire_format).map(Some)
	}

	fn ack_deadline(&self, now: Timestamp) -> Timestamp {
		i64::try_from(self.inner.config.ack_timeout_secs)
			.ok()
			.and_then(TimeDelta::try_seconds)
			.and_then(|timeout| now.checked_add_signed(timeout))
			.unwrap_or(DateTime::<Utc>::MAX_UTC)
	}

	fn settle(&self, ticket: &DeliveryTicket, status: SyncStatus) {
		{
			let mut in_flight = self.in_flight();
			if in_flight
				.get(&ticket.key)
				.is_some_and(|entry| &entry.ticket == ticket)
			{
				in_flight.remove(&ticket.key);
			}
		}

		self.inner.events.emit(EngineEvent::SyncStatusChanged {
			key: ticket.key.clone(),
			status,
		});
	}

	fn superseded(&self, ticket: &DeliveryTicket) {
		bump(&self.inner.metrics.superseded_reports);
		debug!(attempt = ticket.attempt, "Ignoring report for a superseded delivery");
	}
}
