//! Read-only projections over the merged state.
//!
//! Queries only take the shared state lock, never wait on the transport, and return owned
//! copies so callers can hold on to them freely.

use std::cmp::Reverse;

use fm_model::{
	next_patient_id, MedicalUpdate, PatientRecord, PatientStatus, Priority, RecordId,
	SyncStatus, UpdateId,
};
use serde::{Deserialize, Serialize};

use crate::{manager::Engine, tracker::SyncCounts};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortOrder {
	/// Most recently modified first
	#[default]
	LastModifiedDesc,
	LastModifiedAsc,
	/// Case-insensitive
	Name,
	/// Most urgent first, then most recently modified
	Priority,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatientQuery {
	/// Case-insensitive substring of the name, human id or presenting complaint
	pub search: Option<String>,
	pub status: Option<PatientStatus>,
	pub priority: Option<Priority>,
	pub sort: SortOrder,
}

impl PatientQuery {
	#[must_use]
	pub fn search(mut self, text: impl Into<String>) -> Self {
		self.search = Some(text.into());
		self
	}

	#[must_use]
	pub const fn status(mut self, status: PatientStatus) -> Self {
		self.status = Some(status);
		self
	}

	#[must_use]
	pub const fn priority(mut self, priority: Priority) -> Self {
		self.priority = Some(priority);
		self
	}

	#[must_use]
	pub const fn sort(mut self, sort: SortOrder) -> Self {
		self.sort = sort;
		self
	}

	fn matches(&self, record: &PatientRecord, needle: &str) -> bool {
		self.status.map_or(true, |status| record.status == status)
			&& self.priority.map_or(true, |priority| record.priority == priority)
			&& record.matches_search(needle)
	}
}

/// Dashboard figures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PatientCounts {
	pub total: usize,
	pub critical: usize,
	pub urgent: usize,
}

fn sort_records(records: &mut [PatientRecord], order: SortOrder) {
	// Ids break every tie so the order never depends on map iteration
	match order {
		SortOrder::LastModifiedDesc => {
			records.sort_by(|a, b| {
				b.last_modified
					.cmp(&a.last_modified)
					.then_with(|| a.id.cmp(&b.id))
			});
		}
		SortOrder::LastModifiedAsc => {
			records.sort_by(|a, b| {
				a.last_modified
					.cmp(&b.last_modified)
					.then_with(|| a.id.cmp(&b.id))
			});
		}
		SortOrder::Name => {
			records.sort_by_cached_key(|record| (record.name.to_lowercase(), record.id.clone()));
		}
		SortOrder::Priority => {
			records.sort_by_cached_key(|record| {
				(
					Reverse(record.priority),
					Reverse(record.last_modified),
					record.id.clone(),
				)
			});
		}
	}
}

impl Engine {
	pub async fn patients(&self, query: &PatientQuery) -> Vec<PatientRecord> {
		let needle = query
			.search
			.as_deref()
			.map(|search| search.trim().to_lowercase())
			.unwrap_or_default();

		let mut records = self
			.inner
			.state
			.read()
			.await
			.records
			.values()
			.filter(|record| query.matches(record, &needle))
			.cloned()
			.collect::<Vec<_>>();

		sort_records(&mut records, query.sort);

		records
	}

	pub async fn patient(&self, id: &RecordId) -> Option<PatientRecord> {
		self.inner.state.read().await.records.get(id).cloned()
	}

	/// Every record carrying this human-facing id; more than one when peers collided.
	pub async fn find_by_patient_id(&self, patient_id: &str) -> Vec<PatientRecord> {
		let mut records = self
			.inner
			.state
			.read()
			.await
			.records
			.values()
			.filter(|record| record.patient_id.eq_ignore_ascii_case(patient_id.trim()))
			.cloned()
			.collect::<Vec<_>>();

		sort_records(&mut records, SortOrder::LastModifiedDesc);

		records
	}

	pub async fn counts(&self) -> PatientCounts {
		let state = self.inner.state.read().await;

		state.records.values().fold(
			PatientCounts {
				total: state.records.len(),
				..PatientCounts::default()
			},
			|mut counts, record| {
				if record.status == PatientStatus::Critical {
					counts.critical += 1;
				}
				if record.priority == Priority::Urgent {
					counts.urgent += 1;
				}
				counts
			},
		)
	}

	/// The patient's log, newest first.
	pub async fn updates_for(&self, id: &RecordId) -> Vec<MedicalUpdate> {
		let mut updates = self
			.inner
			.state
			.read()
			.await
			.updates
			.for_patient(id)
			.to_vec();

		updates.sort_by(|a, b| {
			b.timestamp
				.cmp(&a.timestamp)
				.then_with(|| a.id.cmp(&b.id))
		});

		updates
	}

	pub async fn update_count(&self) -> usize {
		self.inner.state.read().await.updates.len()
	}

	/// Next free `P###` id on this device.
	pub async fn next_patient_id(&self) -> String {
		let state = self.inner.state.read().await;

		next_patient_id(state.records.values().map(|record| record.patient_id.as_str()))
	}

	#[must_use]
	pub fn sync_status(&self, id: &RecordId) -> Option<SyncStatus> {
		self.inner.records_sync.status(id)
	}

	#[must_use]
	pub fn update_sync_status(&self, id: &UpdateId) -> Option<SyncStatus> {
		self.inner.updates_sync.status(id)
	}

	#[must_use]
	pub fn sync_counts(&self) -> SyncCounts {
		self.inner.records_sync.counts()
	}

	#[must_use]
	pub fn update_sync_counts(&self) -> SyncCounts {
		self.inner.updates_sync.counts()
	}

	/// Deliveries still waiting to be handed to the transport.
	#[must_use]
	pub fn outbox_len(&self) -> usize {
		self.inner.outbox.len()
	}
}
