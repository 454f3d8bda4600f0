use std::collections::HashMap;

use fm_model::{MedicalUpdate, PatientRecord, RecordId, UpdateId};

/// Merged local state: the records and their update logs.
#[derive(Debug, Default)]
pub(crate) struct State {
	pub records: HashMap<RecordId, PatientRecord>,
	pub updates: UpdateLog,
}

impl State {
	pub fn from_snapshot(records: Vec<PatientRecord>, updates: Vec<MedicalUpdate>) -> Self {
		let mut state = Self {
			records: records
				.into_iter()
				.map(|record| (record.id.clone(), record))
				.collect(),
			updates: UpdateLog::default(),
		};

		for update in updates {
			state.updates.insert(update);
		}

		state
	}

	pub fn records_snapshot(&self) -> Vec<PatientRecord> {
		let mut records = self.records.values().cloned().collect::<Vec<_>>();
		records.sort_by(|a, b| a.id.cmp(&b.id));
		records
	}
}

/// Grow-only set of updates, deduplicated by id and grouped by owning record.
#[derive(Debug, Default)]
pub(crate) struct UpdateLog {
	by_patient: HashMap<RecordId, Vec<MedicalUpdate>>,
	owners: HashMap<UpdateId, RecordId>,
}

impl UpdateLog {
	pub fn contains(&self, id: &UpdateId) -> bool {
		self.owners.contains_key(id)
	}

	/// Returns `false` when an update with the same id is already present.
	pub fn insert(&mut self, update: MedicalUpdate) -> bool {
		if self.contains(&update.id) {
			return false;
		}

		self.owners
			.insert(update.id.clone(), update.patient_id.clone());
		self.by_patient
			.entry(update.patient_id.clone())
			.or_default()
			.push(update);

		true
	}

	pub fn get(&self, id: &UpdateId) -> Option<&MedicalUpdate> {
		let owner = self.owners.get(id)?;

		self.by_patient
			.get(owner)?
			.iter()
			.find(|update| &update.id == id)
	}

	pub fn for_patient(&self, patient: &RecordId) -> &[MedicalUpdate] {
		self.by_patient
			.get(patient)
			.map(Vec::as_slice)
			.unwrap_or_default()
	}

	/// Drops the whole log of `patient`, returning the removed ids.
	pub fn remove_patient(&mut self, patient: &RecordId) -> Vec<UpdateId> {
		let removed = self
			.by_patient
			.remove(patient)
			.unwrap_or_default()
			.into_iter()
			.map(|update| update.id)
			.collect::<Vec<_>>();

		for id in &removed {
			self.owners.remove(id);
		}

		removed
	}

	pub fn len(&self) -> usize {
		self.owners.len()
	}

	pub fn snapshot(&self) -> Vec<MedicalUpdate> {
		let mut updates = self
			.by_patient
			.values()
			.flatten()
			.cloned()
			.collect::<Vec<_>>();
		updates.sort_by(|a, b| a.id.cmp(&b.id));
		updates
	}
}
