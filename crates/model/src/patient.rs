use std::collections::BTreeSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};

use crate::{input::normalize_optional, truncate_to_millis, RecordId, Timestamp};

/// Clinical state of a patient.
#[derive(
	Debug,
	Clone,
	Copy,
	PartialEq,
	Eq,
	PartialOrd,
	Ord,
	Hash,
	Default,
	Serialize,
	Deserialize,
	Display,
	EnumString,
	EnumIter,
	AsRefStr,
	IntoStaticStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum PatientStatus {
	#[default]
	Stable,
	Critical,
	Treated,
	Transferred,
	Deceased,
}

impl PatientStatus {
	#[must_use]
	pub const fn display_name(self) -> &'static str {
		match self {
			Self::Stable => "Stable",
			Self::Critical => "Critical",
			Self::Treated => "Treated",
			Self::Transferred => "Transferred",
			Self::Deceased => "Deceased",
		}
	}
}

/// Triage priority. Declaration order is severity order, so `Ord` sorts low to urgent.
#[derive(
	Debug,
	Clone,
	Copy,
	PartialEq,
	Eq,
	PartialOrd,
	Ord,
	Hash,
	Default,
	Serialize,
	Deserialize,
	Display,
	EnumString,
	EnumIter,
	AsRefStr,
	IntoStaticStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum Priority {
	Low,
	#[default]
	Medium,
	High,
	Urgent,
}

impl Priority {
	#[must_use]
	pub const fn display_name(self) -> &'static str {
		match self {
			Self::Low => "Low",
			Self::Medium => "Medium",
			Self::High => "High",
			Self::Urgent => "Urgent",
		}
	}
}

/// The versioned aggregate describing one patient.
///
/// Records are never edited in place: every change submits a complete new value, and the
/// engine owning the local timeline assigns `version` and `last_modified`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientRecord {
	pub id: RecordId,
	/// Human-facing identifier (`P001`). Unique per deployment, not globally.
	pub patient_id: String,
	pub name: String,
	pub age: Option<u32>,
	pub gender: Option<String>,
	pub blood_type: Option<String>,
	#[serde(default)]
	pub allergies: BTreeSet<String>,
	#[serde(default)]
	pub current_medications: Vec<String>,
	#[serde(default)]
	pub medical_history: String,
	#[serde(default)]
	pub presenting_complaint: String,
	#[serde(default)]
	pub treatment: String,
	pub status: PatientStatus,
	pub priority: Priority,
	pub location: Option<String>,
	pub author_fingerprint: String,
	pub last_modified: Timestamp,
	pub version: u64,
}

impl PatientRecord {
	/// A brand new record at version 1 with a fresh [`RecordId`].
	#[must_use]
	pub fn new(
		patient_id: impl Into<String>,
		name: impl Into<String>,
		presenting_complaint: impl Into<String>,
		author_fingerprint: impl Into<String>,
	) -> Self {
		Self {
			id: RecordId::new(),
			patient_id: patient_id.into(),
			name: name.into(),
			age: None,
			gender: None,
			blood_type: None,
			allergies: BTreeSet::new(),
			current_medications: Vec::new(),
			medical_history: String::new(),
			presenting_complaint: presenting_complaint.into(),
			treatment: String::new(),
			status: PatientStatus::default(),
			priority: Priority::default(),
			location: None,
			author_fingerprint: author_fingerprint.into(),
			last_modified: truncate_to_millis(Utc::now()),
			version: 1,
		}
	}

	/// Trims free text and collapses blank optional fields to `None`.
	#[must_use]
	pub fn normalized(mut self) -> Self {
		self.patient_id = self.patient_id.trim().to_string();
		self.name = self.name.trim().to_string();
		self.medical_history = self.medical_history.trim().to_string();
		self.presenting_complaint = self.presenting_complaint.trim().to_string();
		self.treatment = self.treatment.trim().to_string();
		self.gender = normalize_optional(self.gender);
		self.blood_type = normalize_optional(self.blood_type);
		self.location = normalize_optional(self.location);
		self.allergies = self
			.allergies
			.into_iter()
			.map(|allergy| allergy.trim().to_string())
			.filter(|allergy| !allergy.is_empty())
			.collect();
		self.current_medications = self
			.current_medications
			.into_iter()
			.map(|medication| medication.trim().to_string())
			.filter(|medication| !medication.is_empty())
			.collect();
		self
	}

	/// Whether `needle` (already lowercased) occurs in the name, human id or complaint.
	#[must_use]
	pub fn matches_search(&self, needle: &str) -> bool {
		needle.is_empty()
			|| [&self.name, &self.patient_id, &self.presenting_complaint]
				.iter()
				.any(|field| field.to_lowercase().contains(needle))
	}
}

#[cfg(test)]
mod tests {
	use std::str::FromStr;

	use strum::IntoEnumIterator;

	use super::*;

	#[test]
	fn status_and_priority_use_interop_strings() {
		let statuses = PatientStatus::iter()
			.map(|status| serde_json::to_string(&status).unwrap())
			.collect::<Vec<_>>();
		assert_eq!(
			statuses,
			[
				"\"stable\"",
				"\"critical\"",
				"\"treated\"",
				"\"transferred\"",
				"\"deceased\""
			]
		);

		let priorities = Priority::iter().map(<&str>::from).collect::<Vec<_>>();
		assert_eq!(priorities, ["low", "medium", "high", "urgent"]);

		assert_eq!(PatientStatus::from_str("critical"), Ok(PatientStatus::Critical));
		assert!(Priority::Urgent > Priority::High);
	}

	#[test]
	fn record_serializes_every_field_in_camel_case() {
		let record = PatientRecord::new("P001", "Ahmad Hassan", "Chest pain", "medic-1");
		let value = serde_json::to_value(&record).unwrap();
		let object = value.as_object().unwrap();

		for field in [
			"id",
			"patientId",
			"name",
			"age",
			"gender",
			"bloodType",
			"allergies",
			"currentMedications",
			"medicalHistory",
			"presentingComplaint",
			"treatment",
			"status",
			"priority",
			"location",
			"authorFingerprint",
			"lastModified",
			"version",
		] {
			assert!(object.contains_key(field), "missing `{field}`");
		}
		assert!(object["age"].is_null());
		assert_eq!(object["status"], "stable");
		assert_eq!(object["version"], 1);
	}

	#[test]
	fn normalization_trims_and_drops_blanks() {
		let mut record = PatientRecord::new(" P002 ", "  Fatima  ", " Leg injury ", "medic-1");
		record.location = Some("   ".to_string());
		record.gender = Some(" Female ".to_string());
		record.allergies = [" Latex ".to_string(), " ".to_string()].into_iter().collect();
		record.current_medications = vec![String::new(), "Ibuprofen ".to_string()];

		let record = record.normalized();

		assert_eq!(record.patient_id, "P002");
		assert_eq!(record.name, "Fatima");
		assert_eq!(record.presenting_complaint, "Leg injury");
		assert_eq!(record.location, None);
		assert_eq!(record.gender.as_deref(), Some("Female"));
		assert_eq!(record.allergies.len(), 1);
		assert!(record.allergies.contains("Latex"));
		assert_eq!(record.current_medications, ["Ibuprofen"]);
	}

	#[test]
	fn search_is_case_insensitive_over_three_fields() {
		let record = PatientRecord::new("P003", "Omar Khalil", "Shrapnel wound", "medic-2");

		assert!(record.matches_search("omar"));
		assert!(record.matches_search("p003"));
		assert!(record.matches_search("shrapnel"));
		assert!(record.matches_search(""));
		assert!(!record.matches_search("fracture"));
	}
}
