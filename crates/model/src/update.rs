use chrono::Utc;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};

use crate::{truncate_to_millis, RecordId, Timestamp, UpdateId, Vitals};

#[derive(
	Debug,
	Clone,
	Copy,
	PartialEq,
	Eq,
	Hash,
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
pub enum UpdateType {
	Assessment,
	Treatment,
	StatusChange,
	Transfer,
}

impl UpdateType {
	#[must_use]
	pub const fn display_name(self) -> &'static str {
		match self {
			Self::Assessment => "Assessment",
			Self::Treatment => "Treatment",
			Self::StatusChange => "Status Change",
			Self::Transfer => "Transfer",
		}
	}
}

/// One immutable observation or action in a patient's log.
///
/// Updates are only ever added or removed as a whole together with their patient, so two
/// updates with the same `id` are always the same update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalUpdate {
	pub id: UpdateId,
	/// The owning [`crate::PatientRecord::id`].
	pub patient_id: RecordId,
	pub update_type: UpdateType,
	#[serde(default)]
	pub notes: String,
	pub vitals: Option<Vitals>,
	pub author_fingerprint: String,
	pub timestamp: Timestamp,
}

impl MedicalUpdate {
	#[must_use]
	pub fn new(
		patient_id: RecordId,
		update_type: UpdateType,
		notes: impl Into<String>,
		author_fingerprint: impl Into<String>,
	) -> Self {
		Self {
			id: UpdateId::new(),
			patient_id,
			update_type,
			notes: notes.into(),
			vitals: None,
			author_fingerprint: author_fingerprint.into(),
			timestamp: truncate_to_millis(Utc::now()),
		}
	}

	#[must_use]
	pub fn with_vitals(mut self, vitals: Vitals) -> Self {
		self.vitals = Some(vitals);
		self
	}

	#[must_use]
	pub fn has_vitals(&self) -> bool {
		self.vitals.as_ref().is_some_and(Vitals::has_any)
	}
}
