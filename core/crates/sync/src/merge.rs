//! Record merge rules
//!
//! Given the locally held record and an incoming one with the same id:
//!
//! 1. a higher incoming version replaces the local record;
//! 2. a lower incoming version is stale and discarded;
//! 3. an equal version with identical content is a duplicate delivery;
//! 4. an equal version with different content is a concurrent edit, resolved by
//!    [`precedence`] into a new version above both.
//!
//! The resolution only looks at the two inputs, never at local clocks or identity, so every
//! peer resolving the same pair reaches the same record.

use std::{cmp::Ordering, collections::BTreeSet};

use fm_model::{PatientRecord, PatientStatus, Priority};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeDecision {
	/// No local record with this id yet
	Insert,
	Replace,
	Stale,
	Duplicate,
	Resolve(PatientRecord),
	/// A concurrent edit at the last representable version, nothing can supersede it
	Exhausted,
}

/// The version after `version`, `None` once the counter has nothing left.
#[must_use]
pub const fn next_version(version: u64) -> Option<u64> {
	version.checked_add(1)
}

#[must_use]
pub fn reconcile(local: Option<&PatientRecord>, remote: &PatientRecord) -> MergeDecision {
	let Some(local) = local else {
		return MergeDecision::Insert;
	};

	match remote.version.cmp(&local.version) {
		Ordering::Greater => MergeDecision::Replace,
		Ordering::Less => MergeDecision::Stale,
		Ordering::Equal if remote == local => MergeDecision::Duplicate,
		Ordering::Equal => {
			resolve_conflict(local, remote).map_or(MergeDecision::Exhausted, MergeDecision::Resolve)
		}
	}
}

/// Total order between two concurrent versions of a record, `Greater` meaning `a` wins.
///
/// Later `last_modified` wins, then the lexicographically larger author fingerprint. Two
/// records can still tie on both (one author editing twice from the same base on two
/// devices sharing a fingerprint), so the content itself breaks the last tie.
#[must_use]
pub fn precedence(a: &PatientRecord, b: &PatientRecord) -> Ordering {
	a.last_modified
		.cmp(&b.last_modified)
		.then_with(|| a.author_fingerprint.cmp(&b.author_fingerprint))
		.then_with(|| content_key(a).cmp(&content_key(b)))
}

/// The winning content at `max(a.version, b.version) + 1`, `None` when that version does
/// not exist.
///
/// The winner keeps its own `last_modified`, which is the later of the two, so the resolved
/// record is identical on every peer.
#[must_use]
pub fn resolve_conflict(a: &PatientRecord, b: &PatientRecord) -> Option<PatientRecord> {
	let winner = if precedence(a, b).is_ge() { a } else { b };

	Some(PatientRecord {
		version: next_version(a.version.max(b.version))?,
		last_modified: a.last_modified.max(b.last_modified),
		..winner.clone()
	})
}

type ContentKey<'a> = (
	(
		&'a str,
		&'a str,
		Option<u32>,
		Option<&'a str>,
		Option<&'a str>,
		&'a BTreeSet<String>,
	),
	(
		&'a [String],
		&'a str,
		&'a str,
		&'a str,
		PatientStatus,
		Priority,
		Option<&'a str>,
	),
);

fn content_key(record: &PatientRecord) -> ContentKey<'_> {
	(
		(
			record.patient_id.as_str(),
			record.name.as_str(),
			record.age,
			record.gender.as_deref(),
			record.blood_type.as_deref(),
			&record.allergies,
		),
		(
			record.current_medications.as_slice(),
			record.medical_history.as_str(),
			record.presenting_complaint.as_str(),
			record.treatment.as_str(),
			record.status,
			record.priority,
			record.location.as_deref(),
		),
	)
}
