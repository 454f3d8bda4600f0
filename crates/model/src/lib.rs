#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

//! Data model shared by every fieldmed peer: patient records, the medical update log,
//! vital signs and the encoding used to exchange them.

mod ids;
mod input;
mod patient;
mod status;
mod update;
mod validation;
mod vitals;
pub mod wire;

pub use ids::{RecordId, UpdateId};
pub use input::{next_patient_id, normalize_optional, parse_list};
pub use patient::{PatientRecord, PatientStatus, Priority};
pub use status::SyncStatus;
pub use update::{MedicalUpdate, UpdateType};
pub use validation::{Validate, ValidationError};
pub use vitals::Vitals;
pub use wire::{WireError, WireFormat, WireMessage};

use chrono::{DateTime, DurationRound, TimeDelta, Utc};

/// Instants exchanged between peers. Always UTC, always millisecond precision.
pub type Timestamp = DateTime<Utc>;

/// Drops anything finer than a millisecond so timestamps survive every encoding unchanged.
#[must_use]
pub fn truncate_to_millis(ts: Timestamp) -> Timestamp {
	ts.duration_trunc(TimeDelta::milliseconds(1)).unwrap_or(ts)
}
