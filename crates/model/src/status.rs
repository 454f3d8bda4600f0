use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};

/// Propagation state of a local mutation. Process-local metadata, never part of a record.
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
pub enum SyncStatus {
	Pending,
	Syncing,
	Synced,
	Failed,
}

impl SyncStatus {
	pub const ALL: [Self; 4] = [Self::Pending, Self::Syncing, Self::Synced, Self::Failed];

	/// Dense index used by per-state counters.
	#[must_use]
	pub const fn index(self) -> usize {
		match self {
			Self::Pending => 0,
			Self::Syncing => 1,
			Self::Synced => 2,
			Self::Failed => 3,
		}
	}

	#[must_use]
	pub const fn display_name(self) -> &'static str {
		match self {
			Self::Pending => "Pending",
			Self::Syncing => "Syncing",
			Self::Synced => "Synced",
			Self::Failed => "Failed",
		}
	}
}
