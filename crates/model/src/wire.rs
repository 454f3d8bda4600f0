//! Encoding of records and updates exchanged between peers and written to storage.
//!
//! Field names and enum strings are part of the interop contract, so MessagePack frames
//! are written with named fields as well.

use serde::{Deserialize, Serialize};

use crate::{MedicalUpdate, PatientRecord};

#[derive(thiserror::Error, Debug)]
pub enum WireError {
	#[error("json encoding error: {0}")]
	Json(#[from] serde_json::Error),
	#[error("msgpack serialization error: {0}")]
	Serialization(#[from] rmp_serde::encode::Error),
	#[error("msgpack deserialization error: {0}")]
	Deserialization(#[from] rmp_serde::decode::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WireFormat {
	#[default]
	Json,
	MessagePack,
}

/// A single peer message carrying a whole record or a whole update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "camelCase")]
pub enum WireMessage {
	Record(PatientRecord),
	Update(MedicalUpdate),
}

impl WireMessage {
	pub fn encode(&self, format: WireFormat) -> Result<Vec<u8>, WireError> {
		Ok(match format {
			WireFormat::Json => serde_json::to_vec(self)?,
			WireFormat::MessagePack => rmp_serde::to_vec_named(self)?,
		})
	}

	pub fn decode(bytes: &[u8], format: WireFormat) -> Result<Self, WireError> {
		Ok(match format {
			WireFormat::Json => serde_json::from_slice(bytes)?,
			WireFormat::MessagePack => rmp_serde::from_slice(bytes)?,
		})
	}

	#[must_use]
	pub const fn kind(&self) -> &'static str {
		match self {
			Self::Record(_) => "record",
			Self::Update(_) => "update",
		}
	}
}

impl From<PatientRecord> for WireMessage {
	fn from(record: PatientRecord) -> Self {
		Self::Record(record)
	}
}

impl From<MedicalUpdate> for WireMessage {
	fn from(update: MedicalUpdate) -> Self {
		Self::Update(update)
	}
}
