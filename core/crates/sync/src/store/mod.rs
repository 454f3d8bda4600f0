//! Persistence gateway
//!
//! The engine only ever persists already merged state, so a store can treat every save as a
//! whole-blob last-writer-wins replacement.

use std::{io, path::Path};

use async_trait::async_trait;
use fm_model::{MedicalUpdate, PatientRecord};
use serde::{Deserialize, Serialize};

use crate::transport::SyncKey;

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
	#[error("store I/O error ({context}): {source}; path: '{}'", .path.display())]
	Io {
		path: Box<Path>,
		context: &'static str,
		#[source]
		source: io::Error,
	},
	#[error("store blob is not valid JSON: {0}")]
	Json(#[from] serde_json::Error),
	#[error("store unavailable: {0}")]
	Unavailable(String),
}

impl StoreError {
	pub(crate) fn io(path: impl AsRef<Path>, context: &'static str, source: io::Error) -> Self {
		Self::Io {
			path: path.as_ref().into(),
			context,
			source,
		}
	}
}

/// A local mutation that was never confirmed delivered when last persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Undelivered {
	pub key: SyncKey,
	pub version: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
	pub patients: Vec<PatientRecord>,
	pub updates: Vec<MedicalUpdate>,
	pub undelivered: Vec<Undelivered>,
}

#[async_trait]
pub trait Store: Send + Sync {
	/// Everything persisted so far, empty on first start.
	async fn load(&self) -> Result<Snapshot, StoreError>;

	async fn save_patients(&self, patients: &[PatientRecord]) -> Result<(), StoreError>;

	async fn save_updates(&self, updates: &[MedicalUpdate]) -> Result<(), StoreError>;

	async fn save_outbox(&self, undelivered: &[Undelivered]) -> Result<(), StoreError>;
}
