use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fm_model::{MedicalUpdate, PatientRecord};
use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tracing::{debug, trace};

use super::{Snapshot, Store, StoreError, Undelivered};

const PATIENTS_FILE: &str = "patients.json";
const UPDATES_FILE: &str = "updates.json";
const OUTBOX_FILE: &str = "outbox.json";

/// One JSON blob per key in a directory.
///
/// Blobs are written to a temporary sibling first and renamed over the old one, so a crash
/// mid-write leaves the previous blob intact.
#[derive(Debug, Clone)]
pub struct FileStore {
	dir: PathBuf,
}

impl FileStore {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self { dir: dir.into() }
	}

	#[must_use]
	pub fn dir(&self) -> &Path {
		&self.dir
	}

	async fn read<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T, StoreError> {
		let path = self.dir.join(name);

		match fs::read(&path).await {
			Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				trace!(path = %path.display(), "No blob yet");
				Ok(T::default())
			}
			Err(e) => Err(StoreError::io(&path, "read blob", e)),
		}
	}

	async fn write<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<(), StoreError> {
		let bytes = serde_json::to_vec(value)?;

		fs::create_dir_all(&self.dir)
			.await
			.map_err(|e| StoreError::io(&self.dir, "create store directory", e))?;

		let path = self.dir.join(name);
		let tmp = self.dir.join(format!("{name}.tmp"));

		fs::write(&tmp, &bytes)
			.await
			.map_err(|e| StoreError::io(&tmp, "write temporary blob", e))?;
		fs::rename(&tmp, &path)
			.await
			.map_err(|e| StoreError::io(&path, "replace blob", e))?;

		debug!(path = %path.display(), bytes = bytes.len(), "Blob written");

		Ok(())
	}
}

#[async_trait]
impl Store for FileStore {
	async fn load(&self) -> Result<Snapshot, StoreError> {
		Ok(Snapshot {
			patients: self.read(PATIENTS_FILE).await?,
			updates: self.read(UPDATES_FILE).await?,
			undelivered: self.read(OUTBOX_FILE).await?,
		})
	}

	async fn save_patients(&self, patients: &[PatientRecord]) -> Result<(), StoreError> {
		self.write(PATIENTS_FILE, patients).await
	}

	async fn save_updates(&self, updates: &[MedicalUpdate]) -> Result<(), StoreError> {
		self.write(UPDATES_FILE, updates).await
	}

	async fn save_outbox(&self, undelivered: &[Undelivered]) -> Result<(), StoreError> {
		self.write(OUTBOX_FILE, undelivered).await
	}
}

#[cfg(test)]
mod tests {
	use fm_model::{RecordId, UpdateType};

	use super::*;
	use crate::transport::SyncKey;

	#[tokio::test]
	async fn empty_directory_loads_empty_snapshot() {
		let dir = tempfile::tempdir().unwrap();
		let store = FileStore::new(dir.path().join("store"));

		assert_eq!(store.load().await.unwrap(), Snapshot::default());
	}

	#[tokio::test]
	async fn blobs_survive_reopening() {
		let dir = tempfile::tempdir().unwrap();
		let record = PatientRecord::new("P001", "Ahmad Hassan", "Shrapnel wound", "medic-1");
		let update = MedicalUpdate::new(
			record.id.clone(),
			UpdateType::Treatment,
			"Wound dressed",
			"medic-1",
		);
		let undelivered = Undelivered {
			key: SyncKey::Record(record.id.clone()),
			version: 1,
		};

		let store = FileStore::new(dir.path());
		store.save_patients(&[record.clone()]).await.unwrap();
		store.save_updates(&[update.clone()]).await.unwrap();
		store.save_outbox(&[undelivered.clone()]).await.unwrap();

		let reopened = FileStore::new(dir.path()).load().await.unwrap();
		assert_eq!(reopened.patients, vec![record]);
		assert_eq!(reopened.updates, vec![update]);
		assert_eq!(reopened.undelivered, vec![undelivered]);
		assert!(!dir.path().join("patients.json.tmp").exists());
	}

	#[tokio::test]
	async fn corrupt_blob_is_reported() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join(PATIENTS_FILE), b"{not json").unwrap();

		let err = FileStore::new(dir.path()).load().await.unwrap_err();
		assert!(matches!(err, StoreError::Json(_)));
	}

	#[tokio::test]
	async fn saves_replace_previous_contents() {
		let dir = tempfile::tempdir().unwrap();
		let store = FileStore::new(dir.path());
		let mut record = PatientRecord::new("P001", "Ahmad Hassan", "Shrapnel wound", "medic-1");
		record.id = RecordId::from("R1");

		store.save_patients(&[record.clone()]).await.unwrap();
		store.save_patients(&[]).await.unwrap();

		assert!(store.load().await.unwrap().patients.is_empty());
	}
}
