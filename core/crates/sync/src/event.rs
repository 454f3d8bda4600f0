//! Engine event bus
//!
//! Presentation layers subscribe here instead of observing engine state directly.

use fm_model::{RecordId, SyncStatus, UpdateId};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::transport::SyncKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
	/// Authored on this device
	Local,
	/// Received from a peer and applied as is
	Remote,
	/// Produced by resolving a concurrent edit
	Merged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
	RecordChanged {
		id: RecordId,
		version: u64,
		origin: ChangeOrigin,
	},
	RecordRemoved {
		id: RecordId,
	},
	UpdateAppended {
		id: UpdateId,
		patient_id: RecordId,
		origin: ChangeOrigin,
	},
	SyncStatusChanged {
		key: SyncKey,
		status: SyncStatus,
	},
}

impl EngineEvent {
	#[must_use]
	pub const fn event_type(&self) -> &'static str {
		match self {
			Self::RecordChanged { .. } => "RecordChanged",
			Self::RecordRemoved { .. } => "RecordRemoved",
			Self::UpdateAppended { .. } => "UpdateAppended",
			Self::SyncStatusChanged { .. } => "SyncStatusChanged",
		}
	}
}

#[derive(Debug, Clone)]
pub struct EventBus {
	sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
	#[must_use]
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity.max(1));
		Self { sender }
	}

	/// Returns the number of subscribers that received the event.
	pub fn emit(&self, event: EngineEvent) -> usize {
		let event_type = event.event_type();

		self.sender.send(event).map_or(0, |count| {
			trace!(event_type, subscribers = count, "Engine event emitted");
			count
		})
	}

	#[must_use]
	pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
		self.sender.subscribe()
	}

	#[must_use]
	pub fn subscriber_count(&self) -> usize {
		self.sender.receiver_count()
	}
}
