//! Transport gateway abstraction
//!
//! The mesh transport is an opaque, at-least-once channel. The engine hands it encoded
//! messages through [`Transport::broadcast`] and learns about delivery asynchronously:
//! the transport reports back with the [`DeliveryTicket`] it was given, through
//! [`crate::Engine::acknowledge`] or [`crate::Engine::delivery_failed`]. Inbound payloads
//! go to [`crate::Engine::on_receive`] or the queue returned by [`crate::Engine::inbound`].

use std::fmt;

use async_trait::async_trait;
use fm_model::{RecordId, UpdateId};
use serde::{Deserialize, Serialize};

/// What a delivery is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "camelCase")]
pub enum SyncKey {
	Record(RecordId),
	Update(UpdateId),
}

impl fmt::Display for SyncKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Record(id) => write!(f, "record:{id}"),
			Self::Update(id) => write!(f, "update:{id}"),
		}
	}
}

/// Identifies one hand-off of one version of a record or update.
///
/// A ticket that no longer matches the tracker (a newer local edit happened, or the same
/// version was handed off again) is ignored when reported.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryTicket {
	pub key: SyncKey,
	pub version: u64,
	pub attempt: u64,
}

#[derive(Debug, Clone)]
pub struct Envelope {
	pub ticket: DeliveryTicket,
	pub payload: Vec<u8>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
	#[error("no reachable peers")]
	NoPeers,
	#[error("no acknowledgement before the delivery deadline")]
	Timeout,
	#[error("transport error: {0}")]
	Other(String),
}

/// Outbound side of the mesh.
///
/// `broadcast` must return once the envelope is queued by the transport; it must not wait
/// for peers to acknowledge it. Retries with backoff belong to the transport, the engine
/// only re-enters `pending` on failure.
#[async_trait]
pub trait Transport: Send + Sync {
	async fn broadcast(&self, envelope: Envelope) -> Result<(), TransportError>;
}
