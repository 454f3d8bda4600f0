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

//! Record synchronization and conflict resolution for fieldmed peers.
//!
//! The [`Engine`] owns the local view of patient records, their update logs and the
//! propagation state of every local mutation. Records and updates coming from peers are
//! merged deterministically so that every peer which has seen the same messages ends up
//! with the same state, whatever the delivery order or duplication.

mod actor;
mod buffer;
pub mod config;
mod delivery;
mod dispatch;
pub mod event;
mod ingest;
mod locks;
mod manager;
pub mod merge;
pub mod metrics;
mod outbox;
pub mod query;
mod state;
pub mod store;
pub mod time_source;
pub mod tracker;
pub mod transport;

pub use config::{ConfigError, EngineConfig, RetryPolicy};
pub use delivery::DispatchReport;
pub use event::{ChangeOrigin, EngineEvent, EventBus};
pub use manager::{Engine, EngineBuilder, Outcome};
pub use metrics::{Diagnostics, DiagnosticsSnapshot};
pub use query::{PatientCounts, PatientQuery, SortOrder};
pub use store::{FileStore, MemoryStore, Snapshot, Store, StoreError, Undelivered};
pub use time_source::{FakeTimeSource, SystemTimeSource, TimeSource};
pub use tracker::{Delivery, SyncCounts, SyncTracker, TransitionError};
pub use transport::{DeliveryTicket, Envelope, SyncKey, Transport, TransportError};

pub use fm_model::{
	MedicalUpdate, PatientRecord, PatientStatus, Priority, RecordId, SyncStatus, Timestamp,
	UpdateId, UpdateType, ValidationError, Vitals, WireError, WireFormat, WireMessage,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("validation error: {0}")]
	Validation(#[from] ValidationError),
	#[error("persistence failure: {0}")]
	Persistence(#[from] StoreError),
	#[error("wire error: {0}")]
	Wire(#[from] WireError),
	#[error(transparent)]
	Transition(#[from] TransitionError),
	#[error("record {id} is at version {version}, which has no successor")]
	VersionExhausted { id: RecordId, version: u64 },
	#[error("engine actors are already running")]
	AlreadyStarted,
}
