//! Two peers receiving the same messages in any order, any number of times, end up with the
//! same records and update logs.


use std::collections::HashMap;

use fm_core_sync::*;
use mock_instance::Instance;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
	Create { on: usize },
	Edit {
		on: usize,
		record: usize,
		status: PatientStatus,
		treatment: String,
	},
	Append { on: usize, record: usize, notes: String },
	Dispatch { from: usize },
	Deliver { to: usize, index: usize, keep: bool },
	Advance { on: usize, ms: i64 },
}

fn arb_op() -> impl Strategy<Value = Op> {
	prop_oneof![
		(0..2_usize).prop_map(|on| Op::Create { on }),
		(
			0..2_usize,
			any::<usize>(),
			prop::sample::select(vec![
				PatientStatus::Stable,
				PatientStatus::Critical,
				PatientStatus::Treated,
			]),
			"[a-d]{1,3}",
		)
			.prop_map(|(on, record, status, treatment)| Op::Edit {
				on,
				record,
				status,
				treatment,
			}),
		(0..2_usize, any::<usize>(), "[a-d]{1,3}")
			.prop_map(|(on, record, notes)| Op::Append { on, record, notes }),
		(0..2_usize).prop_map(|from| Op::Dispatch { from }),
		(0..2_usize, any::<usize>(), any::<bool>())
			.prop_map(|(to, index, keep)| Op::Deliver { to, index, keep }),
		(0..2_usize, 0..3_000_i64).prop_map(|(on, ms)| Op::Advance { on, ms }),
	]
}

struct Mesh {
	peers: [Instance; 2],
	/// Envelopes on their way to peer `i`
	in_transit: [Vec<Envelope>; 2],
	/// Every payload ever delivered, for replay
	delivered: Vec<Vec<u8>>,
	records: Vec<RecordId>,
	seen_versions: [HashMap<RecordId, u64>; 2],
}

impl Mesh {
	async fn new() -> Self {
		Self {
			peers: [Instance::new("medic-a").await, Instance::new("medic-b").await],
			in_transit: [Vec::new(), Vec::new()],
			delivered: Vec::new(),
			records: Vec::new(),
			seen_versions: [HashMap::new(), HashMap::new()],
		}
	}

	async fn apply(&mut self, op: Op) {
		match op {
			Op::Create { on } => {
				let record = PatientRecord::new("P001", "Ahmad Hassan", "Shrapnel wound", "");
				self.records.push(record.id.clone());
				self.peers[on]
					.engine
					.submit_local_record(record)
					.await
					.unwrap();
			}
			Op::Edit {
				on,
				record,
				status,
				treatment,
			} => {
				let Some(id) = self.pick(record) else { return };
				let Some(mut edit) = self.peers[on].engine.patient(&id).await else {
					return;
				};
				edit.status = status;
				edit.treatment = treatment;
				self.peers[on].engine.submit_local_record(edit).await.unwrap();
			}
			Op::Append { on, record, notes } => {
				let Some(id) = self.pick(record) else { return };
				if self.peers[on].engine.patient(&id).await.is_none() {
					return;
				}
				let update = MedicalUpdate::new(id, UpdateType::Assessment, notes, "");
				self.peers[on]
					.engine
					.submit_local_update(update)
					.await
					.unwrap();
			}
			Op::Dispatch { from } => {
				let sent = self.peers[from].dispatch().await;
				self.in_transit[1 - from].extend(sent);
			}
			Op::Deliver { to, index, keep } => {
				if self.in_transit[to].is_empty() {
					return;
				}
				let index = index % self.in_transit[to].len();
				let envelope = if keep {
					// Delivered now and again later
					self.in_transit[to][index].clone()
				} else {
					self.in_transit[to].remove(index)
				};
				self.deliver(to, &envelope).await;
			}
			Op::Advance { on, ms } => self.peers[on].clock.advance_ms(ms),
		}

		self.check_monotonic().await;
	}

	fn pick(&self, index: usize) -> Option<RecordId> {
		(!self.records.is_empty()).then(|| self.records[index % self.records.len()].clone())
	}

	async fn deliver(&mut self, to: usize, envelope: &Envelope) {
		self.peers[to]
			.engine
			.on_receive(&envelope.payload)
			.await
			.unwrap();
		self.peers[1 - to].engine.acknowledge(&envelope.ticket);
		self.delivered.push(envelope.payload.clone());
	}

	async fn check_monotonic(&mut self) {
		for (peer, seen) in self.peers.iter().zip(self.seen_versions.iter_mut()) {
			for record in peer.engine.patients(&PatientQuery::default()).await {
				let previous = seen.insert(record.id.clone(), record.version).unwrap_or(0);
				assert!(
					record.version >= previous,
					"version of {} went from {previous} to {}",
					record.id,
					record.version
				);
			}
		}
	}

	/// Keeps exchanging until nothing is left to send on either side.
	async fn settle(&mut self) {
		for _ in 0..64 {
			for peer in &self.peers {
				peer.engine.retry_failed();
			}
			for from in 0..2 {
				let sent = self.peers[from].dispatch().await;
				self.in_transit[1 - from].extend(sent);
			}

			if self.in_transit.iter().all(Vec::is_empty)
				&& self.peers.iter().all(|peer| peer.engine.outbox_len() == 0)
			{
				return;
			}

			for to in 0..2 {
				for envelope in std::mem::take(&mut self.in_transit[to]) {
					self.deliver(to, &envelope).await;
				}
			}
		}

		panic!("peers did not settle");
	}

	async fn state(&self, peer: usize) -> (Vec<PatientRecord>, Vec<Vec<MedicalUpdate>>) {
		let engine = &self.peers[peer].engine;

		let mut records = engine.patients(&PatientQuery::default()).await;
		records.sort_by(|a, b| a.id.cmp(&b.id));

		let mut updates = Vec::new();
		for record in &records {
			updates.push(engine.updates_for(&record.id).await);
		}

		(records, updates)
	}
}

fn runtime() -> tokio::runtime::Runtime {
	tokio::runtime::Builder::new_current_thread()
		.enable_all()
		.build()
		.unwrap()
}

proptest! {
	#![proptest_config(ProptestConfig::with_cases(48))]

	#[test]
	fn peers_converge(ops in prop::collection::vec(arb_op(), 1..40)) {
		runtime().block_on(async {
			let mut mesh = Mesh::new().await;

			for op in ops {
				mesh.apply(op).await;
			}
			mesh.settle().await;

			let (records_a, updates_a) = mesh.state(0).await;
			let (records_b, updates_b) = mesh.state(1).await;
			assert_eq!(records_a, records_b);
			assert_eq!(updates_a, updates_b);
			assert_eq!(records_a.len(), mesh.records.len());

			// Replaying everything ever delivered changes nothing
			for payload in mesh.delivered.clone() {
				for peer in &mesh.peers {
					let outcome = peer.engine.on_receive(&payload).await.unwrap();
					assert!(matches!(outcome, Outcome::Stale | Outcome::Duplicate));
				}
			}
			assert_eq!(mesh.state(0).await, (records_a, updates_a));
			assert_eq!(mesh.state(1).await.0, records_b);
		});
	}
}
