use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, trace};

use crate::{
	actor::{ActorHandle, Stopper},
	manager::Engine,
};

pub(crate) fn spawn(engine: Engine) -> ActorHandle {
	ActorHandle::spawn("dispatcher", move |stop| run(engine, stop))
}

/// Runs a dispatch cycle every `flush_interval`, or earlier when woken by a retry or a
/// full write buffer. Mutations in between are coalesced into one flush.
async fn run(engine: Engine, stop: Stopper) {
	let mut ticker = interval(engine.config().flush_interval());
	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

	loop {
		tokio::select! {
			() = stop.wait() => break,
			_ = ticker.tick() => {}
			() = engine.inner.wake.notified() => {}
		}

		let report = engine.dispatch_once().await;
		if !report.is_idle() {
			trace!(?report, "Dispatch cycle");
		}
	}

	// One last pass so nothing staged waits for the next start
	let report = engine.dispatch_once().await;
	debug!(?report, "Dispatcher stopped");
}
