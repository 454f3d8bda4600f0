use futures::StreamExt;
use tracing::{debug, trace, warn};

use crate::{
	actor::{ActorHandle, Stopper},
	manager::Engine,
};

pub(crate) fn spawn(engine: Engine) -> ActorHandle {
	ActorHandle::spawn("ingest", move |stop| run(engine, stop))
}

/// Merges inbound peer payloads, up to `ingest_concurrency` at a time. Payloads for
/// the same record still serialize on its lock inside the engine.
///
/// Stopping drops in-progress merges only before they touch state: every merge applies its
/// change without awaiting anything once it holds the state lock.
async fn run(engine: Engine, stop: Stopper) {
	let concurrency = engine.config().ingest_concurrency.max(1);

	let ingest = engine
		.inner
		.inbound_rx
		.clone()
		.for_each_concurrent(concurrency, |payload| {
			let engine = engine.clone();
			async move {
				match engine.on_receive(&payload).await {
					Ok(outcome) => trace!(?outcome, "Inbound message merged"),
					Err(e) => warn!(?e, "Dropped inbound message"),
				}
			}
		});

	tokio::select! {
		() = ingest => debug!("Inbound queue closed"),
		() = stop.wait() => debug!("Ingest stopped"),
	}
}
