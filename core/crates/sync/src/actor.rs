//! Background actor plumbing: a spawned loop plus the channel used to stop it.

use std::{future::Future, time::Duration};

use async_channel as chan;
use tokio::{spawn, task::JoinHandle, time::timeout};
use tracing::{error, warn};

const ONE_MINUTE: Duration = Duration::from_secs(60);

/// Handed to a running actor, resolves once the actor is asked to stop.
#[derive(Debug)]
pub(crate) struct Stopper(chan::Receiver<()>);

impl Stopper {
	pub async fn wait(&self) {
		if self.0.recv().await.is_err() {
			warn!("Stop channel closed, will stop actor");
		}
	}
}

#[derive(Debug)]
pub(crate) struct ActorHandle {
	name: &'static str,
	stop_tx: chan::Sender<()>,
	handle: JoinHandle<()>,
}

impl ActorHandle {
	pub fn spawn<Fut>(name: &'static str, run: impl FnOnce(Stopper) -> Fut) -> Self
	where
		Fut: Future<Output = ()> + Send + 'static,
	{
		let (stop_tx, stop_rx) = chan::bounded(1);

		Self {
			name,
			stop_tx,
			handle: spawn(run(Stopper(stop_rx))),
		}
	}

	/// Asks the actor to stop and waits for it, aborting it if it takes too long.
	pub async fn stop(self) {
		let Self {
			name,
			stop_tx,
			mut handle,
		} = self;

		// Already finished actors dropped their receiver, nothing to signal
		let _ = stop_tx.send(()).await;

		match timeout(ONE_MINUTE, &mut handle).await {
			Ok(Ok(())) => {}
			Ok(Err(e)) if e.is_panic() => error!(actor = name, ?e, "Actor panicked"),
			Ok(Err(e)) => warn!(actor = name, ?e, "Actor was cancelled"),
			Err(_) => {
				error!(
					actor = name,
					"Actor failed to gracefully stop in the allotted time, will force abortion"
				);
				handle.abort();
			}
		}
	}
}
