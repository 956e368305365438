//! Serial execution queue owning one world's mutable state.
//!
//! Every read and write of the authoritative player store happens inside a
//! closure submitted here. The state lives on the queue's driver task and
//! never leaves it, so jobs need no locks and observe each other in
//! submission order.

use tokio::sync::{mpsc, oneshot};

use crate::world::WorldState;

type Job = Box<dyn FnOnce(&mut WorldState) + Send + 'static>;

/// The queue's driver task has shut down; no further work can run on this world.
#[derive(Debug, thiserror::Error)]
#[error("world queue closed")]
pub struct QueueClosed;

/// Handle to one world's serial queue. Cheap to clone; all clones feed the
/// same driver task.
#[derive(Clone)]
pub struct WorldQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl WorldQueue {
    /// Spawn the driver task for `state` and return a handle to its queue.
    pub fn spawn(state: WorldState) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            let mut state = state;
            while let Some(job) = rx.recv().await {
                job(&mut state);
            }
            tracing::debug!("world queue for '{}' drained, shutting down", state.name());
        });
        Self { tx }
    }

    /// Fire-and-forget: run `job` on the world's thread. Jobs must not block.
    pub fn submit(
        &self,
        job: impl FnOnce(&mut WorldState) + Send + 'static,
    ) -> Result<(), QueueClosed> {
        self.tx.send(Box::new(job)).map_err(|_| QueueClosed)
    }

    /// Run `job` on the world's thread and await its result.
    pub async fn run<R, F>(&self, job: F) -> Result<R, QueueClosed>
    where
        R: Send + 'static,
        F: FnOnce(&mut WorldState) -> R + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        self.submit(move |state| {
            // Receiver dropped means the caller gave up; the job still ran.
            let _ = done_tx.send(job(state));
        })?;
        done_rx.await.map_err(|_| QueueClosed)
    }
}
