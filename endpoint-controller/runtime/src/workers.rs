use crate::{
    core::EdsUpdater,
    index::{EndpointController, Outcome, SliceEvent},
};
use futures::future;
use std::{collections::hash_map::RandomState, hash::BuildHasher};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info_span, trace, warn, Instrument};

/// The number of events that may be queued for each worker.
const QUEUE_CAPACITY: usize = 1_000;

/// A pool of tasks that apply slice events to an endpoint controller.
///
/// Events are sharded by service hostname and slice name, so that all events for a slice are
/// applied by the same worker, in the order they were dispatched. Distinct slices are applied
/// in parallel.
#[derive(Debug)]
pub struct Workers {
    shards: Vec<mpsc::Sender<Message>>,
    tasks: Vec<JoinHandle<()>>,
    hasher: RandomState,
}

#[derive(Debug)]
enum Message {
    Event(SliceEvent),

    /// Completed once every event queued ahead of it has been applied.
    Barrier(oneshot::Sender<()>),
}

// === impl Workers ===

impl Workers {
    pub fn spawn<U>(controller: EndpointController<U>, workers: usize) -> Self
    where
        U: EdsUpdater + Clone + 'static,
    {
        let (shards, tasks) = (0..workers.max(1))
            .map(|id| {
                let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
                let task =
                    tokio::spawn(run(controller.clone(), rx).instrument(info_span!("worker", id)));
                (tx, task)
            })
            .unzip();

        Self {
            shards,
            tasks,
            hasher: RandomState::new(),
        }
    }

    /// Queues an event on its slice's worker, waiting for capacity if the worker is behind.
    pub async fn dispatch(&self, event: SliceEvent) {
        let hash = self.hasher.hash_one((&event.hostname, &event.slice));
        let shard = hash as usize % self.shards.len();
        if self.shards[shard]
            .send(Message::Event(event))
            .await
            .is_err()
        {
            warn!(shard, "Worker terminated; dropping event");
        }
    }

    /// Waits for every event dispatched so far to be applied.
    pub async fn flush(&self) {
        let barriers = self.shards.iter().enumerate().map(|(shard, tx)| async move {
            let (done_tx, done_rx) = oneshot::channel();
            if tx.send(Message::Barrier(done_tx)).await.is_err() || done_rx.await.is_err() {
                warn!(shard, "Worker terminated; not flushed");
            }
        });
        future::join_all(barriers).await;
    }

    /// Stops accepting events and waits for all queued events to be applied.
    pub async fn close(self) {
        let Self { shards, tasks, .. } = self;
        drop(shards);
        for task in tasks.into_iter() {
            if let Err(error) = task.await {
                warn!(%error, "Worker failed");
            }
        }
    }
}

async fn run<U: EdsUpdater>(
    controller: EndpointController<U>,
    mut rx: mpsc::Receiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let event = match msg {
            Message::Event(event) => event,
            Message::Barrier(done) => {
                let _ = done.send(());
                continue;
            }
        };
        match controller.handle_event(event) {
            Ok(Outcome::Skipped) => trace!("Skipped"),
            Ok(Outcome::Pushed { endpoints, dropped }) => trace!(endpoints, dropped, "Pushed"),
            Err(error) => warn!(%error, "Failed to apply endpoint event"),
        }
    }
    debug!("Worker complete");
}
