use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::FeedDescriptor;
use crate::sink::IngestionSink;
use crate::source::FeedSource;
use crate::worker::{PollWorker, WorkerExit};

/// Launches one [`PollWorker`] per configured feed.
pub struct Scheduler {
    source: Arc<dyn FeedSource>,
    sink: Arc<dyn IngestionSink>,
}

impl Scheduler {
    pub fn new(source: Arc<dyn FeedSource>, sink: Arc<dyn IngestionSink>) -> Self {
        Self { source, sink }
    }

    /// Spawns every worker and returns without waiting on any of them.
    ///
    /// Identical URIs each get their own worker and nothing caps the number
    /// of tasks. Must be called from within a tokio runtime.
    pub fn start(&self, descriptors: Vec<FeedDescriptor>) -> Supervisor {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let workers = descriptors.len();

        for descriptor in descriptors {
            let worker = PollWorker::new(descriptor, self.source.clone(), self.sink.clone());
            let exit_tx = exit_tx.clone();
            tokio::spawn(async move {
                let exit = worker.run().await;
                let _ = exit_tx.send(exit);
            });
        }
        drop(exit_tx);

        info!(workers, "Started feed workers");
        Supervisor::spawn(exit_rx, workers)
    }
}

/// Receives worker exits and logs them.
///
/// Failed workers are not restarted. The supervisor finishes once every
/// worker has exited, which never happens while a feed keeps fetching.
pub struct Supervisor {
    exits: Arc<Mutex<Vec<WorkerExit>>>,
    handle: JoinHandle<()>,
    workers: usize,
}

impl Supervisor {
    fn spawn(mut exit_rx: mpsc::UnboundedReceiver<WorkerExit>, workers: usize) -> Self {
        let exits = Arc::new(Mutex::new(Vec::new()));
        let recorded = exits.clone();

        let handle = tokio::spawn(async move {
            while let Some(exit) = exit_rx.recv().await {
                error!(
                    uri = %exit.uri,
                    cycles = exit.cycles,
                    error = %exit.error,
                    "Feed worker stopped"
                );
                if let Ok(mut exits) = recorded.lock() {
                    exits.push(exit);
                }
            }
            info!("All feed workers stopped");
        });

        Self {
            exits,
            handle,
            workers,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }

    /// URIs of workers that have stopped so far, in the order they stopped.
    pub fn failed_uris(&self) -> Vec<String> {
        self.exits
            .lock()
            .map(|exits| exits.iter().map(|e| e.uri.clone()).collect())
            .unwrap_or_default()
    }

    /// Waits for every worker to stop and returns their exits.
    pub async fn join(self) -> Vec<WorkerExit> {
        if let Err(e) = self.handle.await {
            error!(error = %e, "Supervisor task failed");
        }
        self.exits
            .lock()
            .map(|mut exits| std::mem::take(&mut *exits))
            .unwrap_or_default()
    }
}
