//! Fixed-size pool of extraction workers sharing one admission queue.

use super::worker::{Worker, WorkerActivityTracker, WorkerShared};
use crate::runtime::fatal::FatalErrorHandler;
use futures::FutureExt;
use std::any::Any;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) struct WorkerPool {
    size: usize,
    activity: Arc<WorkerActivityTracker>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            activity: Arc::new(WorkerActivityTracker::new()),
            workers: Vec::new(),
        }
    }

    pub(crate) fn activity(&self) -> Arc<WorkerActivityTracker> {
        self.activity.clone()
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    /// Spawns the workers. A worker that errors or panics is a fatal pipeline error.
    pub(crate) fn launch(
        &mut self,
        shared: WorkerShared,
        run_token: CancellationToken,
        fatal_handler: Arc<FatalErrorHandler>,
    ) {
        self.workers.clear();

        for worker_id in 0..self.size {
            let worker = Worker::new(worker_id, shared.clone(), run_token.clone());
            let fatal_handler = fatal_handler.clone();

            let handle = tokio::spawn(async move {
                let result = std::panic::AssertUnwindSafe(worker.run())
                    .catch_unwind()
                    .await;

                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        tracing::error!(
                            worker = worker_id,
                            error = %err,
                            "worker task exited with error"
                        );
                        let context = format!("worker {worker_id} exited with error");
                        let err = err.context(context.clone());
                        fatal_handler.trigger_external(context.as_str(), err);
                    }
                    Err(panic_payload) => {
                        let panic_msg = panic_message(panic_payload.as_ref());
                        tracing::error!(
                            worker = worker_id,
                            panic = %panic_msg,
                            "worker task panicked"
                        );
                        let context = format!("worker {worker_id} panicked");
                        let panic_error =
                            anyhow::anyhow!("worker {worker_id} panicked: {panic_msg}");
                        fatal_handler.trigger_external(context.as_str(), panic_error);
                    }
                }
            });

            self.workers.push(handle);
        }
    }

    pub(crate) fn shutdown(&mut self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut self.workers)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
