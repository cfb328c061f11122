//! Run-scoped cancellation, fatal error capture, and the metrics reporter.

use super::progress::ProgressSnapshot;
use super::worker::WorkerActivityTracker;
use crate::runtime::fatal::FatalErrorHandler;
use crate::runtime::telemetry::{self, Telemetry};
use anyhow::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) struct LifecycleHandles {
    pub run_token: CancellationToken,
    fatal_handler: Arc<FatalErrorHandler>,
    metrics_handle: Option<JoinHandle<()>>,
}

pub(crate) struct LifecycleSpawnParams<'a> {
    pub shutdown_root: &'a CancellationToken,
    pub telemetry: Arc<Telemetry>,
    pub progress: watch::Receiver<ProgressSnapshot>,
    pub activity: Arc<WorkerActivityTracker>,
    pub metrics_interval: Duration,
}

impl LifecycleHandles {
    pub(crate) fn spawn(params: LifecycleSpawnParams<'_>) -> Self {
        let LifecycleSpawnParams {
            shutdown_root,
            telemetry,
            progress,
            activity,
            metrics_interval,
        } = params;

        let run_token = shutdown_root.child_token();
        let fatal_handler = Arc::new(FatalErrorHandler::new(
            shutdown_root.clone(),
            run_token.clone(),
        ));
        let metrics_handle = telemetry::spawn_metrics_reporter(
            telemetry,
            progress,
            activity,
            run_token.clone(),
            metrics_interval,
        );

        Self {
            run_token,
            fatal_handler,
            metrics_handle: Some(metrics_handle),
        }
    }

    pub(crate) fn fatal_handler(&self) -> Arc<FatalErrorHandler> {
        self.fatal_handler.clone()
    }

    pub(crate) fn error(&self) -> Option<Error> {
        self.fatal_handler.error()
    }

    pub(crate) async fn shutdown(mut self) {
        self.run_token.cancel();
        if let Some(handle) = self.metrics_handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "metrics reporter task panicked");
            }
        }
    }
}
