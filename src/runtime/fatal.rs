use crate::stream::desync::StreamDesyncError;
use anyhow::Error as AnyError;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Captures the first unrecoverable pipeline error and tears the run down.
#[derive(Clone)]
pub struct FatalErrorHandler {
    inner: Arc<FatalInner>,
}

struct FatalInner {
    triggered: AtomicBool,
    root_shutdown: CancellationToken,
    run_shutdown: CancellationToken,
    captured_error: Mutex<Option<CapturedFatalError>>,
    notify: Notify,
}

#[derive(Clone)]
struct CapturedFatalError {
    inner: Arc<AnyError>,
}

impl CapturedFatalError {
    fn new(inner: AnyError) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }
}

impl fmt::Debug for CapturedFatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CapturedFatalError")
            .field(&self.inner)
            .finish()
    }
}

impl fmt::Display for CapturedFatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.inner.as_ref(), f)
    }
}

impl std::error::Error for CapturedFatalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.inner.as_ref().as_ref())
    }
}

impl FatalErrorHandler {
    pub fn new(root_shutdown: CancellationToken, run_shutdown: CancellationToken) -> Self {
        Self {
            inner: Arc::new(FatalInner {
                triggered: AtomicBool::new(false),
                root_shutdown,
                run_shutdown,
                captured_error: Mutex::new(None),
                notify: Notify::new(),
            }),
        }
    }

    /// Halts consumption because the shard position can no longer be trusted.
    pub fn trigger_desync(&self, shard: &str, error: StreamDesyncError) -> AnyError {
        if self.inner.triggered.swap(true, Ordering::SeqCst) {
            return error.into();
        }

        tracing::error!(
            alert = "stream_desync",
            shard,
            error = %error,
            "stream desynchronized; operator intervention required"
        );

        self.capture_error(CapturedFatalError::new(error.into()))
    }

    pub fn trigger_external(&self, context: &str, error: AnyError) -> AnyError {
        if self.inner.triggered.swap(true, Ordering::SeqCst) {
            return error;
        }

        tracing::error!(
            context,
            error = %error,
            "fatal pipeline error; initiating shutdown"
        );

        self.capture_error(CapturedFatalError::new(error))
    }

    fn capture_error(&self, error: CapturedFatalError) -> AnyError {
        {
            let mut slot = self
                .inner
                .captured_error
                .lock()
                .expect("fatal error mutex poisoned");
            if slot.is_none() {
                *slot = Some(error.clone());
            }
        }

        self.inner.run_shutdown.cancel();
        self.inner.root_shutdown.cancel();
        self.inner.notify.notify_waiters();

        error.into()
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    pub fn error(&self) -> Option<AnyError> {
        self.inner
            .captured_error
            .lock()
            .expect("fatal error mutex poisoned")
            .as_ref()
            .map(|error| error.clone().into())
    }

    /// Resolves once a fatal error has been captured.
    pub async fn triggered(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}
