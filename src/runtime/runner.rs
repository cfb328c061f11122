use crate::extraction::Extractor;
use crate::pipeline::ExtractionAgent;
use crate::runtime::config::AgentConfig;
use anyhow::Result;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Drives an [`ExtractionAgent`] until an OS shutdown signal or a fatal pipeline error.
pub struct Runner {
    agent: ExtractionAgent,
    shutdown: CancellationToken,
    started: bool,
}

impl Runner {
    pub fn new(config: AgentConfig, extractor: impl Extractor) -> Self {
        Self::with_agent(ExtractionAgent::new(config, extractor))
    }

    /// Wraps an existing agent and wires a root [`CancellationToken`] through it.
    pub fn with_agent(mut agent: ExtractionAgent) -> Self {
        let shutdown = CancellationToken::new();
        agent.replace_shutdown_root(shutdown.clone());
        Self {
            agent,
            shutdown,
            started: false,
        }
    }

    /// Root shutdown token, for callers with their own signal handling.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn agent(&self) -> &ExtractionAgent {
        &self.agent
    }

    pub async fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }

        self.agent.start().await?;
        self.started = true;
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }

        self.shutdown.cancel();
        let result = self.agent.stop().await;
        self.started = false;
        self.reinitialize_shutdown_token();
        result
    }

    /// Runs until Ctrl-C, SIGTERM (unix), or cancellation of the root token, then stops
    /// gracefully. A fatal error such as a stream desync is returned from here.
    pub async fn run_until_shutdown_signal(&mut self) -> Result<()> {
        self.start().await?;
        tracing::info!("runner started; waiting for a shutdown signal");

        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; shutting down runner");
            }
            _ = terminate_signal() => {
                tracing::info!("SIGTERM received; shutting down runner");
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("runner shutdown token cancelled");
            }
        }

        self.stop().await
    }

    fn reinitialize_shutdown_token(&mut self) {
        self.shutdown = CancellationToken::new();
        self.agent.replace_shutdown_root(self.shutdown.clone());
    }
}

#[cfg(unix)]
async fn terminate_signal() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(err) => {
            tracing::warn!(error = %err, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await;
}
