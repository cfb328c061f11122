use anyhow::{Context, Result};
use pdfstream::{init_tracing, AgentConfig, CommandExtractor, CommandExtractorConfig, Runner};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = AgentConfig::from_env().context("invalid agent configuration")?;
    let extractor_config =
        CommandExtractorConfig::from_env().context("invalid extractor configuration")?;

    tracing::info!(
        stream = config.stream_name(),
        shard = config.shard_id(),
        program = extractor_config.program(),
        "pdfstream worker configured"
    );

    let mut runner = Runner::new(config, CommandExtractor::new(extractor_config));
    runner.run_until_shutdown_signal().await
}
