//! Runs the external extraction tool as a child process per item.

use super::service::{ExtractionError, ExtractionFuture, ExtractionRequest, Extractor};
use crate::runtime::config::env_value;
use anyhow::{bail, Context, Result};
use bytes::Bytes;
use std::process::Stdio;
use tokio::process::Command;

pub const ENV_EXTRACTOR_PROGRAM: &str = "PDFSTREAM_EXTRACTOR_PROGRAM";
pub const ENV_EXTRACTOR_ARGS: &str = "PDFSTREAM_EXTRACTOR_ARGS";
pub const ENV_PERMANENT_EXIT_CODES: &str = "PDFSTREAM_PERMANENT_EXIT_CODES";

pub const LOCATOR_PLACEHOLDER: &str = "{locator}";
pub const DOCUMENT_ID_PLACEHOLDER: &str = "{document_id}";
/// `EX_DATAERR` and `EX_NOINPUT` from sysexits.
pub const DEFAULT_PERMANENT_EXIT_CODES: [i32; 2] = [65, 66];

const STDERR_EXCERPT_LIMIT: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandExtractorConfig {
    program: String,
    args: Vec<String>,
    permanent_exit_codes: Vec<i32>,
}

impl CommandExtractorConfig {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let program = program.into();
        if program.trim().is_empty() {
            bail!("extractor program must not be empty");
        }
        Ok(Self {
            program,
            args: args.into_iter().map(Into::into).collect(),
            permanent_exit_codes: DEFAULT_PERMANENT_EXIT_CODES.to_vec(),
        })
    }

    pub fn with_permanent_exit_codes(mut self, codes: impl Into<Vec<i32>>) -> Self {
        self.permanent_exit_codes = codes.into();
        self
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Arguments are whitespace-separated; without `PDFSTREAM_EXTRACTOR_ARGS` the
    /// locator is passed as the only argument.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let program = env_value(&lookup, ENV_EXTRACTOR_PROGRAM)
            .context("PDFSTREAM_EXTRACTOR_PROGRAM is required")?;
        let args = match env_value(&lookup, ENV_EXTRACTOR_ARGS) {
            Some(raw) => raw.split_whitespace().map(str::to_owned).collect(),
            None => vec![LOCATOR_PLACEHOLDER.to_owned()],
        };

        let mut config = Self::new(program, args)?;
        if let Some(raw) = env_value(&lookup, ENV_PERMANENT_EXIT_CODES) {
            let codes = raw
                .split(',')
                .map(str::trim)
                .filter(|code| !code.is_empty())
                .map(|code| {
                    code.parse::<i32>().with_context(|| {
                        format!("{ENV_PERMANENT_EXIT_CODES} has invalid exit code {code:?}")
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            config = config.with_permanent_exit_codes(codes);
        }
        Ok(config)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn permanent_exit_codes(&self) -> &[i32] {
        &self.permanent_exit_codes
    }
}

/// Extractor backed by an external command. Exit 0 with output on stdout is a success;
/// exit 0 without output or a configured permanent exit code means the document itself
/// is unprocessable; anything else is retried. The child is killed if the call is dropped.
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    config: CommandExtractorConfig,
}

impl CommandExtractor {
    pub fn new(config: CommandExtractorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CommandExtractorConfig {
        &self.config
    }

    fn render_args(&self, request: &ExtractionRequest) -> Vec<String> {
        self.config
            .args
            .iter()
            .map(|arg| {
                arg.replace(LOCATOR_PLACEHOLDER, &request.locator)
                    .replace(DOCUMENT_ID_PLACEHOLDER, request.document_id.as_str())
            })
            .collect()
    }

    async fn run(&self, request: &ExtractionRequest) -> Result<Bytes, ExtractionError> {
        let output = Command::new(&self.config.program)
            .args(self.render_args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| {
                ExtractionError::Transient(format!(
                    "failed to spawn {}: {err}",
                    self.config.program
                ))
            })?;

        let stderr = stderr_excerpt(&output.stderr);
        match output.status.code() {
            Some(0) if output.stdout.iter().all(u8::is_ascii_whitespace) => Err(
                ExtractionError::Permanent("extractor produced no output".to_owned()),
            ),
            Some(0) => Ok(Bytes::from(output.stdout)),
            Some(code) if self.config.permanent_exit_codes.contains(&code) => {
                Err(ExtractionError::Permanent(format!(
                    "extractor rejected the document (exit {code}): {stderr}"
                )))
            }
            Some(code) => Err(ExtractionError::Transient(format!(
                "extractor exited with status {code}: {stderr}"
            ))),
            None => Err(ExtractionError::Transient(
                "extractor was terminated by a signal".to_owned(),
            )),
        }
    }
}

impl Extractor for CommandExtractor {
    fn extract<'a>(&'a self, request: &'a ExtractionRequest) -> ExtractionFuture<'a> {
        Box::pin(self.run(request))
    }
}

fn stderr_excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    match trimmed.char_indices().nth(STDERR_EXCERPT_LIMIT) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_owned(),
    }
}
