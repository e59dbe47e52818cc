//! Export trigger capability.
//!
//! A trigger asks the remote platform to start producing a file in the
//! download directory. Its success is only ever judged by what appears on
//! disk afterwards, so the coordinator logs trigger errors and verifies anyway.

use crate::config::Deliverable;
use crate::utils::format_date;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Deliverable '{0}' has no locator configured")]
    MissingLocator(String),

    #[error("Trigger command exited with {status}: {stderr}")]
    CommandFailed { status: String, stderr: String },

    #[error("Trigger did not return within {0:?}")]
    TimedOut(std::time::Duration),

    #[error("Trigger failed: {0}")]
    Other(String),
}

/// What the trigger is asked to produce
#[derive(Debug, Clone, Copy)]
pub struct TriggerRequest<'a> {
    pub deliverable: &'a Deliverable,
    pub target_date: NaiveDate,
    pub download_dir: &'a Path,
}

#[async_trait]
pub trait ExportTrigger: Send + Sync {
    /// Ask the remote system to begin producing the deliverable's file.
    async fn trigger(&self, request: TriggerRequest<'_>) -> Result<(), TriggerError>;

    /// Whether deliverables need a locator for this trigger to do anything.
    fn requires_locator(&self) -> bool {
        true
    }
}

/// Trigger that does nothing; used for verify-only runs
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTrigger;

#[async_trait]
impl ExportTrigger for NoopTrigger {
    async fn trigger(&self, request: TriggerRequest<'_>) -> Result<(), TriggerError> {
        debug!(deliverable = %request.deliverable.base_name, "No-op trigger");
        Ok(())
    }

    fn requires_locator(&self) -> bool {
        false
    }
}

/// Runs an external program (typically a browser automation script) once per
/// attempt. The locator is appended as the last argument and the request is
/// also exposed through `EXPORT_*` environment variables.
#[derive(Debug, Clone)]
pub struct CommandTrigger {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandTrigger {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn build_command(&self, request: &TriggerRequest<'_>, locator: &str) -> Command {
        let deliverable = request.deliverable;
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(locator)
            .env("EXPORT_NAME", &deliverable.base_name)
            .env("EXPORT_LOCATOR", locator)
            .env("EXPORT_DOWNLOAD_DIR", request.download_dir)
            .env("EXPORT_TARGET_DATE", format_date(request.target_date))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(window) = &deliverable.export_window {
            command
                .env("EXPORT_START_DATE", format_date(window.start))
                .env(
                    "EXPORT_END_DATE",
                    format_date(window.resolve_end(request.target_date)),
                );
        }

        command
    }
}

#[async_trait]
impl ExportTrigger for CommandTrigger {
    async fn trigger(&self, request: TriggerRequest<'_>) -> Result<(), TriggerError> {
        let deliverable = request.deliverable;
        let locator = deliverable
            .locator
            .as_deref()
            .ok_or_else(|| TriggerError::MissingLocator(deliverable.base_name.clone()))?;

        info!(
            deliverable = %deliverable.base_name,
            program = %self.program.display(),
            "Running export trigger"
        );

        let output = self.build_command(&request, locator).output().await?;

        if output.status.success() {
            debug!(
                deliverable = %deliverable.base_name,
                stdout = %String::from_utf8_lossy(&output.stdout).trim(),
                "Export trigger finished"
            );
            Ok(())
        } else {
            Err(TriggerError::CommandFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}
