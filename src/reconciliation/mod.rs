mod coordinator;
mod report;
mod types;

use std::path::PathBuf;
use thiserror::Error;

pub use coordinator::RetryCoordinator;
pub use report::{summarize, ReconciliationReport, ReportVerdict, ReportedFailure, ReportedFile};
pub use types::{
    AttemptOutcome, DeliverableState, FailedDeliverable, FailureReason, PassSummary,
    ReconciliationResult, SucceededDeliverable,
};

/// Errors that abort a whole run before any deliverable is attempted
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Download directory {path} is unusable: {source}")]
    DownloadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Pattern error: {0}")]
    Pattern(#[from] crate::pattern::PatternError),
}
