use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Per-deliverable lifecycle across a whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverableState {
    Pending,
    Attempting { pass: u32, attempt: u32 },
    Succeeded,
    Exhausted,
}

impl fmt::Display for DeliverableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliverableState::Pending => write!(f, "pending"),
            DeliverableState::Attempting { pass, attempt } => {
                write!(f, "attempting (pass {}, attempt {})", pass, attempt)
            }
            DeliverableState::Succeeded => write!(f, "succeeded"),
            DeliverableState::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// Result of one (trigger, verify) cycle
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    pub deliverable: String,
    pub pass: u32,
    pub attempt_number: u32,
    pub succeeded: bool,
    /// Present iff `succeeded`
    pub resolved_path: Option<PathBuf>,
    pub size_bytes: Option<u64>,
    pub trigger_error: Option<String>,
    pub polls: u32,
    pub elapsed: Duration,
}

/// Why a deliverable ended the run without a verified file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FailureReason {
    /// Every attempt of every pass timed out
    Exhausted { attempts: u32 },
    /// No locator configured, so nothing could be triggered
    MissingLocator,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Exhausted { attempts } => {
                write!(f, "not verified after {} attempts", attempts)
            }
            FailureReason::MissingLocator => write!(f, "no export locator configured"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SucceededDeliverable {
    pub base_name: String,
    pub path: PathBuf,
    pub size_bytes: Option<u64>,
    pub sha256: Option<String>,
    /// Pass in which the file was verified or found
    pub pass: u32,
    /// Trigger attempts spent on this deliverable across all passes
    pub attempts: u32,
    /// The file was already on disk, nothing was triggered for it
    pub already_present: bool,
}

#[derive(Debug, Clone)]
pub struct FailedDeliverable {
    pub base_name: String,
    pub reason: FailureReason,
}

/// Aggregate of one sweep over the work list
#[derive(Debug, Clone, Default)]
pub struct PassSummary {
    pub pass: u32,
    /// Deliverables this pass was invoked with, in order
    pub attempted: Vec<String>,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    pub trigger_attempts: u32,
    pub trigger_failures: u32,
    pub elapsed: Duration,
}

/// Final state of a run; built once and never mutated afterwards
#[derive(Debug, Clone)]
pub struct ReconciliationResult {
    pub run_id: Uuid,
    pub target_date: NaiveDate,
    pub started_at: String,
    pub succeeded: Vec<SucceededDeliverable>,
    pub failed: Vec<FailedDeliverable>,
    pub passes: Vec<PassSummary>,
    pub pass_count: u32,
    pub total_elapsed: Duration,
    /// Deliverables still missing on disk in the closing presence check
    pub final_missing: Vec<String>,
}

impl ReconciliationResult {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn succeeded_paths(&self) -> Vec<&PathBuf> {
        self.succeeded.iter().map(|s| &s.path).collect()
    }

    pub fn find_succeeded(&self, base_name: &str) -> Option<&SucceededDeliverable> {
        self.succeeded.iter().find(|s| s.base_name == base_name)
    }

    pub fn find_failed(&self, base_name: &str) -> Option<&FailedDeliverable> {
        self.failed.iter().find(|f| f.base_name == base_name)
    }
}
