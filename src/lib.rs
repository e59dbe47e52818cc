pub mod clock;
pub mod config;
pub mod pattern;
pub mod probe;
pub mod reconciliation;
pub mod stability;
pub mod trigger;
pub mod utils;
pub mod verify;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    read_config, write_config, ConfigError, Deliverable, ExportWindow, ReconciliationConfig,
};
pub use pattern::{NamePattern, NameVariant, PatternError, PatternOptions};
pub use probe::{DedupReport, DirectoryState, DownloadDirectoryProbe, PresenceEntry, PresenceReport};
pub use reconciliation::{
    summarize, AttemptOutcome, DeliverableState, FailedDeliverable, FailureReason, PassSummary,
    ReconcileError, ReconciliationReport, ReconciliationResult, ReportVerdict, RetryCoordinator,
    SucceededDeliverable,
};
pub use stability::{is_stable, sample_stability, StabilitySample};
pub use trigger::{CommandTrigger, ExportTrigger, NoopTrigger, TriggerError, TriggerRequest};
pub use utils::ContentChecks;
pub use verify::{DownloadVerifier, VerifyOutcome, VerifySettings};
