//! Poll the download directory until the expected file appears and stops
//! growing, or the deadline passes.
//!
//! A timeout is a routine outcome here, not an error: the coordinator decides
//! whether to retry.

use crate::clock::Clock;
use crate::config::{Deliverable, ReconciliationConfig};
use crate::pattern::NamePattern;
use crate::probe::DownloadDirectoryProbe;
use crate::stability::{sample_stability, StabilitySample};
use crate::utils::ContentChecks;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifySettings {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub stability_wait: Duration,
    pub min_size_bytes: u64,
    pub require_zip_signature: bool,
}

impl VerifySettings {
    /// Settings for one deliverable, honouring its heavy flag and overrides
    pub fn for_deliverable(config: &ReconciliationConfig, deliverable: &Deliverable) -> Self {
        Self {
            timeout: config.verification_timeout_for(deliverable),
            poll_interval: config.poll_interval(),
            stability_wait: config.stability_wait_for(deliverable),
            min_size_bytes: config.min_size_bytes,
            require_zip_signature: config.require_zip_signature,
        }
    }

    pub fn content_checks(&self) -> ContentChecks {
        ContentChecks {
            min_size_bytes: self.min_size_bytes,
            require_zip_signature: self.require_zip_signature,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified {
        path: PathBuf,
        size_bytes: u64,
        polls: u32,
    },
    TimedOut {
        polls: u32,
    },
}

impl VerifyOutcome {
    pub fn path(&self) -> Option<&Path> {
        match self {
            VerifyOutcome::Verified { path, .. } => Some(path),
            VerifyOutcome::TimedOut { .. } => None,
        }
    }

    pub fn polls(&self) -> u32 {
        match self {
            VerifyOutcome::Verified { polls, .. } | VerifyOutcome::TimedOut { polls } => *polls,
        }
    }
}

pub struct DownloadVerifier {
    probe: DownloadDirectoryProbe,
    clock: Arc<dyn Clock>,
}

impl DownloadVerifier {
    pub fn new(probe: DownloadDirectoryProbe, clock: Arc<dyn Clock>) -> Self {
        Self { probe, clock }
    }

    /// Wait for a stable file matching `pattern`.
    ///
    /// Each poll: wait if a download is in progress, then test completed files
    /// in name order; the first matching file that is stable (and passes the
    /// content checks) is returned immediately.
    pub async fn verify(&self, pattern: &NamePattern, settings: &VerifySettings) -> VerifyOutcome {
        let deadline = self.clock.now() + settings.timeout;
        let mut polls = 0;

        debug!(
            deliverable = %pattern.base_name(),
            timeout_secs = settings.timeout.as_secs_f64(),
            "Waiting for download"
        );

        while self.clock.now() < deadline {
            polls += 1;

            match self.probe.list_partial().await {
                Ok(partials) if !partials.is_empty() => {
                    debug!(
                        deliverable = %pattern.base_name(),
                        partials = partials.len(),
                        "Download in progress"
                    );
                    self.clock.sleep(settings.poll_interval).await;
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Could not list partial downloads"),
            }

            if let Some((path, size_bytes)) = self.scan_once(pattern, settings).await {
                info!(
                    deliverable = %pattern.base_name(),
                    file = %path.display(),
                    size_bytes,
                    "Download verified"
                );
                return VerifyOutcome::Verified {
                    path,
                    size_bytes,
                    polls,
                };
            }

            self.clock.sleep(settings.poll_interval).await;
        }

        VerifyOutcome::TimedOut { polls }
    }

    /// One pass over a fresh listing
    async fn scan_once(
        &self,
        pattern: &NamePattern,
        settings: &VerifySettings,
    ) -> Option<(PathBuf, u64)> {
        let state = match self.probe.snapshot().await {
            Ok(state) => state,
            Err(e) => {
                warn!(dir = %self.probe.dir().display(), error = %e, "Could not list download directory");
                return None;
            }
        };

        for name in state.completed_files.iter().filter(|n| pattern.is_match(n)) {
            if has_related_partial(name, &state.partial_files) {
                debug!(file = %name, "Matching file still has a partial download");
                continue;
            }

            let path = self.probe.path_of(name);
            match sample_stability(&path, settings.stability_wait, self.clock.as_ref()).await {
                StabilitySample::Stable { size_bytes } => {
                    if settings.content_checks().accepts(&path, size_bytes).await {
                        return Some((path, size_bytes));
                    }
                }
                other => debug!(file = %name, sample = ?other, "Matching file not stable yet"),
            }
        }

        None
    }
}

/// A partial like `<name>.crdownload` or `<stem>.xlsx.crdownload` belongs to `name`
fn has_related_partial(name: &str, partials: &BTreeSet<String>) -> bool {
    let name = name.to_lowercase();
    let stem = Path::new(&name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(&name)
        .to_string();

    partials.iter().any(|partial| {
        let partial = partial.to_lowercase();
        let partial_stem = Path::new(&partial)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&partial);
        partial_stem == name || partial_stem == stem
    })
}
