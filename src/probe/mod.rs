//! Filesystem view of the shared download directory.
//!
//! The browser writes into this directory while we read and prune it, so
//! every listing is a snapshot that may be stale by the time it is used.
//! Only directory-level failures are surfaced as errors; per-file stat and
//! delete failures are logged and skipped.

use crate::config::ReconciliationConfig;
use crate::pattern::NamePattern;
use crate::utils::{has_extension, ContentChecks};
use std::collections::{BTreeSet, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Snapshot of the download directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryState {
    /// Files carrying the final spreadsheet extension
    pub completed_files: BTreeSet<String>,
    /// Files carrying an in-progress marker extension
    pub partial_files: BTreeSet<String>,
}

impl DirectoryState {
    pub fn has_partials(&self) -> bool {
        !self.partial_files.is_empty()
    }
}

/// Outcome of a dedup sweep
#[derive(Debug, Clone, Default)]
pub struct DedupReport {
    pub kept: Vec<String>,
    pub removed: Vec<String>,
    /// Files that should have been removed but could not be, with the reason
    pub failed: Vec<(String, String)>,
}

/// Which of the expected files are already on disk
#[derive(Debug, Clone, Default)]
pub struct PresenceReport {
    pub entries: Vec<PresenceEntry>,
}

#[derive(Debug, Clone)]
pub struct PresenceEntry {
    pub base_name: String,
    pub expected_hint: String,
    pub files: Vec<String>,
}

impl PresenceReport {
    pub fn missing(&self) -> Vec<&PresenceEntry> {
        self.entries.iter().filter(|e| e.files.is_empty()).collect()
    }

    pub fn present(&self) -> Vec<&PresenceEntry> {
        self.entries.iter().filter(|e| !e.files.is_empty()).collect()
    }

    pub fn missing_names(&self) -> Vec<String> {
        self.missing().iter().map(|e| e.base_name.clone()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct DownloadDirectoryProbe {
    dir: PathBuf,
    extension: String,
    partial_extensions: Vec<String>,
    checks: ContentChecks,
}

impl DownloadDirectoryProbe {
    pub fn new(
        dir: impl Into<PathBuf>,
        extension: impl Into<String>,
        partial_extensions: Vec<String>,
    ) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
            partial_extensions,
            checks: ContentChecks::default(),
        }
    }

    pub fn from_config(config: &ReconciliationConfig) -> Self {
        Self::new(
            config.download_dir.clone(),
            config.extension.clone(),
            config.partial_extensions.clone(),
        )
        .with_content_checks(config.content_checks())
    }

    /// Checks a file on disk must pass to count as already delivered
    pub fn with_content_checks(mut self, checks: ContentChecks) -> Self {
        self.checks = checks;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// Create the download directory if needed. Failure here is fatal for a run.
    pub async fn ensure_exists(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let meta = fs::metadata(&self.dir).await?;
        if !meta.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{} is not a directory", self.dir.display()),
            ));
        }
        Ok(())
    }

    fn is_partial(&self, file_name: &str) -> bool {
        self.partial_extensions
            .iter()
            .any(|ext| has_extension(file_name, ext))
    }

    /// Names of regular files directly inside the directory
    fn scan(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();

        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => return Err(io::Error::from(e)),
                Err(e) => {
                    // Entry vanished between readdir and stat
                    debug!(error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }

        Ok(names)
    }

    pub async fn snapshot(&self) -> io::Result<DirectoryState> {
        let mut state = DirectoryState::default();

        for name in self.scan()? {
            if self.is_partial(&name) {
                state.partial_files.insert(name);
            } else if has_extension(&name, &self.extension) {
                state.completed_files.insert(name);
            }
        }

        Ok(state)
    }

    pub async fn list_completed(&self) -> io::Result<BTreeSet<String>> {
        Ok(self.snapshot().await?.completed_files)
    }

    pub async fn list_partial(&self) -> io::Result<BTreeSet<String>> {
        Ok(self.snapshot().await?.partial_files)
    }

    /// Delete every in-progress file. Best effort: failures are swallowed since
    /// the browser may still hold the file open.
    pub async fn remove_orphan_partials(&self) -> usize {
        let partials = match self.list_partial().await {
            Ok(partials) => partials,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "Could not list partial downloads");
                return 0;
            }
        };

        let mut removed = 0;
        for name in partials {
            match fs::remove_file(self.path_of(&name)).await {
                Ok(()) => {
                    debug!(file = %name, "Removed orphan partial download");
                    removed += 1;
                }
                Err(e) => debug!(file = %name, error = %e, "Could not remove partial download"),
            }
        }

        if removed > 0 {
            info!(count = removed, "Cleaned up orphan partial downloads");
        }
        removed
    }

    /// Completed files matching `pattern`, in name order
    pub async fn find_matching(&self, pattern: &NamePattern) -> io::Result<Vec<String>> {
        Ok(self
            .list_completed()
            .await?
            .into_iter()
            .filter(|name| pattern.is_match(name))
            .collect())
    }

    /// Newest file satisfying `pattern` that also passes the content checks,
    /// with its size
    pub async fn find_existing(&self, pattern: &NamePattern) -> io::Result<Option<(PathBuf, u64)>> {
        let mut best: Option<(SystemTime, PathBuf, u64)> = None;

        for name in self.find_matching(pattern).await? {
            let path = self.path_of(&name);
            let meta = match fs::metadata(&path).await {
                Ok(meta) => meta,
                Err(e) => {
                    debug!(file = %name, error = %e, "Could not stat candidate file");
                    continue;
                }
            };
            if !self.checks.accepts(&path, meta.len()).await {
                continue;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            if best.as_ref().map_or(true, |(m, _, _)| modified >= *m) {
                best = Some((modified, path, meta.len()));
            }
        }

        Ok(best.map(|(_, path, size)| (path, size)))
    }

    /// Which expected files are already present. Matching files that fail
    /// the content checks do not count.
    pub async fn check_existing(&self, patterns: &[NamePattern]) -> io::Result<PresenceReport> {
        let completed = self.list_completed().await?;
        let mut entries = Vec::with_capacity(patterns.len());

        for pattern in patterns {
            let mut files = Vec::new();
            for name in completed.iter().filter(|name| pattern.is_match(name)) {
                let path = self.path_of(name);
                let size_bytes = match fs::metadata(&path).await {
                    Ok(meta) => meta.len(),
                    Err(e) => {
                        debug!(file = %name, error = %e, "Could not stat candidate file");
                        continue;
                    }
                };
                if self.checks.accepts(&path, size_bytes).await {
                    files.push(name.clone());
                }
            }

            entries.push(PresenceEntry {
                base_name: pattern.base_name().to_string(),
                expected_hint: pattern.expected_hint(),
                files,
            });
        }

        Ok(PresenceReport { entries })
    }

    /// For every pattern with more than one matching file, keep the most
    /// recently modified one and delete the rest.
    pub async fn deduplicate(&self, patterns: &[NamePattern]) -> DedupReport {
        let mut report = DedupReport::default();

        let completed = match self.list_completed().await {
            Ok(completed) => completed,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "Could not list files for dedup");
                return report;
            }
        };

        let mut claimed: HashSet<&str> = HashSet::new();

        for pattern in patterns {
            let names: Vec<&String> = completed
                .iter()
                .filter(|name| !claimed.contains(name.as_str()) && pattern.is_match(name))
                .collect();

            for name in &names {
                claimed.insert(name.as_str());
            }

            if names.len() <= 1 {
                continue;
            }

            info!(
                deliverable = %pattern.base_name(),
                count = names.len(),
                "Duplicate files found"
            );

            let mut group = Vec::with_capacity(names.len());
            for name in names {
                match fs::metadata(self.path_of(name)).await.and_then(|m| m.modified()) {
                    Ok(modified) => group.push((name.clone(), modified)),
                    Err(e) => warn!(file = %name, error = %e, "Could not stat duplicate, leaving it"),
                }
            }

            self.prune_group(group, &mut report).await;
        }

        report
    }

    /// Keep the newest entry of `group`, delete the others. A failed delete
    /// does not stop the remaining ones.
    async fn prune_group(&self, mut group: Vec<(String, SystemTime)>, report: &mut DedupReport) {
        if group.is_empty() {
            return;
        }

        group.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        let Some((newest, _)) = group.pop() else {
            return;
        };

        for (name, _) in group {
            match fs::remove_file(self.path_of(&name)).await {
                Ok(()) => {
                    info!(file = %name, "Removed duplicate file");
                    report.removed.push(name);
                }
                Err(e) => {
                    warn!(file = %name, error = %e, "Could not remove duplicate file");
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        report.kept.push(newest);
    }
}
