//! Heuristic "has this download finished writing" check.
//!
//! A file is stable when two size reads separated by a wait agree and the
//! size is non-zero. The check is racy by nature; callers re-poll on a fixed
//! cadence and re-validate.

use crate::clock::Clock;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::debug;

/// Result of sampling a file's size twice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilitySample {
    /// Both reads agree on a non-zero size
    Stable { size_bytes: u64 },
    /// The size changed between the two reads
    Growing { first: u64, second: u64 },
    /// Both reads returned zero bytes
    Empty,
    /// One of the reads failed (file vanished, permissions, ...)
    Unreadable,
}

impl StabilitySample {
    pub fn is_stable(&self) -> bool {
        matches!(self, StabilitySample::Stable { .. })
    }

    pub fn size_bytes(&self) -> Option<u64> {
        match self {
            StabilitySample::Stable { size_bytes } => Some(*size_bytes),
            _ => None,
        }
    }
}

async fn file_size(path: &Path) -> Option<u64> {
    match fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Some(meta.len()),
        Ok(_) => None,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Could not read file size");
            None
        }
    }
}

/// Read the size, wait `wait_interval`, read it again
pub async fn sample_stability(
    path: &Path,
    wait_interval: Duration,
    clock: &dyn Clock,
) -> StabilitySample {
    let Some(first) = file_size(path).await else {
        return StabilitySample::Unreadable;
    };

    clock.sleep(wait_interval).await;

    let Some(second) = file_size(path).await else {
        return StabilitySample::Unreadable;
    };

    if first != second {
        StabilitySample::Growing { first, second }
    } else if first == 0 {
        StabilitySample::Empty
    } else {
        StabilitySample::Stable { size_bytes: first }
    }
}

pub async fn is_stable(path: &Path, wait_interval: Duration, clock: &dyn Clock) -> bool {
    sample_stability(path, wait_interval, clock).await.is_stable()
}
