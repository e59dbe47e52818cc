use super::types::{FailureReason, ReconciliationResult};
use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReportVerdict {
    /// Every deliverable verified
    Complete,
    /// Some deliverables verified, some did not
    Partial,
    /// Nothing verified
    Failed,
}

impl fmt::Display for ReportVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportVerdict::Complete => write!(f, "complete"),
            ReportVerdict::Partial => write!(f, "partial"),
            ReportVerdict::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportedFile {
    pub base_name: String,
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    pub pass: u32,
    pub attempts: u32,
    pub already_present: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportedFailure {
    pub base_name: String,
    pub reason: FailureReason,
}

/// Human and machine readable summary of a finished run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    pub run_id: Uuid,
    pub target_date: NaiveDate,
    pub started_at: String,
    pub verdict: ReportVerdict,
    pub total: usize,
    pub succeeded_count: usize,
    pub failed_count: usize,
    /// Percentage in `0.0..=100.0`
    pub success_rate: f64,
    pub pass_count: u32,
    pub total_elapsed_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_secs_per_success: Option<f64>,
    pub total_bytes: u64,
    pub succeeded: Vec<ReportedFile>,
    pub failed: Vec<ReportedFailure>,
    pub final_missing: Vec<String>,
}

impl ReconciliationReport {
    pub fn is_complete(&self) -> bool {
        self.verdict == ReportVerdict::Complete
    }
}

/// Build the report for a finished run
pub fn summarize(result: &ReconciliationResult) -> ReconciliationReport {
    let total = result.total();
    let succeeded_count = result.succeeded.len();
    let failed_count = result.failed.len();

    let verdict = if failed_count == 0 {
        ReportVerdict::Complete
    } else if succeeded_count > 0 {
        ReportVerdict::Partial
    } else {
        ReportVerdict::Failed
    };

    let success_rate = if total == 0 {
        100.0
    } else {
        succeeded_count as f64 * 100.0 / total as f64
    };

    let total_elapsed_secs = result.total_elapsed.as_secs_f64();
    let average_secs_per_success =
        (succeeded_count > 0).then(|| total_elapsed_secs / succeeded_count as f64);

    ReconciliationReport {
        run_id: result.run_id,
        target_date: result.target_date,
        started_at: result.started_at.clone(),
        verdict,
        total,
        succeeded_count,
        failed_count,
        success_rate,
        pass_count: result.pass_count,
        total_elapsed_secs,
        average_secs_per_success,
        total_bytes: result.succeeded.iter().filter_map(|s| s.size_bytes).sum(),
        succeeded: result
            .succeeded
            .iter()
            .map(|s| ReportedFile {
                base_name: s.base_name.clone(),
                path: s.path.clone(),
                size_bytes: s.size_bytes,
                sha256: s.sha256.clone(),
                pass: s.pass,
                attempts: s.attempts,
                already_present: s.already_present,
            })
            .collect(),
        failed: result
            .failed
            .iter()
            .map(|f| ReportedFailure {
                base_name: f.base_name.clone(),
                reason: f.reason.clone(),
            })
            .collect(),
        final_missing: result.final_missing.clone(),
    }
}

impl fmt::Display for ReconciliationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Reconciliation report for {}", self.target_date)?;
        writeln!(f, "Run: {}", self.run_id)?;
        writeln!(
            f,
            "Result: {} ({}/{} succeeded, {:.1}%)",
            self.verdict, self.succeeded_count, self.total, self.success_rate
        )?;
        writeln!(
            f,
            "Passes: {}, elapsed: {:.1}s",
            self.pass_count, self.total_elapsed_secs
        )?;
        if let Some(avg) = self.average_secs_per_success {
            writeln!(f, "Average per file: {:.1}s", avg)?;
        }
        writeln!(
            f,
            "Total size: {:.2} MB",
            self.total_bytes as f64 / (1024.0 * 1024.0)
        )?;

        if !self.succeeded.is_empty() {
            writeln!(f, "\nSucceeded:")?;
            for file in &self.succeeded {
                let note = if file.already_present {
                    " (already present)"
                } else {
                    ""
                };
                writeln!(f, "  {} -> {}{}", file.base_name, file.path.display(), note)?;
            }
        }

        if !self.failed.is_empty() {
            writeln!(f, "\nFailed:")?;
            for failure in &self.failed {
                writeln!(f, "  {}: {}", failure.base_name, failure.reason)?;
            }
        }

        if !self.final_missing.is_empty() {
            writeln!(f, "\nStill missing: {}", self.final_missing.join(", "))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciliation::types::{FailedDeliverable, SucceededDeliverable};
    use std::time::Duration;

    fn result(succeeded: usize, failed: usize) -> ReconciliationResult {
        ReconciliationResult {
            run_id: Uuid::new_v4(),
            target_date: NaiveDate::from_ymd_opt(2025, 8, 13).unwrap(),
            started_at: "2025-08-13T08:00:00Z".to_string(),
            succeeded: (0..succeeded)
                .map(|i| SucceededDeliverable {
                    base_name: format!("ok{}", i),
                    path: PathBuf::from(format!("/d/ok{} 2025-08-13.xlsx", i)),
                    size_bytes: Some(1024 * 1024),
                    sha256: None,
                    pass: 1,
                    attempts: 1,
                    already_present: false,
                })
                .collect(),
            failed: (0..failed)
                .map(|i| FailedDeliverable {
                    base_name: format!("bad{}", i),
                    reason: FailureReason::Exhausted { attempts: 9 },
                })
                .collect(),
            passes: Vec::new(),
            pass_count: 3,
            total_elapsed: Duration::from_secs(120),
            final_missing: (0..failed).map(|i| format!("bad{}", i)).collect(),
        }
    }

    #[test]
    fn test_verdicts() {
        assert_eq!(summarize(&result(3, 0)).verdict, ReportVerdict::Complete);
        assert_eq!(summarize(&result(2, 1)).verdict, ReportVerdict::Partial);
        assert_eq!(summarize(&result(0, 2)).verdict, ReportVerdict::Failed);
        assert!(summarize(&result(0, 0)).is_complete());
    }

    #[test]
    fn test_rates_and_totals() {
        let report = summarize(&result(3, 1));
        assert_eq!(report.total, 4);
        assert!((report.success_rate - 75.0).abs() < f64::EPSILON);
        assert_eq!(report.average_secs_per_success, Some(40.0));
        assert_eq!(report.total_bytes, 3 * 1024 * 1024);

        let none = summarize(&result(0, 1));
        assert_eq!(none.average_secs_per_success, None);
        assert_eq!(none.success_rate, 0.0);
    }

    #[test]
    fn test_json_shape() {
        let report = summarize(&result(1, 1));
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["verdict"], "partial");
        assert_eq!(json["targetDate"], "2025-08-13");
        assert_eq!(json["failed"][0]["reason"]["kind"], "exhausted");
        assert_eq!(json["failed"][0]["reason"]["attempts"], 9);
        assert_eq!(json["succeeded"][0]["alreadyPresent"], false);
    }

    #[test]
    fn test_display_lists_failures() {
        let text = summarize(&result(1, 1)).to_string();
        assert!(text.contains("partial (1/2 succeeded, 50.0%)"));
        assert!(text.contains("bad0: not verified after 9 attempts"));
        assert!(text.contains("Still missing: bad0"));
    }
}
