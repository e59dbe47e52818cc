//! Two-level retry engine.
//!
//! Each deliverable gets up to `max_retries` (trigger, verify) attempts per
//! pass. Deliverables that exhaust a pass are carried into the next global
//! pass after a cooldown, up to `max_global_passes`. Nothing in here raises
//! for a per-deliverable failure; those end up in the result instead.

use super::types::{
    AttemptOutcome, DeliverableState, FailedDeliverable, FailureReason, PassSummary,
    ReconciliationResult, SucceededDeliverable,
};
use super::ReconcileError;
use crate::clock::Clock;
use crate::config::{Deliverable, ReconciliationConfig};
use crate::pattern::NamePattern;
use crate::probe::DownloadDirectoryProbe;
use crate::trigger::{ExportTrigger, TriggerError, TriggerRequest};
use crate::utils::{compute_file_hash, format_date, now_iso};
use crate::verify::{DownloadVerifier, VerifyOutcome, VerifySettings};
use chrono::NaiveDate;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// What happened to one deliverable within one pass
#[derive(Debug)]
enum DeliverableOutcome {
    Succeeded {
        path: PathBuf,
        size_bytes: Option<u64>,
        attempts: u32,
        already_present: bool,
    },
    Exhausted {
        attempts: u32,
        trigger_failures: u32,
    },
    Misconfigured(FailureReason),
}

impl DeliverableOutcome {
    fn attempts(&self) -> u32 {
        match self {
            DeliverableOutcome::Succeeded { attempts, .. }
            | DeliverableOutcome::Exhausted { attempts, .. } => *attempts,
            DeliverableOutcome::Misconfigured(_) => 0,
        }
    }
}

pub struct RetryCoordinator {
    config: ReconciliationConfig,
    trigger: Arc<dyn ExportTrigger>,
    clock: Arc<dyn Clock>,
    probe: DownloadDirectoryProbe,
    verifier: DownloadVerifier,
}

impl RetryCoordinator {
    pub fn new(
        config: ReconciliationConfig,
        trigger: Arc<dyn ExportTrigger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let probe = DownloadDirectoryProbe::from_config(&config);
        let verifier = DownloadVerifier::new(probe.clone(), Arc::clone(&clock));
        Self {
            config,
            trigger,
            clock,
            probe,
            verifier,
        }
    }

    pub fn config(&self) -> &ReconciliationConfig {
        &self.config
    }

    /// Configured target date, or today on the injected clock
    pub fn target_date(&self) -> NaiveDate {
        self.config
            .target_date
            .unwrap_or_else(|| self.clock.today())
    }

    pub async fn run(&self) -> Result<ReconciliationResult, ReconcileError> {
        self.run_for_date(self.target_date()).await
    }

    /// Reconcile every configured deliverable for `target_date`.
    ///
    /// Only directory setup failures and invalid configuration are returned
    /// as errors; a run where every deliverable fails still yields `Ok`.
    pub async fn run_for_date(
        &self,
        target_date: NaiveDate,
    ) -> Result<ReconciliationResult, ReconcileError> {
        self.config.validate()?;

        let run_id = Uuid::new_v4();
        let span = info_span!("reconcile", %run_id, date = %format_date(target_date));

        self.run_inner(run_id, target_date).instrument(span).await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        target_date: NaiveDate,
    ) -> Result<ReconciliationResult, ReconcileError> {
        let started = self.clock.now();
        let started_at = now_iso();
        let deliverables = &self.config.deliverables;

        self.probe
            .ensure_exists()
            .await
            .map_err(|source| ReconcileError::DownloadDir {
                path: self.probe.dir().to_path_buf(),
                source,
            })?;

        let patterns = self.patterns_for(target_date)?;

        info!(
            dir = %self.probe.dir().display(),
            expected = deliverables.len(),
            "Initial verification"
        );

        let dedup = self.probe.deduplicate(&patterns).await;
        if !dedup.removed.is_empty() || !dedup.failed.is_empty() {
            info!(
                removed = dedup.removed.len(),
                failed = dedup.failed.len(),
                "Duplicate cleanup finished"
            );
        }

        let presence = self
            .probe
            .check_existing(&patterns)
            .await
            .map_err(|source| ReconcileError::DownloadDir {
                path: self.probe.dir().to_path_buf(),
                source,
            })?;
        let missing = presence.missing();
        info!(
            present = presence.present().len(),
            missing = missing.len(),
            "Files for target date"
        );
        for entry in &missing {
            info!(expected = %entry.expected_hint, "To download");
        }

        let mut states = vec![DeliverableState::Pending; deliverables.len()];
        let mut attempts_used = vec![0u32; deliverables.len()];
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        let mut passes = Vec::new();

        let mut work: Vec<usize> = (0..deliverables.len()).collect();
        let mut pass = 0;

        while !work.is_empty() && pass < self.config.max_global_passes {
            pass += 1;

            if pass > 1 {
                info!(
                    pass,
                    cooldown_secs = self.config.pass_cooldown_secs,
                    "Cooling down before next pass"
                );
                self.clock.sleep(self.config.pass_cooldown()).await;
            }

            info!(pass, deliverables = work.len(), "Starting pass");
            let pass_started = self.clock.now();
            let mut summary = PassSummary {
                pass,
                ..Default::default()
            };
            let mut carried = Vec::new();
            let mut previous_triggered = false;

            for &index in &work {
                let deliverable = &deliverables[index];
                summary.attempted.push(deliverable.base_name.clone());

                if previous_triggered {
                    self.clock
                        .sleep(self.config.pause_between_deliverables())
                        .await;
                }

                let outcome = self
                    .process_deliverable(pass, deliverable, target_date, &mut states[index])
                    .await?;

                previous_triggered = outcome.attempts() > 0;
                attempts_used[index] += outcome.attempts();
                summary.trigger_attempts += outcome.attempts();

                match outcome {
                    DeliverableOutcome::Succeeded {
                        path,
                        size_bytes,
                        already_present,
                        ..
                    } => {
                        let sha256 = match compute_file_hash(&path).await {
                            Ok(hash) => Some(hash),
                            Err(e) => {
                                warn!(file = %path.display(), error = %e, "Could not hash verified file");
                                None
                            }
                        };
                        summary.succeeded.push(deliverable.base_name.clone());
                        succeeded.push(SucceededDeliverable {
                            base_name: deliverable.base_name.clone(),
                            path,
                            size_bytes,
                            sha256,
                            pass,
                            attempts: attempts_used[index],
                            already_present,
                        });
                    }
                    DeliverableOutcome::Exhausted {
                        trigger_failures, ..
                    } => {
                        summary.trigger_failures += trigger_failures;
                        summary.failed.push(deliverable.base_name.clone());
                        carried.push(index);
                    }
                    DeliverableOutcome::Misconfigured(reason) => {
                        summary.failed.push(deliverable.base_name.clone());
                        failed.push(FailedDeliverable {
                            base_name: deliverable.base_name.clone(),
                            reason,
                        });
                    }
                }
            }

            summary.elapsed = self.clock.now().duration_since(pass_started);
            info!(
                pass,
                succeeded = summary.succeeded.len(),
                failed = summary.failed.len(),
                "Pass finished"
            );
            if !carried.is_empty() {
                let names: Vec<&str> = carried
                    .iter()
                    .map(|&i| deliverables[i].base_name.as_str())
                    .collect();
                info!(pass, remaining = ?names, "Carrying failures into next pass");
            }

            passes.push(summary);
            work = carried;
        }

        for index in work {
            let deliverable = &deliverables[index];
            error!(
                deliverable = %deliverable.base_name,
                attempts = attempts_used[index],
                "Giving up on deliverable"
            );
            failed.push(FailedDeliverable {
                base_name: deliverable.base_name.clone(),
                reason: FailureReason::Exhausted {
                    attempts: attempts_used[index],
                },
            });
        }

        for (deliverable, state) in deliverables.iter().zip(&states) {
            debug!(deliverable = %deliverable.base_name, %state, "Final state");
        }

        let final_missing = match self.probe.check_existing(&patterns).await {
            Ok(presence) => presence.missing_names(),
            Err(e) => {
                warn!(error = %e, "Final presence check failed");
                failed.iter().map(|f| f.base_name.clone()).collect()
            }
        };
        if !final_missing.is_empty() {
            warn!(missing = ?final_missing, "Files still missing after reconciliation");
        }

        Ok(ReconciliationResult {
            run_id,
            target_date,
            started_at,
            succeeded,
            failed,
            pass_count: pass,
            passes,
            total_elapsed: self.clock.now().duration_since(started),
            final_missing,
        })
    }

    fn patterns_for(&self, target_date: NaiveDate) -> Result<Vec<NamePattern>, ReconcileError> {
        let options = self.config.pattern_options();
        self.config
            .deliverables
            .iter()
            .map(|d| NamePattern::for_deliverable(d, target_date, &options).map_err(Into::into))
            .collect()
    }

    /// Run up to `max_retries` attempts for one deliverable within one pass
    async fn process_deliverable(
        &self,
        pass: u32,
        deliverable: &Deliverable,
        target_date: NaiveDate,
        state: &mut DeliverableState,
    ) -> Result<DeliverableOutcome, ReconcileError> {
        let max_retries = self.config.max_retries_for(deliverable);
        let options = self.config.pattern_options();
        let settings = VerifySettings::for_deliverable(&self.config, deliverable);
        let mut trigger_failures = 0;

        for attempt in 1..=max_retries {
            let pattern = NamePattern::for_deliverable(deliverable, target_date, &options)?;

            match self.probe.find_existing(&pattern).await {
                Ok(Some((path, size_bytes))) => {
                    info!(
                        deliverable = %deliverable.base_name,
                        file = %path.display(),
                        "Already present, skipping"
                    );
                    *state = DeliverableState::Succeeded;
                    return Ok(DeliverableOutcome::Succeeded {
                        path,
                        size_bytes: Some(size_bytes),
                        attempts: attempt - 1,
                        // Every earlier attempt and pass ran the trigger
                        already_present: pass == 1 && attempt == 1,
                    });
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Could not check for existing file"),
            }

            if self.trigger.requires_locator() && deliverable.locator.is_none() {
                error!(
                    deliverable = %deliverable.base_name,
                    "No locator configured, skipping deliverable"
                );
                *state = DeliverableState::Exhausted;
                return Ok(DeliverableOutcome::Misconfigured(
                    FailureReason::MissingLocator,
                ));
            }

            *state = DeliverableState::Attempting { pass, attempt };
            info!(
                deliverable = %deliverable.base_name,
                pass,
                attempt,
                max_retries,
                expected = %pattern.expected_hint(),
                "Downloading"
            );

            let attempt_started = self.clock.now();
            self.probe.remove_orphan_partials().await;

            let trigger_error = self.fire_trigger(deliverable, target_date).await.err();
            if trigger_error.is_some() {
                trigger_failures += 1;
            }

            let verify = self.verifier.verify(&pattern, &settings).await;

            let outcome = AttemptOutcome {
                deliverable: deliverable.base_name.clone(),
                pass,
                attempt_number: attempt,
                succeeded: verify.path().is_some(),
                resolved_path: verify.path().map(|p| p.to_path_buf()),
                size_bytes: match &verify {
                    VerifyOutcome::Verified { size_bytes, .. } => Some(*size_bytes),
                    VerifyOutcome::TimedOut { .. } => None,
                },
                trigger_error: trigger_error.map(|e| e.to_string()),
                polls: verify.polls(),
                elapsed: self.clock.now().duration_since(attempt_started),
            };
            debug!(outcome = ?outcome, "Attempt finished");

            if let (Some(path), size_bytes) = (outcome.resolved_path, outcome.size_bytes) {
                info!(
                    deliverable = %deliverable.base_name,
                    file = %path.display(),
                    size_mb = size_bytes.unwrap_or(0) as f64 / (1024.0 * 1024.0),
                    "Download verified"
                );
                *state = DeliverableState::Succeeded;
                return Ok(DeliverableOutcome::Succeeded {
                    path,
                    size_bytes,
                    attempts: attempt,
                    already_present: false,
                });
            }

            warn!(
                deliverable = %deliverable.base_name,
                attempt,
                polls = outcome.polls,
                "Download not confirmed"
            );
            self.probe.remove_orphan_partials().await;

            if attempt < max_retries {
                self.clock.sleep(self.config.pause_after_failure()).await;
            }
        }

        error!(
            deliverable = %deliverable.base_name,
            pass,
            attempts = max_retries,
            "All attempts failed in this pass"
        );
        *state = DeliverableState::Exhausted;

        Ok(DeliverableOutcome::Exhausted {
            attempts: max_retries,
            trigger_failures,
        })
    }

    /// Invoke the trigger, bounded by the trigger timeout. Failures are
    /// returned for bookkeeping only; verification runs regardless.
    async fn fire_trigger(
        &self,
        deliverable: &Deliverable,
        target_date: NaiveDate,
    ) -> Result<(), TriggerError> {
        let request = TriggerRequest {
            deliverable,
            target_date,
            download_dir: self.probe.dir(),
        };
        let limit = self.config.trigger_timeout_for(deliverable);

        let result = match tokio::time::timeout(limit, self.trigger.trigger(request)).await {
            Ok(result) => result,
            Err(_) => Err(TriggerError::TimedOut(limit)),
        };

        if let Err(e) = &result {
            warn!(
                deliverable = %deliverable.base_name,
                error = %e,
                "Export trigger failed, verifying anyway"
            );
        }
        result
    }
}
