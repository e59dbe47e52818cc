use crate::pattern::{NameVariant, PatternOptions};
use crate::utils::{ContentChecks, DEFAULT_EXTENSION, DEFAULT_PARTIAL_EXTENSION};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Deliverable #{0} has an empty base name")]
    EmptyBaseName(usize),

    #[error("Deliverable '{0}' is configured more than once")]
    DuplicateDeliverable(String),

    #[error("Spreadsheet extension must not be empty")]
    EmptyExtension,

    #[error("Invalid setting {0}: {1}")]
    InvalidSetting(&'static str, String),
}

/// Date range requested from the export platform for one deliverable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportWindow {
    pub start: NaiveDate,
    /// Missing end means "up to the run's target date"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<NaiveDate>,
}

impl ExportWindow {
    /// Resolve the end of the window against the run's target date
    pub fn resolve_end(&self, target_date: NaiveDate) -> NaiveDate {
        self.end.unwrap_or(target_date)
    }
}

/// A named unit of expected output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deliverable {
    pub base_name: String,
    /// Heavy exports get longer timeouts and fewer retries
    #[serde(default)]
    pub heavy: bool,
    /// Opaque handle passed to the export trigger (usually the export URL)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
    #[serde(default)]
    pub pattern: NameVariant,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stability_wait_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_window: Option<ExportWindow>,
}

impl Deliverable {
    pub fn new(base_name: impl Into<String>, pattern: NameVariant) -> Self {
        Self {
            base_name: base_name.into(),
            heavy: false,
            locator: None,
            pattern,
            timeout_secs: None,
            max_retries: None,
            stability_wait_ms: None,
            export_window: None,
        }
    }

    pub fn with_locator(mut self, locator: impl Into<String>) -> Self {
        self.locator = Some(locator.into());
        self
    }

    pub fn heavy(mut self) -> Self {
        self.heavy = true;
        self
    }
}

fn default_extension() -> String {
    DEFAULT_EXTENSION.to_string()
}

fn default_partial_extensions() -> Vec<String> {
    vec![DEFAULT_PARTIAL_EXTENSION.to_string()]
}

fn default_verification_timeout_secs() -> u64 {
    60
}

fn default_heavy_verification_timeout_secs() -> u64 {
    180
}

fn default_max_retries() -> u32 {
    3
}

fn default_heavy_max_retries() -> u32 {
    2
}

fn default_max_global_passes() -> u32 {
    3
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_stability_wait_ms() -> u64 {
    1500
}

fn default_heavy_stability_wait_ms() -> u64 {
    3000
}

fn default_trigger_timeout_secs() -> u64 {
    180
}

fn default_heavy_trigger_timeout_secs() -> u64 {
    300
}

fn default_pause_between_deliverables_ms() -> u64 {
    3000
}

fn default_pause_after_failure_ms() -> u64 {
    15000
}

fn default_pass_cooldown_secs() -> u64 {
    10
}

fn default_min_size_bytes() -> u64 {
    1
}

/// Everything a reconciliation run needs, passed to the coordinator explicitly
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationConfig {
    pub download_dir: PathBuf,
    /// Defaults to the clock's local date when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_date: Option<NaiveDate>,
    #[serde(default = "default_extension")]
    pub extension: String,
    #[serde(default = "default_partial_extensions")]
    pub partial_extensions: Vec<String>,
    #[serde(default = "default_verification_timeout_secs")]
    pub verification_timeout_secs: u64,
    #[serde(default = "default_heavy_verification_timeout_secs")]
    pub heavy_verification_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_heavy_max_retries")]
    pub heavy_max_retries: u32,
    #[serde(default = "default_max_global_passes")]
    pub max_global_passes: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_stability_wait_ms")]
    pub stability_wait_ms: u64,
    #[serde(default = "default_heavy_stability_wait_ms")]
    pub heavy_stability_wait_ms: u64,
    #[serde(default = "default_trigger_timeout_secs")]
    pub trigger_timeout_secs: u64,
    #[serde(default = "default_heavy_trigger_timeout_secs")]
    pub heavy_trigger_timeout_secs: u64,
    #[serde(default = "default_pause_between_deliverables_ms")]
    pub pause_between_deliverables_ms: u64,
    #[serde(default = "default_pause_after_failure_ms")]
    pub pause_after_failure_ms: u64,
    #[serde(default = "default_pass_cooldown_secs")]
    pub pass_cooldown_secs: u64,
    #[serde(default)]
    pub duplicate_suffix_for_dated_creation: bool,
    #[serde(default = "default_min_size_bytes")]
    pub min_size_bytes: u64,
    #[serde(default)]
    pub require_zip_signature: bool,
    #[serde(default)]
    pub deliverables: Vec<Deliverable>,
}

impl ReconciliationConfig {
    pub fn new(download_dir: impl Into<PathBuf>, deliverables: Vec<Deliverable>) -> Self {
        Self {
            download_dir: download_dir.into(),
            target_date: None,
            extension: default_extension(),
            partial_extensions: default_partial_extensions(),
            verification_timeout_secs: default_verification_timeout_secs(),
            heavy_verification_timeout_secs: default_heavy_verification_timeout_secs(),
            max_retries: default_max_retries(),
            heavy_max_retries: default_heavy_max_retries(),
            max_global_passes: default_max_global_passes(),
            poll_interval_ms: default_poll_interval_ms(),
            stability_wait_ms: default_stability_wait_ms(),
            heavy_stability_wait_ms: default_heavy_stability_wait_ms(),
            trigger_timeout_secs: default_trigger_timeout_secs(),
            heavy_trigger_timeout_secs: default_heavy_trigger_timeout_secs(),
            pause_between_deliverables_ms: default_pause_between_deliverables_ms(),
            pause_after_failure_ms: default_pause_after_failure_ms(),
            pass_cooldown_secs: default_pass_cooldown_secs(),
            duplicate_suffix_for_dated_creation: false,
            min_size_bytes: default_min_size_bytes(),
            require_zip_signature: false,
            deliverables,
        }
    }

    /// Strip surrounding whitespace from base names so they match file names
    pub fn normalize(&mut self) {
        for deliverable in &mut self.deliverables {
            deliverable.base_name = deliverable.base_name.trim().to_string();
        }
    }

    /// Check the invariants the coordinator relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.extension.trim_start_matches('.').trim().is_empty() {
            return Err(ConfigError::EmptyExtension);
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidSetting(
                "pollIntervalMs",
                "must be greater than zero".to_string(),
            ));
        }
        if self.max_global_passes == 0 {
            return Err(ConfigError::InvalidSetting(
                "maxGlobalPasses",
                "must be at least 1".to_string(),
            ));
        }
        if self.max_retries == 0 || self.heavy_max_retries == 0 {
            return Err(ConfigError::InvalidSetting(
                "maxRetries",
                "must be at least 1".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for (index, deliverable) in self.deliverables.iter().enumerate() {
            let name = deliverable.base_name.trim();
            if name.is_empty() {
                return Err(ConfigError::EmptyBaseName(index));
            }
            if !seen.insert(name.to_lowercase()) {
                return Err(ConfigError::DuplicateDeliverable(name.to_string()));
            }
            if deliverable.base_name != name {
                return Err(ConfigError::InvalidSetting(
                    "baseName",
                    format!("'{}' has leading or trailing whitespace", deliverable.base_name),
                ));
            }
            if deliverable.max_retries == Some(0) {
                return Err(ConfigError::InvalidSetting(
                    "maxRetries",
                    format!("'{}' must allow at least 1 attempt", name),
                ));
            }
        }

        Ok(())
    }

    pub fn pattern_options(&self) -> PatternOptions {
        PatternOptions {
            extension: self.extension.trim_start_matches('.').to_string(),
            duplicate_suffix_for_dated_creation: self.duplicate_suffix_for_dated_creation,
        }
    }

    pub fn content_checks(&self) -> ContentChecks {
        ContentChecks {
            min_size_bytes: self.min_size_bytes,
            require_zip_signature: self.require_zip_signature,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn pass_cooldown(&self) -> Duration {
        Duration::from_secs(self.pass_cooldown_secs)
    }

    pub fn pause_between_deliverables(&self) -> Duration {
        Duration::from_millis(self.pause_between_deliverables_ms)
    }

    pub fn pause_after_failure(&self) -> Duration {
        Duration::from_millis(self.pause_after_failure_ms)
    }

    /// Verification deadline for one attempt
    pub fn verification_timeout_for(&self, deliverable: &Deliverable) -> Duration {
        let secs = deliverable.timeout_secs.unwrap_or(if deliverable.heavy {
            self.heavy_verification_timeout_secs
        } else {
            self.verification_timeout_secs
        });
        Duration::from_secs(secs)
    }

    pub fn stability_wait_for(&self, deliverable: &Deliverable) -> Duration {
        let ms = deliverable.stability_wait_ms.unwrap_or(if deliverable.heavy {
            self.heavy_stability_wait_ms
        } else {
            self.stability_wait_ms
        });
        Duration::from_millis(ms)
    }

    /// Attempts per pass; heavy exports get fewer to bound total run time
    pub fn max_retries_for(&self, deliverable: &Deliverable) -> u32 {
        deliverable.max_retries.unwrap_or(if deliverable.heavy {
            self.heavy_max_retries
        } else {
            self.max_retries
        })
    }

    pub fn trigger_timeout_for(&self, deliverable: &Deliverable) -> Duration {
        Duration::from_secs(if deliverable.heavy {
            self.heavy_trigger_timeout_secs
        } else {
            self.trigger_timeout_secs
        })
    }
}

/// Read and validate the configuration file
pub async fn read_config(config_path: &Path) -> Result<ReconciliationConfig, ConfigError> {
    let content = fs::read_to_string(config_path).await?;
    let mut config: ReconciliationConfig = serde_json::from_str(&content)?;
    config.normalize();
    config.validate()?;
    Ok(config)
}

/// Write the configuration file
pub async fn write_config(
    config_path: &Path,
    config: &ReconciliationConfig,
) -> Result<(), ConfigError> {
    let content = serde_json::to_string_pretty(config)?;
    fs::write(config_path, content).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_from_minimal_json() {
        let config: ReconciliationConfig = serde_json::from_str(
            r#"{
                "downloadDir": "/tmp/exports",
                "deliverables": [
                    {"baseName": "Household mother", "pattern": {"variant": "simple"}},
                    {"baseName": "muso_beneficiaries", "heavy": true,
                     "pattern": {"variant": "fixed-creation-date", "createdDate": "2025-03-25"}},
                    {"baseName": "PTME - Visite PTME", "locator": "https://example.org/export/1"}
                ]
            }"#,
        )
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.extension, "xlsx");
        assert_eq!(config.partial_extensions, vec!["crdownload".to_string()]);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_global_passes, 3);
        assert_eq!(config.deliverables[2].pattern, NameVariant::DatedCreation);
        assert!(config.deliverables[1].heavy);
    }

    #[test]
    fn test_heavy_deliverables_get_longer_timeouts_and_fewer_retries() {
        let config = ReconciliationConfig::new("/tmp", vec![]);
        let normal = Deliverable::new("a", NameVariant::Simple);
        let heavy = Deliverable::new("b", NameVariant::Simple).heavy();

        assert_eq!(config.verification_timeout_for(&normal), Duration::from_secs(60));
        assert_eq!(config.verification_timeout_for(&heavy), Duration::from_secs(180));
        assert!(config.stability_wait_for(&heavy) > config.stability_wait_for(&normal));
        assert_eq!(config.max_retries_for(&normal), 3);
        assert_eq!(config.max_retries_for(&heavy), 2);
        assert!(config.trigger_timeout_for(&heavy) > config.trigger_timeout_for(&normal));
    }

    #[test]
    fn test_per_deliverable_overrides_win() {
        let config = ReconciliationConfig::new("/tmp", vec![]);
        let mut d = Deliverable::new("a", NameVariant::Simple).heavy();
        d.timeout_secs = Some(5);
        d.max_retries = Some(7);
        d.stability_wait_ms = Some(10);

        assert_eq!(config.verification_timeout_for(&d), Duration::from_secs(5));
        assert_eq!(config.max_retries_for(&d), 7);
        assert_eq!(config.stability_wait_for(&d), Duration::from_millis(10));
    }

    #[test]
    fn test_validate_rejects_duplicate_base_names() {
        let config = ReconciliationConfig::new(
            "/tmp",
            vec![
                Deliverable::new("Household mother", NameVariant::Simple),
                Deliverable::new("household mother ", NameVariant::DatedCreation),
            ],
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateDeliverable(_))
        ));
    }

    #[test]
    fn test_validate_rejects_empty_base_name() {
        let config = ReconciliationConfig::new(
            "/tmp",
            vec![
                Deliverable::new("ok", NameVariant::Simple),
                Deliverable::new("   ", NameVariant::Simple),
            ],
        );
        assert!(matches!(config.validate(), Err(ConfigError::EmptyBaseName(1))));
    }

    #[test]
    fn test_validate_rejects_padded_base_name() {
        let config = ReconciliationConfig::new(
            "/tmp",
            vec![Deliverable::new(" Household mother ", NameVariant::Simple)],
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSetting("baseName", _))
        ));
    }

    #[tokio::test]
    async fn test_read_config_trims_base_names() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("reconciler.json");
        fs::write(
            &path,
            r#"{"downloadDir": "/tmp", "deliverables": [
                {"baseName": "  household_child ", "pattern": {"variant": "simple"}}
            ]}"#,
        )
        .await
        .unwrap();

        let config = read_config(&path).await.unwrap();
        assert_eq!(config.deliverables[0].base_name, "household_child");
    }

    #[test]
    fn test_validate_rejects_zero_poll_interval() {
        let mut config = ReconciliationConfig::new("/tmp", vec![]);
        config.poll_interval_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSetting("pollIntervalMs", _))
        ));
    }

    #[test]
    fn test_export_window_end_defaults_to_target_date() {
        let window = ExportWindow {
            start: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            end: None,
        };
        let target = NaiveDate::from_ymd_opt(2025, 8, 13).unwrap();
        assert_eq!(window.resolve_end(target), target);
    }

    #[tokio::test]
    async fn test_write_then_read_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("reconciler.json");
        let mut config = ReconciliationConfig::new(
            temp.path().join("downloads"),
            vec![Deliverable::new("household_child", NameVariant::Simple).with_locator("u")],
        );
        config.max_global_passes = 5;

        write_config(&path, &config).await.unwrap();
        let loaded = read_config(&path).await.unwrap();

        assert_eq!(loaded.max_global_passes, 5);
        assert_eq!(loaded.deliverables, config.deliverables);
    }

    #[tokio::test]
    async fn test_read_config_validates() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("reconciler.json");
        fs::write(
            &path,
            r#"{"downloadDir": "/tmp", "maxGlobalPasses": 0, "deliverables": []}"#,
        )
        .await
        .unwrap();

        assert!(matches!(
            read_config(&path).await,
            Err(ConfigError::InvalidSetting("maxGlobalPasses", _))
        ));
    }
}
