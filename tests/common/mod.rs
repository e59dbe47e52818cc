#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use export_reconciler::{
    Deliverable, ExportTrigger, ManualClock, NameVariant, ReconciliationConfig, TriggerError,
    TriggerRequest,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

/// Create a temporary directory for testing
pub fn create_test_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp dir")
}

pub fn target_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 8, 13).unwrap()
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(target_date()))
}

/// Bytes that pass the spreadsheet signature check
pub fn xlsx_bytes(len: usize) -> Vec<u8> {
    let mut bytes = b"PK\x03\x04".to_vec();
    bytes.resize(len.max(4), 0);
    bytes
}

pub fn write_file(dir: &Path, name: &str, contents: &[u8]) {
    std::fs::write(dir.join(name), contents).expect("Failed to write test file");
}

/// Write a file and set its modification time `age` into the past
pub fn write_file_aged(dir: &Path, name: &str, contents: &[u8], age: Duration) {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("Failed to write test file");
    let file = std::fs::File::options()
        .write(true)
        .open(&path)
        .expect("Failed to open test file");
    file.set_modified(SystemTime::now() - age)
        .expect("Failed to set mtime");
}

/// Config with short timeouts; a `ManualClock` makes every wait instant anyway
pub fn test_config(dir: &Path, deliverables: Vec<Deliverable>) -> ReconciliationConfig {
    let mut config = ReconciliationConfig::new(dir, deliverables);
    config.target_date = Some(target_date());
    config.verification_timeout_secs = 6;
    config.heavy_verification_timeout_secs = 10;
    config.max_retries = 2;
    config.heavy_max_retries = 2;
    config.max_global_passes = 3;
    config
}

pub fn simple(name: &str) -> Deliverable {
    Deliverable::new(name, NameVariant::Simple).with_locator(format!("https://exports/{}", name))
}

/// Trigger that drops the expected file into the download directory on a
/// chosen call number per deliverable, and records every call it receives.
#[derive(Default)]
pub struct ScriptedTrigger {
    /// Call number (1-based) on which the file appears; absent means never
    succeed_on: HashMap<String, u32>,
    /// Return an error from every call, even ones that drop the file
    fail_calls: bool,
    /// Leave a `.crdownload` next to the dropped file, as a browser that
    /// has not finished renaming would
    lingering_partial: bool,
    calls: Mutex<Vec<String>>,
}

impl ScriptedTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeed_on(mut self, base_name: &str, call: u32) -> Self {
        self.succeed_on.insert(base_name.to_string(), call);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_calls = true;
        self
    }

    pub fn with_lingering_partial(mut self) -> Self {
        self.lingering_partial = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, base_name: &str) -> usize {
        self.calls().iter().filter(|c| *c == base_name).count()
    }
}

#[async_trait]
impl ExportTrigger for ScriptedTrigger {
    async fn trigger(&self, request: TriggerRequest<'_>) -> Result<(), TriggerError> {
        let name = request.deliverable.base_name.clone();
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(name.clone());
            calls.iter().filter(|c| **c == name).count() as u32
        };

        if self.succeed_on.get(&name) == Some(&call) {
            let file_name = format!("{} {}.xlsx", name, request.target_date.format("%Y-%m-%d"));
            write_file(request.download_dir, &file_name, &xlsx_bytes(2048));
            if self.lingering_partial {
                let partial = format!("{}.crdownload", file_name);
                write_file(request.download_dir, &partial, b"partial");
            }
        }

        if self.fail_calls {
            return Err(TriggerError::Other("browser crashed".to_string()));
        }
        Ok(())
    }
}
