mod content;
mod hash;

pub use content::ContentChecks;
pub use hash::{compute_file_hash, compute_hash};

use chrono::NaiveDate;
use std::path::Path;

/// Spreadsheet extension produced by the export platform
pub const DEFAULT_EXTENSION: &str = "xlsx";

/// Extension the browser uses while a download is still being written
pub const DEFAULT_PARTIAL_EXTENSION: &str = "crdownload";

/// Date format embedded in export file names
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Format a calendar date the way the export platform writes it into file names
pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parse a `YYYY-MM-DD` date
pub fn parse_date(s: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
}

/// Check whether a file name carries the given extension (case-insensitive)
pub fn has_extension(file_name: &str, extension: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(extension.trim_start_matches('.')))
        .unwrap_or(false)
}

/// Get current timestamp in ISO 8601 format
pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}
