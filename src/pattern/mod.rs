//! Expected-file matching for one deliverable on one calendar date.
//!
//! The export platform names files `<base>[ (created YYYY-MM-DD)] <date>[ (N)].<ext>`.
//! The `(created ...)` token is an opaque timestamp chosen by the platform, so
//! it is matched as a wildcard unless the deliverable pins a known value.

use crate::config::Deliverable;
use crate::utils::{format_date, DEFAULT_EXTENSION};
use chrono::NaiveDate;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PatternError {
    #[error("Deliverable base name must not be empty")]
    EmptyBaseName,

    #[error("File extension must not be empty")]
    EmptyExtension,

    #[error("Invalid filename pattern: {0}")]
    Regex(#[from] regex::Error),
}

/// Matching rule family a deliverable belongs to
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "kebab-case")]
pub enum NameVariant {
    /// `<base> <date>.<ext>`, no creation-date infix
    Simple,
    /// `<base> (created <any date>) <date>.<ext>`
    #[default]
    DatedCreation,
    /// `<base> (created <pinned date>) <date>.<ext>`
    FixedCreationDate {
        #[serde(rename = "createdDate")]
        created_date: NaiveDate,
    },
}

impl NameVariant {
    pub fn label(&self) -> &'static str {
        match self {
            NameVariant::Simple => "simple",
            NameVariant::DatedCreation => "dated-creation",
            NameVariant::FixedCreationDate { .. } => "fixed-creation-date",
        }
    }
}

/// Run-wide knobs that affect every compiled pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternOptions {
    pub extension: String,
    /// Accept a ` (N)` duplicate suffix on dated-creation names too
    pub duplicate_suffix_for_dated_creation: bool,
}

impl Default for PatternOptions {
    fn default() -> Self {
        Self {
            extension: DEFAULT_EXTENSION.to_string(),
            duplicate_suffix_for_dated_creation: false,
        }
    }
}

/// Compiled, case-insensitive matcher over file names
#[derive(Debug, Clone)]
pub struct NamePattern {
    base_name: String,
    target_date: NaiveDate,
    variant: NameVariant,
    extension: String,
    regex: Regex,
}

const DUPLICATE_SUFFIX: &str = r"(?:\s+\(\d+\))?";

impl NamePattern {
    /// Compile the matcher for `base_name` on `target_date`.
    ///
    /// The base name, date and extension are escaped, so characters such as
    /// `[`, `(` or `.` in a deliverable name are matched literally.
    pub fn build(
        base_name: &str,
        variant: &NameVariant,
        target_date: NaiveDate,
        options: &PatternOptions,
    ) -> Result<Self, PatternError> {
        if base_name.trim().is_empty() {
            return Err(PatternError::EmptyBaseName);
        }
        let extension = options.extension.trim_start_matches('.');
        if extension.is_empty() {
            return Err(PatternError::EmptyExtension);
        }

        let base = regex::escape(base_name);
        let date = regex::escape(&format_date(target_date));
        let ext = regex::escape(extension);

        let source = match variant {
            NameVariant::Simple => {
                format!(r"^{base}\s+{date}{DUPLICATE_SUFFIX}\.{ext}$")
            }
            NameVariant::DatedCreation => {
                let suffix = if options.duplicate_suffix_for_dated_creation {
                    DUPLICATE_SUFFIX
                } else {
                    ""
                };
                format!(r"^{base}\s*\(created\s+\d{{4}}-\d{{2}}-\d{{2}}\)\s+{date}{suffix}\.{ext}$")
            }
            NameVariant::FixedCreationDate { created_date } => {
                let created = regex::escape(&format_date(*created_date));
                format!(r"^{base}\s*\(created\s+{created}\)\s+{date}{DUPLICATE_SUFFIX}\.{ext}$")
            }
        };

        let regex = RegexBuilder::new(&source).case_insensitive(true).build()?;

        Ok(Self {
            base_name: base_name.to_string(),
            target_date,
            variant: variant.clone(),
            extension: extension.to_string(),
            regex,
        })
    }

    /// Compile the matcher for a configured deliverable
    pub fn for_deliverable(
        deliverable: &Deliverable,
        target_date: NaiveDate,
        options: &PatternOptions,
    ) -> Result<Self, PatternError> {
        Self::build(&deliverable.base_name, &deliverable.pattern, target_date, options)
    }

    pub fn is_match(&self, file_name: &str) -> bool {
        self.regex.is_match(file_name)
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn target_date(&self) -> NaiveDate {
        self.target_date
    }

    pub fn variant(&self) -> &NameVariant {
        &self.variant
    }

    /// Human-readable name of the file we expect, for log output
    pub fn expected_hint(&self) -> String {
        let date = format_date(self.target_date);
        match &self.variant {
            NameVariant::Simple => format!("{} {}.{}", self.base_name, date, self.extension),
            NameVariant::DatedCreation => format!(
                "{} (created XXXX-XX-XX) {}.{}",
                self.base_name, date, self.extension
            ),
            NameVariant::FixedCreationDate { created_date } => format!(
                "{} (created {}) {}.{}",
                self.base_name,
                format_date(*created_date),
                date,
                self.extension
            ),
        }
    }
}

impl fmt::Display for NamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expected_hint())
    }
}
