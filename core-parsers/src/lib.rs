// =====================================================================================
// File: core-parsers/src/lib.rs
// Description: Parser registry and per-tool normalization for DomainWatch platform
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

//! # Core Parsers
//!
//! Normalizes the output of the supported assessment tools into [`Report`]s:
//!
//! - configuration-audit XML (category scores + infrastructure metadata),
//! - ADCS/PKI analyzer JSON/CSV,
//! - domain-group enumeration JSON.
//!
//! Dispatch is extension-indexed: the registry keeps an ordered parser list
//! per file extension and picks the first parser whose cheap `can_parse`
//! probe accepts the file.

pub mod config_audit;
pub mod domain_groups;
pub mod pki_audit;
pub mod registry;

pub use config_audit::ConfigAuditParser;
pub use domain_groups::{group_risk_score, group_severity, DomainGroupsParser};
pub use pki_audit::PkiAuditParser;
pub use registry::{ParserRegistry, ReportParser};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::path::Path;
use thiserror::Error;

/// Result type for parser operations
pub type ParserResult<T> = Result<T, ParserError>;

/// Parser error types
#[derive(Error, Debug)]
pub enum ParserError {
    /// File could not be read at all
    #[error("Failed to read {path}: {message}")]
    Io { path: String, message: String },

    /// Input rejected before parsing (extension, size, malformed container)
    #[error("Invalid input {path}: {message}")]
    InvalidInput { path: String, message: String },

    /// Structure recognized but semantically invalid
    #[error("Failed to parse {path}: {message}")]
    ParseFailed { path: String, message: String },

    /// No parser is registered for the file extension
    #[error("Unsupported file type: {extension}")]
    UnsupportedType { extension: String },

    /// Parsers exist for the extension but none accepted the file
    #[error("No parser matched file: {path}")]
    NoParser { path: String },
}

impl ParserError {
    pub fn io<P: AsRef<Path>, S: Into<String>>(path: P, message: S) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            message: message.into(),
        }
    }

    pub fn invalid_input<P: AsRef<Path>, S: Into<String>>(path: P, message: S) -> Self {
        Self::InvalidInput {
            path: path.as_ref().display().to_string(),
            message: message.into(),
        }
    }

    pub fn parse_failed<P: AsRef<Path>, S: Into<String>>(path: P, message: S) -> Self {
        Self::ParseFailed {
            path: path.as_ref().display().to_string(),
            message: message.into(),
        }
    }

    /// Get error code for categorization
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "INPUT_INVALID",
            Self::InvalidInput { .. } => "INPUT_INVALID",
            Self::ParseFailed { .. } => "PARSE_FAILED",
            Self::UnsupportedType { .. } => "UNSUPPORTED_TYPE",
            Self::NoParser { .. } => "NO_PARSER",
        }
    }
}

/// Lenient report-date parsing for JSON tools: ISO 8601 timestamps (with or
/// without offset) and bare dates are accepted; anything else falls back to
/// the current time, matching how the source tools emit their `scan_date`.
pub(crate) fn parse_report_date_lenient(value: Option<&str>) -> DateTime<Utc> {
    let Some(raw) = value else {
        return Utc::now();
    };

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return parsed.with_timezone(&Utc);
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return parsed.and_utc();
    }
    if let Ok(parsed) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return parsed.and_hms_opt(0, 0, 0).expect("midnight is valid").and_utc();
    }

    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ParserError::invalid_input("a.bin", "oversized").error_code(),
            "INPUT_INVALID"
        );
        assert_eq!(
            ParserError::parse_failed("a.xml", "bad date").error_code(),
            "PARSE_FAILED"
        );
        assert_eq!(
            ParserError::UnsupportedType {
                extension: ".bin".to_string()
            }
            .error_code(),
            "UNSUPPORTED_TYPE"
        );
        assert_eq!(
            ParserError::NoParser {
                path: "a.json".to_string()
            }
            .error_code(),
            "NO_PARSER"
        );
    }

    #[test]
    fn test_parse_report_date_lenient() {
        let with_offset = parse_report_date_lenient(Some("2024-03-01T10:30:00Z"));
        assert_eq!(with_offset.hour(), 10);

        let naive = parse_report_date_lenient(Some("2024-03-01T10:30:00"));
        assert_eq!(naive.minute(), 30);

        let date_only = parse_report_date_lenient(Some("2024-03-01"));
        assert_eq!(date_only.day(), 1);
        assert_eq!(date_only.hour(), 0);

        // Garbage falls back to now rather than failing the upload
        let fallback = parse_report_date_lenient(Some("yesterday"));
        assert_eq!(fallback.year(), Utc::now().year());
    }
}
