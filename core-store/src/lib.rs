// =====================================================================================
// File: core-store/src/lib.rs
// Description: PostgreSQL store for DomainWatch platform
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

//! # Core Store
//!
//! Persistent backbone of the platform: the normalized report store with its
//! invariants, the file-based schema migration runner, and the database
//! health checker. All writes go through transactions; the data-separation
//! invariant (only configuration-audit reports may carry category scores and
//! infrastructure metadata) is enforced on the write path and protected on
//! the read path by the composite dashboard view.

pub mod health;
pub mod migrations;
pub mod postgres;
pub mod risk_store;
pub mod store;

pub use health::{CheckResult, HealthChecker, HealthReport, HealthStatus};
pub use migrations::{run_migrations_on_startup, Migration, MigrationRunner, MigrationStatus};
pub use postgres::create_pool;
pub use risk_store::{DomainRiskSummary, RiskHistoryPoint};
pub use store::{DashboardKpis, GroupedFinding, ReportStore};

use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Store error types, categorized onto the platform error taxonomy by
/// [`StoreError::error_code`]
#[derive(Error, Debug)]
pub enum StoreError {
    /// The database cannot be reached or the pool is exhausted
    #[error("Database unavailable: {0}")]
    Connection(String),
    /// A statement failed to execute
    #[error("Database query failed: {0}")]
    Query(String),
    /// A row could not be decoded into its entity
    #[error("Row decoding failed: {0}")]
    Serialization(String),
    /// A lookup by id or natural key matched no row
    #[error("No such record: {0}")]
    NotFound(String),
    /// A natural-key uniqueness rule was violated
    #[error("Duplicate natural key: {0}")]
    Conflict(String),
    /// A transaction could not run to commit
    #[error("Transaction failed: {0}")]
    Transaction(String),
    /// A schema migration could not be applied
    #[error("Schema migration failed: {0}")]
    Migration(String),
    /// The data-separation invariant was broken on a write
    #[error("Data integrity violated: {0}")]
    Integrity(String),
}

impl StoreError {
    /// Get error code for categorization
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Connection(_) => "STORAGE_UNAVAILABLE",
            Self::Query(_) => "STORAGE_UNAVAILABLE",
            Self::Serialization(_) => "STORAGE_UNAVAILABLE",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Transaction(_) => "STORAGE_UNAVAILABLE",
            Self::Migration(_) => "STORAGE_UNAVAILABLE",
            Self::Integrity(_) => "INTEGRITY_VIOLATION",
        }
    }

    /// Check if the error is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Transaction(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::Error as Sqlx;
        match err {
            Sqlx::RowNotFound => StoreError::NotFound("query returned no rows".to_string()),
            Sqlx::PoolTimedOut | Sqlx::PoolClosed | Sqlx::Io(_) => {
                StoreError::Connection(err.to_string())
            }
            Sqlx::ColumnDecode { .. } | Sqlx::Decode(_) | Sqlx::ColumnNotFound(_) => {
                StoreError::Serialization(err.to_string())
            }
            Sqlx::Database(db_err) if db_err.is_unique_violation() => {
                StoreError::Conflict(db_err.to_string())
            }
            other => StoreError::Query(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            StoreError::NotFound("report".to_string()).error_code(),
            "NOT_FOUND"
        );
        assert_eq!(
            StoreError::Conflict("dup".to_string()).error_code(),
            "CONFLICT"
        );
        assert_eq!(
            StoreError::Connection("down".to_string()).error_code(),
            "STORAGE_UNAVAILABLE"
        );
        assert_eq!(
            StoreError::Integrity("scores on analysis report".to_string()).error_code(),
            "INTEGRITY_VIOLATION"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(StoreError::Connection("down".to_string()).is_retryable());
        assert!(!StoreError::NotFound("x".to_string()).is_retryable());
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: StoreError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }
}
