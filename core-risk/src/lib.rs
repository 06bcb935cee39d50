// =====================================================================================
// File: core-risk/src/lib.rs
// Description: Risk calculation engine for DomainWatch platform
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

//! # Core Risk
//!
//! Computes the composite per-domain risk picture:
//!
//! - a pure, deterministic calculator (group risk, four category scores,
//!   domain-group composite, availability-weighted global score, trend),
//! - a bounded in-memory LRU/TTL cache keyed by domain and group,
//! - the integration service orchestrating calculator, store and cache with
//!   day-keyed idempotent persistence and reactive invalidation.

pub mod cache;
pub mod calculator;
pub mod service;

pub use cache::{CacheStatsSnapshot, RiskCache};
pub use calculator::{GroupRiskProfile, GroupTally, RiskCalculator};
pub use service::{RiskBreakdown, RiskService};

use core_store::StoreError;
use thiserror::Error;

/// Result type for risk operations
pub type RiskResult<T> = Result<T, RiskError>;

/// Risk engine error types
#[derive(Error, Debug)]
pub enum RiskError {
    /// Store-layer failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Cache value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RiskError {
    /// Get error code for categorization
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Store(inner) => inner.error_code(),
            Self::Serialization(_) => "DEPENDENCY_FAILED",
        }
    }
}

impl From<serde_json::Error> for RiskError {
    fn from(err: serde_json::Error) -> Self {
        RiskError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_passthrough() {
        let err = RiskError::Store(StoreError::NotFound("assessment".to_string()));
        assert_eq!(err.error_code(), "NOT_FOUND");

        let err = RiskError::Serialization("bad value".to_string());
        assert_eq!(err.error_code(), "DEPENDENCY_FAILED");
    }
}
