// =====================================================================================
// File: core-model/src/risk.rs
// Description: Risk assessment entities (group, domain, global)
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use crate::types::Metadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RiskModelError {
    #[error("Unknown risk level: {0}")]
    UnknownRiskLevel(String),
    #[error("Unknown trend direction: {0}")]
    UnknownTrendDirection(String),
}

/// Group risk classification levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Domain/Enterprise/Schema Admins
    Critical,
    /// Administrators, Account Operators
    High,
    /// Backup/Server Operators
    Medium,
    /// Print Operators, custom groups
    Low,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Critical => "critical",
            RiskLevel::High => "high",
            RiskLevel::Medium => "medium",
            RiskLevel::Low => "low",
        }
    }
}

impl FromStr for RiskLevel {
    type Err = RiskModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(RiskLevel::Critical),
            "high" => Ok(RiskLevel::High),
            "medium" => Ok(RiskLevel::Medium),
            "low" => Ok(RiskLevel::Low),
            other => Err(RiskModelError::UnknownRiskLevel(other.to_string())),
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of the global score relative to the previous historical point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Improving,
    Stable,
    Degrading,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Improving => "improving",
            TrendDirection::Stable => "stable",
            TrendDirection::Degrading => "degrading",
        }
    }
}

impl FromStr for TrendDirection {
    type Err = RiskModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "improving" => Ok(TrendDirection::Improving),
            "stable" => Ok(TrendDirection::Stable),
            "degrading" => Ok(TrendDirection::Degrading),
            other => Err(RiskModelError::UnknownTrendDirection(other.to_string())),
        }
    }
}

impl Default for TrendDirection {
    fn default() -> Self {
        TrendDirection::Stable
    }
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk assessment for one privileged group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRisk {
    pub group_name: String,
    pub total_members: i32,
    pub accepted_members: i32,
    pub unaccepted_members: i32,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    /// Individual factor values for observability
    pub contributing_factors: HashMap<String, f64>,
}

/// Materialized category scoring for a domain on a calendar day.
/// Unique per `(domain, date(assessment_date))`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainRiskAssessment {
    pub id: Option<Uuid>,
    pub domain: String,
    pub assessment_date: DateTime<Utc>,

    // Category scores (0-100)
    pub access_governance_score: f64,
    pub privilege_escalation_score: f64,
    pub compliance_posture_score: f64,
    pub operational_risk_score: f64,

    // Weighted composite over the four categories (0-100)
    pub domain_group_score: f64,

    pub group_risks: Vec<GroupRisk>,
    pub calculation_metadata: Metadata,
}

/// Materialized combined score per `(domain, date)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalRiskScore {
    pub id: Option<Uuid>,
    pub domain: String,
    pub assessment_date: DateTime<Utc>,

    // Component scores
    pub config_audit_score: Option<f64>,
    pub domain_group_score: f64,
    /// Security-awareness score as reported (0-100, higher = better)
    pub awareness_score: Option<f64>,

    pub global_score: f64,

    // Percent contribution of each component to the global score
    pub config_audit_contribution: Option<f64>,
    pub domain_group_contribution: f64,
    pub awareness_contribution: Option<f64>,

    pub trend_direction: TrendDirection,
    pub trend_percentage: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_round_trip() {
        for level in [
            RiskLevel::Critical,
            RiskLevel::High,
            RiskLevel::Medium,
            RiskLevel::Low,
        ] {
            assert_eq!(RiskLevel::from_str(level.as_str()).unwrap(), level);
        }
        assert!(RiskLevel::from_str("severe").is_err());
    }

    #[test]
    fn test_trend_direction_serde() {
        let json = serde_json::to_string(&TrendDirection::Degrading).unwrap();
        assert_eq!(json, "\"degrading\"");
        let parsed: TrendDirection = serde_json::from_str("\"improving\"").unwrap();
        assert_eq!(parsed, TrendDirection::Improving);
    }
}
