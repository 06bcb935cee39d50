// =====================================================================================
// File: core-model/src/types.rs
// Description: Core entity types for the DomainWatch platform
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Open-ended metadata attached to reports and findings, persisted as JSONB
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Model-level error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Unknown tool type: {0}")]
    UnknownToolType(String),
    #[error("Unknown finding status: {0}")]
    UnknownFindingStatus(String),
    #[error("Unknown member type: {0}")]
    UnknownMemberType(String),
}

/// Security assessment tool families supported by the ingestion pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolType {
    /// Configuration-audit tool (XML reports with category scores)
    ConfigAudit,
    /// ADCS/PKI configuration analyzer (JSON or CSV reports)
    PkiAudit,
    /// Domain-group enumeration (JSON reports)
    DomainAnalysis,
    /// Raw domain group member dumps
    DomainGroupMembers,
    /// Custom findings from unsupported tools
    Custom,
}

impl ToolType {
    /// Database/wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::ConfigAudit => "config_audit",
            ToolType::PkiAudit => "pki_audit",
            ToolType::DomainAnalysis => "domain_analysis",
            ToolType::DomainGroupMembers => "domain_group_members",
            ToolType::Custom => "custom",
        }
    }

    /// Only configuration-audit reports may carry infrastructure metadata
    /// (functional levels, maturity, object counts).
    pub fn allows_infrastructure_metadata(&self) -> bool {
        matches!(self, ToolType::ConfigAudit)
    }

    /// Only configuration-audit reports may carry the four category scores.
    pub fn allows_category_scores(&self) -> bool {
        matches!(self, ToolType::ConfigAudit)
    }

    /// Domain-analysis reports keep the domain SID for cross-validation.
    pub fn allows_domain_sid(&self) -> bool {
        matches!(self, ToolType::ConfigAudit | ToolType::DomainAnalysis)
    }
}

impl FromStr for ToolType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "config_audit" => Ok(ToolType::ConfigAudit),
            "pki_audit" => Ok(ToolType::PkiAudit),
            "domain_analysis" => Ok(ToolType::DomainAnalysis),
            "domain_group_members" => Ok(ToolType::DomainGroupMembers),
            "custom" => Ok(ToolType::Custom),
            other => Err(ModelError::UnknownToolType(other.to_string())),
        }
    }
}

impl fmt::Display for ToolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finding severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }

    /// Default finding score when the source tool does not provide one
    pub fn default_score(&self) -> i32 {
        match self {
            Severity::High => 25,
            Severity::Medium => 15,
            Severity::Low => 5,
        }
    }

    /// Lenient parse used by ingestion paths; unrecognized values map to Medium
    pub fn parse_lenient(s: &str) -> Severity {
        match s.to_ascii_lowercase().as_str() {
            "low" => Severity::Low,
            "high" | "critical" => Severity::High,
            _ => Severity::Medium,
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Medium
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingStatus {
    New,
    Accepted,
    Resolved,
    FalsePositive,
}

impl FindingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingStatus::New => "new",
            FindingStatus::Accepted => "accepted",
            FindingStatus::Resolved => "resolved",
            FindingStatus::FalsePositive => "false_positive",
        }
    }
}

impl FromStr for FindingStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(FindingStatus::New),
            "accepted" => Ok(FindingStatus::Accepted),
            "resolved" => Ok(FindingStatus::Resolved),
            "false_positive" => Ok(FindingStatus::FalsePositive),
            other => Err(ModelError::UnknownFindingStatus(other.to_string())),
        }
    }
}

impl Default for FindingStatus {
    fn default() -> Self {
        FindingStatus::New
    }
}

/// Directory object class of a group member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberType {
    User,
    Computer,
    Group,
}

impl MemberType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberType::User => "user",
            MemberType::Computer => "computer",
            MemberType::Group => "group",
        }
    }

    /// Lenient parse used by ingestion paths; unrecognized values map to User
    pub fn parse_lenient(s: &str) -> MemberType {
        match s.to_ascii_lowercase().as_str() {
            "computer" => MemberType::Computer,
            "group" => MemberType::Group,
            _ => MemberType::User,
        }
    }
}

impl FromStr for MemberType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MemberType::User),
            "computer" => Ok(MemberType::Computer),
            "group" => Ok(MemberType::Group),
            other => Err(ModelError::UnknownMemberType(other.to_string())),
        }
    }
}

impl Default for MemberType {
    fn default() -> Self {
        MemberType::User
    }
}

/// One observation produced by parsing a security report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: Uuid,
    pub report_id: Uuid,
    pub tool_type: ToolType,
    pub category: String,
    pub name: String,
    pub score: i32,
    pub severity: Severity,
    pub description: String,
    pub recommendation: String,
    pub status: FindingStatus,
    pub metadata: Metadata,
}

impl Finding {
    /// Create a new finding attached to the given report
    pub fn new<S: Into<String>>(report_id: Uuid, tool_type: ToolType, category: S, name: S) -> Self {
        Self {
            id: Uuid::new_v4(),
            report_id,
            tool_type,
            category: category.into(),
            name: name.into(),
            score: 0,
            severity: Severity::Medium,
            description: String::new(),
            recommendation: String::new(),
            status: FindingStatus::New,
            metadata: Metadata::new(),
        }
    }

    /// Identity triple of the recurring risk this finding belongs to
    pub fn risk_key(&self) -> (ToolType, &str, &str) {
        (self.tool_type, self.category.as_str(), self.name.as_str())
    }
}

/// One ingestion of one tool's output for one domain at one point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub tool_type: ToolType,
    pub domain: String,
    pub report_date: DateTime<Utc>,
    pub upload_date: DateTime<Utc>,

    // Category scores (configuration-audit reports only)
    pub global_score: Option<i32>,
    pub high_score: Option<i32>,
    pub medium_score: Option<i32>,
    pub low_score: Option<i32>,
    pub stale_objects_score: Option<i32>,
    pub privileged_accounts_score: Option<i32>,
    pub trusts_score: Option<i32>,
    pub anomalies_score: Option<i32>,

    // Infrastructure metadata (configuration-audit reports only,
    // domain_sid also allowed on domain-analysis reports)
    pub domain_sid: Option<String>,
    pub domain_functional_level: Option<String>,
    pub forest_functional_level: Option<String>,
    pub maturity_level: Option<String>,
    pub dc_count: Option<i32>,
    pub user_count: Option<i32>,
    pub computer_count: Option<i32>,

    // File references
    pub original_file: Option<String>,
    pub html_file: Option<String>,

    pub metadata: Metadata,
    pub findings: Vec<Finding>,
}

impl Report {
    /// Create an empty report for the given tool and domain
    pub fn new<S: Into<String>>(tool_type: ToolType, domain: S, report_date: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tool_type,
            domain: domain.into(),
            report_date,
            upload_date: Utc::now(),
            global_score: None,
            high_score: None,
            medium_score: None,
            low_score: None,
            stale_objects_score: None,
            privileged_accounts_score: None,
            trusts_score: None,
            anomalies_score: None,
            domain_sid: None,
            domain_functional_level: None,
            forest_functional_level: None,
            maturity_level: None,
            dc_count: None,
            user_count: None,
            computer_count: None,
            original_file: None,
            html_file: None,
            metadata: Metadata::new(),
            findings: Vec::new(),
        }
    }

    /// Drop fields this report's tool type is not allowed to populate.
    ///
    /// Returns the names of the fields that were cleared so callers can log
    /// the integrity violation. Tool types other than the configuration audit
    /// must never carry category scores or infrastructure metadata; only the
    /// domain-analysis tool additionally keeps `domain_sid`.
    pub fn enforce_data_separation(&mut self) -> Vec<&'static str> {
        let mut dropped = Vec::new();

        if !self.tool_type.allows_category_scores() {
            if self.global_score.take().is_some() {
                dropped.push("global_score");
            }
            if self.high_score.take().is_some() {
                dropped.push("high_score");
            }
            if self.medium_score.take().is_some() {
                dropped.push("medium_score");
            }
            if self.low_score.take().is_some() {
                dropped.push("low_score");
            }
            if self.stale_objects_score.take().is_some() {
                dropped.push("stale_objects_score");
            }
            if self.privileged_accounts_score.take().is_some() {
                dropped.push("privileged_accounts_score");
            }
            if self.trusts_score.take().is_some() {
                dropped.push("trusts_score");
            }
            if self.anomalies_score.take().is_some() {
                dropped.push("anomalies_score");
            }
        }

        if !self.tool_type.allows_infrastructure_metadata() {
            if self.domain_functional_level.take().is_some() {
                dropped.push("domain_functional_level");
            }
            if self.forest_functional_level.take().is_some() {
                dropped.push("forest_functional_level");
            }
            if self.maturity_level.take().is_some() {
                dropped.push("maturity_level");
            }
            if self.dc_count.take().is_some() {
                dropped.push("dc_count");
            }
            if self.user_count.take().is_some() {
                dropped.push("user_count");
            }
            if self.computer_count.take().is_some() {
                dropped.push("computer_count");
            }
        }

        if !self.tool_type.allows_domain_sid() && self.domain_sid.take().is_some() {
            dropped.push("domain_sid");
        }

        dropped
    }

    /// Count findings per severity: (total, high, medium, low)
    pub fn finding_stats(&self) -> (usize, usize, usize, usize) {
        let mut high = 0;
        let mut medium = 0;
        let mut low = 0;
        for finding in &self.findings {
            match finding.severity {
                Severity::High => high += 1,
                Severity::Medium => medium += 1,
                Severity::Low => low += 1,
            }
        }
        (self.findings.len(), high, medium, low)
    }
}

/// Lightweight report representation used for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSummary {
    pub id: Uuid,
    pub tool_type: ToolType,
    pub domain: String,
    pub report_date: DateTime<Utc>,
    pub upload_date: DateTime<Utc>,
    pub global_score: Option<i32>,
    pub stale_objects_score: Option<i32>,
    pub privileged_accounts_score: Option<i32>,
    pub trusts_score: Option<i32>,
    pub anomalies_score: Option<i32>,
    pub domain_sid: Option<String>,
    pub original_file: Option<String>,
    pub html_file: Option<String>,
    pub total_findings: i64,
    pub high_severity_findings: i64,
    pub medium_severity_findings: i64,
    pub low_severity_findings: i64,
}

/// Canonical catalog entry for a recurring risk kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Risk {
    pub id: Option<Uuid>,
    pub tool_type: ToolType,
    pub category: String,
    pub name: String,
    pub description: String,
    pub recommendation: String,
    pub severity: Severity,
}

/// Operator decision to suppress a risk kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptedRisk {
    pub tool_type: ToolType,
    pub category: String,
    pub name: String,
    pub reason: Option<String>,
    pub accepted_by: Option<String>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AcceptedRisk {
    /// An acceptance is active while it has no expiry or the expiry is in the future
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            None => true,
            Some(expires_at) => expires_at > now,
        }
    }
}

/// A privileged AD group tracked by the platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoredGroup {
    pub id: Option<Uuid>,
    pub group_name: String,
    pub group_sid: Option<String>,
    pub domain: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub alert_on_changes: bool,
}

impl MonitoredGroup {
    pub fn new<S: Into<String>>(domain: S, group_name: S) -> Self {
        Self {
            id: None,
            group_name: group_name.into(),
            group_sid: None,
            domain: domain.into(),
            description: None,
            is_active: true,
            alert_on_changes: true,
        }
    }
}

/// One (report x group x member) observation, scoped to its report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMembership {
    pub id: Option<Uuid>,
    pub report_id: Uuid,
    pub group_id: Uuid,
    pub member_name: String,
    pub member_sid: Option<String>,
    pub member_type: MemberType,
    pub is_direct_member: bool,
}

/// Operator decision that a group member is authorized
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptedGroupMember {
    pub id: Option<Uuid>,
    pub group_name: String,
    pub member_name: String,
    pub member_sid: Option<String>,
    pub domain: String,
    pub reason: Option<String>,
    pub accepted_by: Option<String>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Per-group override of the default risk profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRiskConfig {
    pub id: Option<Uuid>,
    pub group_name: String,
    pub domain: String,
    pub base_risk_score: i32,
    pub max_acceptable_members: i32,
    pub alert_threshold: i32,
    pub description: Option<String>,
}

impl Default for GroupRiskConfig {
    fn default() -> Self {
        Self {
            id: None,
            group_name: String::new(),
            domain: String::new(),
            base_risk_score: 10,
            max_acceptable_members: 5,
            alert_threshold: 10,
            description: None,
        }
    }
}

/// Collection agent registration record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Option<Uuid>,
    pub name: String,
    pub agent_type: String,
    pub domain: String,
    pub endpoint_url: Option<String>,
    pub api_key: Option<String>,
    pub configuration: Metadata,
    pub is_active: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Application settings backed by the key/value settings table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub webhook_url: String,
    pub alert_message: String,
    pub retention_days: i32,
    pub auto_accept_low_severity: bool,
}

impl Settings {
    pub const KEY_WEBHOOK_URL: &'static str = "webhook_url";
    pub const KEY_ALERT_MESSAGE: &'static str = "alert_message";
    pub const KEY_RETENTION_DAYS: &'static str = "retention_days";
    pub const KEY_AUTO_ACCEPT_LOW_SEVERITY: &'static str = "auto_accept_low_severity";
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            alert_message: String::new(),
            retention_days: 365,
            auto_accept_low_severity: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_tool_type_round_trip() {
        for tool in [
            ToolType::ConfigAudit,
            ToolType::PkiAudit,
            ToolType::DomainAnalysis,
            ToolType::DomainGroupMembers,
            ToolType::Custom,
        ] {
            assert_eq!(ToolType::from_str(tool.as_str()).unwrap(), tool);
        }
        assert!(ToolType::from_str("nessus").is_err());
    }

    #[test]
    fn test_tool_type_serde_representation() {
        let json = serde_json::to_string(&ToolType::ConfigAudit).unwrap();
        assert_eq!(json, "\"config_audit\"");
        let parsed: ToolType = serde_json::from_str("\"domain_analysis\"").unwrap();
        assert_eq!(parsed, ToolType::DomainAnalysis);
    }

    #[test]
    fn test_severity_defaults() {
        assert_eq!(Severity::High.default_score(), 25);
        assert_eq!(Severity::Medium.default_score(), 15);
        assert_eq!(Severity::Low.default_score(), 5);
        assert_eq!(Severity::parse_lenient("CRITICAL"), Severity::High);
        assert_eq!(Severity::parse_lenient("bogus"), Severity::Medium);
    }

    #[test]
    fn test_data_separation_strips_scores_from_domain_analysis() {
        let mut report = Report::new(ToolType::DomainAnalysis, "corp.local", Utc::now());
        report.global_score = Some(50);
        report.stale_objects_score = Some(10);
        report.dc_count = Some(3);
        report.domain_sid = Some("S-1-5-21-1".to_string());

        let dropped = report.enforce_data_separation();

        assert!(report.global_score.is_none());
        assert!(report.stale_objects_score.is_none());
        assert!(report.dc_count.is_none());
        // domain-analysis reports keep the SID for cross-validation
        assert_eq!(report.domain_sid.as_deref(), Some("S-1-5-21-1"));
        assert!(dropped.contains(&"global_score"));
        assert!(dropped.contains(&"dc_count"));
    }

    #[test]
    fn test_data_separation_keeps_config_audit_untouched() {
        let mut report = Report::new(ToolType::ConfigAudit, "corp.local", Utc::now());
        report.global_score = Some(50);
        report.maturity_level = Some("3".to_string());
        report.domain_sid = Some("S-1-5-21-1".to_string());

        let dropped = report.enforce_data_separation();

        assert!(dropped.is_empty());
        assert_eq!(report.global_score, Some(50));
        assert_eq!(report.maturity_level.as_deref(), Some("3"));
    }

    #[test]
    fn test_data_separation_strips_sid_from_pki_audit() {
        let mut report = Report::new(ToolType::PkiAudit, "corp.local", Utc::now());
        report.domain_sid = Some("S-1-5-21-1".to_string());

        let dropped = report.enforce_data_separation();
        assert!(report.domain_sid.is_none());
        assert_eq!(dropped, vec!["domain_sid"]);
    }

    #[test]
    fn test_accepted_risk_expiry() {
        let now = Utc::now();
        let mut risk = AcceptedRisk {
            tool_type: ToolType::PkiAudit,
            category: "Certificate_Templates".to_string(),
            name: "Template_Allows_SAN".to_string(),
            reason: None,
            accepted_by: None,
            accepted_at: Some(now),
            expires_at: None,
        };
        assert!(risk.is_active(now));

        risk.expires_at = Some(now + Duration::days(1));
        assert!(risk.is_active(now));

        risk.expires_at = Some(now - Duration::seconds(1));
        assert!(!risk.is_active(now));
    }

    #[test]
    fn test_finding_stats() {
        let mut report = Report::new(ToolType::ConfigAudit, "corp.local", Utc::now());
        let mut high = Finding::new(report.id, ToolType::ConfigAudit, "Anomalies", "A-1");
        high.severity = Severity::High;
        let mut low = Finding::new(report.id, ToolType::ConfigAudit, "Trusts", "T-1");
        low.severity = Severity::Low;
        report.findings = vec![
            high,
            low,
            Finding::new(report.id, ToolType::ConfigAudit, "StaleObjects", "S-1"),
        ];

        assert_eq!(report.finding_stats(), (3, 1, 1, 1));
    }
}
