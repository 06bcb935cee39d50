// =====================================================================================
// File: core-model/src/api.rs
// Description: Request/response DTOs for the ingestion and operator APIs
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use crate::types::{Metadata, ToolType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One finding in a programmatic upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiFindingInput {
    pub category: String,
    pub name: String,
    #[serde(default)]
    pub score: i32,
    #[serde(default = "default_severity")]
    pub severity: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub recommendation: String,
    #[serde(default)]
    pub metadata: Metadata,
}

fn default_severity() -> String {
    "medium".to_string()
}

/// One group member in a programmatic upload.
///
/// Members arrive either in this structured shape or (legacy payloads) as bare
/// strings; the parsers normalize both into this form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiGroupMember {
    pub name: String,
    #[serde(default, alias = "samaccountname")]
    pub sam: Option<String>,
    #[serde(default)]
    pub sid: Option<String>,
    #[serde(default = "default_member_type", rename = "type")]
    pub member_type: String,
    #[serde(default)]
    pub enabled: Option<bool>,
}

fn default_member_type() -> String {
    "user".to_string()
}

/// One group with its member list in a programmatic upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiGroupData {
    pub group_name: String,
    #[serde(default)]
    pub group_sid: Option<String>,
    #[serde(default = "default_group_type")]
    pub group_type: String,
    #[serde(default)]
    pub members: Vec<ApiGroupMember>,
}

fn default_group_type() -> String {
    "security".to_string()
}

/// Category scores supplied with a configuration-audit upload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiCategoryScores {
    #[serde(default)]
    pub global_score: Option<i32>,
    #[serde(default)]
    pub stale_objects_score: Option<i32>,
    #[serde(default)]
    pub privileged_accounts_score: Option<i32>,
    #[serde(default)]
    pub trusts_score: Option<i32>,
    #[serde(default)]
    pub anomalies_score: Option<i32>,
}

impl ApiCategoryScores {
    /// The derived global score is the sum of the four category scores
    pub fn derived_global_score(&self) -> i32 {
        self.stale_objects_score.unwrap_or(0)
            + self.privileged_accounts_score.unwrap_or(0)
            + self.trusts_score.unwrap_or(0)
            + self.anomalies_score.unwrap_or(0)
    }
}

/// Infrastructure metadata supplied with a configuration-audit upload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiDomainMetadata {
    #[serde(default)]
    pub domain_sid: Option<String>,
    #[serde(default)]
    pub domain_functional_level: Option<String>,
    #[serde(default)]
    pub forest_functional_level: Option<String>,
    #[serde(default)]
    pub maturity_level: Option<String>,
    #[serde(default)]
    pub dc_count: Option<i32>,
    #[serde(default)]
    pub user_count: Option<i32>,
    #[serde(default)]
    pub computer_count: Option<i32>,
}

/// Programmatic upload request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiUploadRequest {
    pub domain: String,
    pub tool_type: ToolType,
    #[serde(default)]
    pub report_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub findings: Vec<ApiFindingInput>,
    #[serde(default)]
    pub groups: Vec<ApiGroupData>,
    #[serde(default)]
    pub pingcastle_scores: Option<ApiCategoryScores>,
    #[serde(default)]
    pub domain_metadata: Option<ApiDomainMetadata>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default = "default_send_alert")]
    pub send_alert: bool,
}

fn default_send_alert() -> bool {
    true
}

/// Programmatic upload response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiUploadResponse {
    pub status: String,
    pub report_id: Uuid,
    pub tool_type: ToolType,
    pub domain: String,
    pub findings_count: usize,
    pub groups_processed: usize,
    pub message: String,
    pub alert_sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_calculation_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_error: Option<String>,
}

/// Bulk upload request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiBulkUploadRequest {
    pub reports: Vec<ApiUploadRequest>,
}

/// Per-item outcome inside a bulk upload response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkUploadResult {
    pub status: String,
    pub domain: String,
    pub tool_type: ToolType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub findings_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Bulk upload response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiBulkUploadResponse {
    pub status: String,
    pub total_reports: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<BulkUploadResult>,
}

/// File upload response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attached_to: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_type: Option<ToolType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Response to a member accept/deny toggle.
///
/// The primary write decides the status; risk recomputation is reported as a
/// substatus and never fails the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberToggleResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_id: Option<Uuid>,
    pub risk_calculation_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_request_defaults() {
        let request: ApiUploadRequest = serde_json::from_str(
            r#"{"domain": "corp.local", "tool_type": "config_audit"}"#,
        )
        .unwrap();

        assert_eq!(request.domain, "corp.local");
        assert_eq!(request.tool_type, ToolType::ConfigAudit);
        assert!(request.findings.is_empty());
        assert!(request.groups.is_empty());
        assert!(request.send_alert);
    }

    #[test]
    fn test_group_member_aliases() {
        let member: ApiGroupMember = serde_json::from_str(
            r#"{"name": "jdoe", "samaccountname": "jdoe", "type": "computer", "enabled": true}"#,
        )
        .unwrap();

        assert_eq!(member.sam.as_deref(), Some("jdoe"));
        assert_eq!(member.member_type, "computer");
        assert_eq!(member.enabled, Some(true));
    }

    #[test]
    fn test_derived_global_score() {
        let scores = ApiCategoryScores {
            global_score: None,
            stale_objects_score: Some(10),
            privileged_accounts_score: Some(20),
            trusts_score: Some(5),
            anomalies_score: Some(15),
        };
        assert_eq!(scores.derived_global_score(), 50);
    }

    #[test]
    fn test_toggle_response_omits_absent_error() {
        let response = MemberToggleResponse {
            status: "ok".to_string(),
            member_id: None,
            risk_calculation_status: "success".to_string(),
            risk_error: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("risk_error"));
        assert!(!json.contains("member_id"));
    }
}
