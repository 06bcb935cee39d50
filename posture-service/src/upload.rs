// =====================================================================================
// File: posture-service/src/upload.rs
// Description: Upload pipeline shared by file and programmatic ingestion
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use crate::alerter::Alerter;
use chrono::Utc;
use core_model::{
    group_finding_name, ApiBulkUploadRequest, ApiBulkUploadResponse, ApiGroupData,
    ApiUploadRequest, ApiUploadResponse, BulkUploadResult, Finding, FindingStatus,
    GroupMembership, MemberType, Metadata, Report, Severity, ToolType, UploadResponse,
    GROUP_FINDING_CATEGORY,
};
use core_parsers::{group_risk_score, group_severity, ParserError, ParserRegistry};
use core_risk::RiskService;
use core_store::{ReportStore, StoreError};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Extensions accepted at the file upload boundary
const ACCEPTED_EXTENSIONS: [&str; 5] = [".xml", ".html", ".htm", ".json", ".csv"];

/// Upload pipeline error types
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Unsupported file type: {0}")]
    UnsupportedExtension(String),
    #[error("File exceeds maximum upload size of {max} bytes")]
    TooLarge { max: usize },
    #[error("Failed to persist uploaded file: {0}")]
    Persist(String),
    #[error(transparent)]
    Parser(#[from] ParserError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl UploadError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UnsupportedExtension(_) => "INPUT_INVALID",
            Self::TooLarge { .. } => "INPUT_INVALID",
            Self::Persist(_) => "STORAGE_UNAVAILABLE",
            Self::Parser(inner) => inner.error_code(),
            Self::Store(inner) => inner.error_code(),
        }
    }

    /// HTTP-style status for the boundary
    pub fn status_code(&self) -> u16 {
        match self.error_code() {
            "INPUT_INVALID" | "UNSUPPORTED_TYPE" | "NO_PARSER" => 400,
            "PARSE_FAILED" => 422,
            "NOT_FOUND" => 404,
            "CONFLICT" => 409,
            _ => 500,
        }
    }
}

/// Outcome of the secondary steps that ride along a successful upload
#[derive(Debug, Default)]
struct SecondaryOutcomes {
    alert_sent: bool,
    risk_status: Option<String>,
    risk_error: Option<String>,
}

/// Shared upload processing for the file and programmatic boundaries.
///
/// The primary write (report + findings) decides success; alerting and risk
/// recomputation are reported as substatuses and never fail the upload.
pub struct UploadService {
    store: Arc<ReportStore>,
    risk: Arc<RiskService>,
    alerter: Arc<Alerter>,
    registry: ParserRegistry,
    upload_dir: PathBuf,
    max_size: usize,
}

impl UploadService {
    pub fn new(
        store: Arc<ReportStore>,
        risk: Arc<RiskService>,
        alerter: Arc<Alerter>,
        upload_dir: PathBuf,
        max_size: usize,
    ) -> Self {
        Self {
            store,
            risk,
            alerter,
            registry: ParserRegistry::with_default_parsers(),
            upload_dir,
            max_size,
        }
    }

    // ---------------------------------------------------------------------
    // File uploads
    // ---------------------------------------------------------------------

    /// Validate the filename extension against the accepted set
    pub fn validate_extension(filename: &str) -> Result<(), UploadError> {
        let lowered = filename.to_ascii_lowercase();
        if ACCEPTED_EXTENSIONS.iter().any(|ext| lowered.ends_with(ext)) {
            Ok(())
        } else {
            Err(UploadError::UnsupportedExtension(filename.to_string()))
        }
    }

    /// Process an uploaded file: persist it, dispatch to the matching parser
    /// and save the resulting report. HTML files do not create reports; they
    /// are attached to the most recent matching XML report by filename stem.
    pub async fn process_file_upload(
        &self,
        filename: &str,
        contents: &[u8],
    ) -> Result<UploadResponse, UploadError> {
        Self::validate_extension(filename)?;
        if contents.len() > self.max_size {
            return Err(UploadError::TooLarge { max: self.max_size });
        }

        let safe_name = Path::new(filename)
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload".to_string());
        let saved_path = self
            .upload_dir
            .join(format!("{}_{}", Uuid::new_v4().simple(), safe_name));

        tokio::fs::create_dir_all(&self.upload_dir)
            .await
            .map_err(|e| UploadError::Persist(e.to_string()))?;
        tokio::fs::write(&saved_path, contents)
            .await
            .map_err(|e| UploadError::Persist(e.to_string()))?;

        let lowered = safe_name.to_ascii_lowercase();
        if lowered.ends_with(".html") || lowered.ends_with(".htm") {
            return self.attach_html(&safe_name, &saved_path).await;
        }

        let parser = self.registry.find_parser(&saved_path)?;
        let report = parser.parse(&saved_path)?;
        let report_id = self.store.save_report(&report).await?;

        if report.tool_type == ToolType::DomainAnalysis {
            self.save_memberships_from_findings(&report).await?;
        }
        let secondary = self.run_secondary_steps(&report, true).await;

        Ok(UploadResponse {
            status: "ok".to_string(),
            report_id: Some(report_id),
            attached_to: None,
            tool_type: Some(report.tool_type),
            message: Some(format!(
                "Parsed {} report with {} findings{}",
                report.tool_type,
                report.findings.len(),
                secondary.describe()
            )),
        })
    }

    /// Attach an HTML companion to its XML report, matched by filename stem.
    /// Unmatched HTML is retained as orphaned.
    async fn attach_html(
        &self,
        filename: &str,
        saved_path: &Path,
    ) -> Result<UploadResponse, UploadError> {
        let stem = Path::new(filename)
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();

        match self.store.find_report_for_html_stem(&stem).await? {
            Some(report_id) => {
                self.store
                    .update_report_html(report_id, &saved_path.display().to_string())
                    .await?;
                info!("Attached HTML {} to report {}", filename, report_id);
                Ok(UploadResponse {
                    status: "attached".to_string(),
                    report_id: None,
                    attached_to: Some(report_id),
                    tool_type: None,
                    message: Some(format!("HTML attached to report {}", report_id)),
                })
            }
            None => {
                warn!("No matching report for HTML upload {}", filename);
                Ok(UploadResponse {
                    status: "orphaned".to_string(),
                    report_id: None,
                    attached_to: None,
                    tool_type: None,
                    message: Some(
                        "No matching XML report found; file retained for later correlation"
                            .to_string(),
                    ),
                })
            }
        }
    }

    // ---------------------------------------------------------------------
    // Programmatic uploads
    // ---------------------------------------------------------------------

    /// Process a programmatic JSON upload; the server assigns the report id
    pub async fn process_api_upload(
        &self,
        request: ApiUploadRequest,
    ) -> Result<ApiUploadResponse, UploadError> {
        let report = build_report_from_request(&request);
        let groups_processed = request.groups.len();

        let report_id = self.store.save_report(&report).await?;

        if report.tool_type == ToolType::DomainAnalysis
            || report.tool_type == ToolType::DomainGroupMembers
        {
            if !request.groups.is_empty() {
                let memberships = self
                    .memberships_from_group_data(&report, &request.groups)
                    .await?;
                if !memberships.is_empty() {
                    self.store
                        .save_group_memberships(report_id, &memberships)
                        .await?;
                }
            }
        }

        let secondary = self.run_secondary_steps(&report, request.send_alert).await;

        Ok(ApiUploadResponse {
            status: "success".to_string(),
            report_id,
            tool_type: report.tool_type,
            domain: report.domain.clone(),
            findings_count: report.findings.len(),
            groups_processed,
            message: format!(
                "Successfully uploaded {} report with {} findings",
                report.tool_type,
                report.findings.len()
            ),
            alert_sent: secondary.alert_sent,
            risk_calculation_status: secondary.risk_status,
            risk_error: secondary.risk_error,
        })
    }

    /// Bulk upload: items are processed independently and reported per item
    pub async fn process_bulk_upload(
        &self,
        request: ApiBulkUploadRequest,
    ) -> ApiBulkUploadResponse {
        let total_reports = request.reports.len();
        let mut results = Vec::with_capacity(total_reports);
        let mut successful = 0;
        let mut failed = 0;

        for report_request in request.reports {
            let domain = report_request.domain.clone();
            let tool_type = report_request.tool_type;
            match self.process_api_upload(report_request).await {
                Ok(response) => {
                    successful += 1;
                    results.push(BulkUploadResult {
                        status: "success".to_string(),
                        domain,
                        tool_type,
                        report_id: Some(response.report_id),
                        findings_count: Some(response.findings_count),
                        error: None,
                    });
                }
                Err(e) => {
                    warn!("Bulk upload item for {} failed: {}", domain, e);
                    failed += 1;
                    results.push(BulkUploadResult {
                        status: "error".to_string(),
                        domain,
                        tool_type,
                        report_id: None,
                        findings_count: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        ApiBulkUploadResponse {
            status: if failed == 0 { "success" } else { "partial" }.to_string(),
            total_reports,
            successful,
            failed,
            results,
        }
    }

    // ---------------------------------------------------------------------
    // Secondary steps
    // ---------------------------------------------------------------------

    /// Risk recomputation and alerting after a successful save. Failures are
    /// logged and surfaced as substatuses, never as upload failures.
    async fn run_secondary_steps(&self, report: &Report, send_alert: bool) -> SecondaryOutcomes {
        let mut outcomes = SecondaryOutcomes::default();

        if report.tool_type == ToolType::DomainAnalysis {
            match self.risk.on_upload(&report.domain).await {
                Ok(_) => outcomes.risk_status = Some("success".to_string()),
                Err(e) => {
                    warn!(
                        "Failed to update risk scores for {} after upload: {}",
                        report.domain, e
                    );
                    outcomes.risk_status = Some("failed".to_string());
                    outcomes.risk_error = Some(e.to_string());
                }
            }
        }

        if send_alert {
            outcomes.alert_sent = self.send_alert_if_needed(report).await;
        }
        outcomes
    }

    /// Send an alert when the report has unaccepted findings and a webhook
    /// is configured
    async fn send_alert_if_needed(&self, report: &Report) -> bool {
        let unaccepted = match self.store.get_unaccepted_findings(&report.findings).await {
            Ok(unaccepted) => unaccepted,
            Err(e) => {
                warn!("Failed to filter accepted findings: {}", e);
                return false;
            }
        };
        if unaccepted.is_empty() {
            return false;
        }

        let settings = match self.store.get_settings().await {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Failed to load settings for alerting: {}", e);
                return false;
            }
        };
        if settings.webhook_url.is_empty() {
            return false;
        }

        match self.alerter.send_alert(&settings, report, &unaccepted).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to send alert for report {}: {}", report.id, e);
                false
            }
        }
    }

    // ---------------------------------------------------------------------
    // Membership extraction
    // ---------------------------------------------------------------------

    /// Build membership rows from the group findings of a parsed report.
    /// Group ids always resolve through lookup-then-create.
    async fn save_memberships_from_findings(&self, report: &Report) -> Result<(), UploadError> {
        let mut memberships = Vec::new();

        for finding in &report.findings {
            if finding.category != GROUP_FINDING_CATEGORY {
                continue;
            }
            let Some(group_name) = finding
                .metadata
                .get("group_name")
                .and_then(Value::as_str)
            else {
                continue;
            };
            let Some(members) = finding.metadata.get("members").and_then(Value::as_array) else {
                continue;
            };

            let group_id = self
                .store
                .find_or_create_monitored_group(&report.domain, group_name)
                .await?;

            for member in members {
                let Some(name) = member.get("name").and_then(Value::as_str) else {
                    continue;
                };
                memberships.push(GroupMembership {
                    id: None,
                    report_id: report.id,
                    group_id,
                    member_name: name.to_string(),
                    member_sid: member
                        .get("sid")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    member_type: member
                        .get("type")
                        .and_then(Value::as_str)
                        .map(MemberType::parse_lenient)
                        .unwrap_or_default(),
                    is_direct_member: true,
                });
            }
        }

        if !memberships.is_empty() {
            self.store
                .save_group_memberships(report.id, &memberships)
                .await?;
        }
        Ok(())
    }

    /// Build membership rows from programmatic group data
    async fn memberships_from_group_data(
        &self,
        report: &Report,
        groups: &[ApiGroupData],
    ) -> Result<Vec<GroupMembership>, UploadError> {
        let mut memberships = Vec::new();

        for group in groups {
            let group_id = self
                .store
                .find_or_create_monitored_group(&report.domain, &group.group_name)
                .await?;

            for member in &group.members {
                memberships.push(GroupMembership {
                    id: None,
                    report_id: report.id,
                    group_id,
                    member_name: member.name.clone(),
                    member_sid: member.sid.clone(),
                    member_type: MemberType::parse_lenient(&member.member_type),
                    is_direct_member: true,
                });
            }
        }

        Ok(memberships)
    }
}

impl SecondaryOutcomes {
    fn describe(&self) -> String {
        match (&self.risk_status, self.alert_sent) {
            (Some(status), true) => format!(" (risk: {}, alert sent)", status),
            (Some(status), false) => format!(" (risk: {})", status),
            (None, true) => " (alert sent)".to_string(),
            (None, false) => String::new(),
        }
    }
}

/// Build a report from a programmatic upload request. The data-separation
/// invariant is enforced again at save time; this only populates what the
/// request provides.
fn build_report_from_request(request: &ApiUploadRequest) -> Report {
    let report_date = request.report_date.unwrap_or_else(Utc::now);
    let mut report = Report::new(request.tool_type, request.domain.clone(), report_date);

    let mut metadata: Metadata = request.metadata.clone();
    metadata.insert("upload_method".to_string(), json!("api"));
    report.metadata = metadata;

    if let Some(scores) = &request.pingcastle_scores {
        report.stale_objects_score = scores.stale_objects_score;
        report.privileged_accounts_score = scores.privileged_accounts_score;
        report.trusts_score = scores.trusts_score;
        report.anomalies_score = scores.anomalies_score;
        report.global_score = scores.global_score;
        if report.global_score.is_none() && request.tool_type == ToolType::ConfigAudit {
            report.global_score = Some(scores.derived_global_score());
        }
    }

    if let Some(domain_metadata) = &request.domain_metadata {
        report.domain_sid = domain_metadata.domain_sid.clone();
        report.domain_functional_level = domain_metadata.domain_functional_level.clone();
        report.forest_functional_level = domain_metadata.forest_functional_level.clone();
        report.maturity_level = domain_metadata.maturity_level.clone();
        report.dc_count = domain_metadata.dc_count;
        report.user_count = domain_metadata.user_count;
        report.computer_count = domain_metadata.computer_count;
    }

    for finding_input in &request.findings {
        let mut finding = Finding::new(
            report.id,
            request.tool_type,
            finding_input.category.clone(),
            finding_input.name.clone(),
        );
        finding.score = finding_input.score;
        finding.severity = Severity::parse_lenient(&finding_input.severity);
        finding.description = finding_input.description.clone();
        finding.recommendation = finding_input.recommendation.clone();
        finding.status = FindingStatus::New;
        finding.metadata = finding_input.metadata.clone();
        report.findings.push(finding);
    }

    for group in &request.groups {
        report.findings.push(group_finding(&report, group));
    }

    report
}

/// One finding per uploaded group carrying the normalized member list
fn group_finding(report: &Report, group: &ApiGroupData) -> Finding {
    let member_count = group.members.len();
    let members: Vec<Value> = group
        .members
        .iter()
        .map(|member| {
            json!({
                "name": member.name,
                "sam": member.sam.clone().unwrap_or_else(|| member.name.clone()),
                "sid": member.sid.clone().unwrap_or_default(),
                "type": member.member_type,
                "enabled": member.enabled,
            })
        })
        .collect();

    let mut metadata = Metadata::new();
    metadata.insert("group_name".to_string(), json!(group.group_name));
    metadata.insert("member_count".to_string(), json!(member_count));
    metadata.insert("members".to_string(), Value::Array(members));
    metadata.insert(
        "group_sid".to_string(),
        json!(group.group_sid.clone().unwrap_or_default()),
    );
    metadata.insert("group_type".to_string(), json!(group.group_type));
    metadata.insert("upload_method".to_string(), json!("api"));

    let mut finding = Finding::new(
        report.id,
        report.tool_type,
        GROUP_FINDING_CATEGORY.to_string(),
        group_finding_name(&group.group_name),
    );
    finding.score = group_risk_score(&group.group_name, member_count);
    finding.severity = group_severity(&group.group_name, member_count);
    finding.description = format!(
        "Group '{}' has {} members",
        group.group_name, member_count
    );
    finding.recommendation = format!(
        "Review membership of privileged group '{}'. Accept authorized members and investigate unaccepted ones.",
        group.group_name
    );
    finding.metadata = metadata;
    finding
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_model::ApiGroupMember;

    #[test]
    fn test_extension_allowlist() {
        for name in ["r.xml", "r.HTML", "r.htm", "r.json", "r.csv"] {
            assert!(UploadService::validate_extension(name).is_ok(), "{}", name);
        }
        let err = UploadService::validate_extension("report.pdf").unwrap_err();
        assert_eq!(err.error_code(), "INPUT_INVALID");
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_build_report_derives_global_score() {
        let request: ApiUploadRequest = serde_json::from_value(json!({
            "domain": "corp.local",
            "tool_type": "config_audit",
            "pingcastle_scores": {
                "stale_objects_score": 10,
                "privileged_accounts_score": 20,
                "trusts_score": 5,
                "anomalies_score": 15
            }
        }))
        .unwrap();

        let report = build_report_from_request(&request);
        assert_eq!(report.global_score, Some(50));
        assert_eq!(report.metadata["upload_method"], json!("api"));
    }

    #[test]
    fn test_build_report_group_findings() {
        let request: ApiUploadRequest = serde_json::from_value(json!({
            "domain": "corp.local",
            "tool_type": "domain_analysis",
            "groups": [
                {
                    "group_name": "Domain Admins",
                    "members": [
                        {"name": "admin1", "type": "user", "enabled": true},
                        {"name": "admin2"}
                    ]
                },
                {"group_name": "Print Operators", "members": []}
            ]
        }))
        .unwrap();

        let report = build_report_from_request(&request);
        // One finding per group, including the empty one for API uploads
        assert_eq!(report.findings.len(), 2);

        let admins = &report.findings[0];
        assert_eq!(admins.category, GROUP_FINDING_CATEGORY);
        assert_eq!(admins.name, "Group_Domain Admins_Members");
        assert_eq!(admins.metadata["member_count"], json!(2));
        assert_eq!(admins.metadata["members"][1]["sam"], json!("admin2"));
    }

    #[test]
    fn test_group_finding_member_normalization() {
        let report = Report::new(ToolType::DomainAnalysis, "corp.local", Utc::now());
        let group = ApiGroupData {
            group_name: "Backup Operators".to_string(),
            group_sid: Some("S-1-5-32-551".to_string()),
            group_type: "security".to_string(),
            members: vec![ApiGroupMember {
                name: "svc-backup".to_string(),
                sam: None,
                sid: Some("S-1-5-21-9".to_string()),
                member_type: "user".to_string(),
                enabled: Some(false),
            }],
        };

        let finding = group_finding(&report, &group);
        let member = &finding.metadata["members"][0];
        assert_eq!(member["sam"], json!("svc-backup"));
        assert_eq!(member["sid"], json!("S-1-5-21-9"));
        assert_eq!(member["enabled"], json!(false));
        assert_eq!(finding.metadata["group_sid"], json!("S-1-5-32-551"));
    }
}
