// =====================================================================================
// File: core-parsers/src/pki_audit.rs
// Description: Parser for ADCS/PKI analyzer reports (JSON and CSV)
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use crate::registry::{file_extension, ReportParser};
use crate::{parse_report_date_lenient, ParserError, ParserResult};
use core_model::{Finding, Metadata, Report, Severity, ToolType};
use serde_json::Value;
use std::fs;
use std::path::Path;
use uuid::Uuid;

/// Permissions that make a certificate template or CA exploitable
const DANGEROUS_TEMPLATE_PERMISSIONS: [&str; 4] =
    ["GenericAll", "WriteDacl", "WriteOwner", "FullControl"];
const DANGEROUS_CA_PERMISSIONS: [&str; 3] = ["ManageCA", "ManageCertificates", "Enroll"];

/// Principals that should never hold dangerous PKI permissions
const RISKY_PRINCIPALS: [&str; 3] = ["Everyone", "Authenticated Users", "Domain Users"];

/// Parser for ADCS/PKI analyzer reports.
///
/// JSON reports carry `certificate_templates`, `certificate_authorities` and
/// flat `findings` sections; CSV reports are one finding per row.
pub struct PkiAuditParser;

impl PkiAuditParser {
    pub fn new() -> Self {
        Self
    }

    fn parse_json(&self, path: &Path) -> ParserResult<Report> {
        let content =
            fs::read_to_string(path).map_err(|e| ParserError::io(path, e.to_string()))?;
        let data: Value = serde_json::from_str(&content)
            .map_err(|e| ParserError::invalid_input(path, e.to_string()))?;

        let domain = data
            .get("domain")
            .or_else(|| data.get("forest"))
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string();
        let report_date = parse_report_date_lenient(
            data.get("scan_date")
                .or_else(|| data.get("timestamp"))
                .and_then(Value::as_str),
        );

        let mut report = Report::new(ToolType::PkiAudit, domain, report_date);
        if let Some(Value::Object(metadata)) = data.get("metadata") {
            report.metadata = metadata.clone();
        }

        let templates = data
            .get("certificate_templates")
            .or_else(|| data.get("templates"))
            .and_then(Value::as_object);
        if let Some(templates) = templates {
            for (template_name, template_data) in templates {
                analyze_certificate_template(&mut report, template_name, template_data);
            }
        }

        let authorities = data
            .get("certificate_authorities")
            .or_else(|| data.get("cas"))
            .and_then(Value::as_object);
        if let Some(authorities) = authorities {
            for (ca_name, ca_data) in authorities {
                analyze_certificate_authority(&mut report, ca_name, ca_data);
            }
        }

        let flat_findings = data
            .get("findings")
            .or_else(|| data.get("issues"))
            .and_then(Value::as_array);
        if let Some(flat_findings) = flat_findings {
            for finding_data in flat_findings {
                report.findings.push(flat_finding(report.id, finding_data));
            }
        }

        report.original_file = Some(path.display().to_string());
        Ok(report)
    }

    fn parse_csv(&self, path: &Path) -> ParserResult<Report> {
        let mut reader = csv::Reader::from_path(path)
            .map_err(|e| ParserError::invalid_input(path, e.to_string()))?;
        let headers = reader
            .headers()
            .map_err(|e| ParserError::parse_failed(path, e.to_string()))?
            .clone();

        let mut report = Report::new(ToolType::PkiAudit, "Unknown".to_string(), chrono::Utc::now());
        let mut findings = Vec::new();

        for row in reader.records() {
            let row = row.map_err(|e| ParserError::parse_failed(path, e.to_string()))?;
            let get = |name: &str| -> Option<&str> {
                headers
                    .iter()
                    .position(|h| h.eq_ignore_ascii_case(name))
                    .and_then(|i| row.get(i))
                    .filter(|v| !v.is_empty())
            };

            if let Some(domain) = get("domain") {
                report.domain = domain.to_string();
            }

            let name = get("finding")
                .or_else(|| get("issue"))
                .unwrap_or("Unknown_ADCS_Issue")
                .to_string();
            let template = get("template").or_else(|| get("certificate_template"));
            let ca = get("ca").or_else(|| get("certificate_authority"));
            let severity = csv_severity(get("severity"), &name, get("description"));

            let mut raw = Metadata::new();
            for (header, value) in headers.iter().zip(row.iter()) {
                raw.insert(header.to_string(), Value::String(value.to_string()));
            }
            let mut metadata = Metadata::new();
            metadata.insert(
                "template".to_string(),
                Value::String(template.unwrap_or_default().to_string()),
            );
            metadata.insert(
                "ca".to_string(),
                Value::String(ca.unwrap_or_default().to_string()),
            );
            metadata.insert("raw_data".to_string(), Value::Object(raw));

            let mut finding = Finding::new(
                report.id,
                ToolType::PkiAudit,
                "ADCS_Configuration".to_string(),
                name,
            );
            finding.score = severity.default_score();
            finding.severity = severity;
            finding.description = csv_description(&finding.name, template, ca);
            finding.recommendation = csv_recommendation(get("recommendation"), get("remediation"), template, ca);
            finding.metadata = metadata;
            findings.push(finding);
        }

        report.findings = findings;
        report.original_file = Some(path.display().to_string());
        Ok(report)
    }
}

impl Default for PkiAuditParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportParser for PkiAuditParser {
    fn tool_type(&self) -> ToolType {
        ToolType::PkiAudit
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &[".json", ".csv"]
    }

    fn can_parse(&self, path: &Path) -> bool {
        if !self.validate_file(path) {
            return false;
        }

        match file_extension(path).as_deref() {
            Some(".json") => {
                let Ok(content) = fs::read_to_string(path) else {
                    return false;
                };
                let Ok(data) = serde_json::from_str::<Value>(&content) else {
                    return false;
                };
                let Some(object) = data.as_object() else {
                    return false;
                };
                object.keys().any(|key| {
                    let key = key.to_ascii_lowercase();
                    key.contains("template") || key.contains("certificate") || key.contains("adcs")
                })
            }
            Some(".csv") => {
                let Ok(mut reader) = csv::Reader::from_path(path) else {
                    return false;
                };
                let Ok(headers) = reader.headers() else {
                    return false;
                };
                headers.iter().any(|header| {
                    let header = header.to_ascii_lowercase();
                    ["template", "certificate", "ca", "issue", "finding"]
                        .iter()
                        .any(|probe| header == *probe)
                })
            }
            _ => false,
        }
    }

    fn parse(&self, path: &Path) -> ParserResult<Report> {
        match file_extension(path).as_deref() {
            Some(".json") => self.parse_json(path),
            Some(".csv") => self.parse_csv(path),
            other => Err(ParserError::UnsupportedType {
                extension: other.unwrap_or("").to_string(),
            }),
        }
    }
}

/// Flag overprivileged, SAN-enabled and approval-free certificate templates
fn analyze_certificate_template(report: &mut Report, template_name: &str, template_data: &Value) {
    let permissions = template_data.get("permissions");
    if has_risky_grant(permissions, &DANGEROUS_TEMPLATE_PERMISSIONS) {
        let mut finding = Finding::new(
            report.id,
            ToolType::PkiAudit,
            "Certificate_Templates".to_string(),
            "Overprivileged_Certificate_Template".to_string(),
        );
        finding.score = 25;
        finding.severity = Severity::High;
        finding.description = format!(
            "Certificate template '{}' has overprivileged permissions",
            template_name
        );
        finding.recommendation = format!(
            "Review and restrict permissions for certificate template '{}'",
            template_name
        );
        finding.metadata = template_metadata(template_name, template_data, permissions);
        report.findings.push(finding);
    }

    if template_data
        .get("allows_san")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        let mut finding = Finding::new(
            report.id,
            ToolType::PkiAudit,
            "Certificate_Templates".to_string(),
            "Template_Allows_SAN".to_string(),
        );
        finding.score = 20;
        finding.severity = Severity::High;
        finding.description = format!(
            "Certificate template '{}' allows Subject Alternative Names",
            template_name
        );
        finding.recommendation = format!(
            "Disable SAN for certificate template '{}' or restrict its use",
            template_name
        );
        finding.metadata = template_metadata(template_name, template_data, None);
        report.findings.push(finding);
    }

    if !template_data
        .get("requires_approval")
        .and_then(Value::as_bool)
        .unwrap_or(true)
    {
        let mut finding = Finding::new(
            report.id,
            ToolType::PkiAudit,
            "Certificate_Templates".to_string(),
            "Template_No_Approval_Required".to_string(),
        );
        finding.score = 15;
        finding.severity = Severity::Medium;
        finding.description = format!(
            "Certificate template '{}' does not require approval",
            template_name
        );
        finding.recommendation = format!(
            "Enable approval requirement for certificate template '{}'",
            template_name
        );
        finding.metadata = template_metadata(template_name, template_data, None);
        report.findings.push(finding);
    }
}

/// Flag dangerous permission grants on a certificate authority
fn analyze_certificate_authority(report: &mut Report, ca_name: &str, ca_data: &Value) {
    let permissions = ca_data.get("permissions");
    if has_risky_grant(permissions, &DANGEROUS_CA_PERMISSIONS) {
        let mut finding = Finding::new(
            report.id,
            ToolType::PkiAudit,
            "Certificate_Authorities".to_string(),
            "Dangerous_CA_Permissions".to_string(),
        );
        finding.score = 30;
        finding.severity = Severity::High;
        finding.description =
            format!("Certificate Authority '{}' has dangerous permissions", ca_name);
        finding.recommendation = format!(
            "Review and restrict permissions for Certificate Authority '{}'",
            ca_name
        );
        let mut metadata = Metadata::new();
        metadata.insert("ca_name".to_string(), Value::String(ca_name.to_string()));
        if let Some(permissions) = permissions {
            metadata.insert("permissions".to_string(), permissions.clone());
        }
        finding.metadata = metadata;
        report.findings.push(finding);
    }
}

/// True when a risky principal holds one of the dangerous permissions.
/// Permission values may be a list of strings or a single string.
fn has_risky_grant(permissions: Option<&Value>, dangerous: &[&str]) -> bool {
    let Some(permissions) = permissions.and_then(Value::as_object) else {
        return false;
    };

    for (principal, grants) in permissions {
        if !RISKY_PRINCIPALS.contains(&principal.as_str()) {
            continue;
        }
        let granted: Vec<&str> = match grants {
            Value::Array(entries) => entries.iter().filter_map(Value::as_str).collect(),
            Value::String(single) => vec![single.as_str()],
            _ => continue,
        };
        if granted.iter().any(|grant| dangerous.contains(grant)) {
            return true;
        }
    }

    false
}

fn template_metadata(
    template_name: &str,
    template_data: &Value,
    permissions: Option<&Value>,
) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(
        "template_name".to_string(),
        Value::String(template_name.to_string()),
    );
    if let Some(permissions) = permissions {
        metadata.insert("permissions".to_string(), permissions.clone());
    }
    metadata.insert("template_data".to_string(), template_data.clone());
    metadata
}

/// Build a finding from a flat JSON findings entry
fn flat_finding(report_id: Uuid, finding_data: &Value) -> Finding {
    let severity = finding_data
        .get("severity")
        .and_then(Value::as_str)
        .map(Severity::parse_lenient)
        .unwrap_or(Severity::Medium);

    let mut finding = Finding::new(
        report_id,
        ToolType::PkiAudit,
        finding_data
            .get("category")
            .and_then(Value::as_str)
            .unwrap_or("ADCS_Configuration")
            .to_string(),
        finding_data
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("Unknown_ADCS_Issue")
            .to_string(),
    );
    finding.score = finding_data
        .get("score")
        .and_then(Value::as_i64)
        .map(|score| score as i32)
        .unwrap_or_else(|| severity.default_score());
    finding.severity = severity;
    finding.description = finding_data
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    finding.recommendation = finding_data
        .get("recommendation")
        .or_else(|| finding_data.get("remediation"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if let Some(Value::Object(metadata)) = finding_data.get("metadata") {
        finding.metadata = metadata.clone();
    }
    finding
}

fn csv_severity(explicit: Option<&str>, name: &str, description: Option<&str>) -> Severity {
    if let Some(explicit) = explicit {
        return Severity::parse_lenient(explicit);
    }

    let text = format!("{} {}", name, description.unwrap_or_default()).to_ascii_lowercase();
    if ["critical", "high", "dangerous", "exploit"]
        .iter()
        .any(|word| text.contains(word))
    {
        Severity::High
    } else if ["medium", "moderate", "warning"]
        .iter()
        .any(|word| text.contains(word))
    {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn csv_description(name: &str, template: Option<&str>, ca: Option<&str>) -> String {
    let mut parts = vec![format!("Issue: {}", name)];
    if let Some(template) = template {
        parts.push(format!("Template: {}", template));
    }
    if let Some(ca) = ca {
        parts.push(format!("CA: {}", ca));
    }
    parts.join("; ")
}

fn csv_recommendation(
    recommendation: Option<&str>,
    remediation: Option<&str>,
    template: Option<&str>,
    ca: Option<&str>,
) -> String {
    if let Some(recommendation) = recommendation {
        return recommendation.to_string();
    }
    if let Some(remediation) = remediation {
        return remediation.to_string();
    }
    if let Some(template) = template {
        return format!("Review and secure certificate template '{}'", template);
    }
    if let Some(ca) = ca {
        return format!("Review and secure certificate authority '{}'", ca);
    }
    "Review and remediate ADCS configuration issue".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_file(suffix: &str, contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_template_heuristics() {
        let json = r#"{
            "domain": "corp.local",
            "scan_date": "2024-03-01T09:00:00Z",
            "certificate_templates": {
                "WebServer": {
                    "permissions": {"Domain Users": ["GenericAll"]},
                    "allows_san": true,
                    "requires_approval": false
                },
                "Workstation": {
                    "permissions": {"Domain Admins": ["GenericAll"]},
                    "requires_approval": true
                }
            }
        }"#;
        let file = temp_file(".json", json);
        let parser = PkiAuditParser::new();
        assert!(parser.can_parse(file.path()));

        let report = parser.parse(file.path()).unwrap();
        assert_eq!(report.tool_type, ToolType::PkiAudit);
        assert_eq!(report.domain, "corp.local");

        let names: Vec<&str> = report.findings.iter().map(|f| f.name.as_str()).collect();
        assert!(names.contains(&"Overprivileged_Certificate_Template"));
        assert!(names.contains(&"Template_Allows_SAN"));
        assert!(names.contains(&"Template_No_Approval_Required"));
        // Dangerous grant to a privileged-only principal is not flagged
        assert_eq!(names.len(), 3);

        // Data separation: a PKI report never carries category scores
        assert!(report.global_score.is_none());
        assert!(report.stale_objects_score.is_none());
    }

    #[test]
    fn test_dangerous_ca_permissions() {
        let json = r#"{
            "domain": "corp.local",
            "certificate_authorities": {
                "CORP-CA": {"permissions": {"Authenticated Users": ["ManageCA"]}}
            }
        }"#;
        let file = temp_file(".json", json);
        let report = PkiAuditParser::new().parse(file.path()).unwrap();
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].name, "Dangerous_CA_Permissions");
        assert_eq!(report.findings[0].score, 30);
        assert_eq!(report.findings[0].severity, Severity::High);
    }

    #[test]
    fn test_flat_findings_defaults() {
        let json = r#"{
            "domain": "corp.local",
            "findings": [
                {"name": "ESC1", "severity": "high"},
                {"category": "ADCS_Audit", "name": "NoAudit", "score": 12}
            ]
        }"#;
        let file = temp_file(".json", json);
        let report = PkiAuditParser::new().parse(file.path()).unwrap();

        let esc1 = report.findings.iter().find(|f| f.name == "ESC1").unwrap();
        assert_eq!(esc1.score, 25);
        assert_eq!(esc1.category, "ADCS_Configuration");

        let audit = report.findings.iter().find(|f| f.name == "NoAudit").unwrap();
        assert_eq!(audit.score, 12);
        assert_eq!(audit.category, "ADCS_Audit");
    }

    #[test]
    fn test_csv_report() {
        let csv = "finding,template,ca,severity,domain\n\
                   ESC1 SAN abuse,WebServer,,high,corp.local\n\
                   Weak ACL,,CORP-CA,,\n";
        let file = temp_file(".csv", csv);
        let parser = PkiAuditParser::new();
        assert!(parser.can_parse(file.path()));

        let report = parser.parse(file.path()).unwrap();
        assert_eq!(report.domain, "corp.local");
        assert_eq!(report.findings.len(), 2);

        let esc = &report.findings[0];
        assert_eq!(esc.name, "ESC1 SAN abuse");
        assert_eq!(esc.severity, Severity::High);
        assert_eq!(esc.score, 25);
        assert!(esc.description.contains("Template: WebServer"));

        let acl = &report.findings[1];
        assert_eq!(acl.severity, Severity::Low);
        assert_eq!(acl.recommendation, "Review and secure certificate authority 'CORP-CA'");
    }

    #[test]
    fn test_rejects_unrelated_json() {
        let file = temp_file(".json", r#"{"domain": "corp.local", "groups": {}}"#);
        assert!(!PkiAuditParser::new().can_parse(file.path()));
    }
}
