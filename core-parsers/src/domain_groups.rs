// =====================================================================================
// File: core-parsers/src/domain_groups.rs
// Description: Parser for domain-group enumeration reports (JSON)
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use crate::registry::ReportParser;
use crate::{parse_report_date_lenient, ParserError, ParserResult};
use core_model::{
    group_finding_name, Finding, Metadata, Report, Severity, ToolType, GROUP_FINDING_CATEGORY,
};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;

/// Group tiers used for the parser-level severity hints
const CRITICAL_GROUPS: [&str; 3] = ["Domain Admins", "Enterprise Admins", "Schema Admins"];
const ELEVATED_GROUPS: [&str; 3] = ["Administrators", "Account Operators", "Backup Operators"];

/// Parser for domain-group enumeration reports.
///
/// Accepts two payload shapes: the structured one where each group maps to a
/// list of member objects, and the legacy one where each group maps to a list
/// of bare account names. Either way, members are normalized to
/// `{name, sam, sid, type, enabled}` and each non-empty group becomes one
/// finding carrying its full member list in the metadata.
pub struct DomainGroupsParser;

impl DomainGroupsParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DomainGroupsParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportParser for DomainGroupsParser {
    fn tool_type(&self) -> ToolType {
        ToolType::DomainAnalysis
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &[".json"]
    }

    fn can_parse(&self, path: &Path) -> bool {
        if !self.validate_file(path) {
            return false;
        }

        let Ok(content) = fs::read_to_string(path) else {
            return false;
        };
        let Ok(data) = serde_json::from_str::<Value>(&content) else {
            return false;
        };
        let Some(object) = data.as_object() else {
            return false;
        };

        (object.contains_key("domain") || object.contains_key("domain_info"))
            && (object.contains_key("groups") || object.contains_key("privileged_groups"))
    }

    fn parse(&self, path: &Path) -> ParserResult<Report> {
        let content =
            fs::read_to_string(path).map_err(|e| ParserError::io(path, e.to_string()))?;
        let data: Value = serde_json::from_str(&content)
            .map_err(|e| ParserError::invalid_input(path, e.to_string()))?;

        let domain_info = data.get("domain_info").and_then(Value::as_object);
        let domain = data
            .get("domain")
            .and_then(Value::as_str)
            .or_else(|| domain_info.and_then(|info| info.get("name")).and_then(Value::as_str))
            .unwrap_or("Unknown")
            .to_string();
        let report_date = parse_report_date_lenient(
            data.get("scan_date")
                .or_else(|| data.get("timestamp"))
                .and_then(Value::as_str),
        );

        // Domain-analysis reports never carry category scores or
        // infrastructure metadata; the domain SID rides along for validation.
        let mut report = Report::new(ToolType::DomainAnalysis, domain, report_date);
        report.domain_sid = domain_info
            .and_then(|info| info.get("sid"))
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(Value::Object(metadata)) = data.get("metadata") {
            report.metadata = metadata.clone();
        }

        let groups = data
            .get("groups")
            .or_else(|| data.get("privileged_groups"))
            .and_then(Value::as_object)
            .ok_or_else(|| ParserError::parse_failed(path, "Missing groups section"))?;

        for (group_name, group_value) in groups {
            let members = normalize_members(group_value);
            if members.is_empty() {
                continue;
            }

            let member_count = members.len();
            let group_sid = group_value
                .get("sid")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let group_type = group_value
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("security");

            let mut metadata = Metadata::new();
            metadata.insert("group_name".to_string(), json!(group_name));
            metadata.insert("member_count".to_string(), json!(member_count));
            metadata.insert("members".to_string(), Value::Array(members));
            metadata.insert("group_sid".to_string(), json!(group_sid));
            metadata.insert("group_type".to_string(), json!(group_type));

            let mut finding = Finding::new(
                report.id,
                ToolType::DomainAnalysis,
                GROUP_FINDING_CATEGORY.to_string(),
                group_finding_name(group_name),
            );
            finding.score = group_risk_score(group_name, member_count);
            finding.severity = group_severity(group_name, member_count);
            finding.description = format!("Group '{}' has {} members", group_name, member_count);
            finding.recommendation = format!(
                "Review membership of privileged group '{}'. Accept authorized members and investigate unaccepted ones.",
                group_name
            );
            finding.metadata = metadata;
            report.findings.push(finding);
        }

        // Optional free-form findings emitted by the scanner
        let extra_findings = data
            .get("security_findings")
            .or_else(|| data.get("findings"))
            .and_then(Value::as_array);
        if let Some(extra_findings) = extra_findings {
            for finding_data in extra_findings {
                let severity = finding_data
                    .get("severity")
                    .and_then(Value::as_str)
                    .map(Severity::parse_lenient)
                    .unwrap_or(Severity::Medium);
                let mut finding = Finding::new(
                    report.id,
                    ToolType::DomainAnalysis,
                    finding_data
                        .get("category")
                        .and_then(Value::as_str)
                        .unwrap_or("General")
                        .to_string(),
                    finding_data
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or("Unknown_Finding")
                        .to_string(),
                );
                finding.score = finding_data
                    .get("score")
                    .and_then(Value::as_i64)
                    .map(|score| score as i32)
                    .unwrap_or(0);
                finding.severity = severity;
                finding.description = finding_data
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                finding.recommendation = finding_data
                    .get("recommendation")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if let Some(Value::Object(metadata)) = finding_data.get("metadata") {
                    finding.metadata = metadata.clone();
                }
                report.findings.push(finding);
            }
        }

        report.original_file = Some(path.display().to_string());
        Ok(report)
    }
}

/// Normalize the two accepted member shapes into `{name, sam, sid, type, enabled}`
fn normalize_members(group_value: &Value) -> Vec<Value> {
    let raw_members: Vec<&Value> = match group_value {
        // Structured shape: {"members": [...]} with object or string entries
        Value::Object(group) => group
            .get("members")
            .and_then(Value::as_array)
            .map(|members| members.iter().collect())
            .unwrap_or_default(),
        // Direct list of members (structured entries or legacy bare strings)
        Value::Array(members) => members.iter().collect(),
        _ => Vec::new(),
    };

    raw_members
        .into_iter()
        .filter_map(|member| match member {
            Value::String(name) if !name.is_empty() => Some(json!({
                "name": name,
                "sam": name,
                "sid": "",
                "type": "user",
                "enabled": Value::Null,
            })),
            Value::Object(entry) => {
                let name = entry.get("name").and_then(Value::as_str)?;
                let sam = entry
                    .get("sam")
                    .or_else(|| entry.get("samaccountname"))
                    .and_then(Value::as_str)
                    .unwrap_or(name);
                Some(json!({
                    "name": name,
                    "sam": sam,
                    "sid": entry.get("sid").and_then(Value::as_str).unwrap_or(""),
                    "type": entry.get("type").and_then(Value::as_str).unwrap_or("user"),
                    "enabled": entry.get("enabled").cloned().unwrap_or(Value::Null),
                }))
            }
            _ => None,
        })
        .collect()
}

/// Parser-level risk hint from group tier and member count, capped at 50
pub fn group_risk_score(group_name: &str, member_count: usize) -> i32 {
    let base = if CRITICAL_GROUPS.contains(&group_name) {
        15
    } else if ELEVATED_GROUPS.contains(&group_name) {
        10
    } else {
        5
    };

    let bump = if member_count > 10 {
        10
    } else if member_count > 5 {
        5
    } else if member_count > 1 {
        2
    } else {
        0
    };

    (base + bump).min(50)
}

/// Parser-level severity hint from group tier and member count
pub fn group_severity(group_name: &str, member_count: usize) -> Severity {
    let critical = CRITICAL_GROUPS.contains(&group_name);
    if critical && member_count > 5 {
        Severity::High
    } else if critical || member_count > 10 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_model::group_name_from_finding;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_json(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_structured_members() {
        let json = r#"{
            "domain": "corp.local",
            "domain_info": {"sid": "S-1-5-21-111"},
            "scan_date": "2024-03-01T08:00:00Z",
            "groups": {
                "Domain Admins": {
                    "sid": "S-1-5-21-111-512",
                    "members": [
                        {"name": "Administrator", "sam": "administrator", "sid": "S-1-5-21-111-500", "type": "user", "enabled": true},
                        {"name": "svc-backup", "type": "user", "enabled": false}
                    ]
                },
                "Print Operators": {"members": []}
            }
        }"#;
        let file = temp_json(json);
        let parser = DomainGroupsParser::new();
        assert!(parser.can_parse(file.path()));

        let report = parser.parse(file.path()).unwrap();
        assert_eq!(report.tool_type, ToolType::DomainAnalysis);
        assert_eq!(report.domain, "corp.local");
        assert_eq!(report.domain_sid.as_deref(), Some("S-1-5-21-111"));

        // Empty groups produce no finding
        assert_eq!(report.findings.len(), 1);
        let finding = &report.findings[0];
        assert_eq!(finding.category, GROUP_FINDING_CATEGORY);
        assert_eq!(group_name_from_finding(&finding.name), Some("Domain Admins"));
        assert_eq!(finding.metadata["member_count"], json!(2));

        let members = finding.metadata["members"].as_array().unwrap();
        assert_eq!(members[0]["sam"], json!("administrator"));
        assert_eq!(members[1]["sam"], json!("svc-backup"));
        assert_eq!(members[1]["sid"], json!(""));

        // Data separation: no category scores, no infrastructure counts
        assert!(report.global_score.is_none());
        assert!(report.dc_count.is_none());
        assert!(report.domain_functional_level.is_none());
    }

    #[test]
    fn test_legacy_string_members() {
        let json = r#"{
            "domain": "corp.local",
            "groups": {"Schema Admins": ["alice", "bob"]}
        }"#;
        let file = temp_json(json);
        let report = DomainGroupsParser::new().parse(file.path()).unwrap();

        assert_eq!(report.findings.len(), 1);
        let members = report.findings[0].metadata["members"].as_array().unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0]["name"], json!("alice"));
        assert_eq!(members[0]["type"], json!("user"));
    }

    #[test]
    fn test_group_risk_score_hints() {
        assert_eq!(group_risk_score("Domain Admins", 1), 15);
        assert_eq!(group_risk_score("Domain Admins", 12), 25);
        assert_eq!(group_risk_score("Administrators", 6), 15);
        assert_eq!(group_risk_score("Custom Group", 2), 7);
    }

    #[test]
    fn test_group_severity_hints() {
        assert_eq!(group_severity("Domain Admins", 6), Severity::High);
        assert_eq!(group_severity("Domain Admins", 2), Severity::Medium);
        assert_eq!(group_severity("Custom Group", 11), Severity::Medium);
        assert_eq!(group_severity("Custom Group", 3), Severity::Low);
    }

    #[test]
    fn test_rejects_json_without_groups() {
        let file = temp_json(r#"{"domain": "corp.local", "hosts": []}"#);
        assert!(!DomainGroupsParser::new().can_parse(file.path()));
    }
}
