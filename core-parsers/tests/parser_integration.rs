// =====================================================================================
// File: core-parsers/tests/parser_integration.rs
// Description: Cross-parser integration tests for registry dispatch and the
//              data-separation invariant at parse time
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use core_model::{ToolType, GROUP_FINDING_CATEGORY};
use core_parsers::ParserRegistry;
use std::io::Write;
use tempfile::NamedTempFile;

fn temp_file(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

const CONFIG_AUDIT_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<HealthcheckData>
  <DomainFQDN>corp.local</DomainFQDN>
  <DomainSID>S-1-5-21-111-222-333</DomainSID>
  <GenerationDate>2024-03-01T10:00:00</GenerationDate>
  <RiskRules>
    <HealthcheckRiskRule>
      <Points>10</Points>
      <Category>Stale Objects</Category>
      <RiskId>S-DC-SubnetMissing</RiskId>
      <Rationale>Subnets are missing</Rationale>
    </HealthcheckRiskRule>
    <HealthcheckRiskRule>
      <Points>20</Points>
      <Category>PrivilegedAccounts</Category>
      <RiskId>P-AdminNotProtected</RiskId>
      <Rationale>Admin accounts are not protected</Rationale>
    </HealthcheckRiskRule>
    <HealthcheckRiskRule>
      <Points>5</Points>
      <Category>Trusts</Category>
      <RiskId>T-SIDFiltering</RiskId>
      <Rationale>SID filtering disabled</Rationale>
    </HealthcheckRiskRule>
    <HealthcheckRiskRule>
      <Points>15</Points>
      <Category>Anomalies</Category>
      <RiskId>A-Krbtgt</RiskId>
      <Rationale>krbtgt password too old</Rationale>
    </HealthcheckRiskRule>
  </RiskRules>
</HealthcheckData>"#;

const DOMAIN_GROUPS_JSON: &str = r#"{
    "domain": "corp.local",
    "domain_info": {"sid": "S-1-5-21-111-222-333"},
    "scan_date": "2024-03-01T12:00:00Z",
    "groups": {
        "Domain Admins": {
            "members": [
                {"name": "admin1", "type": "user", "enabled": true},
                {"name": "admin2", "type": "user", "enabled": true},
                {"name": "admin3", "type": "user", "enabled": true},
                {"name": "admin4", "type": "user", "enabled": true},
                {"name": "admin5", "type": "user", "enabled": false}
            ]
        }
    }
}"#;

/// A config-audit upload followed by a domain-analysis upload for the same
/// domain: the analysis report must never carry the audit-only fields.
#[test]
fn test_sequential_uploads_keep_tool_fields_separate() {
    let registry = ParserRegistry::with_default_parsers();

    let xml = temp_file(".xml", CONFIG_AUDIT_XML);
    let parser = registry.find_parser(xml.path()).unwrap();
    let audit_report = parser.parse(xml.path()).unwrap();

    assert_eq!(audit_report.tool_type, ToolType::ConfigAudit);
    assert_eq!(audit_report.domain, "corp.local");
    assert_eq!(audit_report.stale_objects_score, Some(10));
    assert_eq!(audit_report.privileged_accounts_score, Some(20));
    assert_eq!(audit_report.trusts_score, Some(5));
    assert_eq!(audit_report.anomalies_score, Some(15));
    assert_eq!(audit_report.global_score, Some(50));
    assert_eq!(audit_report.findings.len(), 4);

    let json = temp_file(".json", DOMAIN_GROUPS_JSON);
    let parser = registry.find_parser(json.path()).unwrap();
    let analysis_report = parser.parse(json.path()).unwrap();

    assert_eq!(analysis_report.tool_type, ToolType::DomainAnalysis);
    assert_eq!(analysis_report.domain, "corp.local");
    // Only domain and SID are allowed on a domain-analysis report
    assert_eq!(
        analysis_report.domain_sid.as_deref(),
        Some("S-1-5-21-111-222-333")
    );
    assert!(analysis_report.global_score.is_none());
    assert!(analysis_report.stale_objects_score.is_none());
    assert!(analysis_report.privileged_accounts_score.is_none());
    assert!(analysis_report.trusts_score.is_none());
    assert!(analysis_report.anomalies_score.is_none());
    assert!(analysis_report.dc_count.is_none());
    assert!(analysis_report.user_count.is_none());
    assert!(analysis_report.computer_count.is_none());
    assert!(analysis_report.domain_functional_level.is_none());
    assert!(analysis_report.maturity_level.is_none());

    // One finding for the single non-empty group, carrying the member list
    assert_eq!(analysis_report.findings.len(), 1);
    let finding = &analysis_report.findings[0];
    assert_eq!(finding.category, GROUP_FINDING_CATEGORY);
    assert_eq!(finding.metadata["member_count"], serde_json::json!(5));
    assert_eq!(
        finding.metadata["members"].as_array().unwrap().len(),
        5
    );
}

/// The sanitizer never drops anything from parser output: parsers already
/// restrict themselves to tool-appropriate fields.
#[test]
fn test_parser_output_passes_data_separation() {
    let registry = ParserRegistry::with_default_parsers();

    let json = temp_file(".json", DOMAIN_GROUPS_JSON);
    let parser = registry.find_parser(json.path()).unwrap();
    let mut report = parser.parse(json.path()).unwrap();
    assert!(report.enforce_data_separation().is_empty());

    let xml = temp_file(".xml", CONFIG_AUDIT_XML);
    let parser = registry.find_parser(xml.path()).unwrap();
    let mut report = parser.parse(xml.path()).unwrap();
    assert!(report.enforce_data_separation().is_empty());
}

/// Finding identity round-trip: parsed findings keep the identity triple
/// stable across repeated parses of the same file.
#[test]
fn test_risk_kind_identity_is_stable_across_parses() {
    let registry = ParserRegistry::with_default_parsers();
    let xml = temp_file(".xml", CONFIG_AUDIT_XML);
    let parser = registry.find_parser(xml.path()).unwrap();

    let first = parser.parse(xml.path()).unwrap();
    let second = parser.parse(xml.path()).unwrap();

    let keys = |report: &core_model::Report| {
        let mut keys: Vec<(String, String, i32)> = report
            .findings
            .iter()
            .map(|f| (f.category.clone(), f.name.clone(), f.score))
            .collect();
        keys.sort();
        keys
    };
    assert_eq!(keys(&first), keys(&second));
    // Report and finding ids are freshly assigned each parse
    assert_ne!(first.id, second.id);
}

/// PKI-audit CSV and JSON land on the same parser through different probes
#[test]
fn test_pki_dispatch_both_formats() {
    let registry = ParserRegistry::with_default_parsers();

    let json = temp_file(
        ".json",
        r#"{"domain": "corp.local", "certificate_templates": {"Web": {"allows_san": true}}}"#,
    );
    let parser = registry.find_parser(json.path()).unwrap();
    assert_eq!(parser.tool_type(), ToolType::PkiAudit);
    let report = parser.parse(json.path()).unwrap();
    assert_eq!(report.findings[0].name, "Template_Allows_SAN");

    let csv = temp_file(".csv", "finding,template\nESC1,WebServer\n");
    let parser = registry.find_parser(csv.path()).unwrap();
    assert_eq!(parser.tool_type(), ToolType::PkiAudit);
    let report = parser.parse(csv.path()).unwrap();
    assert_eq!(report.findings.len(), 1);
    assert!(report.global_score.is_none());
}
