// =====================================================================================
// File: core-parsers/src/config_audit.rs
// Description: Parser for configuration-audit XML reports
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use crate::registry::ReportParser;
use crate::{ParserError, ParserResult};
use chrono::{DateTime, NaiveDateTime, Utc};
use core_model::{Finding, Report, ToolType};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::Path;

/// The four category score buckets of a configuration-audit report
const CATEGORIES: [&str; 4] = ["StaleObjects", "PrivilegedAccounts", "Trusts", "Anomalies"];

/// Preferred and legacy rule node names. The choice is document-wide:
/// legacy nodes only count when the document has no preferred node at all.
const MODERN_RULE_ELEMENT: &str = "HealthcheckRiskRule";
const LEGACY_RULE_ELEMENT: &str = "RiskRule";

/// Parser for configuration-audit XML reports.
///
/// Extracts the domain identity, functional levels, maturity and object
/// counts, then sums rule points per category; the report's global score is
/// the sum of the four category scores.
pub struct ConfigAuditParser;

impl ConfigAuditParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConfigAuditParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportParser for ConfigAuditParser {
    fn tool_type(&self) -> ToolType {
        ToolType::ConfigAudit
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &[".xml"]
    }

    fn can_parse(&self, path: &Path) -> bool {
        if !self.validate_file(path) {
            return false;
        }

        // Root tag probe only; the full document is parsed later
        let mut head = vec![0u8; 4096];
        let Ok(mut file) = fs::File::open(path) else {
            return false;
        };
        let Ok(read) = file.read(&mut head) else {
            return false;
        };
        head.truncate(read);
        let head = String::from_utf8_lossy(&head);
        head.contains("<HealthcheckData") || head.contains("<DomainFQDN>")
    }

    fn parse(&self, path: &Path) -> ParserResult<Report> {
        let content =
            fs::read_to_string(path).map_err(|e| ParserError::io(path, e.to_string()))?;
        let document = walk_document(path, &content)?;

        let domain = document.text("DomainFQDN").unwrap_or_default().to_string();
        let report_date = parse_generation_date(path, document.text("GenerationDate"))?;

        let mut report = Report::new(ToolType::ConfigAudit, domain, report_date);
        report.domain_sid = document
            .text_any(&["DomainSID", "DomainSid"])
            .map(str::to_string);
        report.domain_functional_level =
            document.text("DomainFunctionalLevel").map(str::to_string);
        report.forest_functional_level =
            document.text("ForestFunctionalLevel").map(str::to_string);
        report.maturity_level = document.text("MaturityLevel").map(str::to_string);

        report.high_score = Some(document.int(path, "ScoreSystem/HighScore")?);
        report.medium_score = Some(document.int(path, "ScoreSystem/MediumScore")?);
        report.low_score = Some(document.int(path, "ScoreSystem/LowScore")?);

        report.dc_count = Some(document.int_any(
            path,
            &["NumberOfDC", "DomainControllerCount", "NumberOfDCs", "NbDC"],
        )?);
        report.user_count =
            Some(document.int_any(path, &["UserAccountData/Number", "NumberOfUsers", "NbUsers"])?);
        report.computer_count = Some(document.int_any(
            path,
            &["ComputerAccountData/Number", "NumberOfComputers", "NbComputers"],
        )?);

        let mut category_totals: HashMap<&str, i32> =
            CATEGORIES.iter().map(|c| (*c, 0)).collect();

        for rule in &document.rules {
            let points = rule
                .get("Points")
                .or_else(|| rule.get("Score"))
                .map(String::as_str)
                .unwrap_or("0");
            // Non-numeric rule points count as zero instead of failing the report
            let score = if !points.is_empty() && points.chars().all(|c| c.is_ascii_digit()) {
                points.parse::<i32>().unwrap_or(0)
            } else {
                0
            };

            let category = rule
                .get("Category")
                .map(|c| c.replace(' ', ""))
                .unwrap_or_default();
            let rule_id = rule
                .get("RiskId")
                .or_else(|| rule.get("Id"))
                .cloned()
                .unwrap_or_default();
            let rationale = rule
                .get("Rationale")
                .or_else(|| rule.get("Title"))
                .cloned()
                .unwrap_or_default();

            if let Some(total) = category_totals.get_mut(category.as_str()) {
                *total += score;
            }

            let mut finding =
                Finding::new(report.id, ToolType::ConfigAudit, category, rule_id);
            finding.score = score;
            finding.description = rationale;
            report.findings.push(finding);
        }

        report.stale_objects_score = Some(category_totals["StaleObjects"]);
        report.privileged_accounts_score = Some(category_totals["PrivilegedAccounts"]);
        report.trusts_score = Some(category_totals["Trusts"]);
        report.anomalies_score = Some(category_totals["Anomalies"]);
        report.global_score = Some(category_totals.values().sum());
        report.original_file = Some(path.display().to_string());

        Ok(report)
    }
}

/// Flattened view of the XML document: first-wins text per element path plus
/// the list of rule nodes with their immediate child texts.
struct Document {
    values: HashMap<String, String>,
    rules: Vec<HashMap<String, String>>,
}

impl Document {
    fn text(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str).filter(|s| !s.is_empty())
    }

    fn text_any(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| self.text(key))
    }

    /// Parse an integer element; a missing element is zero, a malformed one is
    /// fatal for the report.
    fn int(&self, path: &Path, key: &str) -> ParserResult<i32> {
        match self.text(key) {
            None => Ok(0),
            Some(raw) => raw.trim().parse::<i32>().map_err(|_| {
                ParserError::parse_failed(path, format!("Invalid integer '{}' at '{}'", raw, key))
            }),
        }
    }

    fn int_any(&self, path: &Path, keys: &[&str]) -> ParserResult<i32> {
        for key in keys {
            if self.text(key).is_some() {
                return self.int(path, key);
            }
        }
        Ok(0)
    }
}

/// Stream the document once, collecting element texts and rule nodes.
///
/// Rule nodes of both generations are collected separately; the document's
/// rule set is the modern nodes whenever at least one exists, and the legacy
/// nodes only otherwise.
fn walk_document(path: &Path, content: &str) -> ParserResult<Document> {
    let mut reader = Reader::from_str(content);
    reader.trim_text(true);

    let mut values: HashMap<String, String> = HashMap::new();
    let mut modern_rules: Vec<HashMap<String, String>> = Vec::new();
    let mut legacy_rules: Vec<HashMap<String, String>> = Vec::new();

    let mut stack: Vec<String> = Vec::new();
    let mut current_rule: Option<(String, HashMap<String, String>)> = None;
    let mut rule_field: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) => {
                let name = String::from_utf8_lossy(element.name().as_ref()).to_string();
                if current_rule.is_none()
                    && (name == MODERN_RULE_ELEMENT || name == LEGACY_RULE_ELEMENT)
                {
                    current_rule = Some((name.clone(), HashMap::new()));
                } else if current_rule.is_some() {
                    rule_field = Some(name.clone());
                }
                stack.push(name);
            }
            Ok(Event::Text(text)) => {
                let value = text
                    .unescape()
                    .map_err(|e| ParserError::parse_failed(path, e.to_string()))?
                    .into_owned();
                if let Some((_, rule)) = current_rule.as_mut() {
                    if let Some(field) = &rule_field {
                        rule.entry(field.clone()).or_insert(value);
                    }
                } else if stack.len() > 1 {
                    let key = stack[1..].join("/");
                    values.entry(key).or_insert(value);
                }
            }
            Ok(Event::End(element)) => {
                let name = String::from_utf8_lossy(element.name().as_ref()).to_string();
                stack.pop();
                let rule_finished =
                    matches!(&current_rule, Some((rule_element, _)) if *rule_element == name);
                if rule_finished {
                    let (rule_element, rule) =
                        current_rule.take().expect("rule just finished");
                    if rule_element == MODERN_RULE_ELEMENT {
                        modern_rules.push(rule);
                    } else {
                        legacy_rules.push(rule);
                    }
                } else {
                    rule_field = None;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ParserError::parse_failed(path, e.to_string())),
            _ => {}
        }
    }

    let rules = if modern_rules.is_empty() {
        legacy_rules
    } else {
        modern_rules
    };

    Ok(Document { values, rules })
}

/// Parse the generation date: ISO 8601 first, then the fixed fallback
/// pattern; a malformed date is fatal for the report.
fn parse_generation_date(path: &Path, raw: Option<&str>) -> ParserResult<DateTime<Utc>> {
    let raw = raw.unwrap_or("");
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(parsed.and_utc());
    }
    Err(ParserError::parse_failed(
        path,
        format!("Invalid GenerationDate format: {}", raw),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE_REPORT: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<HealthcheckData>
  <DomainFQDN>corp.local</DomainFQDN>
  <DomainSID>S-1-5-21-111-222-333</DomainSID>
  <DomainFunctionalLevel>2016</DomainFunctionalLevel>
  <ForestFunctionalLevel>2016</ForestFunctionalLevel>
  <MaturityLevel>3</MaturityLevel>
  <GenerationDate>2024-03-01T10:00:00</GenerationDate>
  <NumberOfDC>2</NumberOfDC>
  <UserAccountData><Number>150</Number></UserAccountData>
  <ComputerAccountData><Number>80</Number></ComputerAccountData>
  <ScoreSystem>
    <HighScore>30</HighScore>
    <MediumScore>15</MediumScore>
    <LowScore>5</LowScore>
  </ScoreSystem>
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

    fn write_xml(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".xml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_parse_full_report() {
        let file = write_xml(SAMPLE_REPORT);
        let parser = ConfigAuditParser::new();
        assert!(parser.can_parse(file.path()));

        let report = parser.parse(file.path()).unwrap();
        assert_eq!(report.tool_type, ToolType::ConfigAudit);
        assert_eq!(report.domain, "corp.local");
        assert_eq!(report.domain_sid.as_deref(), Some("S-1-5-21-111-222-333"));
        assert_eq!(report.maturity_level.as_deref(), Some("3"));
        assert_eq!(report.dc_count, Some(2));
        assert_eq!(report.user_count, Some(150));
        assert_eq!(report.computer_count, Some(80));
        assert_eq!(report.high_score, Some(30));

        // Category sums and derived global score
        assert_eq!(report.stale_objects_score, Some(10));
        assert_eq!(report.privileged_accounts_score, Some(20));
        assert_eq!(report.trusts_score, Some(5));
        assert_eq!(report.anomalies_score, Some(15));
        assert_eq!(report.global_score, Some(50));

        // One finding per rule node, owned by the report
        assert_eq!(report.findings.len(), 4);
        assert!(report.findings.iter().all(|f| f.report_id == report.id));
        let finding = report
            .findings
            .iter()
            .find(|f| f.name == "S-DC-SubnetMissing")
            .unwrap();
        assert_eq!(finding.category, "StaleObjects");
        assert_eq!(finding.score, 10);
    }

    #[test]
    fn test_legacy_rule_nodes() {
        let xml = r#"<HealthcheckData>
  <DomainFQDN>corp.local</DomainFQDN>
  <GenerationDate>2024-03-01T10:00:00</GenerationDate>
  <RiskRule>
    <Score>7</Score>
    <Category>Anomalies</Category>
    <Id>A-Legacy</Id>
    <Title>Legacy finding</Title>
  </RiskRule>
</HealthcheckData>"#;
        let file = write_xml(xml);
        let report = ConfigAuditParser::new().parse(file.path()).unwrap();
        assert_eq!(report.anomalies_score, Some(7));
        assert_eq!(report.global_score, Some(7));
        assert_eq!(report.findings[0].name, "A-Legacy");
        assert_eq!(report.findings[0].description, "Legacy finding");
    }

    #[test]
    fn test_modern_rules_win_on_mixed_documents() {
        // Exports that carry both generations of rule nodes must score the
        // modern ones only; counting both would double the category totals
        let xml = r#"<HealthcheckData>
  <DomainFQDN>corp.local</DomainFQDN>
  <GenerationDate>2024-03-01T10:00:00</GenerationDate>
  <RiskRules>
    <HealthcheckRiskRule>
      <Points>12</Points>
      <Category>Anomalies</Category>
      <RiskId>A-Modern</RiskId>
    </HealthcheckRiskRule>
    <RiskRule>
      <Score>9</Score>
      <Category>Anomalies</Category>
      <Id>A-Legacy</Id>
    </RiskRule>
  </RiskRules>
</HealthcheckData>"#;
        let file = write_xml(xml);
        let report = ConfigAuditParser::new().parse(file.path()).unwrap();

        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].name, "A-Modern");
        assert_eq!(report.anomalies_score, Some(12));
        assert_eq!(report.global_score, Some(12));
    }

    #[test]
    fn test_non_numeric_points_count_as_zero() {
        let xml = r#"<HealthcheckData>
  <DomainFQDN>corp.local</DomainFQDN>
  <GenerationDate>2024-03-01T10:00:00</GenerationDate>
  <RiskRule><Points>N/A</Points><Category>Trusts</Category><Id>T-1</Id></RiskRule>
</HealthcheckData>"#;
        let file = write_xml(xml);
        let report = ConfigAuditParser::new().parse(file.path()).unwrap();
        assert_eq!(report.trusts_score, Some(0));
        assert_eq!(report.findings[0].score, 0);
    }

    #[test]
    fn test_malformed_date_is_fatal() {
        let xml = r#"<HealthcheckData>
  <DomainFQDN>corp.local</DomainFQDN>
  <GenerationDate>01/03/2024</GenerationDate>
</HealthcheckData>"#;
        let file = write_xml(xml);
        let err = ConfigAuditParser::new().parse(file.path()).unwrap_err();
        assert_eq!(err.error_code(), "PARSE_FAILED");
    }

    #[test]
    fn test_malformed_count_is_fatal() {
        let xml = r#"<HealthcheckData>
  <DomainFQDN>corp.local</DomainFQDN>
  <GenerationDate>2024-03-01T10:00:00</GenerationDate>
  <NumberOfDC>two</NumberOfDC>
</HealthcheckData>"#;
        let file = write_xml(xml);
        let err = ConfigAuditParser::new().parse(file.path()).unwrap_err();
        assert_eq!(err.error_code(), "PARSE_FAILED");
    }

    #[test]
    fn test_rejects_foreign_xml() {
        let file = write_xml("<Inventory><Host>dc01</Host></Inventory>");
        assert!(!ConfigAuditParser::new().can_parse(file.path()));
    }
}
