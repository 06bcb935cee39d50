// =====================================================================================
// File: posture-service/src/alerter.rs
// Description: Outbound webhook alert delivery (ntfy and generic JSON modes)
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use core_model::{Finding, Report, Settings};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Alert delivery error. Webhook failures are logged by callers and never
/// propagated into the user-facing operation.
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Webhook URL is not set")]
    MissingWebhookUrl,
    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),
    #[error("Webhook delivery failed: {0}")]
    Transport(String),
}

impl AlertError {
    pub fn error_code(&self) -> &'static str {
        "DEPENDENCY_FAILED"
    }
}

/// Sends webhook alerts for unaccepted findings.
///
/// Two payload modes, decided by URL substring: ntfy destinations get the
/// alert text as the body with Title/Tags headers, anything else gets a JSON
/// payload with the finding list. The HTTP client carries a hard timeout and
/// is never invoked while a database transaction is open.
pub struct Alerter {
    client: reqwest::Client,
}

impl Alerter {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .expect("reqwest client construction only fails on TLS misconfiguration");
        Self { client }
    }

    /// Send an alert for the unaccepted findings of a report.
    /// A missing webhook URL or an empty finding list is a quiet no-op.
    pub async fn send_alert(
        &self,
        settings: &Settings,
        report: &Report,
        unaccepted: &[Finding],
    ) -> Result<(), AlertError> {
        if unaccepted.is_empty() || settings.webhook_url.is_empty() {
            return Ok(());
        }

        let message = render_message(&settings.alert_message, report, unaccepted);

        let response = if settings.webhook_url.contains("ntfy") {
            self.client
                .post(&settings.webhook_url)
                .header(
                    "Title",
                    format!("DomainWatch - {} unaccepted risk(s)", unaccepted.len()),
                )
                .header("Tags", "warning")
                .body(message)
                .send()
                .await
        } else {
            self.client
                .post(&settings.webhook_url)
                .json(&json_payload(&message, report, unaccepted))
                .send()
                .await
        };

        match response {
            Ok(response) if response.status().as_u16() == 200 => {
                info!("Alert sent (200) for report {}", report.id);
                Ok(())
            }
            Ok(response) => {
                warn!(
                    "Alert failed for report {}: HTTP {}",
                    report.id,
                    response.status()
                );
                Err(AlertError::HttpStatus(response.status().as_u16()))
            }
            Err(e) => {
                warn!("Alert delivery failed for report {}: {}", report.id, e);
                Err(AlertError::Transport(e.to_string()))
            }
        }
    }

    /// Send a test alert with placeholder values
    pub async fn send_test_alert(&self, settings: &Settings) -> Result<(), AlertError> {
        if settings.webhook_url.is_empty() {
            return Err(AlertError::MissingWebhookUrl);
        }

        let template = if settings.alert_message.is_empty() {
            "This is a test alert from DomainWatch."
        } else {
            settings.alert_message.as_str()
        };
        let message = substitute(
            template,
            "TEST-REPORT-123",
            "test.domain.com",
            2,
            "- TestFinding1 (Category1) [config_audit]\n- TestFinding2 (Category2) [pki_audit]",
            "config_audit",
        );

        let response = if settings.webhook_url.contains("ntfy") {
            self.client
                .post(&settings.webhook_url)
                .header("Title", "DomainWatch - Test Alert")
                .header("Tags", "information")
                .body(message)
                .send()
                .await
        } else {
            let payload = json!({
                "message": message,
                "report_id": "TEST-REPORT-123",
                "tool_type": "test",
                "domain": "test.domain.com",
                "findings": [
                    {"category": "Category1", "name": "TestFinding1", "score": 10, "severity": "medium", "tool_type": "config_audit"},
                    {"category": "Category2", "name": "TestFinding2", "score": 20, "severity": "high", "tool_type": "pki_audit"}
                ]
            });
            self.client
                .post(&settings.webhook_url)
                .json(&payload)
                .send()
                .await
        };

        match response {
            Ok(response) if response.status().as_u16() == 200 => {
                info!("Test alert sent (200)");
                Ok(())
            }
            Ok(response) => Err(AlertError::HttpStatus(response.status().as_u16())),
            Err(e) => Err(AlertError::Transport(e.to_string())),
        }
    }
}

impl Default for Alerter {
    fn default() -> Self {
        Self::new()
    }
}

/// Fill the operator's alert template for a report
pub fn render_message(template: &str, report: &Report, unaccepted: &[Finding]) -> String {
    let findings_list = unaccepted
        .iter()
        .map(|f| format!("- {} (in {}) [{}]", f.name, f.category, f.tool_type))
        .collect::<Vec<_>>()
        .join("\n");

    let template = if template.is_empty() {
        "New unaccepted findings detected in {domain}!"
    } else {
        template
    };

    substitute(
        template,
        &report.id.to_string(),
        &report.domain,
        unaccepted.len(),
        &findings_list,
        report.tool_type.as_str(),
    )
}

/// Named substitutions supported by the alert template
fn substitute(
    template: &str,
    report_id: &str,
    domain: &str,
    findings_count: usize,
    findings: &str,
    tool_type: &str,
) -> String {
    template
        .replace("{report_id}", report_id)
        .replace("{domain}", domain)
        .replace("{findings_count}", &findings_count.to_string())
        .replace("{findings}", findings)
        .replace("{tool_type}", tool_type)
}

/// JSON payload for non-ntfy webhook destinations
fn json_payload(message: &str, report: &Report, unaccepted: &[Finding]) -> Value {
    json!({
        "message": message,
        "report_id": report.id,
        "tool_type": report.tool_type,
        "domain": report.domain,
        "findings": unaccepted.iter().map(|f| json!({
            "category": f.category,
            "name": f.name,
            "score": f.score,
            "severity": f.severity,
            "tool_type": f.tool_type,
        })).collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use core_model::{Severity, ToolType};

    fn sample_report() -> (Report, Vec<Finding>) {
        let mut report = Report::new(ToolType::ConfigAudit, "corp.local", Utc::now());
        let mut finding = Finding::new(
            report.id,
            ToolType::ConfigAudit,
            "Anomalies",
            "A-Krbtgt",
        );
        finding.score = 15;
        finding.severity = Severity::High;
        report.findings = vec![finding.clone()];
        (report, vec![finding])
    }

    #[test]
    fn test_render_message_substitutions() {
        let (report, unaccepted) = sample_report();
        let message = render_message(
            "{findings_count} finding(s) in {domain} from {tool_type}:\n{findings}",
            &report,
            &unaccepted,
        );
        assert!(message.starts_with("1 finding(s) in corp.local from config_audit:"));
        assert!(message.contains("- A-Krbtgt (in Anomalies) [config_audit]"));
    }

    #[test]
    fn test_render_message_default_template() {
        let (report, unaccepted) = sample_report();
        let message = render_message("", &report, &unaccepted);
        assert_eq!(message, "New unaccepted findings detected in corp.local!");
    }

    #[test]
    fn test_json_payload_shape() {
        let (report, unaccepted) = sample_report();
        let payload = json_payload("msg", &report, &unaccepted);
        assert_eq!(payload["domain"], json!("corp.local"));
        assert_eq!(payload["tool_type"], json!("config_audit"));
        assert_eq!(payload["findings"][0]["name"], json!("A-Krbtgt"));
        assert_eq!(payload["findings"][0]["severity"], json!("high"));
        assert_eq!(payload["findings"][0]["score"], json!(15));
    }

    #[test]
    fn test_error_code() {
        assert_eq!(AlertError::MissingWebhookUrl.error_code(), "DEPENDENCY_FAILED");
    }
}
