// =====================================================================================
// File: core-store/src/health.rs
// Description: Database schema and connectivity health checks
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use chrono::{DateTime, Utc};
use core_model::Metadata;
use serde::Serialize;
use serde_json::json;
use sqlx::{PgPool, Row};
use std::collections::HashSet;
use std::time::Instant;
use tracing::error;

/// Health check status levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        }
    }
}

/// Result of a single health check
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub status: HealthStatus,
    pub message: String,
    pub duration_ms: f64,
    pub details: Metadata,
}

impl CheckResult {
    fn new(name: &str, status: HealthStatus, message: String, started: Instant) -> Self {
        Self {
            name: name.to_string(),
            status,
            message,
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
            details: Metadata::new(),
        }
    }

    fn with_details(mut self, details: Metadata) -> Self {
        self.details = details;
        self
    }
}

/// Complete health report for the database
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub overall_status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub checks: Vec<CheckResult>,
    pub summary: Metadata,
}

/// Tables required for full functionality; names are contractual for the
/// composite view and the migration set.
pub const REQUIRED_TABLES: [&str; 17] = [
    "reports",
    "findings",
    "risks",
    "accepted_risks",
    "monitored_groups",
    "group_memberships",
    "settings",
    "agents",
    "accepted_group_members",
    "group_risk_configs",
    "domain_risk_assessments",
    "group_risk_assessments",
    "global_risk_scores",
    "risk_configuration",
    "risk_calculation_history",
    "schema_migrations",
    "reports_kpis",
];

/// Required regular views
pub const REQUIRED_VIEWS: [&str; 2] = ["risk_dashboard_summary", "v_dashboard_composite"];

/// Required materialized views
pub const REQUIRED_MATERIALIZED_VIEWS: [&str; 3] = [
    "mv_dashboard_summary",
    "mv_grouped_findings",
    "mv_grouped_findings_summary",
];

/// Performance-critical indexes
pub const REQUIRED_INDEXES: [&str; 8] = [
    "idx_reports_tool_type",
    "idx_reports_domain",
    "idx_reports_report_date",
    "idx_findings_report_id",
    "idx_findings_tool_type",
    "idx_group_memberships_report_id",
    "idx_domain_risk_assessments_domain_date",
    "idx_global_risk_scores_domain_date",
];

/// Comprehensive database health checker.
///
/// Runs connectivity, table/view/index presence, a sample-query latency
/// probe and an orphaned-findings integrity check; the overall status is the
/// worst of the set.
pub struct HealthChecker {
    pool: PgPool,
}

impl HealthChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Test database connectivity
    pub async fn check_connection(&self) -> CheckResult {
        let started = Instant::now();
        match sqlx::query("SELECT 1 AS test").fetch_one(&self.pool).await {
            Ok(row) if matches!(row.try_get::<i32, _>("test"), Ok(1)) => CheckResult::new(
                "connection",
                HealthStatus::Healthy,
                "Database connection successful".to_string(),
                started,
            ),
            Ok(_) => CheckResult::new(
                "connection",
                HealthStatus::Unhealthy,
                "Unexpected query result".to_string(),
                started,
            ),
            Err(e) => CheckResult::new(
                "connection",
                HealthStatus::Unhealthy,
                format!("Connection failed: {}", e),
                started,
            ),
        }
    }

    /// Verify all required tables exist
    pub async fn check_tables(&self) -> CheckResult {
        let started = Instant::now();
        let existing = match self
            .fetch_names(
                "SELECT table_name AS name FROM information_schema.tables \
                 WHERE table_schema = 'public' AND table_type = 'BASE TABLE'",
            )
            .await
        {
            Ok(names) => names,
            Err(e) => {
                return CheckResult::new(
                    "tables",
                    HealthStatus::Unhealthy,
                    format!("Table check failed: {}", e),
                    started,
                )
            }
        };

        let missing: Vec<&str> = REQUIRED_TABLES
            .iter()
            .copied()
            .filter(|t| !existing.contains(*t))
            .collect();
        let present = REQUIRED_TABLES.len() - missing.len();

        let details = details_with_missing(present, &missing);
        if missing.is_empty() {
            CheckResult::new(
                "tables",
                HealthStatus::Healthy,
                format!("All {} required tables present", REQUIRED_TABLES.len()),
                started,
            )
            .with_details(details)
        } else if missing.len() <= 2 {
            CheckResult::new(
                "tables",
                HealthStatus::Degraded,
                format!("Missing {} table(s): {}", missing.len(), missing.join(", ")),
                started,
            )
            .with_details(details)
        } else {
            CheckResult::new(
                "tables",
                HealthStatus::Unhealthy,
                format!("Missing {} required tables", missing.len()),
                started,
            )
            .with_details(details)
        }
    }

    /// Verify required views and materialized views exist
    pub async fn check_views(&self) -> CheckResult {
        let started = Instant::now();
        let existing = match self
            .fetch_names(
                "SELECT table_name AS name FROM information_schema.views WHERE table_schema = 'public' \
                 UNION SELECT matviewname AS name FROM pg_matviews WHERE schemaname = 'public'",
            )
            .await
        {
            Ok(names) => names,
            Err(e) => {
                return CheckResult::new(
                    "views",
                    HealthStatus::Unhealthy,
                    format!("View check failed: {}", e),
                    started,
                )
            }
        };

        let required: Vec<&str> = REQUIRED_VIEWS
            .iter()
            .chain(REQUIRED_MATERIALIZED_VIEWS.iter())
            .copied()
            .collect();
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|v| !existing.contains(*v))
            .collect();
        let present = required.len() - missing.len();

        let details = details_with_missing(present, &missing);
        if missing.is_empty() {
            CheckResult::new(
                "views",
                HealthStatus::Healthy,
                format!("All {} required views present", required.len()),
                started,
            )
            .with_details(details)
        } else {
            CheckResult::new(
                "views",
                HealthStatus::Degraded,
                format!("Missing view(s): {}", missing.join(", ")),
                started,
            )
            .with_details(details)
        }
    }

    /// Verify performance-critical indexes exist
    pub async fn check_indexes(&self) -> CheckResult {
        let started = Instant::now();
        let existing = match self
            .fetch_names("SELECT indexname AS name FROM pg_indexes WHERE schemaname = 'public'")
            .await
        {
            Ok(names) => names,
            Err(e) => {
                return CheckResult::new(
                    "indexes",
                    HealthStatus::Unhealthy,
                    format!("Index check failed: {}", e),
                    started,
                )
            }
        };

        let missing: Vec<&str> = REQUIRED_INDEXES
            .iter()
            .copied()
            .filter(|i| !existing.contains(*i))
            .collect();
        let present = REQUIRED_INDEXES.len() - missing.len();

        let details = details_with_missing(present, &missing);
        if missing.is_empty() {
            CheckResult::new(
                "indexes",
                HealthStatus::Healthy,
                format!("All {} performance indexes present", REQUIRED_INDEXES.len()),
                started,
            )
            .with_details(details)
        } else {
            CheckResult::new(
                "indexes",
                HealthStatus::Degraded,
                format!("Missing {} index(es) - may affect performance", missing.len()),
                started,
            )
            .with_details(details)
        }
    }

    /// Probe query latency with a representative dashboard query
    pub async fn check_query_performance(&self) -> CheckResult {
        let started = Instant::now();
        let query_started = Instant::now();
        let result = sqlx::query(
            "SELECT COUNT(*) AS count FROM reports WHERE report_date >= NOW() - INTERVAL '30 days'",
        )
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => {
                let query_ms = query_started.elapsed().as_secs_f64() * 1000.0;
                let count: i64 = row.try_get("count").unwrap_or(0);
                let mut details = Metadata::new();
                details.insert("sample_query_ms".to_string(), json!(query_ms));
                details.insert("report_count".to_string(), json!(count));

                let (status, message) = if query_ms < 100.0 {
                    (
                        HealthStatus::Healthy,
                        format!("Query performance good ({:.0}ms)", query_ms),
                    )
                } else if query_ms < 500.0 {
                    (
                        HealthStatus::Degraded,
                        format!("Query performance acceptable ({:.0}ms)", query_ms),
                    )
                } else {
                    (
                        HealthStatus::Degraded,
                        format!("Query performance slow ({:.0}ms)", query_ms),
                    )
                };
                CheckResult::new("query_performance", status, message, started).with_details(details)
            }
            Err(e) => CheckResult::new(
                "query_performance",
                HealthStatus::Unhealthy,
                format!("Performance check failed: {}", e),
                started,
            ),
        }
    }

    /// Findings must always have a parent report
    pub async fn check_data_integrity(&self) -> CheckResult {
        let started = Instant::now();
        let result = sqlx::query(
            r#"
            SELECT COUNT(*) AS count
            FROM findings f
            LEFT JOIN reports r ON f.report_id = r.id
            WHERE r.id IS NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => {
                let orphaned: i64 = row.try_get("count").unwrap_or(0);
                let mut details = Metadata::new();
                details.insert("orphaned_findings".to_string(), json!(orphaned));

                if orphaned == 0 {
                    CheckResult::new(
                        "data_integrity",
                        HealthStatus::Healthy,
                        "Data integrity verified".to_string(),
                        started,
                    )
                    .with_details(details)
                } else {
                    CheckResult::new(
                        "data_integrity",
                        HealthStatus::Degraded,
                        format!("Found {} orphaned findings", orphaned),
                        started,
                    )
                    .with_details(details)
                }
            }
            Err(e) => CheckResult::new(
                "data_integrity",
                HealthStatus::Unknown,
                format!("Integrity check failed: {}", e),
                started,
            ),
        }
    }

    /// Run all checks; the overall status is the worst of the set
    pub async fn run_full_check(&self) -> HealthReport {
        let timestamp = Utc::now();
        let checks = vec![
            self.check_connection().await,
            self.check_tables().await,
            self.check_views().await,
            self.check_indexes().await,
            self.check_query_performance().await,
            self.check_data_integrity().await,
        ];

        let overall_status = overall_status(&checks);
        let summary = build_summary(&checks);

        HealthReport {
            overall_status,
            timestamp,
            checks,
            summary,
        }
    }

    /// Quick connectivity-only check
    pub async fn run_quick_check(&self) -> CheckResult {
        self.check_connection().await
    }

    async fn fetch_names(&self, query: &str) -> Result<HashSet<String>, sqlx::Error> {
        let rows = sqlx::query(query).fetch_all(&self.pool).await.map_err(|e| {
            error!("Health query failed: {}", e);
            e
        })?;
        Ok(rows.iter().map(|row| row.get::<String, _>("name")).collect())
    }
}

/// Worst-of aggregation: any unhealthy check makes the whole report
/// unhealthy, any degraded or unknown check degrades it.
pub fn overall_status(checks: &[CheckResult]) -> HealthStatus {
    let statuses: Vec<HealthStatus> = checks.iter().map(|c| c.status).collect();
    if statuses.contains(&HealthStatus::Unhealthy) {
        HealthStatus::Unhealthy
    } else if statuses.contains(&HealthStatus::Degraded) || statuses.contains(&HealthStatus::Unknown)
    {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

fn build_summary(checks: &[CheckResult]) -> Metadata {
    let mut summary = Metadata::new();
    summary.insert("total_checks".to_string(), json!(checks.len()));
    summary.insert(
        "healthy".to_string(),
        json!(checks.iter().filter(|c| c.status == HealthStatus::Healthy).count()),
    );
    summary.insert(
        "degraded".to_string(),
        json!(checks.iter().filter(|c| c.status == HealthStatus::Degraded).count()),
    );
    summary.insert(
        "unhealthy".to_string(),
        json!(checks.iter().filter(|c| c.status == HealthStatus::Unhealthy).count()),
    );
    summary.insert(
        "total_duration_ms".to_string(),
        json!(checks.iter().map(|c| c.duration_ms).sum::<f64>()),
    );
    summary
}

fn details_with_missing(present: usize, missing: &[&str]) -> Metadata {
    let mut details = Metadata::new();
    details.insert("present".to_string(), json!(present));
    details.insert("missing".to_string(), json!(missing));
    details
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(status: HealthStatus) -> CheckResult {
        CheckResult {
            name: "test".to_string(),
            status,
            message: String::new(),
            duration_ms: 0.0,
            details: Metadata::new(),
        }
    }

    #[test]
    fn test_overall_status_worst_of() {
        assert_eq!(
            overall_status(&[check(HealthStatus::Healthy), check(HealthStatus::Healthy)]),
            HealthStatus::Healthy
        );
        assert_eq!(
            overall_status(&[check(HealthStatus::Healthy), check(HealthStatus::Degraded)]),
            HealthStatus::Degraded
        );
        assert_eq!(
            overall_status(&[check(HealthStatus::Degraded), check(HealthStatus::Unhealthy)]),
            HealthStatus::Unhealthy
        );
        // Unknown is treated as degraded overall
        assert_eq!(
            overall_status(&[check(HealthStatus::Healthy), check(HealthStatus::Unknown)]),
            HealthStatus::Degraded
        );
    }

    #[test]
    fn test_required_schema_names() {
        assert_eq!(REQUIRED_TABLES.len(), 17);
        assert!(REQUIRED_TABLES.contains(&"reports_kpis"));
        assert!(REQUIRED_VIEWS.contains(&"v_dashboard_composite"));
        assert_eq!(REQUIRED_MATERIALIZED_VIEWS.len(), 3);
    }

    #[test]
    fn test_summary_counts() {
        let checks = vec![
            check(HealthStatus::Healthy),
            check(HealthStatus::Degraded),
            check(HealthStatus::Degraded),
        ];
        let summary = build_summary(&checks);
        assert_eq!(summary["total_checks"], json!(3));
        assert_eq!(summary["healthy"], json!(1));
        assert_eq!(summary["degraded"], json!(2));
    }
}
