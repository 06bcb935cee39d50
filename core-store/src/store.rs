// =====================================================================================
// File: core-store/src/store.rs
// Description: Normalized report store with transactional writes
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use crate::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use core_model::{
    AcceptedGroupMember, AcceptedRisk, Agent, Finding, FindingStatus, GroupMembership,
    GroupRiskConfig, MemberType, Metadata, MonitoredGroup, Report, ReportSummary, Risk, Settings,
    Severity, ToolType,
};
use serde::Serialize;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::HashSet;
use std::str::FromStr;
use tracing::{error, info, warn};
use uuid::Uuid;

/// PostgreSQL-backed store for reports, findings and operator decisions.
///
/// Every public operation is safe to call concurrently on the same instance;
/// isolation happens at the transaction boundary.
#[derive(Clone)]
pub struct ReportStore {
    pool: PgPool,
}

/// Dashboard KPI projection read from the composite view.
///
/// The composite view picks category scores from the most recent
/// configuration-audit report and group metrics from the most recent
/// domain-analysis report, so uploads arriving in either order never
/// overwrite each other's view of the domain.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardKpis {
    pub domain: String,
    pub report_date: Option<DateTime<Utc>>,
    pub domain_sid: Option<String>,
    pub domain_functional_level: Option<String>,
    pub forest_functional_level: Option<String>,
    pub maturity_level: Option<String>,
    pub global_score: i32,
    pub stale_objects_score: i32,
    pub privileged_accounts_score: i32,
    pub trusts_score: i32,
    pub anomalies_score: i32,
    pub config_audit_report_date: Option<DateTime<Utc>>,
    pub total_groups: i64,
    pub total_group_members: i64,
    pub accepted_group_members: i64,
    pub unaccepted_group_members: i64,
    pub domain_group_risk_score: f64,
    pub domain_analysis_report_date: Option<DateTime<Utc>>,
    pub total_findings: i64,
    pub high_severity_findings: i64,
    pub medium_severity_findings: i64,
    pub low_severity_findings: i64,
    pub user_count: i32,
    pub computer_count: i32,
    pub dc_count: i32,
    pub data_sources: Option<String>,
}

/// One recurring risk kind aggregated across all reports
#[derive(Debug, Clone, Serialize)]
pub struct GroupedFinding {
    pub tool_type: ToolType,
    pub category: String,
    pub name: String,
    pub occurrence_count: i64,
    pub domain_count: i64,
    pub max_score: i32,
    pub severity: Severity,
    pub last_seen: DateTime<Utc>,
}

impl ReportStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ---------------------------------------------------------------------
    // Reports and findings
    // ---------------------------------------------------------------------

    /// Save a report and its findings in a single transaction.
    ///
    /// Enforces the data-separation invariant: fields the tool type is not
    /// allowed to populate are dropped and logged, and the report is saved
    /// with only its tool-appropriate fields. Re-saving an existing report id
    /// refreshes its upload date, html reference and metadata.
    pub async fn save_report(&self, report: &Report) -> StoreResult<Uuid> {
        let mut sanitized = report.clone();
        let dropped = sanitized.enforce_data_separation();
        if !dropped.is_empty() {
            error!(
                "Data-separation violation on {} report for {}: dropping {:?}",
                sanitized.tool_type, sanitized.domain, dropped
            );
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO reports (
                id, tool_type, domain, report_date, upload_date,
                global_score, high_score, medium_score, low_score,
                stale_objects_score, privileged_accounts_score,
                trusts_score, anomalies_score, domain_sid,
                domain_functional_level, forest_functional_level,
                maturity_level, dc_count, user_count, computer_count,
                original_file, html_file, metadata
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                $14, $15, $16, $17, $18, $19, $20, $21, $22, $23
            )
            ON CONFLICT (id) DO UPDATE SET
                upload_date = EXCLUDED.upload_date,
                html_file = COALESCE(EXCLUDED.html_file, reports.html_file),
                metadata = EXCLUDED.metadata,
                updated_at = NOW()
            "#,
        )
        .bind(sanitized.id)
        .bind(sanitized.tool_type.as_str())
        .bind(&sanitized.domain)
        .bind(sanitized.report_date)
        .bind(sanitized.upload_date)
        .bind(sanitized.global_score)
        .bind(sanitized.high_score)
        .bind(sanitized.medium_score)
        .bind(sanitized.low_score)
        .bind(sanitized.stale_objects_score)
        .bind(sanitized.privileged_accounts_score)
        .bind(sanitized.trusts_score)
        .bind(sanitized.anomalies_score)
        .bind(&sanitized.domain_sid)
        .bind(&sanitized.domain_functional_level)
        .bind(&sanitized.forest_functional_level)
        .bind(&sanitized.maturity_level)
        .bind(sanitized.dc_count)
        .bind(sanitized.user_count)
        .bind(sanitized.computer_count)
        .bind(&sanitized.original_file)
        .bind(&sanitized.html_file)
        .bind(Value::Object(sanitized.metadata.clone()))
        .execute(&mut *tx)
        .await?;

        for finding in &sanitized.findings {
            Self::insert_finding(&mut tx, finding).await?;
            Self::upsert_risk_catalog(&mut tx, finding).await?;
        }

        let (total, high, medium, low) = sanitized.finding_stats();
        Self::upsert_report_kpis(&mut tx, &sanitized, total, high, medium, low).await?;

        tx.commit().await?;
        info!(
            "Saved report {} ({}) with {} findings",
            sanitized.id,
            sanitized.tool_type,
            sanitized.findings.len()
        );
        Ok(sanitized.id)
    }

    async fn insert_finding(
        tx: &mut Transaction<'_, Postgres>,
        finding: &Finding,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO findings (
                id, report_id, tool_type, category, name, score,
                severity, description, recommendation, status, metadata
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(finding.id)
        .bind(finding.report_id)
        .bind(finding.tool_type.as_str())
        .bind(&finding.category)
        .bind(&finding.name)
        .bind(finding.score)
        .bind(finding.severity.as_str())
        .bind(&finding.description)
        .bind(&finding.recommendation)
        .bind(finding.status.as_str())
        .bind(Value::Object(finding.metadata.clone()))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Keep the risk catalog entry for this finding's identity triple current
    async fn upsert_risk_catalog(
        tx: &mut Transaction<'_, Postgres>,
        finding: &Finding,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO risks (id, tool_type, category, name, description, recommendation, severity)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (tool_type, category, name) DO UPDATE SET
                description = COALESCE(NULLIF(risks.description, ''), EXCLUDED.description),
                recommendation = COALESCE(NULLIF(risks.recommendation, ''), EXCLUDED.recommendation),
                severity = EXCLUDED.severity
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(finding.tool_type.as_str())
        .bind(&finding.category)
        .bind(&finding.name)
        .bind(&finding.description)
        .bind(&finding.recommendation)
        .bind(finding.severity.as_str())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn upsert_report_kpis(
        tx: &mut Transaction<'_, Postgres>,
        report: &Report,
        total: usize,
        high: usize,
        medium: usize,
        low: usize,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO reports_kpis (
                report_id, domain, tool_type, report_date,
                global_score, stale_objects_score, privileged_accounts_score,
                trusts_score, anomalies_score,
                total_findings, high_severity_findings,
                medium_severity_findings, low_severity_findings
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (report_id) DO UPDATE SET
                global_score = EXCLUDED.global_score,
                stale_objects_score = EXCLUDED.stale_objects_score,
                privileged_accounts_score = EXCLUDED.privileged_accounts_score,
                trusts_score = EXCLUDED.trusts_score,
                anomalies_score = EXCLUDED.anomalies_score,
                total_findings = EXCLUDED.total_findings,
                high_severity_findings = EXCLUDED.high_severity_findings,
                medium_severity_findings = EXCLUDED.medium_severity_findings,
                low_severity_findings = EXCLUDED.low_severity_findings,
                updated_at = NOW()
            "#,
        )
        .bind(report.id)
        .bind(&report.domain)
        .bind(report.tool_type.as_str())
        .bind(report.report_date)
        .bind(report.global_score)
        .bind(report.stale_objects_score)
        .bind(report.privileged_accounts_score)
        .bind(report.trusts_score)
        .bind(report.anomalies_score)
        .bind(total as i64)
        .bind(high as i64)
        .bind(medium as i64)
        .bind(low as i64)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Attach a companion HTML file to an existing report
    pub async fn update_report_html(&self, report_id: Uuid, html_file: &str) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE reports SET html_file = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(report_id)
        .bind(html_file)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("Report {}", report_id)));
        }
        Ok(())
    }

    /// Load a report with its findings
    pub async fn get_report(&self, report_id: Uuid) -> StoreResult<Report> {
        let row = sqlx::query("SELECT * FROM reports WHERE id = $1")
            .bind(report_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("Report {}", report_id)))?;

        let mut report = row_to_report(&row)?;
        report.findings = self.get_findings_by_report(report_id).await?;
        Ok(report)
    }

    /// Findings belonging to one report
    pub async fn get_findings_by_report(&self, report_id: Uuid) -> StoreResult<Vec<Finding>> {
        let rows = sqlx::query(
            "SELECT * FROM findings WHERE report_id = $1 ORDER BY category, name",
        )
        .bind(report_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_finding).collect()
    }

    /// Report summaries, optionally filtered by domain and tool type
    pub async fn get_all_reports_summary(
        &self,
        domain: Option<&str>,
        tool_type: Option<ToolType>,
    ) -> StoreResult<Vec<ReportSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT r.id, r.tool_type, r.domain, r.report_date, r.upload_date,
                   r.global_score, r.stale_objects_score, r.privileged_accounts_score,
                   r.trusts_score, r.anomalies_score, r.domain_sid,
                   r.original_file, r.html_file,
                   COUNT(f.id) AS total_findings,
                   COUNT(*) FILTER (WHERE f.severity = 'high') AS high_severity_findings,
                   COUNT(*) FILTER (WHERE f.severity = 'medium') AS medium_severity_findings,
                   COUNT(*) FILTER (WHERE f.severity = 'low') AS low_severity_findings
            FROM reports r
            LEFT JOIN findings f ON f.report_id = r.id
            WHERE ($1::text IS NULL OR r.domain = $1)
              AND ($2::text IS NULL OR r.tool_type = $2)
            GROUP BY r.id
            ORDER BY r.report_date DESC
            "#,
        )
        .bind(domain)
        .bind(tool_type.map(|t| t.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_report_summary).collect()
    }

    /// Most recent report for a domain and tool, findings included
    pub async fn get_latest_report(
        &self,
        domain: &str,
        tool_type: ToolType,
    ) -> StoreResult<Option<Report>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM reports
            WHERE domain = $1 AND tool_type = $2
            ORDER BY report_date DESC
            LIMIT 1
            "#,
        )
        .bind(domain)
        .bind(tool_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            None => Ok(None),
            Some(row) => {
                let mut report = row_to_report(&row)?;
                report.findings = self.get_findings_by_report(report.id).await?;
                Ok(Some(report))
            }
        }
    }

    /// Most recent configuration-audit report matched by original-file stem.
    ///
    /// Used to attach uploaded HTML companions; the stored filename carries a
    /// uuid prefix (`{hex}_{stem}`) which is stripped before comparison.
    pub async fn find_report_for_html_stem(&self, stem: &str) -> StoreResult<Option<Uuid>> {
        let rows = sqlx::query(
            r#"
            SELECT id, original_file FROM reports
            WHERE tool_type = 'config_audit' AND original_file IS NOT NULL
            ORDER BY upload_date DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            let id: Uuid = row.try_get("id")?;
            let original_file: String = row.try_get("original_file")?;
            let original_stem = std::path::Path::new(&original_file)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            // Strip the uuid prefix added at upload time
            let actual_stem = match original_stem.split_once('_') {
                Some((_, rest)) => rest.to_string(),
                None => original_stem,
            };
            if actual_stem == stem || actual_stem.ends_with(stem) || stem.ends_with(&actual_stem) {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    // ---------------------------------------------------------------------
    // Group memberships and monitored groups
    // ---------------------------------------------------------------------

    /// Save membership observations for a report.
    /// Duplicates within the same (report, group, member sid) are dropped.
    pub async fn save_group_memberships(
        &self,
        report_id: Uuid,
        memberships: &[GroupMembership],
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        for membership in memberships {
            sqlx::query(
                r#"
                INSERT INTO group_memberships (
                    id, report_id, group_id, member_name, member_sid,
                    member_type, is_direct_member
                ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (report_id, group_id, member_sid) DO NOTHING
                "#,
            )
            .bind(membership.id.unwrap_or_else(Uuid::new_v4))
            .bind(report_id)
            .bind(membership.group_id)
            .bind(&membership.member_name)
            .bind(membership.member_sid.clone().unwrap_or_default())
            .bind(membership.member_type.as_str())
            .bind(membership.is_direct_member)
            .execute(&mut *tx)
            .await?;
        }

        // Keep the denormalized group metrics on the KPI row current
        sqlx::query(
            r#"
            UPDATE reports_kpis SET
                total_groups = sub.total_groups,
                total_group_members = sub.total_group_members,
                updated_at = NOW()
            FROM (
                SELECT COUNT(DISTINCT group_id) AS total_groups,
                       COUNT(*) AS total_group_members
                FROM group_memberships
                WHERE report_id = $1
            ) sub
            WHERE reports_kpis.report_id = $1
            "#,
        )
        .bind(report_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(
            "Saved {} membership rows for report {}",
            memberships.len(),
            report_id
        );
        Ok(())
    }

    /// Membership observations recorded for one report
    pub async fn get_group_memberships(
        &self,
        report_id: Uuid,
    ) -> StoreResult<Vec<GroupMembership>> {
        let rows = sqlx::query(
            r#"
            SELECT id, report_id, group_id, member_name, member_sid,
                   member_type, is_direct_member
            FROM group_memberships
            WHERE report_id = $1
            ORDER BY group_id, member_name
            "#,
        )
        .bind(report_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| GroupMembership {
                id: row.try_get("id").ok(),
                report_id: row.get("report_id"),
                group_id: row.get("group_id"),
                member_name: row.get("member_name"),
                member_sid: row.try_get("member_sid").ok().flatten(),
                member_type: MemberType::from_str(row.get::<String, _>("member_type").as_str())
                    .unwrap_or_default(),
                is_direct_member: row.get("is_direct_member"),
            })
            .collect())
    }

    /// Active monitored groups, optionally restricted to one domain
    pub async fn get_monitored_groups(
        &self,
        domain: Option<&str>,
    ) -> StoreResult<Vec<MonitoredGroup>> {
        let rows = sqlx::query(
            r#"
            SELECT id, group_name, group_sid, domain, description, is_active, alert_on_changes
            FROM monitored_groups
            WHERE is_active = true AND ($1::text IS NULL OR domain = $1)
            ORDER BY domain, group_name
            "#,
        )
        .bind(domain)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| MonitoredGroup {
                id: row.try_get("id").ok(),
                group_name: row.get("group_name"),
                group_sid: row.try_get("group_sid").ok().flatten(),
                domain: row.get("domain"),
                description: row.try_get("description").ok().flatten(),
                is_active: row.get("is_active"),
                alert_on_changes: row.get("alert_on_changes"),
            })
            .collect())
    }

    pub async fn add_monitored_group(&self, group: &MonitoredGroup) -> StoreResult<Uuid> {
        let group_id = group.id.unwrap_or_else(Uuid::new_v4);
        sqlx::query(
            r#"
            INSERT INTO monitored_groups (
                id, group_name, group_sid, domain, description, is_active, alert_on_changes
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (domain, group_name) DO UPDATE SET
                group_sid = COALESCE(EXCLUDED.group_sid, monitored_groups.group_sid),
                is_active = EXCLUDED.is_active
            "#,
        )
        .bind(group_id)
        .bind(&group.group_name)
        .bind(&group.group_sid)
        .bind(&group.domain)
        .bind(&group.description)
        .bind(group.is_active)
        .bind(group.alert_on_changes)
        .execute(&self.pool)
        .await?;
        Ok(group_id)
    }

    /// Resolve a monitored group id, creating the group when first observed.
    /// Membership rows always go through this lookup; ids are never fabricated.
    pub async fn find_or_create_monitored_group(
        &self,
        domain: &str,
        group_name: &str,
    ) -> StoreResult<Uuid> {
        let existing = sqlx::query(
            "SELECT id FROM monitored_groups WHERE domain = $1 AND group_name = $2",
        )
        .bind(domain)
        .bind(group_name)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = existing {
            return Ok(row.get("id"));
        }

        let mut group = MonitoredGroup::new(domain, group_name);
        group.description = Some(format!("Auto-created from upload for {}", group_name));
        self.add_monitored_group(&group).await
    }

    // ---------------------------------------------------------------------
    // Accepted risks
    // ---------------------------------------------------------------------

    /// Accept a risk kind; idempotent on the identity triple
    pub async fn upsert_accepted_risk(&self, risk: &AcceptedRisk) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        // The catalog must know the risk before it can be accepted
        sqlx::query(
            r#"
            INSERT INTO risks (id, tool_type, category, name, description, recommendation, severity)
            VALUES ($1, $2, $3, $4, '', '', 'medium')
            ON CONFLICT (tool_type, category, name) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(risk.tool_type.as_str())
        .bind(&risk.category)
        .bind(&risk.name)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO accepted_risks (tool_type, category, name, reason, accepted_by, accepted_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, COALESCE($6, NOW()), $7)
            ON CONFLICT (tool_type, category, name) DO UPDATE SET
                reason = EXCLUDED.reason,
                accepted_by = EXCLUDED.accepted_by,
                accepted_at = NOW(),
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(risk.tool_type.as_str())
        .bind(&risk.category)
        .bind(&risk.name)
        .bind(&risk.reason)
        .bind(&risk.accepted_by)
        .bind(risk.accepted_at)
        .bind(risk.expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(
            "Accepted risk {}/{}/{}",
            risk.tool_type, risk.category, risk.name
        );
        Ok(())
    }

    pub async fn remove_accepted_risk(
        &self,
        tool_type: ToolType,
        category: &str,
        name: &str,
    ) -> StoreResult<()> {
        sqlx::query(
            "DELETE FROM accepted_risks WHERE tool_type = $1 AND category = $2 AND name = $3",
        )
        .bind(tool_type.as_str())
        .bind(category)
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The full risk catalog, optionally filtered by tool
    pub async fn get_risk_catalog(&self, tool_type: Option<ToolType>) -> StoreResult<Vec<Risk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, tool_type, category, name, description, recommendation, severity
            FROM risks
            WHERE ($1::text IS NULL OR tool_type = $1)
            ORDER BY tool_type, category, name
            "#,
        )
        .bind(tool_type.map(|t| t.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Risk {
                    id: row.try_get("id").ok(),
                    tool_type: parse_tool_type(row.try_get::<String, _>("tool_type")?.as_str())?,
                    category: row.try_get("category")?,
                    name: row.try_get("name")?,
                    description: row.try_get("description")?,
                    recommendation: row.try_get("recommendation")?,
                    severity: Severity::parse_lenient(
                        row.try_get::<String, _>("severity")?.as_str(),
                    ),
                })
            })
            .collect()
    }

    pub async fn get_accepted_risks(&self) -> StoreResult<Vec<AcceptedRisk>> {
        let rows = sqlx::query(
            r#"
            SELECT tool_type, category, name, reason, accepted_by, accepted_at, expires_at
            FROM accepted_risks
            ORDER BY tool_type, category, name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_accepted_risk).collect()
    }

    /// Filter findings down to those with no active acceptance.
    /// Expired acceptances do not suppress anything.
    pub async fn get_unaccepted_findings(
        &self,
        findings: &[Finding],
    ) -> StoreResult<Vec<Finding>> {
        if findings.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT tool_type, category, name FROM accepted_risks
            WHERE expires_at IS NULL OR expires_at > NOW()
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let accepted: HashSet<(String, String, String)> = rows
            .iter()
            .map(|row| {
                (
                    row.get::<String, _>("tool_type"),
                    row.get::<String, _>("category"),
                    row.get::<String, _>("name"),
                )
            })
            .collect();

        Ok(findings
            .iter()
            .filter(|f| {
                !accepted.contains(&(
                    f.tool_type.as_str().to_string(),
                    f.category.clone(),
                    f.name.clone(),
                ))
            })
            .cloned()
            .collect())
    }

    // ---------------------------------------------------------------------
    // Accepted group members
    // ---------------------------------------------------------------------

    pub async fn get_accepted_group_members(
        &self,
        domain: Option<&str>,
        group_name: Option<&str>,
    ) -> StoreResult<Vec<AcceptedGroupMember>> {
        let rows = sqlx::query(
            r#"
            SELECT id, group_name, member_name, member_sid, domain,
                   reason, accepted_by, accepted_at, expires_at
            FROM accepted_group_members
            WHERE ($1::text IS NULL OR domain = $1)
              AND ($2::text IS NULL OR group_name = $2)
              AND (expires_at IS NULL OR expires_at > NOW())
            ORDER BY domain, group_name, member_name
            "#,
        )
        .bind(domain)
        .bind(group_name)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| AcceptedGroupMember {
                id: row.try_get("id").ok(),
                group_name: row.get("group_name"),
                member_name: row.get("member_name"),
                member_sid: row.try_get("member_sid").ok().flatten(),
                domain: row.get("domain"),
                reason: row.try_get("reason").ok().flatten(),
                accepted_by: row.try_get("accepted_by").ok().flatten(),
                accepted_at: row.try_get("accepted_at").ok().flatten(),
                expires_at: row.try_get("expires_at").ok().flatten(),
            })
            .collect())
    }

    /// Accept a group member; idempotent on (domain, group, member)
    pub async fn upsert_accepted_group_member(
        &self,
        member: &AcceptedGroupMember,
    ) -> StoreResult<Uuid> {
        let member_id = member.id.unwrap_or_else(Uuid::new_v4);
        sqlx::query(
            r#"
            INSERT INTO accepted_group_members (
                id, group_name, member_name, member_sid, domain,
                reason, accepted_by, accepted_at, expires_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, COALESCE($8, NOW()), $9)
            ON CONFLICT (domain, group_name, member_name) DO UPDATE SET
                member_sid = COALESCE(EXCLUDED.member_sid, accepted_group_members.member_sid),
                reason = EXCLUDED.reason,
                accepted_by = EXCLUDED.accepted_by,
                accepted_at = NOW(),
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(member_id)
        .bind(&member.group_name)
        .bind(&member.member_name)
        .bind(&member.member_sid)
        .bind(&member.domain)
        .bind(&member.reason)
        .bind(&member.accepted_by)
        .bind(member.accepted_at)
        .bind(member.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(member_id)
    }

    pub async fn remove_accepted_group_member(
        &self,
        domain: &str,
        group_name: &str,
        member_name: &str,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            DELETE FROM accepted_group_members
            WHERE domain = $1 AND group_name = $2 AND member_name = $3
            "#,
        )
        .bind(domain)
        .bind(group_name)
        .bind(member_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Group risk configuration overrides
    // ---------------------------------------------------------------------

    pub async fn get_group_risk_configs(
        &self,
        domain: Option<&str>,
    ) -> StoreResult<Vec<GroupRiskConfig>> {
        let rows = sqlx::query(
            r#"
            SELECT id, group_name, domain, base_risk_score,
                   max_acceptable_members, alert_threshold, description
            FROM group_risk_configs
            WHERE ($1::text IS NULL OR domain = $1)
            ORDER BY domain, group_name
            "#,
        )
        .bind(domain)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| GroupRiskConfig {
                id: row.try_get("id").ok(),
                group_name: row.get("group_name"),
                domain: row.get("domain"),
                base_risk_score: row.get("base_risk_score"),
                max_acceptable_members: row.get("max_acceptable_members"),
                alert_threshold: row.get("alert_threshold"),
                description: row.try_get("description").ok().flatten(),
            })
            .collect())
    }

    pub async fn save_group_risk_config(&self, config: &GroupRiskConfig) -> StoreResult<Uuid> {
        let config_id = config.id.unwrap_or_else(Uuid::new_v4);
        sqlx::query(
            r#"
            INSERT INTO group_risk_configs (
                id, group_name, domain, base_risk_score,
                max_acceptable_members, alert_threshold, description
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (domain, group_name) DO UPDATE SET
                base_risk_score = EXCLUDED.base_risk_score,
                max_acceptable_members = EXCLUDED.max_acceptable_members,
                alert_threshold = EXCLUDED.alert_threshold,
                description = EXCLUDED.description
            "#,
        )
        .bind(config_id)
        .bind(&config.group_name)
        .bind(&config.domain)
        .bind(config.base_risk_score)
        .bind(config.max_acceptable_members)
        .bind(config.alert_threshold)
        .bind(&config.description)
        .execute(&self.pool)
        .await?;
        Ok(config_id)
    }

    // ---------------------------------------------------------------------
    // Settings
    // ---------------------------------------------------------------------

    pub async fn get_settings(&self) -> StoreResult<Settings> {
        let rows = sqlx::query(
            r#"
            SELECT key, value FROM settings
            WHERE key IN ('webhook_url', 'alert_message', 'retention_days', 'auto_accept_low_severity')
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut settings = Settings::default();
        for row in rows {
            let key: String = row.get("key");
            let value: String = row.get("value");
            match key.as_str() {
                Settings::KEY_WEBHOOK_URL => settings.webhook_url = value,
                Settings::KEY_ALERT_MESSAGE => settings.alert_message = value,
                Settings::KEY_RETENTION_DAYS => {
                    settings.retention_days = value.parse().unwrap_or(settings.retention_days)
                }
                Settings::KEY_AUTO_ACCEPT_LOW_SEVERITY => {
                    settings.auto_accept_low_severity = value.eq_ignore_ascii_case("true")
                }
                _ => {}
            }
        }
        Ok(settings)
    }

    pub async fn update_settings(&self, settings: &Settings) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let pairs: [(&str, String); 4] = [
            (Settings::KEY_WEBHOOK_URL, settings.webhook_url.clone()),
            (Settings::KEY_ALERT_MESSAGE, settings.alert_message.clone()),
            (
                Settings::KEY_RETENTION_DAYS,
                settings.retention_days.to_string(),
            ),
            (
                Settings::KEY_AUTO_ACCEPT_LOW_SEVERITY,
                settings.auto_accept_low_severity.to_string(),
            ),
        ];

        for (key, value) in pairs {
            sqlx::query(
                r#"
                INSERT INTO settings (key, value) VALUES ($1, $2)
                ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
                "#,
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Agents
    // ---------------------------------------------------------------------

    /// Register or refresh a collection agent
    pub async fn upsert_agent(&self, agent: &Agent) -> StoreResult<Uuid> {
        let agent_id = agent.id.unwrap_or_else(Uuid::new_v4);
        sqlx::query(
            r#"
            INSERT INTO agents (
                id, name, agent_type, domain, endpoint_url, api_key,
                configuration, is_active, last_seen
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            ON CONFLICT (name, domain) DO UPDATE SET
                agent_type = EXCLUDED.agent_type,
                endpoint_url = EXCLUDED.endpoint_url,
                configuration = EXCLUDED.configuration,
                is_active = EXCLUDED.is_active,
                last_seen = NOW()
            "#,
        )
        .bind(agent_id)
        .bind(&agent.name)
        .bind(&agent.agent_type)
        .bind(&agent.domain)
        .bind(&agent.endpoint_url)
        .bind(&agent.api_key)
        .bind(Value::Object(agent.configuration.clone()))
        .bind(agent.is_active)
        .execute(&self.pool)
        .await?;
        Ok(agent_id)
    }

    pub async fn get_agents(&self) -> StoreResult<Vec<Agent>> {
        let rows = sqlx::query("SELECT * FROM agents ORDER BY domain, name")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| Agent {
                id: row.try_get("id").ok(),
                name: row.get("name"),
                agent_type: row.get("agent_type"),
                domain: row.get("domain"),
                endpoint_url: row.try_get("endpoint_url").ok().flatten(),
                api_key: row.try_get("api_key").ok().flatten(),
                configuration: row
                    .try_get::<Value, _>("configuration")
                    .ok()
                    .and_then(|v| v.as_object().cloned())
                    .unwrap_or_default(),
                is_active: row.get("is_active"),
                last_seen: row.try_get("last_seen").ok().flatten(),
            })
            .collect())
    }

    // ---------------------------------------------------------------------
    // Dashboard
    // ---------------------------------------------------------------------

    /// Dashboard KPIs through the composite view. With no domain filter the
    /// domain with the most recent report wins.
    pub async fn get_dashboard_kpis(
        &self,
        domain: Option<&str>,
    ) -> StoreResult<Option<DashboardKpis>> {
        let row = sqlx::query(
            r#"
            SELECT dc.*,
                   r.domain_sid, r.domain_functional_level,
                   r.forest_functional_level, r.maturity_level
            FROM v_dashboard_composite dc
            LEFT JOIN reports r ON dc.config_audit_report_id = r.id
            WHERE ($1::text IS NULL OR dc.domain = $1)
            ORDER BY dc.latest_report_date DESC NULLS LAST
            LIMIT 1
            "#,
        )
        .bind(domain)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(DashboardKpis {
            domain: row.get("domain"),
            report_date: row.try_get("latest_report_date").ok().flatten(),
            domain_sid: row.try_get("domain_sid").ok().flatten(),
            domain_functional_level: row.try_get("domain_functional_level").ok().flatten(),
            forest_functional_level: row.try_get("forest_functional_level").ok().flatten(),
            maturity_level: row.try_get("maturity_level").ok().flatten(),
            global_score: row
                .try_get::<Option<i32>, _>("config_audit_global_score")?
                .unwrap_or(0),
            stale_objects_score: row
                .try_get::<Option<i32>, _>("stale_objects_score")?
                .unwrap_or(0),
            privileged_accounts_score: row
                .try_get::<Option<i32>, _>("privileged_accounts_score")?
                .unwrap_or(0),
            trusts_score: row.try_get::<Option<i32>, _>("trusts_score")?.unwrap_or(0),
            anomalies_score: row
                .try_get::<Option<i32>, _>("anomalies_score")?
                .unwrap_or(0),
            config_audit_report_date: row.try_get("config_audit_report_date").ok().flatten(),
            total_groups: row.try_get::<Option<i64>, _>("total_groups")?.unwrap_or(0),
            total_group_members: row
                .try_get::<Option<i64>, _>("total_group_members")?
                .unwrap_or(0),
            accepted_group_members: row
                .try_get::<Option<i64>, _>("accepted_group_members")?
                .unwrap_or(0),
            unaccepted_group_members: row
                .try_get::<Option<i64>, _>("unaccepted_group_members")?
                .unwrap_or(0),
            domain_group_risk_score: row
                .try_get::<Option<f64>, _>("domain_group_risk_score")?
                .unwrap_or(0.0),
            domain_analysis_report_date: row
                .try_get("domain_analysis_report_date")
                .ok()
                .flatten(),
            total_findings: row.try_get::<Option<i64>, _>("total_findings")?.unwrap_or(0),
            high_severity_findings: row
                .try_get::<Option<i64>, _>("high_severity_findings")?
                .unwrap_or(0),
            medium_severity_findings: row
                .try_get::<Option<i64>, _>("medium_severity_findings")?
                .unwrap_or(0),
            low_severity_findings: row
                .try_get::<Option<i64>, _>("low_severity_findings")?
                .unwrap_or(0),
            user_count: row.try_get::<Option<i32>, _>("user_count")?.unwrap_or(0),
            computer_count: row
                .try_get::<Option<i32>, _>("computer_count")?
                .unwrap_or(0),
            dc_count: row.try_get::<Option<i32>, _>("dc_count")?.unwrap_or(0),
            data_sources: row.try_get("data_sources").ok().flatten(),
        }))
    }

    /// Recurring findings grouped by identity triple, from the materialized
    /// view (refresh after ingestion to pick up new reports)
    pub async fn get_grouped_findings(
        &self,
        tool_type: Option<ToolType>,
        category: Option<&str>,
    ) -> StoreResult<Vec<GroupedFinding>> {
        let rows = sqlx::query(
            r#"
            SELECT tool_type, category, name, occurrence_count, domain_count,
                   max_score, severity, last_seen
            FROM mv_grouped_findings
            WHERE ($1::text IS NULL OR tool_type = $1)
              AND ($2::text IS NULL OR category = $2)
            ORDER BY occurrence_count DESC, max_score DESC
            "#,
        )
        .bind(tool_type.map(|t| t.as_str()))
        .bind(category)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(GroupedFinding {
                    tool_type: parse_tool_type(row.try_get::<String, _>("tool_type")?.as_str())?,
                    category: row.try_get("category")?,
                    name: row.try_get("name")?,
                    occurrence_count: row.try_get("occurrence_count")?,
                    domain_count: row.try_get("domain_count")?,
                    max_score: row.try_get("max_score")?,
                    severity: Severity::parse_lenient(row.try_get::<String, _>("severity")?.as_str()),
                    last_seen: row.try_get("last_seen")?,
                })
            })
            .collect()
    }

    /// All domains with at least one report
    pub async fn get_domains(&self) -> StoreResult<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT domain FROM reports ORDER BY domain")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|row| row.get("domain")).collect())
    }

    /// Refresh the dashboard materialized views; failures are logged and
    /// swallowed because a stale view is preferable to a failed request.
    pub async fn refresh_materialized_views(&self) {
        for view in [
            "mv_dashboard_summary",
            "mv_grouped_findings",
            "mv_grouped_findings_summary",
        ] {
            let statement = format!("REFRESH MATERIALIZED VIEW CONCURRENTLY {}", view);
            if let Err(e) = sqlx::query(&statement).execute(&self.pool).await {
                warn!("Failed to refresh {}: {}", view, e);
            }
        }
    }
}

// -------------------------------------------------------------------------
// Row mapping helpers
// -------------------------------------------------------------------------

fn parse_tool_type(raw: &str) -> StoreResult<ToolType> {
    ToolType::from_str(raw).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn row_metadata(row: &PgRow, column: &str) -> Metadata {
    row.try_get::<Value, _>(column)
        .ok()
        .and_then(|value| value.as_object().cloned())
        .unwrap_or_default()
}

pub(crate) fn row_to_report(row: &PgRow) -> StoreResult<Report> {
    Ok(Report {
        id: row.try_get("id")?,
        tool_type: parse_tool_type(row.try_get::<String, _>("tool_type")?.as_str())?,
        domain: row.try_get("domain")?,
        report_date: row.try_get("report_date")?,
        upload_date: row.try_get("upload_date")?,
        global_score: row.try_get("global_score")?,
        high_score: row.try_get("high_score")?,
        medium_score: row.try_get("medium_score")?,
        low_score: row.try_get("low_score")?,
        stale_objects_score: row.try_get("stale_objects_score")?,
        privileged_accounts_score: row.try_get("privileged_accounts_score")?,
        trusts_score: row.try_get("trusts_score")?,
        anomalies_score: row.try_get("anomalies_score")?,
        domain_sid: row.try_get("domain_sid")?,
        domain_functional_level: row.try_get("domain_functional_level")?,
        forest_functional_level: row.try_get("forest_functional_level")?,
        maturity_level: row.try_get("maturity_level")?,
        dc_count: row.try_get("dc_count")?,
        user_count: row.try_get("user_count")?,
        computer_count: row.try_get("computer_count")?,
        original_file: row.try_get("original_file")?,
        html_file: row.try_get("html_file")?,
        metadata: row_metadata(row, "metadata"),
        findings: Vec::new(),
    })
}

pub(crate) fn row_to_finding(row: &PgRow) -> StoreResult<Finding> {
    let severity: String = row.try_get("severity")?;
    let status: String = row.try_get("status")?;
    Ok(Finding {
        id: row.try_get("id")?,
        report_id: row.try_get("report_id")?,
        tool_type: parse_tool_type(row.try_get::<String, _>("tool_type")?.as_str())?,
        category: row.try_get("category")?,
        name: row.try_get("name")?,
        score: row.try_get("score")?,
        severity: Severity::parse_lenient(&severity),
        description: row.try_get("description")?,
        recommendation: row.try_get("recommendation")?,
        status: FindingStatus::from_str(&status)
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        metadata: row_metadata(row, "metadata"),
    })
}

fn row_to_report_summary(row: &PgRow) -> StoreResult<ReportSummary> {
    Ok(ReportSummary {
        id: row.try_get("id")?,
        tool_type: parse_tool_type(row.try_get::<String, _>("tool_type")?.as_str())?,
        domain: row.try_get("domain")?,
        report_date: row.try_get("report_date")?,
        upload_date: row.try_get("upload_date")?,
        global_score: row.try_get("global_score")?,
        stale_objects_score: row.try_get("stale_objects_score")?,
        privileged_accounts_score: row.try_get("privileged_accounts_score")?,
        trusts_score: row.try_get("trusts_score")?,
        anomalies_score: row.try_get("anomalies_score")?,
        domain_sid: row.try_get("domain_sid")?,
        original_file: row.try_get("original_file")?,
        html_file: row.try_get("html_file")?,
        total_findings: row.try_get("total_findings")?,
        high_severity_findings: row.try_get("high_severity_findings")?,
        medium_severity_findings: row.try_get("medium_severity_findings")?,
        low_severity_findings: row.try_get("low_severity_findings")?,
    })
}

fn row_to_accepted_risk(row: &PgRow) -> StoreResult<AcceptedRisk> {
    Ok(AcceptedRisk {
        tool_type: parse_tool_type(row.try_get::<String, _>("tool_type")?.as_str())?,
        category: row.try_get("category")?,
        name: row.try_get("name")?,
        reason: row.try_get("reason")?,
        accepted_by: row.try_get("accepted_by")?,
        accepted_at: row.try_get("accepted_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}
