// =====================================================================================
// File: core-store/src/risk_store.rs
// Description: Persistence for risk assessments, global scores and audit history
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use crate::store::ReportStore;
use crate::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use core_model::{
    DomainRiskAssessment, GlobalRiskScore, GroupRisk, Metadata, RiskLevel, TrendDirection,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Postgres, Row, Transaction};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

/// One point of the stored global-score history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskHistoryPoint {
    pub date: DateTime<Utc>,
    pub global_score: f64,
    pub config_audit_score: Option<f64>,
    pub domain_group_score: f64,
    pub trend_direction: TrendDirection,
}

/// Per-domain row of the risk comparison view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainRiskSummary {
    pub domain: String,
    pub global_score: f64,
    pub config_audit_score: Option<f64>,
    pub domain_group_score: f64,
    pub trend_direction: TrendDirection,
    pub risk_level: String,
    pub total_groups: i64,
    pub critical_groups: i64,
    pub high_risk_groups: i64,
    pub total_members: i64,
    pub total_unaccepted: i64,
    pub assessment_date: Option<DateTime<Utc>>,
}

impl ReportStore {
    // ---------------------------------------------------------------------
    // Domain risk assessments (day-keyed)
    // ---------------------------------------------------------------------

    /// Store a domain assessment: at most one row per domain per calendar
    /// day (later computations update in place), and the per-group children
    /// are replaced in the same transaction.
    pub async fn store_domain_assessment(
        &self,
        assessment: &DomainRiskAssessment,
    ) -> StoreResult<Uuid> {
        let mut tx = self.pool().begin().await?;

        let existing = sqlx::query(
            r#"
            SELECT id FROM domain_risk_assessments
            WHERE domain = $1 AND DATE(assessment_date) = DATE($2)
            "#,
        )
        .bind(&assessment.domain)
        .bind(assessment.assessment_date)
        .fetch_optional(&mut *tx)
        .await?;

        let assessment_id = match existing {
            Some(row) => {
                let id: Uuid = row.get("id");
                sqlx::query(
                    r#"
                    UPDATE domain_risk_assessments SET
                        assessment_date = $2,
                        access_governance_score = $3,
                        privilege_escalation_score = $4,
                        compliance_posture_score = $5,
                        operational_risk_score = $6,
                        domain_group_score = $7,
                        calculation_metadata = $8,
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(assessment.assessment_date)
                .bind(assessment.access_governance_score)
                .bind(assessment.privilege_escalation_score)
                .bind(assessment.compliance_posture_score)
                .bind(assessment.operational_risk_score)
                .bind(assessment.domain_group_score)
                .bind(Value::Object(assessment.calculation_metadata.clone()))
                .execute(&mut *tx)
                .await?;
                id
            }
            None => {
                let id = assessment.id.unwrap_or_else(Uuid::new_v4);
                sqlx::query(
                    r#"
                    INSERT INTO domain_risk_assessments (
                        id, domain, assessment_date, access_governance_score,
                        privilege_escalation_score, compliance_posture_score,
                        operational_risk_score, domain_group_score, calculation_metadata
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    "#,
                )
                .bind(id)
                .bind(&assessment.domain)
                .bind(assessment.assessment_date)
                .bind(assessment.access_governance_score)
                .bind(assessment.privilege_escalation_score)
                .bind(assessment.compliance_posture_score)
                .bind(assessment.operational_risk_score)
                .bind(assessment.domain_group_score)
                .bind(Value::Object(assessment.calculation_metadata.clone()))
                .execute(&mut *tx)
                .await?;
                id
            }
        };

        Self::replace_group_assessments(&mut tx, assessment_id, &assessment.group_risks).await?;

        tx.commit().await?;
        info!(
            "Stored domain risk assessment {} for {}",
            assessment_id, assessment.domain
        );
        Ok(assessment_id)
    }

    /// Children are deleted and re-inserted whenever the parent is recomputed
    async fn replace_group_assessments(
        tx: &mut Transaction<'_, Postgres>,
        assessment_id: Uuid,
        group_risks: &[GroupRisk],
    ) -> StoreResult<()> {
        sqlx::query("DELETE FROM group_risk_assessments WHERE domain_assessment_id = $1")
            .bind(assessment_id)
            .execute(&mut **tx)
            .await?;

        for group_risk in group_risks {
            let factors: Metadata = group_risk
                .contributing_factors
                .iter()
                .filter_map(|(key, value)| {
                    serde_json::Number::from_f64(*value)
                        .map(|number| (key.clone(), Value::Number(number)))
                })
                .collect();

            sqlx::query(
                r#"
                INSERT INTO group_risk_assessments (
                    id, domain_assessment_id, group_name, total_members,
                    accepted_members, unaccepted_members, risk_score,
                    risk_level, contributing_factors
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(assessment_id)
            .bind(&group_risk.group_name)
            .bind(group_risk.total_members)
            .bind(group_risk.accepted_members)
            .bind(group_risk.unaccepted_members)
            .bind(group_risk.risk_score)
            .bind(group_risk.risk_level.as_str())
            .bind(Value::Object(factors))
            .execute(&mut **tx)
            .await?;
        }

        Ok(())
    }

    /// Assessment stored for the same calendar day as `date`, if any
    pub async fn get_domain_assessment_for_day(
        &self,
        domain: &str,
        date: DateTime<Utc>,
    ) -> StoreResult<Option<DomainRiskAssessment>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM domain_risk_assessments
            WHERE domain = $1 AND DATE(assessment_date) = DATE($2)
            ORDER BY assessment_date DESC
            LIMIT 1
            "#,
        )
        .bind(domain)
        .bind(date)
        .fetch_optional(self.pool())
        .await?;

        match row {
            None => Ok(None),
            Some(row) => Ok(Some(self.hydrate_assessment(&row).await?)),
        }
    }

    /// Most recent assessment for a domain regardless of day
    pub async fn get_latest_domain_assessment(
        &self,
        domain: &str,
    ) -> StoreResult<Option<DomainRiskAssessment>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM domain_risk_assessments
            WHERE domain = $1
            ORDER BY assessment_date DESC
            LIMIT 1
            "#,
        )
        .bind(domain)
        .fetch_optional(self.pool())
        .await?;

        match row {
            None => Ok(None),
            Some(row) => Ok(Some(self.hydrate_assessment(&row).await?)),
        }
    }

    async fn hydrate_assessment(
        &self,
        row: &sqlx::postgres::PgRow,
    ) -> StoreResult<DomainRiskAssessment> {
        let id: Uuid = row.try_get("id")?;
        let group_risks = self.get_group_assessments(id).await?;

        Ok(DomainRiskAssessment {
            id: Some(id),
            domain: row.try_get("domain")?,
            assessment_date: row.try_get("assessment_date")?,
            access_governance_score: row.try_get("access_governance_score")?,
            privilege_escalation_score: row.try_get("privilege_escalation_score")?,
            compliance_posture_score: row.try_get("compliance_posture_score")?,
            operational_risk_score: row.try_get("operational_risk_score")?,
            domain_group_score: row.try_get("domain_group_score")?,
            group_risks,
            calculation_metadata: row
                .try_get::<Value, _>("calculation_metadata")
                .ok()
                .and_then(|value| value.as_object().cloned())
                .unwrap_or_default(),
        })
    }

    /// Per-group breakdown rows of one assessment
    pub async fn get_group_assessments(&self, assessment_id: Uuid) -> StoreResult<Vec<GroupRisk>> {
        let rows = sqlx::query(
            r#"
            SELECT group_name, total_members, accepted_members, unaccepted_members,
                   risk_score, risk_level, contributing_factors
            FROM group_risk_assessments
            WHERE domain_assessment_id = $1
            ORDER BY risk_score DESC
            "#,
        )
        .bind(assessment_id)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                let risk_level: String = row.try_get("risk_level")?;
                let factors = row
                    .try_get::<Value, _>("contributing_factors")
                    .ok()
                    .and_then(|value| value.as_object().cloned())
                    .unwrap_or_default();
                let contributing_factors: HashMap<String, f64> = factors
                    .into_iter()
                    .filter_map(|(key, value)| value.as_f64().map(|v| (key, v)))
                    .collect();

                Ok(GroupRisk {
                    group_name: row.try_get("group_name")?,
                    total_members: row.try_get("total_members")?,
                    accepted_members: row.try_get("accepted_members")?,
                    unaccepted_members: row.try_get("unaccepted_members")?,
                    risk_score: row.try_get("risk_score")?,
                    risk_level: RiskLevel::from_str(&risk_level)
                        .map_err(|e| StoreError::Serialization(e.to_string()))?,
                    contributing_factors,
                })
            })
            .collect()
    }

    // ---------------------------------------------------------------------
    // Global risk scores (day-keyed)
    // ---------------------------------------------------------------------

    /// Store a global score, one row per domain per calendar day
    pub async fn store_global_risk_score(
        &self,
        score: &GlobalRiskScore,
        domain_assessment_id: Option<Uuid>,
    ) -> StoreResult<Uuid> {
        let mut tx = self.pool().begin().await?;

        let existing = sqlx::query(
            r#"
            SELECT id FROM global_risk_scores
            WHERE domain = $1 AND DATE(assessment_date) = DATE($2)
            "#,
        )
        .bind(&score.domain)
        .bind(score.assessment_date)
        .fetch_optional(&mut *tx)
        .await?;

        let score_id = match existing {
            Some(row) => {
                let id: Uuid = row.get("id");
                sqlx::query(
                    r#"
                    UPDATE global_risk_scores SET
                        assessment_date = $2,
                        config_audit_score = $3,
                        domain_group_score = $4,
                        awareness_score = $5,
                        global_score = $6,
                        config_audit_contribution = $7,
                        domain_group_contribution = $8,
                        awareness_contribution = $9,
                        trend_direction = $10,
                        trend_percentage = $11,
                        domain_assessment_id = $12
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(score.assessment_date)
                .bind(score.config_audit_score)
                .bind(score.domain_group_score)
                .bind(score.awareness_score)
                .bind(score.global_score)
                .bind(score.config_audit_contribution)
                .bind(score.domain_group_contribution)
                .bind(score.awareness_contribution)
                .bind(score.trend_direction.as_str())
                .bind(score.trend_percentage)
                .bind(domain_assessment_id)
                .execute(&mut *tx)
                .await?;
                id
            }
            None => {
                let id = score.id.unwrap_or_else(Uuid::new_v4);
                sqlx::query(
                    r#"
                    INSERT INTO global_risk_scores (
                        id, domain, assessment_date, config_audit_score,
                        domain_group_score, awareness_score, global_score,
                        config_audit_contribution, domain_group_contribution,
                        awareness_contribution, trend_direction, trend_percentage,
                        domain_assessment_id
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                    "#,
                )
                .bind(id)
                .bind(&score.domain)
                .bind(score.assessment_date)
                .bind(score.config_audit_score)
                .bind(score.domain_group_score)
                .bind(score.awareness_score)
                .bind(score.global_score)
                .bind(score.config_audit_contribution)
                .bind(score.domain_group_contribution)
                .bind(score.awareness_contribution)
                .bind(score.trend_direction.as_str())
                .bind(score.trend_percentage)
                .bind(domain_assessment_id)
                .execute(&mut *tx)
                .await?;
                id
            }
        };

        tx.commit().await?;
        Ok(score_id)
    }

    /// Most recent stored global score for a domain
    pub async fn get_latest_global_risk(
        &self,
        domain: &str,
    ) -> StoreResult<Option<GlobalRiskScore>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM global_risk_scores
            WHERE domain = $1
            ORDER BY assessment_date DESC
            LIMIT 1
            "#,
        )
        .bind(domain)
        .fetch_optional(self.pool())
        .await?;

        row.map(|row| row_to_global_risk(&row)).transpose()
    }

    /// Global-score history points for trend computation. The current
    /// calendar day is excluded so same-day recomputation stays idempotent;
    /// the most recent returned point is the trend comparison baseline.
    pub async fn get_trend_history(
        &self,
        domain: &str,
        days: i64,
    ) -> StoreResult<Vec<(DateTime<Utc>, f64)>> {
        let rows = sqlx::query(
            r#"
            SELECT assessment_date, global_score
            FROM global_risk_scores
            WHERE domain = $1
              AND assessment_date >= NOW() - make_interval(days => $2::int)
              AND DATE(assessment_date) < CURRENT_DATE
            ORDER BY assessment_date ASC
            "#,
        )
        .bind(domain)
        .bind(days)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                (
                    row.get::<DateTime<Utc>, _>("assessment_date"),
                    row.get::<f64, _>("global_score"),
                )
            })
            .collect())
    }

    /// Stored history for the risk history API
    pub async fn get_risk_history(
        &self,
        domain: &str,
        days: i64,
    ) -> StoreResult<Vec<RiskHistoryPoint>> {
        let rows = sqlx::query(
            r#"
            SELECT assessment_date, global_score, config_audit_score,
                   domain_group_score, trend_direction
            FROM global_risk_scores
            WHERE domain = $1
              AND assessment_date >= NOW() - make_interval(days => $2::int)
            ORDER BY assessment_date ASC
            "#,
        )
        .bind(domain)
        .bind(days)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                let trend: String = row.try_get("trend_direction")?;
                Ok(RiskHistoryPoint {
                    date: row.try_get("assessment_date")?,
                    global_score: row.try_get("global_score")?,
                    config_audit_score: row.try_get("config_audit_score")?,
                    domain_group_score: row.try_get("domain_group_score")?,
                    trend_direction: TrendDirection::from_str(&trend)
                        .map_err(|e| StoreError::Serialization(e.to_string()))?,
                })
            })
            .collect()
    }

    /// Risk comparison across all domains, highest global score first
    pub async fn get_risk_comparison(&self) -> StoreResult<Vec<DomainRiskSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT domain, global_score, config_audit_score, domain_group_score,
                   trend_direction, risk_level, total_groups, critical_groups,
                   high_risk_groups, total_members, total_unaccepted, assessment_date
            FROM risk_dashboard_summary
            ORDER BY global_score DESC
            "#,
        )
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                let trend: String = row.try_get("trend_direction")?;
                Ok(DomainRiskSummary {
                    domain: row.try_get("domain")?,
                    global_score: row.try_get::<Option<f64>, _>("global_score")?.unwrap_or(0.0),
                    config_audit_score: row.try_get("config_audit_score")?,
                    domain_group_score: row
                        .try_get::<Option<f64>, _>("domain_group_score")?
                        .unwrap_or(0.0),
                    trend_direction: TrendDirection::from_str(&trend)
                        .map_err(|e| StoreError::Serialization(e.to_string()))?,
                    risk_level: row.try_get("risk_level")?,
                    total_groups: row.try_get::<Option<i64>, _>("total_groups")?.unwrap_or(0),
                    critical_groups: row
                        .try_get::<Option<i64>, _>("critical_groups")?
                        .unwrap_or(0),
                    high_risk_groups: row
                        .try_get::<Option<i64>, _>("high_risk_groups")?
                        .unwrap_or(0),
                    total_members: row.try_get::<Option<i64>, _>("total_members")?.unwrap_or(0),
                    total_unaccepted: row
                        .try_get::<Option<i64>, _>("total_unaccepted")?
                        .unwrap_or(0),
                    assessment_date: row.try_get("assessment_date")?,
                })
            })
            .collect()
    }

    // ---------------------------------------------------------------------
    // Upstream signals
    // ---------------------------------------------------------------------

    /// Latest configuration-audit global score for a domain
    pub async fn get_latest_config_audit_score(&self, domain: &str) -> StoreResult<Option<f64>> {
        let row = sqlx::query(
            r#"
            SELECT global_score FROM reports
            WHERE domain = $1 AND tool_type = 'config_audit'
            ORDER BY report_date DESC
            LIMIT 1
            "#,
        )
        .bind(domain)
        .fetch_optional(self.pool())
        .await?;

        Ok(row
            .and_then(|row| row.get::<Option<i32>, _>("global_score"))
            .map(f64::from))
    }

    /// Latest security-awareness score for a domain, read from the most
    /// recent report carrying an `awareness_score` metadata key (0-100,
    /// higher = better).
    pub async fn get_latest_awareness_score(&self, domain: &str) -> StoreResult<Option<f64>> {
        let row = sqlx::query(
            r#"
            SELECT (metadata->>'awareness_score')::float8 AS awareness_score
            FROM reports
            WHERE domain = $1 AND metadata ? 'awareness_score'
            ORDER BY report_date DESC
            LIMIT 1
            "#,
        )
        .bind(domain)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.and_then(|row| row.get::<Option<f64>, _>("awareness_score")))
    }

    // ---------------------------------------------------------------------
    // Audit history
    // ---------------------------------------------------------------------

    /// Append-only audit log of risk recomputations
    pub async fn log_risk_calculation(
        &self,
        domain: &str,
        trigger: &str,
        payload: Metadata,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO risk_calculation_history (id, domain, calculation_trigger, risk_scores)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(domain)
        .bind(trigger)
        .bind(Value::Object(payload))
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

fn row_to_global_risk(row: &sqlx::postgres::PgRow) -> StoreResult<GlobalRiskScore> {
    let trend: String = row.try_get("trend_direction")?;
    Ok(GlobalRiskScore {
        id: row.try_get("id").ok(),
        domain: row.try_get("domain")?,
        assessment_date: row.try_get("assessment_date")?,
        config_audit_score: row.try_get("config_audit_score")?,
        domain_group_score: row.try_get("domain_group_score")?,
        awareness_score: row.try_get("awareness_score")?,
        global_score: row.try_get("global_score")?,
        config_audit_contribution: row.try_get("config_audit_contribution")?,
        domain_group_contribution: row.try_get("domain_group_contribution")?,
        awareness_contribution: row.try_get("awareness_contribution")?,
        trend_direction: TrendDirection::from_str(&trend)
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        trend_percentage: row.try_get("trend_percentage")?,
    })
}
