// =====================================================================================
// File: core-risk/src/service.rs
// Description: Risk integration service orchestrating calculator, store and cache
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use crate::cache::{
    make_key, RiskCache, PREFIX_GLOBAL_RISK, PREFIX_RISK_BREAKDOWN, PREFIX_RISK_HISTORY,
};
use crate::calculator::{GroupTally, RiskCalculator};
use crate::RiskResult;
use chrono::{DateTime, Utc};
use core_model::{
    group_name_from_finding, DomainRiskAssessment, GlobalRiskScore, GroupRisk, Metadata, ToolType,
    GROUP_FINDING_CATEGORY,
};
use core_store::{DomainRiskSummary, ReportStore, RiskHistoryPoint};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Detailed per-domain risk breakdown for the operator UI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskBreakdown {
    pub domain: String,
    pub assessment_date: DateTime<Utc>,
    pub global_score: f64,
    pub trend_direction: String,
    pub trend_percentage: f64,
    pub config_audit_score: Option<f64>,
    pub domain_group_score: f64,
    pub awareness_score: Option<f64>,
    pub config_audit_contribution: Option<f64>,
    pub domain_group_contribution: f64,
    pub awareness_contribution: Option<f64>,
    pub category_scores: CategoryScores,
    pub group_risks: Vec<GroupRisk>,
    pub summary: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryScores {
    pub access_governance: f64,
    pub privilege_escalation: f64,
    pub compliance_posture: f64,
    pub operational_risk: f64,
}

/// Orchestrates risk computation, persistence, trend analysis and caching.
///
/// Recomputation is gated by a same-day check (domain assessments) and the
/// cache (global scores); member toggles invalidate first and recompute
/// afterwards so no stale value survives the change.
pub struct RiskService {
    store: Arc<ReportStore>,
    cache: Arc<RiskCache>,
    calculator: RiskCalculator,
}

impl RiskService {
    pub fn new(store: Arc<ReportStore>, cache: Arc<RiskCache>) -> Self {
        Self {
            store,
            cache,
            calculator: RiskCalculator::new(),
        }
    }

    pub fn cache(&self) -> &RiskCache {
        &self.cache
    }

    /// Compute and store the domain assessment. An existing assessment for
    /// the current calendar day is returned as-is unless `force` is set.
    pub async fn recompute_domain(
        &self,
        domain: &str,
        force: bool,
    ) -> RiskResult<DomainRiskAssessment> {
        let now = Utc::now();

        if !force {
            if let Some(existing) = self.store.get_domain_assessment_for_day(domain, now).await? {
                debug!("Using same-day risk assessment for {}", domain);
                return Ok(existing);
            }
        }

        let tallies = self.collect_group_tallies(domain).await?;
        let mut assessment = if tallies.is_empty() {
            warn!("No domain group data found for {}", domain);
            self.calculator.empty_assessment(domain, now)
        } else {
            let configs = self.store.get_group_risk_configs(Some(domain)).await?;
            self.calculator
                .calculate_domain_risk(domain, &tallies, &configs, now)
        };

        let assessment_id = self.store.store_domain_assessment(&assessment).await?;
        assessment.id = Some(assessment_id);
        info!(
            "Stored domain risk assessment for {} (score {:.2})",
            domain, assessment.domain_group_score
        );
        Ok(assessment)
    }

    /// Compute and store the combined global score, serving from cache when
    /// a fresh value exists.
    pub async fn recompute_global(&self, domain: &str) -> RiskResult<GlobalRiskScore> {
        let cache_key = make_key(PREFIX_GLOBAL_RISK, &[domain]);
        if let Some(cached) = self.cache.get(&cache_key) {
            if let Ok(score) = serde_json::from_value::<GlobalRiskScore>(cached) {
                debug!("Using cached global risk for {}", domain);
                return Ok(score);
            }
        }

        let config_audit_score = self.store.get_latest_config_audit_score(domain).await?;
        let assessment = self.recompute_domain(domain, false).await?;
        let awareness_score = self.store.get_latest_awareness_score(domain).await?;
        let history = self.store.get_trend_history(domain, 30).await?;

        let mut global = self.calculator.calculate_global_risk(
            domain,
            config_audit_score,
            assessment.domain_group_score,
            awareness_score,
            &history,
            Utc::now(),
        );

        let score_id = self
            .store
            .store_global_risk_score(&global, assessment.id)
            .await?;
        global.id = Some(score_id);
        info!(
            "Stored global risk score for {} ({:.2}, trend {})",
            domain, global.global_score, global.trend_direction
        );

        self.cache
            .set(cache_key, serde_json::to_value(&global)?, None);
        Ok(global)
    }

    /// React to a member accept/deny toggle: invalidate the affected cache
    /// entries, force recomputation, and append the audit record.
    pub async fn on_member_change(
        &self,
        domain: &str,
        group_name: &str,
    ) -> RiskResult<GlobalRiskScore> {
        info!("Updating risk scores for {} in {}", group_name, domain);

        let invalidated = self.cache.invalidate_group(domain, group_name);
        debug!(
            "Invalidated {} cache entries for member change",
            invalidated
        );

        self.recompute_domain(domain, true).await?;
        let global = self.recompute_global(domain).await?;

        let mut payload = Metadata::new();
        payload.insert("context".to_string(), json!(format!("Group: {}", group_name)));
        payload.insert("timestamp".to_string(), json!(Utc::now().to_rfc3339()));
        payload.insert("global_score".to_string(), json!(global.global_score));
        self.store
            .log_risk_calculation(domain, "member_change", payload)
            .await?;

        Ok(global)
    }

    /// React to a new domain-analysis upload for a domain
    pub async fn on_upload(&self, domain: &str) -> RiskResult<GlobalRiskScore> {
        let invalidated = self.cache.invalidate_domain(domain);
        debug!("Invalidated {} cache entries for upload", invalidated);

        self.recompute_domain(domain, true).await?;
        let global = self.recompute_global(domain).await?;

        let mut payload = Metadata::new();
        payload.insert("timestamp".to_string(), json!(Utc::now().to_rfc3339()));
        payload.insert("global_score".to_string(), json!(global.global_score));
        self.store
            .log_risk_calculation(domain, "report_upload", payload)
            .await?;

        Ok(global)
    }

    /// Detailed breakdown for a domain; computes missing pieces on demand
    pub async fn get_breakdown(&self, domain: &str) -> RiskResult<RiskBreakdown> {
        let cache_key = make_key(PREFIX_RISK_BREAKDOWN, &[domain]);
        if let Some(cached) = self.cache.get(&cache_key) {
            if let Ok(breakdown) = serde_json::from_value::<RiskBreakdown>(cached) {
                return Ok(breakdown);
            }
        }

        let assessment = match self.store.get_latest_domain_assessment(domain).await? {
            Some(assessment) => assessment,
            None => self.recompute_domain(domain, false).await?,
        };
        let global = match self.store.get_latest_global_risk(domain).await? {
            Some(global) => global,
            None => self.recompute_global(domain).await?,
        };

        let breakdown = RiskBreakdown {
            domain: domain.to_string(),
            assessment_date: global.assessment_date,
            global_score: global.global_score,
            trend_direction: global.trend_direction.as_str().to_string(),
            trend_percentage: global.trend_percentage,
            config_audit_score: global.config_audit_score,
            domain_group_score: global.domain_group_score,
            awareness_score: global.awareness_score,
            config_audit_contribution: global.config_audit_contribution,
            domain_group_contribution: global.domain_group_contribution,
            awareness_contribution: global.awareness_contribution,
            category_scores: CategoryScores {
                access_governance: assessment.access_governance_score,
                privilege_escalation: assessment.privilege_escalation_score,
                compliance_posture: assessment.compliance_posture_score,
                operational_risk: assessment.operational_risk_score,
            },
            group_risks: assessment.group_risks,
            summary: assessment.calculation_metadata,
        };

        self.cache
            .set(cache_key, serde_json::to_value(&breakdown)?, None);
        Ok(breakdown)
    }

    /// Stored global-score history for trending; no recomputation
    pub async fn get_history(
        &self,
        domain: &str,
        days: i64,
    ) -> RiskResult<Vec<RiskHistoryPoint>> {
        let days_key = days.to_string();
        let cache_key = make_key(PREFIX_RISK_HISTORY, &[domain, days_key.as_str()]);
        if let Some(cached) = self.cache.get(&cache_key) {
            if let Ok(history) = serde_json::from_value::<Vec<RiskHistoryPoint>>(cached) {
                return Ok(history);
            }
        }

        let history = self.store.get_risk_history(domain, days).await?;
        self.cache
            .set(cache_key, serde_json::to_value(&history)?, None);
        Ok(history)
    }

    /// Cross-domain comparison from the dashboard summary view
    pub async fn compare_across_domains(&self) -> RiskResult<Vec<DomainRiskSummary>> {
        Ok(self.store.get_risk_comparison().await?)
    }

    /// Project the latest domain-analysis findings into group tallies,
    /// joining accepted members to get the accepted count per group.
    async fn collect_group_tallies(&self, domain: &str) -> RiskResult<Vec<GroupTally>> {
        let Some(report) = self
            .store
            .get_latest_report(domain, ToolType::DomainAnalysis)
            .await?
        else {
            return Ok(Vec::new());
        };

        let accepted_members = self
            .store
            .get_accepted_group_members(Some(domain), None)
            .await?;
        let mut accepted_by_group: HashMap<String, i32> = HashMap::new();
        for member in accepted_members {
            *accepted_by_group.entry(member.group_name).or_insert(0) += 1;
        }

        let mut tallies = Vec::new();
        for finding in &report.findings {
            if finding.category != GROUP_FINDING_CATEGORY {
                continue;
            }
            let group_name = finding
                .metadata
                .get("group_name")
                .and_then(|value| value.as_str())
                .map(str::to_string)
                .or_else(|| group_name_from_finding(&finding.name).map(str::to_string));
            let Some(group_name) = group_name else {
                continue;
            };

            let total_members = finding
                .metadata
                .get("member_count")
                .and_then(|value| value.as_i64())
                .unwrap_or_else(|| {
                    finding
                        .metadata
                        .get("members")
                        .and_then(|value| value.as_array())
                        .map(|members| members.len() as i64)
                        .unwrap_or(0)
                }) as i32;

            // Acceptances can outlive shrinking groups; never count more
            // accepted members than observed members
            let accepted = accepted_by_group
                .get(&group_name)
                .copied()
                .unwrap_or(0)
                .min(total_members);

            tallies.push(GroupTally {
                group_name,
                total_members,
                accepted_members: accepted,
            });
        }

        Ok(tallies)
    }
}
