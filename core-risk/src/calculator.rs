// =====================================================================================
// File: core-risk/src/calculator.rs
// Description: Pure risk calculation functions (group -> category -> domain -> global)
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use chrono::{DateTime, Utc};
use core_model::{
    DomainRiskAssessment, GlobalRiskScore, GroupRisk, GroupRiskConfig, Metadata, RiskLevel,
    TrendDirection,
};
use serde_json::json;
use std::collections::HashMap;

/// Risk profile configuration for a group tier
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRiskProfile {
    pub risk_level: RiskLevel,
    pub base_weight: f64,
    pub max_acceptable_members: i32,
    pub escalation_multiplier: f64,
}

/// Membership tally for one group, the calculator's input shape
#[derive(Debug, Clone)]
pub struct GroupTally {
    pub group_name: String,
    pub total_members: i32,
    pub accepted_members: i32,
}

/// Default risk profile for a group; unknown groups fall back to the
/// low-risk profile with a generous membership allowance.
pub fn default_profile(group_name: &str) -> GroupRiskProfile {
    match group_name {
        "Domain Admins" => GroupRiskProfile {
            risk_level: RiskLevel::Critical,
            base_weight: 3.0,
            max_acceptable_members: 2,
            escalation_multiplier: 2.0,
        },
        "Enterprise Admins" => GroupRiskProfile {
            risk_level: RiskLevel::Critical,
            base_weight: 3.0,
            max_acceptable_members: 1,
            escalation_multiplier: 2.5,
        },
        "Schema Admins" => GroupRiskProfile {
            risk_level: RiskLevel::Critical,
            base_weight: 2.5,
            max_acceptable_members: 1,
            escalation_multiplier: 2.0,
        },
        "Administrators" => GroupRiskProfile {
            risk_level: RiskLevel::High,
            base_weight: 2.0,
            max_acceptable_members: 5,
            escalation_multiplier: 1.5,
        },
        "Account Operators" => GroupRiskProfile {
            risk_level: RiskLevel::High,
            base_weight: 1.8,
            max_acceptable_members: 3,
            escalation_multiplier: 1.5,
        },
        "Backup Operators" => GroupRiskProfile {
            risk_level: RiskLevel::Medium,
            base_weight: 1.2,
            max_acceptable_members: 5,
            escalation_multiplier: 1.2,
        },
        "Server Operators" => GroupRiskProfile {
            risk_level: RiskLevel::Medium,
            base_weight: 1.2,
            max_acceptable_members: 3,
            escalation_multiplier: 1.2,
        },
        "Print Operators" => GroupRiskProfile {
            risk_level: RiskLevel::Low,
            base_weight: 1.0,
            max_acceptable_members: 8,
            escalation_multiplier: 1.0,
        },
        _ => GroupRiskProfile {
            risk_level: RiskLevel::Low,
            base_weight: 1.0,
            max_acceptable_members: 10,
            escalation_multiplier: 1.0,
        },
    }
}

/// Base combination weights when all three signals are available
const WEIGHT_CONFIG_AUDIT: f64 = 0.55;
const WEIGHT_DOMAIN_GROUP: f64 = 0.30;
const WEIGHT_AWARENESS: f64 = 0.15;

/// Threshold (score points) separating a stable trend from a real move
const TREND_THRESHOLD: f64 = 5.0;

/// Pure, deterministic risk calculation engine. No I/O; all inputs are
/// passed in, including the assessment timestamp.
#[derive(Debug, Default)]
pub struct RiskCalculator;

impl RiskCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Profile for a group with the per-domain override applied
    pub fn resolve_profile(
        &self,
        group_name: &str,
        config: Option<&GroupRiskConfig>,
    ) -> GroupRiskProfile {
        let mut profile = default_profile(group_name);
        if let Some(config) = config {
            profile.max_acceptable_members = config.max_acceptable_members;
        }
        profile
    }

    /// Risk score for an individual group.
    ///
    /// Combines the unaccepted-member ratio, excess members beyond the
    /// acceptable threshold (10 points each, capped at 50) and a flat
    /// 25-point penalty for critical groups with zero accepted members,
    /// all scaled by the group's escalation multiplier and clamped to 100.
    pub fn calculate_group_risk(
        &self,
        group_name: &str,
        total_members: i32,
        accepted_members: i32,
        config: Option<&GroupRiskConfig>,
    ) -> GroupRisk {
        let profile = self.resolve_profile(group_name, config);
        let unaccepted_members = total_members - accepted_members;

        let unaccepted_ratio_pts = if total_members > 0 {
            ((unaccepted_members as f64 / total_members as f64) * 100.0).min(100.0)
        } else {
            0.0
        };

        let excess = unaccepted_members - profile.max_acceptable_members;
        let excess_pts = if excess > 0 {
            ((excess as f64) * 10.0).min(50.0)
        } else {
            0.0
        };

        let zero_acceptance_penalty = if profile.risk_level == RiskLevel::Critical
            && accepted_members == 0
            && total_members > 0
        {
            25.0
        } else {
            0.0
        };

        let raw = (unaccepted_ratio_pts + excess_pts + zero_acceptance_penalty)
            * profile.escalation_multiplier;
        let risk_score = raw.min(100.0);

        let mut contributing_factors = HashMap::new();
        contributing_factors.insert("unaccepted_ratio".to_string(), unaccepted_ratio_pts);
        contributing_factors.insert("excess_members".to_string(), excess_pts);
        contributing_factors.insert(
            "zero_acceptance_penalty".to_string(),
            zero_acceptance_penalty,
        );
        contributing_factors.insert(
            "criticality_multiplier".to_string(),
            profile.escalation_multiplier,
        );

        GroupRisk {
            group_name: group_name.to_string(),
            total_members,
            accepted_members,
            unaccepted_members,
            risk_score,
            risk_level: profile.risk_level,
            contributing_factors,
        }
    }

    /// Complete domain assessment from group tallies
    pub fn calculate_domain_risk(
        &self,
        domain: &str,
        tallies: &[GroupTally],
        configs: &[GroupRiskConfig],
        assessment_date: DateTime<Utc>,
    ) -> DomainRiskAssessment {
        let config_by_group: HashMap<&str, &GroupRiskConfig> = configs
            .iter()
            .map(|config| (config.group_name.as_str(), config))
            .collect();

        let group_risks: Vec<GroupRisk> = tallies
            .iter()
            .map(|tally| {
                self.calculate_group_risk(
                    &tally.group_name,
                    tally.total_members,
                    tally.accepted_members,
                    config_by_group.get(tally.group_name.as_str()).copied(),
                )
            })
            .collect();

        let access_governance = self.access_governance_score(&group_risks);
        let privilege_escalation = self.privilege_escalation_score(&group_risks);
        let compliance_posture = self.compliance_posture_score(&group_risks);
        let operational_risk = self.operational_risk_score(&group_risks, &config_by_group);

        // Privilege escalation dominates the composite
        let domain_group_score = access_governance * 0.3
            + privilege_escalation * 0.4
            + compliance_posture * 0.2
            + operational_risk * 0.1;

        let mut calculation_metadata = Metadata::new();
        calculation_metadata.insert(
            "calculation_method".to_string(),
            json!("weighted_group_aggregation"),
        );
        calculation_metadata.insert("group_count".to_string(), json!(group_risks.len()));
        calculation_metadata.insert(
            "critical_groups".to_string(),
            json!(group_risks
                .iter()
                .filter(|g| g.risk_level == RiskLevel::Critical)
                .count()),
        );
        calculation_metadata.insert(
            "high_risk_groups".to_string(),
            json!(group_risks.iter().filter(|g| g.risk_score > 50.0).count()),
        );
        calculation_metadata.insert(
            "total_members".to_string(),
            json!(group_risks.iter().map(|g| g.total_members as i64).sum::<i64>()),
        );
        calculation_metadata.insert(
            "total_unaccepted".to_string(),
            json!(group_risks
                .iter()
                .map(|g| g.unaccepted_members as i64)
                .sum::<i64>()),
        );
        calculation_metadata.insert(
            "calculation_timestamp".to_string(),
            json!(assessment_date.to_rfc3339()),
        );

        DomainRiskAssessment {
            id: None,
            domain: domain.to_string(),
            assessment_date,
            access_governance_score: access_governance,
            privilege_escalation_score: privilege_escalation,
            compliance_posture_score: compliance_posture,
            operational_risk_score: operational_risk,
            domain_group_score,
            group_risks,
            calculation_metadata,
        }
    }

    /// Assessment used when a domain has no group data at all
    pub fn empty_assessment(&self, domain: &str, assessment_date: DateTime<Utc>) -> DomainRiskAssessment {
        let mut calculation_metadata = Metadata::new();
        calculation_metadata.insert("status".to_string(), json!("no_data"));
        calculation_metadata.insert(
            "message".to_string(),
            json!("No domain group data available for risk calculation"),
        );

        DomainRiskAssessment {
            id: None,
            domain: domain.to_string(),
            assessment_date,
            access_governance_score: 0.0,
            privilege_escalation_score: 0.0,
            compliance_posture_score: 0.0,
            operational_risk_score: 0.0,
            domain_group_score: 0.0,
            group_risks: Vec::new(),
            calculation_metadata,
        }
    }

    /// Combined global score from up to three signals. Weights depend on
    /// which signals are present; the awareness score arrives as a positive
    /// 0-100 score and is inverted into a risk contribution.
    pub fn calculate_global_risk(
        &self,
        domain: &str,
        config_audit_score: Option<f64>,
        domain_group_score: f64,
        awareness_score: Option<f64>,
        historical_scores: &[(DateTime<Utc>, f64)],
        assessment_date: DateTime<Utc>,
    ) -> GlobalRiskScore {
        let awareness_risk = awareness_score.map(|score| 100.0 - score);

        let (config_weight, group_weight, awareness_weight) =
            match (config_audit_score.is_some(), awareness_risk.is_some()) {
                (true, true) => (WEIGHT_CONFIG_AUDIT, WEIGHT_DOMAIN_GROUP, WEIGHT_AWARENESS),
                (true, false) => (0.70, 0.30, 0.0),
                (false, true) => (0.0, 0.65, 0.35),
                (false, false) => (0.0, 1.0, 0.0),
            };

        let mut global_score = domain_group_score * group_weight;
        if let Some(config_score) = config_audit_score {
            global_score += config_score * config_weight;
        }
        if let Some(awareness_risk) = awareness_risk {
            global_score += awareness_risk * awareness_weight;
        }

        let (config_contribution, group_contribution, awareness_contribution) =
            if global_score > 0.0 {
                (
                    config_audit_score
                        .map(|score| round2(score * config_weight / global_score * 100.0)),
                    round2(domain_group_score * group_weight / global_score * 100.0),
                    awareness_risk
                        .map(|risk| round2(risk * awareness_weight / global_score * 100.0)),
                )
            } else {
                (None, 100.0, None)
            };

        let (trend_direction, trend_percentage) =
            trend_against_history(global_score, historical_scores);

        GlobalRiskScore {
            id: None,
            domain: domain.to_string(),
            assessment_date,
            config_audit_score,
            domain_group_score,
            awareness_score,
            global_score: round2(global_score),
            config_audit_contribution: config_contribution,
            domain_group_contribution: group_contribution,
            awareness_contribution,
            trend_direction,
            trend_percentage,
        }
    }

    /// Weighted average of per-group unaccepted ratios, weighted by group
    /// importance (0-100)
    fn access_governance_score(&self, group_risks: &[GroupRisk]) -> f64 {
        if group_risks.is_empty() {
            return 0.0;
        }

        let mut total_weighted_risk = 0.0;
        let mut total_weight = 0.0;
        for group_risk in group_risks {
            let weight = default_profile(&group_risk.group_name).base_weight;
            let governance_risk = if group_risk.total_members > 0 {
                group_risk.unaccepted_members as f64 / group_risk.total_members as f64 * 100.0
            } else {
                0.0
            };
            total_weighted_risk += governance_risk * weight;
            total_weight += weight;
        }

        if total_weight > 0.0 {
            (total_weighted_risk / total_weight).min(100.0)
        } else {
            0.0
        }
    }

    /// Mean risk over critical and high groups, with critical scores
    /// amplified by 1.5 before averaging (0-100)
    fn privilege_escalation_score(&self, group_risks: &[GroupRisk]) -> f64 {
        let privileged: Vec<&GroupRisk> = group_risks
            .iter()
            .filter(|g| matches!(g.risk_level, RiskLevel::Critical | RiskLevel::High))
            .collect();

        if privileged.is_empty() {
            return 0.0;
        }

        let total: f64 = privileged
            .iter()
            .map(|g| {
                if g.risk_level == RiskLevel::Critical {
                    g.risk_score * 1.5
                } else {
                    g.risk_score
                }
            })
            .sum();

        (total / privileged.len() as f64).min(100.0)
    }

    /// Overall unaccepted ratio plus 10 points per nonempty group with zero
    /// accepted members (0-100)
    fn compliance_posture_score(&self, group_risks: &[GroupRisk]) -> f64 {
        if group_risks.is_empty() {
            return 0.0;
        }

        let total_members: i64 = group_risks.iter().map(|g| g.total_members as i64).sum();
        let total_unaccepted: i64 = group_risks.iter().map(|g| g.unaccepted_members as i64).sum();
        if total_members == 0 {
            return 0.0;
        }

        let mut compliance_risk = total_unaccepted as f64 / total_members as f64 * 100.0;
        let zero_acceptance_groups = group_risks
            .iter()
            .filter(|g| g.accepted_members == 0 && g.total_members > 0)
            .count();
        compliance_risk += zero_acceptance_groups as f64 * 10.0;

        compliance_risk.min(100.0)
    }

    /// Management-gap factors: mixed-status groups (up to 50), oversized
    /// groups (up to 30), unmanaged groups (up to 40), total clamped to 100
    fn operational_risk_score(
        &self,
        group_risks: &[GroupRisk],
        configs: &HashMap<&str, &GroupRiskConfig>,
    ) -> f64 {
        if group_risks.is_empty() {
            return 0.0;
        }
        let group_count = group_risks.len() as f64;

        let mixed_groups = group_risks
            .iter()
            .filter(|g| g.accepted_members > 0 && g.accepted_members < g.total_members)
            .count() as f64;
        let mixed_factor = mixed_groups / group_count * 50.0;

        let oversized_groups = group_risks
            .iter()
            .filter(|g| {
                let profile = self.resolve_profile(
                    &g.group_name,
                    configs.get(g.group_name.as_str()).copied(),
                );
                g.total_members > profile.max_acceptable_members * 2
            })
            .count() as f64;
        let oversized_factor = oversized_groups / group_count * 30.0;

        let unmanaged_groups = group_risks
            .iter()
            .filter(|g| g.accepted_members == 0 && g.total_members > 0)
            .count() as f64;
        let unmanaged_factor = unmanaged_groups / group_count * 40.0;

        (mixed_factor + oversized_factor + unmanaged_factor).min(100.0)
    }
}

/// Classify the move against the most recent prior historical point:
/// within +-5 points is stable, above is degrading, below is improving.
fn trend_against_history(
    global_score: f64,
    historical_scores: &[(DateTime<Utc>, f64)],
) -> (TrendDirection, f64) {
    let Some((_, previous_score)) = historical_scores.last() else {
        return (TrendDirection::Stable, 0.0);
    };

    let change = global_score - previous_score;
    let direction = if change > TREND_THRESHOLD {
        TrendDirection::Degrading
    } else if change < -TREND_THRESHOLD {
        TrendDirection::Improving
    } else {
        TrendDirection::Stable
    };

    (direction, round2(change.abs()))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn tally(group_name: &str, total: i32, accepted: i32) -> GroupTally {
        GroupTally {
            group_name: group_name.to_string(),
            total_members: total,
            accepted_members: accepted,
        }
    }

    #[test]
    fn test_fully_accepted_group_has_zero_risk() {
        let calculator = RiskCalculator::new();
        let risk = calculator.calculate_group_risk("Enterprise Admins", 2, 2, None);
        assert_eq!(risk.risk_score, 0.0);
        assert_eq!(risk.unaccepted_members, 0);
        assert_eq!(risk.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn test_zero_acceptance_critical_group_is_clamped() {
        let calculator = RiskCalculator::new();
        let risk = calculator.calculate_group_risk("Enterprise Admins", 2, 0, None);
        // (100 ratio + 10 excess + 25 penalty) * 2.5, clamped to 100
        assert_eq!(risk.risk_score, 100.0);
        assert_eq!(risk.contributing_factors["zero_acceptance_penalty"], 25.0);
        assert_eq!(risk.contributing_factors["criticality_multiplier"], 2.5);
    }

    #[test]
    fn test_excess_member_points_are_capped() {
        let calculator = RiskCalculator::new();
        let risk = calculator.calculate_group_risk("Print Operators", 20, 2, None);
        // 18 unaccepted, 10 over the threshold of 8: capped at 50
        assert_eq!(risk.contributing_factors["excess_members"], 50.0);
    }

    #[test]
    fn test_unknown_group_uses_default_profile() {
        let calculator = RiskCalculator::new();
        let risk = calculator.calculate_group_risk("Helpdesk Tier 2", 4, 2, None);
        assert_eq!(risk.risk_level, RiskLevel::Low);
        // ratio 50, no excess, no penalty, multiplier 1.0
        assert_eq!(risk.risk_score, 50.0);
    }

    #[test]
    fn test_config_override_changes_threshold() {
        let calculator = RiskCalculator::new();
        let config = GroupRiskConfig {
            group_name: "Domain Admins".to_string(),
            domain: "corp.local".to_string(),
            max_acceptable_members: 10,
            ..Default::default()
        };
        let without = calculator.calculate_group_risk("Domain Admins", 8, 0, None);
        let with = calculator.calculate_group_risk("Domain Admins", 8, 0, Some(&config));
        assert!(without.contributing_factors["excess_members"] > 0.0);
        assert_eq!(with.contributing_factors["excess_members"], 0.0);
    }

    #[test]
    fn test_domain_risk_composite_weights() {
        let calculator = RiskCalculator::new();
        let assessment = calculator.calculate_domain_risk(
            "corp.local",
            &[tally("Domain Admins", 5, 0)],
            &[],
            Utc::now(),
        );

        let expected = assessment.access_governance_score * 0.3
            + assessment.privilege_escalation_score * 0.4
            + assessment.compliance_posture_score * 0.2
            + assessment.operational_risk_score * 0.1;
        assert!((assessment.domain_group_score - expected).abs() < 1e-9);
        assert!(assessment.domain_group_score > 0.0);
        assert_eq!(assessment.group_risks.len(), 1);
        assert_eq!(
            assessment.calculation_metadata["calculation_method"],
            serde_json::json!("weighted_group_aggregation")
        );
    }

    #[test]
    fn test_privilege_escalation_ignores_low_groups() {
        let calculator = RiskCalculator::new();
        let assessment = calculator.calculate_domain_risk(
            "corp.local",
            &[tally("Print Operators", 6, 0), tally("Custom App Owners", 3, 0)],
            &[],
            Utc::now(),
        );
        assert_eq!(assessment.privilege_escalation_score, 0.0);
    }

    #[test]
    fn test_operational_risk_factors() {
        let calculator = RiskCalculator::new();
        // One mixed group, one unmanaged and oversized group
        let assessment = calculator.calculate_domain_risk(
            "corp.local",
            &[
                tally("Administrators", 4, 2),
                tally("Domain Admins", 6, 0),
            ],
            &[],
            Utc::now(),
        );
        // mixed: 1/2 * 50 = 25; oversized (6 > 2*2): 1/2 * 30 = 15; unmanaged: 1/2 * 40 = 20
        assert!((assessment.operational_risk_score - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_global_score_with_config_audit_only() {
        let calculator = RiskCalculator::new();
        let global = calculator.calculate_global_risk(
            "corp.local",
            Some(80.0),
            60.0,
            None,
            &[],
            Utc::now(),
        );

        assert_eq!(global.global_score, 74.0);
        assert!((global.config_audit_contribution.unwrap() - 75.68).abs() < 0.1);
        assert!((global.domain_group_contribution - 24.32).abs() < 0.1);
        assert!(global.awareness_contribution.is_none());

        // Non-null contributions sum to 100
        let sum = global.config_audit_contribution.unwrap() + global.domain_group_contribution;
        assert!((sum - 100.0).abs() < 0.1);
    }

    #[test]
    fn test_global_score_with_groups_only() {
        let calculator = RiskCalculator::new();
        let global =
            calculator.calculate_global_risk("corp.local", None, 60.0, None, &[], Utc::now());

        assert_eq!(global.global_score, 60.0);
        assert_eq!(global.domain_group_contribution, 100.0);
        assert!(global.config_audit_contribution.is_none());
    }

    #[test]
    fn test_global_score_with_all_signals() {
        let calculator = RiskCalculator::new();
        // Awareness 70 -> risk 30
        let global = calculator.calculate_global_risk(
            "corp.local",
            Some(80.0),
            60.0,
            Some(70.0),
            &[],
            Utc::now(),
        );

        let expected = 80.0 * 0.55 + 60.0 * 0.30 + 30.0 * 0.15;
        assert!((global.global_score - round2(expected)).abs() < 1e-9);

        let sum = global.config_audit_contribution.unwrap()
            + global.domain_group_contribution
            + global.awareness_contribution.unwrap();
        assert!((sum - 100.0).abs() < 0.1);
    }

    #[test]
    fn test_awareness_without_config_audit() {
        let calculator = RiskCalculator::new();
        let global = calculator.calculate_global_risk(
            "corp.local",
            None,
            40.0,
            Some(90.0),
            &[],
            Utc::now(),
        );
        // 40 * 0.65 + 10 * 0.35
        assert_eq!(global.global_score, 29.5);
    }

    #[test]
    fn test_trend_classification() {
        let calculator = RiskCalculator::new();
        let start = Utc::now() - Duration::days(7);
        // Seven days strictly decreasing by one point per day, ending at 64
        let history: Vec<(DateTime<Utc>, f64)> = (0..7)
            .map(|day| (start + Duration::days(day), 70.0 - day as f64))
            .collect();

        // Eight points below the most recent history point: improving
        let global = calculator.calculate_global_risk(
            "corp.local",
            None,
            56.0,
            None,
            &history,
            Utc::now(),
        );
        assert_eq!(global.trend_direction, TrendDirection::Improving);
        assert!((global.trend_percentage - 8.0).abs() < 1e-9);

        // Three points below: stable
        let global = calculator.calculate_global_risk(
            "corp.local",
            None,
            61.0,
            None,
            &history,
            Utc::now(),
        );
        assert_eq!(global.trend_direction, TrendDirection::Stable);
        assert!((global.trend_percentage - 3.0).abs() < 1e-9);

        // Eight points above: degrading
        let global = calculator.calculate_global_risk(
            "corp.local",
            None,
            72.0,
            None,
            &history,
            Utc::now(),
        );
        assert_eq!(global.trend_direction, TrendDirection::Degrading);
    }

    #[test]
    fn test_trend_without_history_is_stable() {
        let calculator = RiskCalculator::new();
        let global =
            calculator.calculate_global_risk("corp.local", None, 50.0, None, &[], Utc::now());
        assert_eq!(global.trend_direction, TrendDirection::Stable);
        assert_eq!(global.trend_percentage, 0.0);
    }

    #[test]
    fn test_empty_assessment() {
        let calculator = RiskCalculator::new();
        let assessment = calculator.empty_assessment("corp.local", Utc::now());
        assert_eq!(assessment.domain_group_score, 0.0);
        assert!(assessment.group_risks.is_empty());
        assert_eq!(
            assessment.calculation_metadata["status"],
            serde_json::json!("no_data")
        );
    }

    #[test]
    fn test_scores_stay_in_bounds() {
        let calculator = RiskCalculator::new();
        let assessment = calculator.calculate_domain_risk(
            "corp.local",
            &[
                tally("Domain Admins", 50, 0),
                tally("Enterprise Admins", 30, 0),
                tally("Schema Admins", 20, 0),
            ],
            &[],
            Utc::now(),
        );

        for score in [
            assessment.access_governance_score,
            assessment.privilege_escalation_score,
            assessment.compliance_posture_score,
            assessment.operational_risk_score,
            assessment.domain_group_score,
        ] {
            assert!((0.0..=100.0).contains(&score), "score {} out of bounds", score);
        }
        for group in &assessment.group_risks {
            assert!((0.0..=100.0).contains(&group.risk_score));
        }
    }
}
