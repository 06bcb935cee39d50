// =====================================================================================
// File: core-risk/tests/risk_scenarios.rs
// Description: End-to-end calculator scenarios: score mixing, toggles, trends
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use chrono::{DateTime, Duration, Utc};
use core_model::{RiskLevel, TrendDirection};
use core_risk::{GroupTally, RiskCalculator};

fn tally(group_name: &str, total: i32, accepted: i32) -> GroupTally {
    GroupTally {
        group_name: group_name.to_string(),
        total_members: total,
        accepted_members: accepted,
    }
}

/// A domain with one five-member Domain Admins group and nothing accepted
/// must produce a positive domain-group score.
#[test]
fn test_unmanaged_admin_group_produces_positive_score() {
    let calculator = RiskCalculator::new();
    let assessment = calculator.calculate_domain_risk(
        "corp.local",
        &[tally("Domain Admins", 5, 0)],
        &[],
        Utc::now(),
    );

    assert!(assessment.domain_group_score > 0.0);
    assert!(assessment.privilege_escalation_score > 0.0);
    assert_eq!(assessment.group_risks[0].risk_level, RiskLevel::Critical);
}

/// Audit score 80 and group score 60 without awareness mix as 70/30.
#[test]
fn test_two_signal_mixing() {
    let calculator = RiskCalculator::new();
    let global =
        calculator.calculate_global_risk("corp.local", Some(80.0), 60.0, None, &[], Utc::now());

    assert_eq!(global.global_score, 74.0);
    let config_contribution = global.config_audit_contribution.unwrap();
    assert!((config_contribution - 75.7).abs() < 0.1);
    assert!((global.domain_group_contribution - 24.3).abs() < 0.1);
}

/// Without an audit score the group signal carries the whole weight.
#[test]
fn test_single_signal_mixing() {
    let calculator = RiskCalculator::new();
    let global = calculator.calculate_global_risk("corp.local", None, 60.0, None, &[], Utc::now());

    assert_eq!(global.global_score, 60.0);
    assert_eq!(global.domain_group_contribution, 100.0);
    assert!(global.config_audit_contribution.is_none());
    assert!(global.awareness_contribution.is_none());
}

/// Enterprise Admins fully accepted scores zero; revoking both acceptances
/// triggers the zero-acceptance penalty and the escalation multiplier.
#[test]
fn test_acceptance_toggle_effect_on_group_risk() {
    let calculator = RiskCalculator::new();

    let accepted = calculator.calculate_group_risk("Enterprise Admins", 2, 2, None);
    assert_eq!(accepted.risk_score, 0.0);

    let revoked = calculator.calculate_group_risk("Enterprise Admins", 2, 0, None);
    assert!(revoked.risk_score >= 25.0);
    assert_eq!(revoked.risk_score, 100.0);
    assert_eq!(
        revoked.contributing_factors["zero_acceptance_penalty"],
        25.0
    );
}

/// Accept-then-deny is a round trip: the domain score equals the score
/// computed before the toggle pair.
#[test]
fn test_toggle_round_trip_is_idempotent() {
    let calculator = RiskCalculator::new();
    let date = Utc::now();
    let groups = [tally("Domain Admins", 4, 1), tally("Backup Operators", 6, 2)];

    let before = calculator.calculate_domain_risk("corp.local", &groups, &[], date);

    // Accept one more member, then deny them again
    let toggled = [tally("Domain Admins", 4, 2), tally("Backup Operators", 6, 2)];
    let during = calculator.calculate_domain_risk("corp.local", &toggled, &[], date);
    let after = calculator.calculate_domain_risk("corp.local", &groups, &[], date);

    assert_ne!(
        before.domain_group_score, during.domain_group_score,
        "the toggle itself must move the score"
    );
    assert_eq!(before.domain_group_score, after.domain_group_score);
    assert_eq!(
        before.access_governance_score,
        after.access_governance_score
    );
}

/// Same inputs and timestamp produce identical assessment content; the
/// day-keyed upsert relies on this for idempotent recomputation.
#[test]
fn test_deterministic_recomputation() {
    let calculator = RiskCalculator::new();
    let date = Utc::now();
    let groups = [
        tally("Domain Admins", 3, 1),
        tally("Schema Admins", 1, 0),
        tally("Print Operators", 9, 4),
    ];

    let first = calculator.calculate_domain_risk("corp.local", &groups, &[], date);
    let second = calculator.calculate_domain_risk("corp.local", &groups, &[], date);

    assert_eq!(
        serde_json::to_value(&first).unwrap(),
        serde_json::to_value(&second).unwrap()
    );
}

/// Seven strictly decreasing days of history: a new score 8 below the most
/// recent point is improving, 3 below is stable.
#[test]
fn test_trend_scenarios() {
    let calculator = RiskCalculator::new();
    let start = Utc::now() - Duration::days(7);
    let history: Vec<(DateTime<Utc>, f64)> = (0..7)
        .map(|day| (start + Duration::days(day), 70.0 - day as f64))
        .collect();
    let latest = history.last().unwrap().1;

    let improving = calculator.calculate_global_risk(
        "corp.local",
        None,
        latest - 8.0,
        None,
        &history,
        Utc::now(),
    );
    assert_eq!(improving.trend_direction, TrendDirection::Improving);
    assert!((improving.trend_percentage - 8.0).abs() < 1e-9);

    let stable = calculator.calculate_global_risk(
        "corp.local",
        None,
        latest - 3.0,
        None,
        &history,
        Utc::now(),
    );
    assert_eq!(stable.trend_direction, TrendDirection::Stable);
    assert!((stable.trend_percentage - 3.0).abs() < 1e-9);
}

/// Non-null contribution percentages always sum to 100 (within rounding)
/// for every availability combination with a nonzero global score.
#[test]
fn test_contribution_percentages_compose() {
    let calculator = RiskCalculator::new();
    let cases = [
        (Some(80.0), 60.0, Some(70.0)),
        (Some(80.0), 60.0, None),
        (None, 60.0, Some(70.0)),
        (None, 60.0, None),
    ];

    for (config, group, awareness) in cases {
        let global = calculator.calculate_global_risk(
            "corp.local",
            config,
            group,
            awareness,
            &[],
            Utc::now(),
        );
        let sum = global.config_audit_contribution.unwrap_or(0.0)
            + global.domain_group_contribution
            + global.awareness_contribution.unwrap_or(0.0);
        assert!(
            (sum - 100.0).abs() <= 0.1,
            "contributions for {:?} sum to {}",
            (config, group, awareness),
            sum
        );
    }
}
