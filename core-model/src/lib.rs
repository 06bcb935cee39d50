// =====================================================================================
// File: core-model/src/lib.rs
// Description: Shared data model for DomainWatch security posture platform
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

//! # Core Model
//!
//! Normalized entities shared by the parser registry, the persistent store,
//! and the risk engine: reports, findings, accepted risks, monitored groups,
//! group memberships and the operator-facing API DTOs.

pub mod api;
pub mod risk;
pub mod types;

pub use api::{
    ApiBulkUploadRequest, ApiBulkUploadResponse, ApiCategoryScores, ApiDomainMetadata,
    ApiFindingInput, ApiGroupData, ApiGroupMember, ApiUploadRequest, ApiUploadResponse,
    BulkUploadResult, MemberToggleResponse, UploadResponse,
};
pub use risk::{
    DomainRiskAssessment, GlobalRiskScore, GroupRisk, RiskLevel, RiskModelError, TrendDirection,
};
pub use types::{
    AcceptedGroupMember, AcceptedRisk, Agent, Finding, FindingStatus, GroupMembership,
    GroupRiskConfig, MemberType, Metadata, ModelError, MonitoredGroup, Report, ReportSummary,
    Risk, Settings, Severity, ToolType,
};

/// Finding category used for privileged-group membership findings across the
/// whole platform (parser, upload path, risk projection).
pub const GROUP_FINDING_CATEGORY: &str = "DomainGroups";

/// Build the canonical name of a group membership finding.
pub fn group_finding_name(group_name: &str) -> String {
    format!("Group_{}_Members", group_name)
}

/// Extract the group name back out of a group membership finding name.
pub fn group_name_from_finding(finding_name: &str) -> Option<&str> {
    finding_name
        .strip_prefix("Group_")
        .and_then(|rest| rest.strip_suffix("_Members"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_finding_name_round_trip() {
        let name = group_finding_name("Domain Admins");
        assert_eq!(name, "Group_Domain Admins_Members");
        assert_eq!(group_name_from_finding(&name), Some("Domain Admins"));
    }

    #[test]
    fn test_group_name_from_unrelated_finding() {
        assert_eq!(group_name_from_finding("S-DC-SubnetMissing"), None);
        assert_eq!(group_name_from_finding("Group_incomplete"), None);
    }
}
