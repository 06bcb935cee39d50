// =====================================================================================
// File: posture-service/src/handlers.rs
// Description: HTTP handlers for uploads, operator decisions and risk reads
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use crate::upload::UploadError;
use crate::AppState;
use actix_web::{delete, get, post, web, HttpResponse, Responder};
use core_model::{
    AcceptedGroupMember, AcceptedRisk, Agent, ApiBulkUploadRequest, ApiUploadRequest,
    GroupRiskConfig, MemberToggleResponse, MonitoredGroup, Settings, ToolType,
};
use core_risk::RiskError;
use core_store::{HealthChecker, MigrationRunner, StoreError};
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use tracing::{error, info};
use uuid::Uuid;

fn store_error_response(err: &StoreError) -> HttpResponse {
    let body = json!({"status": "error", "code": err.error_code(), "detail": err.to_string()});
    match err.error_code() {
        "NOT_FOUND" => HttpResponse::NotFound().json(body),
        "CONFLICT" => HttpResponse::Conflict().json(body),
        _ => HttpResponse::InternalServerError().json(body),
    }
}

fn risk_error_response(err: &RiskError) -> HttpResponse {
    match err {
        RiskError::Store(inner) => store_error_response(inner),
        RiskError::Serialization(_) => HttpResponse::InternalServerError().json(json!({
            "status": "error",
            "code": err.error_code(),
            "detail": err.to_string(),
        })),
    }
}

fn upload_error_response(err: &UploadError) -> HttpResponse {
    let body = json!({"status": "error", "code": err.error_code(), "detail": err.to_string()});
    match err.status_code() {
        400 => HttpResponse::BadRequest().json(body),
        404 => HttpResponse::NotFound().json(body),
        409 => HttpResponse::Conflict().json(body),
        422 => HttpResponse::UnprocessableEntity().json(body),
        _ => HttpResponse::InternalServerError().json(body),
    }
}

// -------------------------------------------------------------------------
// Ingestion
// -------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct FileUploadQuery {
    pub filename: String,
}

/// POST /upload - file upload (opaque blob + filename)
#[post("/upload")]
pub async fn upload_file(
    state: web::Data<AppState>,
    query: web::Query<FileUploadQuery>,
    body: web::Bytes,
) -> impl Responder {
    match state
        .uploads
        .process_file_upload(&query.filename, &body)
        .await
    {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(e) => {
            error!("File upload failed for {}: {}", query.filename, e);
            upload_error_response(&e)
        }
    }
}

/// POST /api/upload/report - programmatic JSON upload
#[post("/api/upload/report")]
pub async fn upload_report(
    state: web::Data<AppState>,
    request: web::Json<ApiUploadRequest>,
) -> impl Responder {
    match state.uploads.process_api_upload(request.into_inner()).await {
        Ok(response) => {
            info!(
                "API upload successful: {} ({})",
                response.report_id, response.tool_type
            );
            HttpResponse::Ok().json(response)
        }
        Err(e) => {
            error!("API upload failed: {}", e);
            upload_error_response(&e)
        }
    }
}

/// POST /api/upload/reports - bulk upload with per-item outcomes
#[post("/api/upload/reports")]
pub async fn upload_reports_bulk(
    state: web::Data<AppState>,
    request: web::Json<ApiBulkUploadRequest>,
) -> impl Responder {
    let response = state.uploads.process_bulk_upload(request.into_inner()).await;
    HttpResponse::Ok().json(response)
}

// -------------------------------------------------------------------------
// Reports
// -------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ReportListQuery {
    pub domain: Option<String>,
    pub tool_type: Option<String>,
}

/// GET /api/reports - report summaries
#[get("/api/reports")]
pub async fn list_reports(
    state: web::Data<AppState>,
    query: web::Query<ReportListQuery>,
) -> impl Responder {
    let tool_type = match query.tool_type.as_deref().map(ToolType::from_str) {
        Some(Err(e)) => {
            return HttpResponse::BadRequest()
                .json(json!({"status": "error", "code": "INPUT_INVALID", "detail": e.to_string()}))
        }
        Some(Ok(tool_type)) => Some(tool_type),
        None => None,
    };

    match state
        .store
        .get_all_reports_summary(query.domain.as_deref(), tool_type)
        .await
    {
        Ok(summaries) => HttpResponse::Ok().json(summaries),
        Err(e) => store_error_response(&e),
    }
}

/// GET /api/reports/{id} - full report with findings
#[get("/api/reports/{id}")]
pub async fn get_report(state: web::Data<AppState>, path: web::Path<Uuid>) -> impl Responder {
    match state.store.get_report(path.into_inner()).await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(e) => store_error_response(&e),
    }
}

/// GET /api/reports/{id}/memberships - membership observations of a report
#[get("/api/reports/{id}/memberships")]
pub async fn get_report_memberships(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> impl Responder {
    match state.store.get_group_memberships(path.into_inner()).await {
        Ok(memberships) => HttpResponse::Ok().json(memberships),
        Err(e) => store_error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct GroupedFindingsQuery {
    pub tool_type: Option<String>,
    pub category: Option<String>,
}

/// GET /api/findings/grouped - recurring risk kinds across reports
#[get("/api/findings/grouped")]
pub async fn get_grouped_findings(
    state: web::Data<AppState>,
    query: web::Query<GroupedFindingsQuery>,
) -> impl Responder {
    let tool_type = query
        .tool_type
        .as_deref()
        .and_then(|raw| ToolType::from_str(raw).ok());
    match state
        .store
        .get_grouped_findings(tool_type, query.category.as_deref())
        .await
    {
        Ok(grouped) => HttpResponse::Ok().json(grouped),
        Err(e) => store_error_response(&e),
    }
}

// -------------------------------------------------------------------------
// Accepted risks
// -------------------------------------------------------------------------

/// GET /api/risks - the recurring-risk catalog
#[get("/api/risks")]
pub async fn get_risk_catalog(
    state: web::Data<AppState>,
    query: web::Query<GroupedFindingsQuery>,
) -> impl Responder {
    let tool_type = query
        .tool_type
        .as_deref()
        .and_then(|raw| ToolType::from_str(raw).ok());
    match state.store.get_risk_catalog(tool_type).await {
        Ok(catalog) => HttpResponse::Ok().json(catalog),
        Err(e) => store_error_response(&e),
    }
}

/// GET /api/risks/accepted
#[get("/api/risks/accepted")]
pub async fn get_accepted_risks(state: web::Data<AppState>) -> impl Responder {
    match state.store.get_accepted_risks().await {
        Ok(risks) => HttpResponse::Ok().json(risks),
        Err(e) => store_error_response(&e),
    }
}

/// POST /api/risks/accepted - accept a risk kind (idempotent)
#[post("/api/risks/accepted")]
pub async fn add_accepted_risk(
    state: web::Data<AppState>,
    risk: web::Json<AcceptedRisk>,
) -> impl Responder {
    match state.store.upsert_accepted_risk(&risk).await {
        Ok(()) => HttpResponse::Ok().json(json!({"status": "ok"})),
        Err(e) => store_error_response(&e),
    }
}

/// DELETE /api/risks/accepted - withdraw an acceptance
#[delete("/api/risks/accepted")]
pub async fn remove_accepted_risk(
    state: web::Data<AppState>,
    risk: web::Json<AcceptedRisk>,
) -> impl Responder {
    match state
        .store
        .remove_accepted_risk(risk.tool_type, &risk.category, &risk.name)
        .await
    {
        Ok(()) => HttpResponse::Ok().json(json!({"status": "ok"})),
        Err(e) => store_error_response(&e),
    }
}

// -------------------------------------------------------------------------
// Monitored groups and risk configs
// -------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct DomainQuery {
    pub domain: Option<String>,
}

/// GET /api/monitored-groups
#[get("/api/monitored-groups")]
pub async fn get_monitored_groups(
    state: web::Data<AppState>,
    query: web::Query<DomainQuery>,
) -> impl Responder {
    match state
        .store
        .get_monitored_groups(query.domain.as_deref())
        .await
    {
        Ok(groups) => HttpResponse::Ok().json(groups),
        Err(e) => store_error_response(&e),
    }
}

/// POST /api/monitored-groups
#[post("/api/monitored-groups")]
pub async fn add_monitored_group(
    state: web::Data<AppState>,
    group: web::Json<MonitoredGroup>,
) -> impl Responder {
    match state.store.add_monitored_group(&group).await {
        Ok(group_id) => HttpResponse::Ok().json(json!({"status": "ok", "group_id": group_id})),
        Err(e) => store_error_response(&e),
    }
}

/// GET /api/domain-groups/configs
#[get("/api/domain-groups/configs")]
pub async fn get_group_risk_configs(
    state: web::Data<AppState>,
    query: web::Query<DomainQuery>,
) -> impl Responder {
    match state
        .store
        .get_group_risk_configs(query.domain.as_deref())
        .await
    {
        Ok(configs) => HttpResponse::Ok().json(configs),
        Err(e) => store_error_response(&e),
    }
}

/// POST /api/domain-groups/configs
#[post("/api/domain-groups/configs")]
pub async fn save_group_risk_config(
    state: web::Data<AppState>,
    config: web::Json<GroupRiskConfig>,
) -> impl Responder {
    match state.store.save_group_risk_config(&config).await {
        Ok(config_id) => HttpResponse::Ok().json(json!({"status": "ok", "config_id": config_id})),
        Err(e) => store_error_response(&e),
    }
}

// -------------------------------------------------------------------------
// Accepted group members
// -------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct MemberQuery {
    pub domain: Option<String>,
    pub group_name: Option<String>,
}

/// GET /api/domain-groups/members/accepted
#[get("/api/domain-groups/members/accepted")]
pub async fn get_accepted_members(
    state: web::Data<AppState>,
    query: web::Query<MemberQuery>,
) -> impl Responder {
    match state
        .store
        .get_accepted_group_members(query.domain.as_deref(), query.group_name.as_deref())
        .await
    {
        Ok(members) => HttpResponse::Ok().json(members),
        Err(e) => store_error_response(&e),
    }
}

/// POST /api/domain-groups/members/accept - accept a member.
/// The acceptance write decides success; recomputation is a substatus.
#[post("/api/domain-groups/members/accept")]
pub async fn accept_group_member(
    state: web::Data<AppState>,
    member: web::Json<AcceptedGroupMember>,
) -> impl Responder {
    let member = member.into_inner();
    let member_id = match state.store.upsert_accepted_group_member(&member).await {
        Ok(member_id) => member_id,
        Err(e) => {
            error!(
                "Failed to accept member {} in group {}: {}",
                member.member_name, member.group_name, e
            );
            return store_error_response(&e);
        }
    };

    let (risk_status, risk_error) =
        run_member_risk_update(&state, &member.domain, &member.group_name).await;

    HttpResponse::Ok().json(MemberToggleResponse {
        status: "ok".to_string(),
        member_id: Some(member_id),
        risk_calculation_status: risk_status,
        risk_error,
    })
}

/// DELETE /api/domain-groups/members/accept - deny a member again
#[delete("/api/domain-groups/members/accept")]
pub async fn remove_accepted_member(
    state: web::Data<AppState>,
    member: web::Json<AcceptedGroupMember>,
) -> impl Responder {
    let member = member.into_inner();
    if let Err(e) = state
        .store
        .remove_accepted_group_member(&member.domain, &member.group_name, &member.member_name)
        .await
    {
        error!(
            "Failed to remove acceptance for {} in group {}: {}",
            member.member_name, member.group_name, e
        );
        return store_error_response(&e);
    }

    let (risk_status, risk_error) =
        run_member_risk_update(&state, &member.domain, &member.group_name).await;

    HttpResponse::Ok().json(MemberToggleResponse {
        status: "ok".to_string(),
        member_id: None,
        risk_calculation_status: risk_status,
        risk_error,
    })
}

/// Reactive recomputation after a member toggle. Failures never fail the
/// toggle; they surface as the substatus pair.
async fn run_member_risk_update(
    state: &AppState,
    domain: &str,
    group_name: &str,
) -> (String, Option<String>) {
    match state.risk.on_member_change(domain, group_name).await {
        Ok(_) => ("success".to_string(), None),
        Err(e) => {
            error!(
                "Failed to update risk scores after member toggle in {}: {}",
                domain, e
            );
            ("failed".to_string(), Some(e.to_string()))
        }
    }
}

// -------------------------------------------------------------------------
// Risk reads
// -------------------------------------------------------------------------

/// GET /api/risk/global/{domain} - combined global score (cache-gated)
#[get("/api/risk/global/{domain}")]
pub async fn get_global_risk(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    match state.risk.recompute_global(&path).await {
        Ok(global) => HttpResponse::Ok().json(global),
        Err(e) => risk_error_response(&e),
    }
}

/// GET /api/risk/breakdown/{domain}
#[get("/api/risk/breakdown/{domain}")]
pub async fn get_risk_breakdown(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    match state.risk.get_breakdown(&path).await {
        Ok(breakdown) => HttpResponse::Ok().json(breakdown),
        Err(e) => risk_error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_days")]
    pub days: i64,
}

fn default_history_days() -> i64 {
    30
}

/// GET /api/risk/history/{domain}?days=30
#[get("/api/risk/history/{domain}")]
pub async fn get_risk_history(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<HistoryQuery>,
) -> impl Responder {
    match state.risk.get_history(&path, query.days).await {
        Ok(history) => HttpResponse::Ok().json(history),
        Err(e) => risk_error_response(&e),
    }
}

/// GET /api/risk/comparison - all domains side by side
#[get("/api/risk/comparison")]
pub async fn get_risk_comparison(state: web::Data<AppState>) -> impl Responder {
    match state.risk.compare_across_domains().await {
        Ok(comparison) => HttpResponse::Ok().json(comparison),
        Err(e) => risk_error_response(&e),
    }
}

/// POST /api/risk/recalculate/{domain} - forced recomputation
#[post("/api/risk/recalculate/{domain}")]
pub async fn recalculate_risk(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let domain = path.into_inner();
    state.risk.cache().invalidate_domain(&domain);

    if let Err(e) = state.risk.recompute_domain(&domain, true).await {
        return risk_error_response(&e);
    }
    match state.risk.recompute_global(&domain).await {
        Ok(global) => HttpResponse::Ok().json(json!({"status": "ok", "global_risk": global})),
        Err(e) => risk_error_response(&e),
    }
}

// -------------------------------------------------------------------------
// Dashboard
// -------------------------------------------------------------------------

/// GET /api/dashboard/kpis - composite-view KPIs
#[get("/api/dashboard/kpis")]
pub async fn get_dashboard_kpis(
    state: web::Data<AppState>,
    query: web::Query<DomainQuery>,
) -> impl Responder {
    match state.store.get_dashboard_kpis(query.domain.as_deref()).await {
        Ok(Some(kpis)) => HttpResponse::Ok().json(json!({"status": "ok", "kpis": kpis})),
        Ok(None) => HttpResponse::Ok().json(json!({
            "status": "no_data",
            "message": "No reports found"
        })),
        Err(e) => store_error_response(&e),
    }
}

/// GET /api/domains - domains with at least one report
#[get("/api/domains")]
pub async fn get_domains(state: web::Data<AppState>) -> impl Responder {
    match state.store.get_domains().await {
        Ok(domains) => HttpResponse::Ok().json(domains),
        Err(e) => store_error_response(&e),
    }
}

// -------------------------------------------------------------------------
// Settings and alerting
// -------------------------------------------------------------------------

/// GET /api/settings
#[get("/api/settings")]
pub async fn get_settings(state: web::Data<AppState>) -> impl Responder {
    match state.store.get_settings().await {
        Ok(settings) => HttpResponse::Ok().json(settings),
        Err(e) => store_error_response(&e),
    }
}

/// POST /api/settings
#[post("/api/settings")]
pub async fn update_settings(
    state: web::Data<AppState>,
    settings: web::Json<Settings>,
) -> impl Responder {
    match state.store.update_settings(&settings).await {
        Ok(()) => HttpResponse::Ok().json(json!({"status": "ok"})),
        Err(e) => store_error_response(&e),
    }
}

/// POST /api/alerts/test - send a test alert to the configured webhook
#[post("/api/alerts/test")]
pub async fn send_test_alert(state: web::Data<AppState>) -> impl Responder {
    let settings = match state.store.get_settings().await {
        Ok(settings) => settings,
        Err(e) => return store_error_response(&e),
    };

    match state.alerter.send_test_alert(&settings).await {
        Ok(()) => HttpResponse::Ok().json(json!({"status": "success"})),
        Err(e) => HttpResponse::BadGateway().json(json!({
            "status": "error",
            "code": e.error_code(),
            "detail": e.to_string(),
        })),
    }
}

// -------------------------------------------------------------------------
// Agents
// -------------------------------------------------------------------------

/// GET /api/agents
#[get("/api/agents")]
pub async fn get_agents(state: web::Data<AppState>) -> impl Responder {
    match state.store.get_agents().await {
        Ok(agents) => HttpResponse::Ok().json(agents),
        Err(e) => store_error_response(&e),
    }
}

/// POST /api/agents - registration / heartbeat upsert
#[post("/api/agents")]
pub async fn upsert_agent(state: web::Data<AppState>, agent: web::Json<Agent>) -> impl Responder {
    match state.store.upsert_agent(&agent).await {
        Ok(agent_id) => HttpResponse::Ok().json(json!({"status": "ok", "agent_id": agent_id})),
        Err(e) => store_error_response(&e),
    }
}

// -------------------------------------------------------------------------
// Health and diagnostics
// -------------------------------------------------------------------------

/// GET /health - quick connectivity check
#[get("/health")]
pub async fn quick_health(state: web::Data<AppState>) -> impl Responder {
    let checker = HealthChecker::new(state.store.pool().clone());
    let result = checker.run_quick_check().await;
    HttpResponse::Ok().json(json!({
        "status": result.status.as_str(),
        "message": result.message,
        "duration_ms": result.duration_ms,
        "degraded_start": state.degraded_start,
    }))
}

/// GET /health/full - all schema and latency checks
#[get("/health/full")]
pub async fn full_health(state: web::Data<AppState>) -> impl Responder {
    let checker = HealthChecker::new(state.store.pool().clone());
    HttpResponse::Ok().json(checker.run_full_check().await)
}

/// GET /api/debug/migrations - migration ledger status
#[get("/api/debug/migrations")]
pub async fn migration_status(state: web::Data<AppState>) -> impl Responder {
    let runner = MigrationRunner::new(
        state.store.pool().clone(),
        state.migrations_dir.clone(),
    );
    match runner.status().await {
        Ok(status) => HttpResponse::Ok().json(status),
        Err(e) => store_error_response(&e),
    }
}

/// GET /api/debug/cache - cache statistics
#[get("/api/debug/cache")]
pub async fn cache_stats(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.risk.cache().get_stats())
}

/// POST /api/debug/cache/clear
#[post("/api/debug/cache/clear")]
pub async fn clear_cache(state: web::Data<AppState>) -> impl Responder {
    let cleared = state.risk.cache().clear();
    HttpResponse::Ok().json(json!({"status": "ok", "cleared_entries": cleared}))
}
