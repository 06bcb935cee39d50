// =====================================================================================
// File: posture-service/src/main.rs
// Description: Actix-web HTTP server for the DomainWatch posture platform
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use actix_web::{web, App, HttpServer};
use core_config::ConfigLoader;
use core_store::{create_pool, run_migrations_on_startup, HealthChecker, ReportStore};
use posture_service::{handlers, AppState};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const MIGRATIONS_DIR: &str = "migrations";

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigLoader::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.observability.log_level.clone())),
        )
        .init();

    info!("Starting {} service", config.observability.service_name);

    let pool = create_pool(&config.database).await?;

    // Apply pending schema migrations; a failure leaves the service running
    // in degraded mode rather than refusing to start
    let migrations_dir = PathBuf::from(MIGRATIONS_DIR);
    let migrations_ok = run_migrations_on_startup(pool.clone(), migrations_dir.clone()).await;
    if !migrations_ok {
        warn!("Schema migrations incomplete; service running in degraded mode");
    }

    let health = HealthChecker::new(pool.clone()).run_full_check().await;
    info!(
        "Startup health check: {} ({} checks)",
        health.overall_status.as_str(),
        health.checks.len()
    );

    let state = AppState::new(
        &config,
        ReportStore::new(pool),
        migrations_dir,
        !migrations_ok,
    );

    let bind_addr = (config.server.host.clone(), config.server.port);
    info!("Listening on {}:{}", bind_addr.0, bind_addr.1);

    // Transport cap sits above the configured limit; the upload pipeline
    // enforces the real one
    let payload_limit = config.upload.max_size_bytes + 64 * 1024;

    let mut server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .app_data(web::PayloadConfig::new(payload_limit))
            // Ingestion
            .service(handlers::upload_file)
            .service(handlers::upload_report)
            .service(handlers::upload_reports_bulk)
            // Reports and findings
            .service(handlers::list_reports)
            .service(handlers::get_report)
            .service(handlers::get_report_memberships)
            .service(handlers::get_grouped_findings)
            // Risk catalog and accepted risks
            .service(handlers::get_risk_catalog)
            .service(handlers::get_accepted_risks)
            .service(handlers::add_accepted_risk)
            .service(handlers::remove_accepted_risk)
            // Groups
            .service(handlers::get_monitored_groups)
            .service(handlers::add_monitored_group)
            .service(handlers::get_group_risk_configs)
            .service(handlers::save_group_risk_config)
            .service(handlers::get_accepted_members)
            .service(handlers::accept_group_member)
            .service(handlers::remove_accepted_member)
            // Risk
            .service(handlers::get_global_risk)
            .service(handlers::get_risk_breakdown)
            .service(handlers::get_risk_history)
            .service(handlers::get_risk_comparison)
            .service(handlers::recalculate_risk)
            // Dashboard
            .service(handlers::get_dashboard_kpis)
            .service(handlers::get_domains)
            // Settings and alerting
            .service(handlers::get_settings)
            .service(handlers::update_settings)
            .service(handlers::send_test_alert)
            // Agents
            .service(handlers::get_agents)
            .service(handlers::upsert_agent)
            // Health and diagnostics
            .service(handlers::quick_health)
            .service(handlers::full_health)
            .service(handlers::migration_status)
            .service(handlers::cache_stats)
            .service(handlers::clear_cache)
    });

    if let Some(workers) = config.server.workers {
        server = server.workers(workers);
    }

    server.bind(bind_addr)?.run().await?;
    Ok(())
}
