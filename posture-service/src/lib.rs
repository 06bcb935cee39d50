// =====================================================================================
// File: posture-service/src/lib.rs
// Description: HTTP boundary service wiring for the DomainWatch platform
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

//! # Posture Service
//!
//! Thin actix-web boundary over the core crates: ingestion (file and
//! programmatic uploads), operator decisions (accepted risks and members),
//! risk reads, settings, webhook alerting, and health/diagnostic endpoints.
//! Identity and authorization are enforced in front of this service.

pub mod alerter;
pub mod handlers;
pub mod upload;

use crate::alerter::Alerter;
use crate::upload::UploadService;
use core_config::AppConfig;
use core_risk::{RiskCache, RiskService};
use core_store::ReportStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Shared application state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ReportStore>,
    pub risk: Arc<RiskService>,
    pub alerter: Arc<Alerter>,
    pub uploads: Arc<UploadService>,
    pub migrations_dir: PathBuf,
    /// Set when startup migrations failed and the service runs degraded
    pub degraded_start: bool,
}

impl AppState {
    pub fn new(
        config: &AppConfig,
        store: ReportStore,
        migrations_dir: PathBuf,
        degraded_start: bool,
    ) -> Self {
        let store = Arc::new(store);
        let cache = Arc::new(RiskCache::new(
            config.risk_cache.max_entries,
            Duration::from_secs(config.risk_cache.default_ttl_seconds),
        ));
        let risk = Arc::new(RiskService::new(Arc::clone(&store), cache));
        let alerter = Arc::new(Alerter::new());
        let uploads = Arc::new(UploadService::new(
            Arc::clone(&store),
            Arc::clone(&risk),
            Arc::clone(&alerter),
            PathBuf::from(&config.upload.directory),
            config.upload.max_size_bytes,
        ));

        Self {
            store,
            risk,
            alerter,
            uploads,
            migrations_dir,
            degraded_start,
        }
    }
}
