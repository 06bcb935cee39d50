// =====================================================================================
// File: core-config/src/lib.rs
// Description: Centralized configuration management for DomainWatch platform
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use tracing::{info, warn};

/// Application configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub upload: UploadConfig,
    pub risk_cache: RiskCacheConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: u64,
    pub idle_timeout: u64,
    pub max_lifetime: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Directory where uploaded report files are stored
    pub directory: String,
    /// Maximum accepted upload size in bytes
    pub max_size_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskCacheConfig {
    pub max_entries: usize,
    pub default_ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub service_name: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                workers: None,
            },
            database: DatabaseConfig {
                url: "postgresql://localhost/domainwatch".to_string(),
                max_connections: 10,
                min_connections: 1,
                connect_timeout: 30,
                idle_timeout: 600,
                max_lifetime: 1800,
            },
            upload: UploadConfig {
                directory: "uploaded_reports".to_string(),
                max_size_bytes: 10 * 1024 * 1024,
            },
            risk_cache: RiskCacheConfig {
                max_entries: 1000,
                default_ttl_seconds: 300,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                service_name: "domainwatch".to_string(),
            },
        }
    }
}

/// Configuration loader with environment override support
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<AppConfig, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        info!("Loading configuration for environment: {}", run_mode);

        let config = Config::builder()
            // Start with default configuration
            .add_source(Config::try_from(&AppConfig::default())?)
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load local config file (for development overrides)
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (with DW_ prefix)
            .add_source(Environment::with_prefix("DW").separator("__"))
            .build()?;

        let mut app_config: AppConfig = config.try_deserialize()?;

        // Well-known deployment variables take precedence over everything else
        Self::apply_env_overrides(&mut app_config)?;
        Self::validate_config(&app_config)?;

        info!("Configuration loaded successfully");
        Ok(app_config)
    }

    /// Apply the flat deployment environment variables
    fn apply_env_overrides(config: &mut AppConfig) -> Result<(), ConfigError> {
        if let Ok(url) = env::var("DATABASE_URL") {
            config.database.url = url;
        }

        if let Ok(port) = env::var("PORT") {
            config.server.port = port
                .parse()
                .map_err(|_| ConfigError::Message(format!("Invalid PORT value: {}", port)))?;
        }

        if let Ok(size) = env::var("MAX_UPLOAD_SIZE") {
            config.upload.max_size_bytes = size.parse().map_err(|_| {
                ConfigError::Message(format!("Invalid MAX_UPLOAD_SIZE value: {}", size))
            })?;
        }

        Ok(())
    }

    /// Validate critical configuration values
    fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
        if config.database.url.contains("localhost")
            && env::var("RUN_MODE").unwrap_or_default() == "production"
        {
            warn!("Database URL uses localhost in production");
        }

        if config.upload.max_size_bytes == 0 {
            return Err(ConfigError::Message(
                "Upload size limit must be greater than zero".to_string(),
            ));
        }

        if config.risk_cache.max_entries == 0 {
            return Err(ConfigError::Message(
                "Risk cache capacity must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.upload.max_size_bytes, 10 * 1024 * 1024);
        assert_eq!(config.risk_cache.max_entries, 1000);
        assert_eq!(config.risk_cache.default_ttl_seconds, 300);
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.server.port, deserialized.server.port);
        assert_eq!(config.database.url, deserialized.database.url);
    }

    #[test]
    fn test_validate_rejects_zero_upload_limit() {
        let mut config = AppConfig::default();
        config.upload.max_size_bytes = 0;
        assert!(ConfigLoader::validate_config(&config).is_err());
    }
}
