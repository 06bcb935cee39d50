// =====================================================================================
// File: core-store/src/migrations.rs
// Description: File-based schema migration runner with version ledger
// Author: arkSong (arksong2018@gmail.com)
// =====================================================================================

use crate::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};

/// A discovered migration file.
///
/// Two filename shapes are recognized: `init_db.sql` is version 0 with the
/// fixed description "Initial database schema", and
/// `migration_<NNN>_<description>.sql` is version NNN with the description
/// taken from the filename words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub filename: String,
    pub version: i32,
    pub description: String,
    pub path: PathBuf,
}

impl Migration {
    /// Parse migration info from a filename; unrelated files yield `None`
    pub fn from_path(path: &Path) -> Option<Migration> {
        let filename = path.file_name()?.to_string_lossy().to_string();

        if filename == "init_db.sql" {
            return Some(Migration {
                filename,
                version: 0,
                description: "Initial database schema".to_string(),
                path: path.to_path_buf(),
            });
        }

        let rest = filename.strip_prefix("migration_")?.strip_suffix(".sql")?;
        let (version, description) = rest.split_once('_')?;
        let version: i32 = version.parse().ok()?;

        Some(Migration {
            filename: filename.clone(),
            version,
            description: description.replace('_', " "),
            path: path.to_path_buf(),
        })
    }
}

/// One already-applied row from the ledger
#[derive(Debug, Clone, Serialize)]
pub struct AppliedMigration {
    pub version: i32,
    pub filename: String,
    pub description: Option<String>,
    pub applied_at: Option<DateTime<Utc>>,
}

/// Migration status summary for debug endpoints
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub total_migrations: usize,
    pub applied_count: usize,
    pub pending_count: usize,
    pub applied_migrations: Vec<AppliedMigration>,
    pub pending_migrations: Vec<PendingMigration>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingMigration {
    pub version: i32,
    pub filename: String,
    pub description: String,
}

/// Handles schema migrations with version tracking.
///
/// Discovers `*.sql` files in the migrations directory, orders them by
/// version, applies pending ones each inside its own transaction, and records
/// checksum and execution time in the `schema_migrations` ledger. The first
/// failure stops the run.
pub struct MigrationRunner {
    pool: PgPool,
    migrations_dir: PathBuf,
}

impl MigrationRunner {
    pub fn new(pool: PgPool, migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            migrations_dir: migrations_dir.into(),
        }
    }

    /// Create the ledger table when it does not exist yet
    pub async fn ensure_migrations_table(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                id SERIAL PRIMARY KEY,
                version INTEGER NOT NULL UNIQUE,
                filename TEXT NOT NULL,
                description TEXT,
                checksum TEXT,
                execution_time_ms INTEGER,
                applied_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Applied migrations keyed by version
    pub async fn applied_migrations(&self) -> StoreResult<BTreeMap<i32, AppliedMigration>> {
        let rows = sqlx::query(
            r#"
            SELECT version, filename, description, applied_at
            FROM schema_migrations
            ORDER BY version
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let applied = AppliedMigration {
                    version: row.get("version"),
                    filename: row.get("filename"),
                    description: row.try_get("description").ok().flatten(),
                    applied_at: row.try_get("applied_at").ok().flatten(),
                };
                (applied.version, applied)
            })
            .collect())
    }

    /// Discover migration files sorted by version
    pub fn discover_migrations(&self) -> Vec<Migration> {
        let mut migrations = Vec::new();

        let Ok(entries) = std::fs::read_dir(&self.migrations_dir) else {
            warn!(
                "Migrations directory not found: {}",
                self.migrations_dir.display()
            );
            return migrations;
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map(|ext| ext == "sql").unwrap_or(false) {
                if let Some(migration) = Migration::from_path(&path) {
                    migrations.push(migration);
                }
            }
        }

        migrations.sort_by_key(|m| m.version);
        migrations
    }

    /// Discovered migrations with no ledger row yet
    pub async fn pending_migrations(&self) -> StoreResult<Vec<Migration>> {
        let applied = self.applied_migrations().await?;
        Ok(self
            .discover_migrations()
            .into_iter()
            .filter(|m| !applied.contains_key(&m.version))
            .collect())
    }

    /// Apply one migration inside its own transaction and record it.
    /// Re-applying an already-recorded version is a no-op at the caller
    /// level because it never shows up as pending again.
    pub async fn apply_migration(&self, migration: &Migration) -> StoreResult<u64> {
        info!("Applying migration {}...", migration.filename);

        let content = std::fs::read_to_string(&migration.path).map_err(|e| {
            StoreError::Migration(format!("Failed to read {}: {}", migration.filename, e))
        })?;
        let checksum = hex::encode(Sha256::digest(content.as_bytes()));

        let start = Instant::now();
        let mut tx = self.pool.begin().await?;

        sqlx::raw_sql(&content).execute(&mut *tx).await.map_err(|e| {
            StoreError::Migration(format!("Failed to apply {}: {}", migration.filename, e))
        })?;

        let execution_time_ms = start.elapsed().as_millis() as i64;
        sqlx::query(
            r#"
            INSERT INTO schema_migrations (version, filename, description, checksum, execution_time_ms)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(migration.version)
        .bind(&migration.filename)
        .bind(&migration.description)
        .bind(&checksum)
        .bind(execution_time_ms as i32)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            "Applied {} in {}ms",
            migration.filename, execution_time_ms
        );
        Ok(execution_time_ms as u64)
    }

    /// Run all pending migrations in order, stopping at the first failure.
    /// Returns `(applied_count, first_error)`.
    pub async fn run_pending_migrations(&self) -> StoreResult<(usize, Option<String>)> {
        self.ensure_migrations_table().await?;

        let pending = self.pending_migrations().await?;
        if pending.is_empty() {
            info!("Database schema is up to date");
            return Ok((0, None));
        }

        info!("Found {} pending migration(s)", pending.len());

        let mut applied = 0;
        for migration in &pending {
            match self.apply_migration(migration).await {
                Ok(_) => applied += 1,
                Err(e) => {
                    error!("Stopping migration run: {}", e);
                    return Ok((applied, Some(e.to_string())));
                }
            }
        }

        Ok((applied, None))
    }

    /// Current migration status for debug endpoints
    pub async fn status(&self) -> StoreResult<MigrationStatus> {
        self.ensure_migrations_table().await?;

        let applied = self.applied_migrations().await?;
        let discovered = self.discover_migrations();
        let pending: Vec<PendingMigration> = discovered
            .iter()
            .filter(|m| !applied.contains_key(&m.version))
            .map(|m| PendingMigration {
                version: m.version,
                filename: m.filename.clone(),
                description: m.description.clone(),
            })
            .collect();

        Ok(MigrationStatus {
            total_migrations: discovered.len(),
            applied_count: applied.len(),
            pending_count: pending.len(),
            applied_migrations: applied.into_values().collect(),
            pending_migrations: pending,
        })
    }
}

/// Run pending migrations during application startup.
///
/// Returns `true` when the schema is current. On failure the application
/// still starts in degraded mode; the persistent warning lets the operator
/// reconcile out-of-band applied changes.
pub async fn run_migrations_on_startup(pool: PgPool, migrations_dir: impl Into<PathBuf>) -> bool {
    let runner = MigrationRunner::new(pool, migrations_dir);

    match runner.run_pending_migrations().await {
        Ok((applied, None)) => {
            if applied > 0 {
                info!("Successfully applied {} migration(s)", applied);
            }
            true
        }
        Ok((applied, Some(failure))) => {
            error!(
                "Migration run failed after {} applied migration(s): {}; starting in degraded mode",
                applied, failure
            );
            false
        }
        Err(e) => {
            error!("Migration runner error: {}; starting in degraded mode", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_db_filename() {
        let migration = Migration::from_path(Path::new("migrations/init_db.sql")).unwrap();
        assert_eq!(migration.version, 0);
        assert_eq!(migration.description, "Initial database schema");
    }

    #[test]
    fn test_versioned_filename() {
        let migration =
            Migration::from_path(Path::new("migrations/migration_003_add_composite_view.sql"))
                .unwrap();
        assert_eq!(migration.version, 3);
        assert_eq!(migration.description, "add composite view");
        assert_eq!(migration.filename, "migration_003_add_composite_view.sql");
    }

    #[test]
    fn test_unrelated_files_are_skipped() {
        assert!(Migration::from_path(Path::new("migrations/README.md")).is_none());
        assert!(Migration::from_path(Path::new("migrations/rollback_001_x.sql")).is_none());
        assert!(Migration::from_path(Path::new("migrations/migration_abc_x.sql")).is_none());
    }

    #[tokio::test]
    async fn test_discovery_orders_by_version() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "migration_010_add_agents.sql",
            "init_db.sql",
            "migration_002_add_views.sql",
        ] {
            std::fs::write(dir.path().join(name), "SELECT 1;").unwrap();
        }
        // A non-migration file in the directory is ignored
        std::fs::write(dir.path().join("notes.txt"), "scratch").unwrap();

        let runner = MigrationRunner::new(
            PgPool::connect_lazy("postgresql://localhost/domainwatch").unwrap(),
            dir.path(),
        );
        let discovered = runner.discover_migrations();
        let versions: Vec<i32> = discovered.iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![0, 2, 10]);
    }
}
