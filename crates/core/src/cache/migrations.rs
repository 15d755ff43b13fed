//! Schema migrations for the cache store.
//!
//! Applied versions are recorded in `_migrations`; each script is idempotent
//! (`IF NOT EXISTS`) so re-running against an existing store is harmless.

use super::Error;
use tokio_rusqlite::{Connection, params};

struct Migration {
    version: i64,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration { version: 1, sql: include_str!("../../migrations/001_cache_entries.sql") }];

/// Apply every migration newer than the recorded schema version.
///
/// # Errors
///
/// Returns `Error::MigrationFailed` when a script fails; earlier scripts stay
/// applied.
pub async fn run(conn: &Connection) -> Result<(), Error> {
    conn.call(|conn| -> Result<(), Error> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
        )?;

        let current: i64 = conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| row.get(0))?;

        for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
            conn.execute_batch(migration.sql)
                .map_err(|e| Error::MigrationFailed(format!("v{}: {e}", migration.version)))?;
            conn.execute(
                "INSERT INTO _migrations (version, applied_at) VALUES (?1, ?2)",
                params![migration.version, chrono::Utc::now().to_rfc3339()],
            )?;
            tracing::debug!(version = migration.version, "applied cache migration");
        }

        Ok(())
    })
    .await
    .map_err(Error::from)
}
