//! Schema migrations for the cache store.
//!
//! Applied versions are recorded in `_migrations`; each pending migration
//! runs inside its own transaction together with its bookkeeping row.

use super::Error;
use tokio_rusqlite::{Connection, params};

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Ordered by version. Never edit an entry once released; append instead.
const MIGRATIONS: &[Migration] = &[
    Migration { version: 1, name: "cache_entries", sql: include_str!("../../migrations/001_cache_entries.sql") },
    Migration { version: 2, name: "layer_versions", sql: include_str!("../../migrations/002_layer_versions.sql") },
];

/// Apply every migration newer than the recorded schema version.
///
/// # Errors
///
/// Returns `Error::MigrationFailed` naming the migration whose SQL failed.
pub async fn run(conn: &Connection) -> Result<(), Error> {
    let applied = conn
        .call(|conn| -> Result<Vec<&'static str>, Error> {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS _migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                )",
                [],
            )?;

            let current: i64 =
                conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| row.get(0))?;

            let mut applied = Vec::new();
            for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
                let tx = conn.unchecked_transaction()?;
                tx.execute_batch(migration.sql)
                    .map_err(|e| Error::MigrationFailed(format!("{}: {e}", migration.name)))?;
                tx.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, ?2)",
                    params![migration.version, chrono::Utc::now().to_rfc3339()],
                )?;
                tx.commit()?;
                applied.push(migration.name);
            }
            Ok(applied)
        })
        .await
        .map_err(Error::from)?;

    if !applied.is_empty() {
        tracing::debug!(?applied, "applied cache schema migrations");
    }
    Ok(())
}
