//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "onboarding_sessions",
        sql: r#"
            CREATE TABLE IF NOT EXISTS onboarding_sessions (
                id TEXT PRIMARY KEY,
                role TEXT NOT NULL,
                user_id TEXT,
                anon_id TEXT,
                state TEXT NOT NULL,
                conversation TEXT NOT NULL DEFAULT '[]',
                profile_completion_triggered_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_user ON onboarding_sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_anon ON onboarding_sessions(anon_id);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_live_per_role
                ON onboarding_sessions(role, user_id)
                WHERE user_id IS NOT NULL AND state NOT IN ('completed', 'deleted');
        "#,
    },
    Migration {
        version: 2,
        name: "consent_and_audit",
        sql: r#"
            CREATE TABLE IF NOT EXISTS consent_records (
                user_id TEXT PRIMARY KEY,
                privacy_accepted_at TEXT,
                terms_accepted_at TEXT,
                ai_processing_consent INTEGER NOT NULL DEFAULT 0,
                completed_at TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS transcript_audit (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL UNIQUE,
                user_id TEXT,
                role TEXT NOT NULL,
                transcript TEXT NOT NULL,
                archived_at TEXT NOT NULL
            );
        "#,
    },
    Migration {
        version: 3,
        name: "profiles_and_assets",
        sql: r#"
            CREATE TABLE IF NOT EXISTS profiles (
                user_id TEXT PRIMARY KEY,
                username TEXT,
                full_name TEXT,
                roles TEXT NOT NULL DEFAULT '[]',
                bio TEXT,
                experience_level TEXT,
                updated_at TEXT
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_profiles_username
                ON profiles(username) WHERE username IS NOT NULL;

            CREATE TABLE IF NOT EXISTS vessels (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                name TEXT NOT NULL,
                make TEXT,
                model TEXT,
                length_ft REAL,
                home_port TEXT,
                created_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_vessels_owner_name
                ON vessels(owner_id, lower(name));

            CREATE TABLE IF NOT EXISTS journeys (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                vessel_name TEXT,
                start_port TEXT NOT NULL,
                end_port TEXT NOT NULL,
                departure_date TEXT,
                waypoints TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_journeys_owner ON journeys(owner_id);
        "#,
    },
];

/// Run all pending migrations.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    let version = get_current_version(conn).await?;
    tracing::debug!(version, "Database migrations complete");
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
