//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.
//! A profile table created before version tracking existed is detected,
//! brought up to the current column set and seeded as V1.

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
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS user_profiles (
                user_id TEXT PRIMARY KEY,
                name TEXT,
                business_type TEXT,
                goals TEXT,
                website_url TEXT,
                website_analysis TEXT,
                website_analysis_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                conversation_stage TEXT NOT NULL DEFAULT 'greeting'
            );

            CREATE TABLE IF NOT EXISTS chat_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                message TEXT NOT NULL,
                response TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chat_logs_user ON chat_logs(user_id, timestamp);
        "#,
    },
];

/// Columns added to `user_profiles` after its first release. Checked on
/// unversioned databases and added when missing.
const PROFILE_COLUMNS: &[(&str, &str)] = &[
    ("website_url", "TEXT"),
    ("website_analysis", "TEXT"),
    ("website_analysis_error", "TEXT"),
    ("conversation_stage", "TEXT NOT NULL DEFAULT 'greeting'"),
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
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

    if current_version == 0 && table_exists(conn, "user_profiles").await? {
        ensure_profile_columns(conn).await?;
        // Fresh DDL is all IF NOT EXISTS, so this only adds what's missing.
        conn.execute_batch(MIGRATIONS[0].sql).await.map_err(|e| {
            DatabaseError::Migration(format!("Failed to complete legacy schema: {e}"))
        })?;
        seed_version(conn, 1, "initial_schema").await?;
        tracing::info!("Unversioned profile database detected, seeded migration V1");
    }

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

    tracing::info!(
        "Database migrations complete (at V{})",
        get_current_version(conn).await?
    );
    Ok(())
}

/// Add any of `PROFILE_COLUMNS` the table lacks. Idempotent.
async fn ensure_profile_columns(conn: &Connection) -> Result<(), DatabaseError> {
    let mut existing = Vec::new();
    let mut rows = conn
        .query("PRAGMA table_info(user_profiles)", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read profile columns: {e}")))?;
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read profile columns: {e}")))?
    {
        let name: String = row
            .get(1)
            .map_err(|e| DatabaseError::Migration(format!("Bad table_info row: {e}")))?;
        existing.push(name);
    }

    for (column, ty) in PROFILE_COLUMNS {
        if existing.iter().any(|c| c == column) {
            continue;
        }
        conn.execute(
            &format!("ALTER TABLE user_profiles ADD COLUMN {column} {ty}"),
            (),
        )
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to add column {column}: {e}")))?;
        tracing::info!(column, "Added missing profile column");
    }
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
        Some(row) => row.get(0).map_err(|e| {
            DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
        }),
        None => Ok(0),
    }
}

async fn table_exists(conn: &Connection, table: &str) -> Result<bool, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            libsql::params![table],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("Failed to check table {table}: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("Failed to read table check: {e}")))?;

    match row {
        Some(row) => {
            let count: i64 = row.get(0).unwrap_or(0);
            Ok(count > 0)
        }
        None => Ok(false),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_conn() -> Connection {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap();
        db.connect().unwrap()
    }

    async fn column_names(conn: &Connection) -> Vec<String> {
        let mut rows = conn
            .query("PRAGMA table_info(user_profiles)", ())
            .await
            .unwrap();
        let mut names = Vec::new();
        while let Some(row) = rows.next().await.unwrap() {
            names.push(row.get::<String>(1).unwrap());
        }
        names
    }

    #[tokio::test]
    async fn migrations_create_all_tables() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        for table in ["user_profiles", "chat_logs", "_migrations"] {
            assert!(table_exists(&conn, table).await.unwrap(), "Table '{table}' should exist");
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        run_migrations(&conn).await.unwrap();

        let version = get_current_version(&conn).await.unwrap();
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn unversioned_profile_table_gains_missing_columns() {
        let conn = test_conn().await;

        // The earliest profile table: no website columns, no stage.
        conn.execute_batch(
            "CREATE TABLE user_profiles (
                user_id TEXT PRIMARY KEY,
                name TEXT,
                business_type TEXT,
                goals TEXT,
                created_at TEXT,
                updated_at TEXT
            );
            INSERT INTO user_profiles (user_id, name, created_at, updated_at)
                VALUES ('old', 'ليلى', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z');",
        )
        .await
        .unwrap();

        run_migrations(&conn).await.unwrap();

        let columns = column_names(&conn).await;
        for (column, _) in PROFILE_COLUMNS {
            assert!(columns.iter().any(|c| c == column), "missing {column}");
        }
        assert!(table_exists(&conn, "chat_logs").await.unwrap());
        assert_eq!(get_current_version(&conn).await.unwrap(), 1);

        let mut rows = conn
            .query(
                "SELECT name, conversation_stage FROM user_profiles WHERE user_id = 'old'",
                (),
            )
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<String>(0).unwrap(), "ليلى");
        assert_eq!(row.get::<String>(1).unwrap(), "greeting");
    }

    #[tokio::test]
    async fn ensure_columns_is_idempotent() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        let before = column_names(&conn).await;
        ensure_profile_columns(&conn).await.unwrap();
        assert_eq!(before, column_names(&conn).await);
    }

    #[tokio::test]
    async fn version_tracking() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        let mut rows = conn
            .query("SELECT version, name FROM _migrations ORDER BY version", ())
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<i64>(0).unwrap(), 1);
        assert_eq!(row.get::<String>(1).unwrap(), "initial_schema");
        assert!(rows.next().await.unwrap().is_none());
    }
}
