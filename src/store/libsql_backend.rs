//! libSQL backend: async `Database` trait implementation.
//!
//! Uses libsql's native async API. Supports local file and in-memory
//! databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};

use crate::error::DatabaseError;
use crate::onboarding::model::{Profile, ProfileUpdate, WebsiteAnalysis};
use crate::onboarding::state::ConversationStage;
use crate::store::migrations;
use crate::store::traits::{ChatLogEntry, Database};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    // Try RFC 3339 first (our canonical write format)
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    // Naive ISO timestamps, as written by older profile databases
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return ndt.and_utc();
    }
    // SQLite datetime() output
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: Option<String>) -> DateTime<Utc> {
    s.as_deref().map(parse_datetime).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Rebuild the typed analysis from its two columns. An error wins over a report.
fn analysis_from_columns(
    report: Option<String>,
    error: Option<String>,
) -> Option<WebsiteAnalysis> {
    match (report, error) {
        (_, Some(error)) => Some(WebsiteAnalysis::Failed(error)),
        (Some(report), None) => Some(WebsiteAnalysis::Report(report)),
        (None, None) => None,
    }
}

/// Split the typed analysis into `(report, error)` column values.
fn analysis_to_columns(analysis: &WebsiteAnalysis) -> (Option<&str>, Option<&str>) {
    match analysis {
        WebsiteAnalysis::Report(report) => (Some(report), None),
        WebsiteAnalysis::Failed(error) => (None, Some(error)),
    }
}

const PROFILE_COLUMNS: &str = "user_id, name, business_type, goals, website_url, \
     website_analysis, website_analysis_error, conversation_stage, created_at, updated_at";

fn row_to_profile(row: &libsql::Row) -> Result<Profile, libsql::Error> {
    let stage_str: Option<String> = row.get(7).ok();
    let conversation_stage = match stage_str {
        Some(s) => s.parse().unwrap_or_else(|e| {
            warn!("{e}, treating as greeting");
            ConversationStage::Greeting
        }),
        None => ConversationStage::Greeting,
    };

    Ok(Profile {
        user_id: row.get(0)?,
        name: row.get(1).unwrap_or_default(),
        business_type: row.get(2).unwrap_or_default(),
        goals: row.get(3).unwrap_or_default(),
        website_url: row.get(4).unwrap_or_default(),
        website_analysis: analysis_from_columns(row.get(5).ok(), row.get(6).ok()),
        conversation_stage,
        created_at: parse_optional_datetime(row.get(8).ok()),
        updated_at: parse_optional_datetime(row.get(9).ok()),
    })
}

fn row_to_chat(row: &libsql::Row) -> Result<ChatLogEntry, libsql::Error> {
    let timestamp: String = row.get(4)?;
    Ok(ChatLogEntry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        message: row.get(2)?,
        response: row.get(3)?,
        timestamp: parse_datetime(&timestamp),
    })
}

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Profiles ────────────────────────────────────────────────────

    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {PROFILE_COLUMNS} FROM user_profiles WHERE user_id = ?1"),
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_profile: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let profile = row_to_profile(&row)
                    .map_err(|e| DatabaseError::Serialization(format!("row parse: {e}")))?;
                Ok(Some(profile))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_profile: {e}"))),
        }
    }

    async fn upsert_profile(
        &self,
        user_id: &str,
        update: &ProfileUpdate,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();

        conn.execute(
            "INSERT OR IGNORE INTO user_profiles (user_id, created_at, updated_at, conversation_stage)
             VALUES (?1, ?2, ?2, 'greeting')",
            params![user_id, now.clone()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("upsert_profile insert: {e}")))?;

        let (set_analysis, report, error) = match &update.website_analysis {
            Some(analysis) => {
                let (report, error) = analysis_to_columns(analysis);
                (1i64, report, error)
            }
            None => (0i64, None, None),
        };

        conn.execute(
            "UPDATE user_profiles SET
                name = COALESCE(?2, name),
                business_type = COALESCE(?3, business_type),
                goals = COALESCE(?4, goals),
                website_url = COALESCE(?5, website_url),
                website_analysis = CASE WHEN ?6 = 1 THEN ?7 ELSE website_analysis END,
                website_analysis_error = CASE WHEN ?6 = 1 THEN ?8 ELSE website_analysis_error END,
                conversation_stage = COALESCE(?9, conversation_stage),
                updated_at = ?10
             WHERE user_id = ?1",
            params![
                user_id,
                opt_text(update.name.as_deref()),
                opt_text(update.business_type.as_deref()),
                opt_text(update.goals.as_deref()),
                opt_text(update.website_url.as_deref()),
                set_analysis,
                opt_text(report),
                opt_text(error),
                opt_text(update.conversation_stage.map(|s| s.as_str())),
                now,
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("upsert_profile update: {e}")))?;

        debug!(user_id, "Profile updated");
        Ok(())
    }

    async fn hard_reset_profile(&self, user_id: &str) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE user_profiles SET
                    name = NULL,
                    business_type = NULL,
                    goals = NULL,
                    website_url = NULL,
                    website_analysis = NULL,
                    website_analysis_error = NULL,
                    conversation_stage = 'greeting',
                    updated_at = ?2
                 WHERE user_id = ?1",
                params![user_id, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("hard_reset_profile: {e}")))?;
        Ok(())
    }

    // ── Chat logs ───────────────────────────────────────────────────

    async fn log_chat(
        &self,
        user_id: &str,
        message: &str,
        response: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO chat_logs (user_id, message, response, timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                params![user_id, message, response, timestamp.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("log_chat: {e}")))?;
        Ok(())
    }

    async fn recent_chats(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatLogEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, user_id, message, response, timestamp FROM chat_logs
                 WHERE user_id = ?1
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?2",
                params![user_id, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_chats: {e}")))?;

        let mut entries = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_chats: {e}")))?
        {
            entries.push(
                row_to_chat(&row).map_err(|e| DatabaseError::Serialization(format!("row parse: {e}")))?,
            );
        }
        Ok(entries)
    }
}
