//! `Database` trait: single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::DatabaseError;
use crate::onboarding::model::{Profile, ProfileUpdate};

/// One persisted chat exchange.
#[derive(Debug, Clone, Serialize)]
pub struct ChatLogEntry {
    pub id: i64,
    pub user_id: String,
    pub message: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
}

/// Backend-agnostic database trait covering profiles and chat logs.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Profiles ────────────────────────────────────────────────────

    /// Load a profile, or `None` if the user has never written one.
    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, DatabaseError>;

    /// Write the fields present in `update`, creating the row on first write.
    /// Always bumps `updated_at`.
    async fn upsert_profile(&self, user_id: &str, update: &ProfileUpdate)
    -> Result<(), DatabaseError>;

    /// Clear every collected field and rewind the stage to greeting.
    /// A user without a profile is left without one.
    async fn hard_reset_profile(&self, user_id: &str) -> Result<(), DatabaseError>;

    // ── Chat logs ───────────────────────────────────────────────────

    /// Append one exchange to the chat log.
    async fn log_chat(
        &self,
        user_id: &str,
        message: &str,
        response: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// Most recent exchanges for a user, newest first.
    async fn recent_chats(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatLogEntry>, DatabaseError>;
}
