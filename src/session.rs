//! In-memory per-user conversation history.
//!
//! Each user's log is a flat list of strings alternating user message and
//! assistant response. Nothing here is persisted; a restart or a second
//! process starts from empty logs.

use std::collections::HashMap;

use tokio::sync::RwLock;

/// Session turn logs keyed by user identity.
#[derive(Debug, Default)]
pub struct SessionHistory {
    sessions: RwLock<HashMap<String, Vec<String>>>,
}

impl SessionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one exchange: the user's message then the response.
    pub async fn append(&self, user_id: &str, user_message: &str, response: &str) {
        let mut sessions = self.sessions.write().await;
        let log = sessions.entry(user_id.to_string()).or_default();
        log.push(user_message.to_string());
        log.push(response.to_string());
    }

    /// Full log for a user, oldest first. Empty for unknown users.
    pub async fn get(&self, user_id: &str) -> Vec<String> {
        self.sessions
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop a user's log.
    pub async fn clear(&self, user_id: &str) {
        self.sessions.write().await.remove(user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_alternates_user_and_response() {
        let history = SessionHistory::new();
        history.append("u1", "مرحبا", "أهلاً").await;
        history.append("u1", "كيف حالك", "بخير").await;

        assert_eq!(
            history.get("u1").await,
            vec!["مرحبا", "أهلاً", "كيف حالك", "بخير"]
        );
    }

    #[tokio::test]
    async fn users_are_isolated() {
        let history = SessionHistory::new();
        history.append("u1", "a", "b").await;
        assert!(history.get("u2").await.is_empty());
    }

    #[tokio::test]
    async fn clear_empties_one_user() {
        let history = SessionHistory::new();
        history.append("u1", "a", "b").await;
        history.append("u2", "c", "d").await;
        history.clear("u1").await;
        assert!(history.get("u1").await.is_empty());
        assert_eq!(history.get("u2").await, vec!["c", "d"]);
    }
}
