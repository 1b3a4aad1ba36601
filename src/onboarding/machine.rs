//! StageMachine: drives the scripted onboarding conversation.
//!
//! Each call reads the user's stage, extracts the field that stage is waiting
//! for, writes it and advances. Extraction, write and advance for one user
//! run under that user's lock, so concurrent messages from the same user are
//! applied one at a time.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::DatabaseError;
use crate::store::Database;
use crate::website::WebsiteAnalyzer;

use super::extract::{Extraction, ProfileField, extract};
use super::model::{Profile, ProfileUpdate};
use super::prompts::scripted_question;
use super::state::ConversationStage;

/// Result of feeding one message to the stage machine.
#[derive(Debug, Clone, Serialize)]
pub struct StageOutcome {
    /// Stage after this message.
    pub stage: ConversationStage,
    /// What was pulled out of the message, if anything.
    pub extracted: Option<Extraction>,
    pub profile_complete: bool,
    /// Scripted question for the new stage; `None` once the profile is complete.
    pub next_question: Option<String>,
}

/// Snapshot of where a user is in onboarding.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationStatus {
    pub stage: ConversationStage,
    pub profile_complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
    pub next_question: Option<String>,
}

pub struct StageMachine {
    db: Arc<dyn Database>,
    analyzer: Arc<WebsiteAnalyzer>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl StageMachine {
    pub fn new(db: Arc<dyn Database>, analyzer: Arc<WebsiteAnalyzer>) -> Self {
        Self {
            db,
            analyzer,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Apply one user message to the onboarding flow.
    ///
    /// A message that yields nothing for the current stage leaves the profile
    /// untouched and repeats the same question. When the website answer is
    /// collected, the site is analyzed before the stage advances; analysis
    /// failures are stored on the profile, not returned.
    pub async fn process(
        &self,
        user_id: &str,
        message: &str,
    ) -> Result<StageOutcome, DatabaseError> {
        let lock = self.user_lock(user_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.apply_message(user_id, message).await
        };
        self.release_lock(user_id, lock).await;
        result
    }

    async fn apply_message(
        &self,
        user_id: &str,
        message: &str,
    ) -> Result<StageOutcome, DatabaseError> {
        let current = self
            .db
            .get_profile(user_id)
            .await?
            .unwrap_or_else(|| Profile::new(user_id));
        let stage = current.conversation_stage;
        let extracted = extract(stage, message);

        match &extracted {
            Some(extraction) => {
                let next = stage.next();
                let mut update = field_update(extraction).stage(next);

                if extraction.field == ProfileField::WebsiteUrl {
                    let mut pending = current.clone();
                    update.apply_to(&mut pending);
                    let data = self.analyzer.analyze(&extraction.value).await;
                    let analysis = self.analyzer.summarize_outcome(&data, Some(&pending)).await;
                    if let Some(reason) = analysis.failure() {
                        tracing::warn!(user_id = %user_id, "Onboarding website analysis failed: {}", reason);
                    }
                    update = update.website_analysis(analysis);
                }

                self.db.upsert_profile(user_id, &update).await?;
                tracing::info!(
                    user_id = %user_id,
                    from = %stage,
                    to = %next,
                    "Onboarding stage advanced"
                );
            }
            None => {
                tracing::debug!(user_id = %user_id, stage = %stage, "Nothing extracted, stage unchanged");
            }
        }

        let status = self.read_status(user_id).await?;
        Ok(StageOutcome {
            stage: status.stage,
            extracted,
            profile_complete: status.profile_complete,
            next_question: status.next_question,
        })
    }

    /// Current stage, completeness and next question for a user.
    pub async fn status(&self, user_id: &str) -> Result<ConversationStatus, DatabaseError> {
        self.read_status(user_id).await
    }

    /// Rewind the stage to greeting, keeping collected fields.
    pub async fn soft_reset(&self, user_id: &str) -> Result<(), DatabaseError> {
        let lock = self.user_lock(user_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.db
                .upsert_profile(user_id, &ProfileUpdate::new().stage(ConversationStage::Greeting))
                .await
        };
        self.release_lock(user_id, lock).await;
        result?;
        tracing::info!(user_id = %user_id, "Profile soft reset");
        Ok(())
    }

    /// Wipe collected fields and rewind the stage to greeting.
    pub async fn hard_reset(&self, user_id: &str) -> Result<(), DatabaseError> {
        let lock = self.user_lock(user_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.db.hard_reset_profile(user_id).await
        };
        self.release_lock(user_id, lock).await;
        result?;
        tracing::info!(user_id = %user_id, "Profile hard reset");
        Ok(())
    }

    async fn read_status(&self, user_id: &str) -> Result<ConversationStatus, DatabaseError> {
        let profile = self.db.get_profile(user_id).await?;
        let stage = profile
            .as_ref()
            .map(|p| p.conversation_stage)
            .unwrap_or_default();
        let profile_complete = profile.as_ref().is_some_and(Profile::is_complete);
        let next_question = if profile_complete {
            None
        } else {
            let name = profile.as_ref().map(|p| p.name.as_str()).unwrap_or_default();
            scripted_question(stage, name)
        };
        Ok(ConversationStatus {
            stage,
            profile_complete,
            profile,
            next_question,
        })
    }

    async fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop a handle from `user_lock`, removing the entry once nobody else
    /// holds or waits on it.
    async fn release_lock(&self, user_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        drop(lock);
        if locks
            .get(user_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(user_id);
        }
    }
}

fn field_update(extraction: &Extraction) -> ProfileUpdate {
    let value = extraction.value.as_str();
    let update = ProfileUpdate::new();
    match extraction.field {
        ProfileField::Name => update.name(value),
        ProfileField::BusinessType => update.business_type(value),
        ProfileField::Goals => update.goals(value),
        ProfileField::WebsiteUrl => update.website_url(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onboarding::model::WebsiteAnalysis;
    use crate::store::LibSqlBackend;
    use crate::testing::{MockLlm, StaticFetcher};
    use crate::website::FetchedPage;

    struct Harness {
        machine: Arc<StageMachine>,
        db: Arc<dyn Database>,
        fetcher: Arc<StaticFetcher>,
        llm: Arc<MockLlm>,
    }

    async fn harness(fetcher: StaticFetcher, llm: MockLlm) -> Harness {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let fetcher = Arc::new(fetcher);
        let llm = Arc::new(llm);
        let analyzer = Arc::new(WebsiteAnalyzer::new(fetcher.clone(), llm.clone(), 0.7));
        Harness {
            machine: Arc::new(StageMachine::new(db.clone(), analyzer)),
            db,
            fetcher,
            llm,
        }
    }

    fn shop_page() -> FetchedPage {
        FetchedPage {
            url: String::new(),
            title: Some("متجر الورد".to_string()),
            description: Some("ورود طازجة".to_string()),
            content: Some("نوصل الورود في نفس اليوم".to_string()),
        }
    }

    #[tokio::test]
    async fn fresh_user_name_advances_to_name_stage() {
        let h = harness(StaticFetcher::serving(shop_page()), MockLlm::replying("r")).await;

        let outcome = h.machine.process("u1", "أنا سارة").await.unwrap();
        assert_eq!(outcome.stage, ConversationStage::Name);
        assert!(!outcome.profile_complete);
        let extraction = outcome.extracted.unwrap();
        assert_eq!(extraction.field, ProfileField::Name);
        assert_eq!(extraction.value, "سارة");
        assert_eq!(
            outcome.next_question,
            scripted_question(ConversationStage::Name, "سارة")
        );

        let profile = h.db.get_profile("u1").await.unwrap().unwrap();
        assert_eq!(profile.name, "سارة");
        assert_eq!(profile.conversation_stage, ConversationStage::Name);
    }

    #[tokio::test]
    async fn no_extraction_keeps_stage_and_question() {
        let h = harness(StaticFetcher::serving(shop_page()), MockLlm::replying("r")).await;

        let outcome = h.machine.process("u1", "https://example.com").await.unwrap();
        assert_eq!(outcome.stage, ConversationStage::Greeting);
        assert!(outcome.extracted.is_none());
        assert_eq!(
            outcome.next_question,
            scripted_question(ConversationStage::Greeting, "")
        );
        assert!(h.db.get_profile("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn full_flow_completes_with_report() {
        let h = harness(
            StaticFetcher::serving(shop_page()),
            MockLlm::replying("تقرير الموقع"),
        )
        .await;

        h.machine.process("u1", "أنا سارة").await.unwrap();
        h.machine.process("u1", "مديرة تسويق").await.unwrap();
        h.machine.process("u1", "زيادة المبيعات").await.unwrap();
        let outcome = h
            .machine
            .process("u1", "موقعنا https://flowers.example اليوم")
            .await
            .unwrap();

        assert_eq!(outcome.stage, ConversationStage::Complete);
        assert!(outcome.profile_complete);
        assert!(outcome.next_question.is_none());
        assert_eq!(h.fetcher.call_count(), 1);

        let profile = h.db.get_profile("u1").await.unwrap().unwrap();
        assert_eq!(profile.business_type, "مديرة تسويق");
        assert_eq!(profile.goals, "زيادة المبيعات");
        assert_eq!(profile.website_url, "https://flowers.example");
        assert_eq!(
            profile.website_analysis,
            Some(WebsiteAnalysis::Report("تقرير الموقع".to_string()))
        );

        // The analysis request sees the profile including this turn's answers.
        let requests = h.llm.requests();
        let prompt: String = requests[0]
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert!(prompt.contains("سارة"));
        assert!(prompt.contains("زيادة المبيعات"));
    }

    #[tokio::test]
    async fn failed_analysis_is_stored_and_still_completes() {
        let h = harness(StaticFetcher::timing_out(), MockLlm::replying("unused")).await;

        h.machine.process("u1", "اسمي خالد").await.unwrap();
        h.machine.process("u1", "مؤسس").await.unwrap();
        h.machine.process("u1", "الوصول لعملاء جدد").await.unwrap();
        let outcome = h.machine.process("u1", "khalid.example").await.unwrap();

        assert_eq!(outcome.stage, ConversationStage::Complete);
        assert!(outcome.profile_complete);
        assert_eq!(h.llm.call_count(), 0);

        let profile = h.db.get_profile("u1").await.unwrap().unwrap();
        assert_eq!(profile.website_url, "khalid.example");
        let analysis = profile.website_analysis.unwrap();
        assert!(analysis.report().is_none());
        assert!(analysis.failure().unwrap().contains("https://khalid.example"));
    }

    #[tokio::test]
    async fn complete_stage_stays_complete() {
        let h = harness(StaticFetcher::serving(shop_page()), MockLlm::replying("r")).await;
        for msg in ["أنا ليلى", "مصممة", "بناء علامة", "https://layla.example"] {
            h.machine.process("u1", msg).await.unwrap();
        }
        let outcome = h.machine.process("u1", "شكراً").await.unwrap();
        assert_eq!(outcome.stage, ConversationStage::Complete);
        assert!(outcome.extracted.is_none());
        assert!(outcome.next_question.is_none());
    }

    #[tokio::test]
    async fn status_for_unknown_user_is_greeting() {
        let h = harness(StaticFetcher::serving(shop_page()), MockLlm::replying("r")).await;
        let status = h.machine.status("nobody").await.unwrap();
        assert_eq!(status.stage, ConversationStage::Greeting);
        assert!(!status.profile_complete);
        assert!(status.profile.is_none());
        assert!(status.next_question.is_some());
    }

    #[tokio::test]
    async fn soft_reset_keeps_fields_hard_reset_wipes_them() {
        let h = harness(StaticFetcher::serving(shop_page()), MockLlm::replying("r")).await;
        h.machine.process("u1", "أنا سارة").await.unwrap();
        h.machine.process("u1", "مديرة").await.unwrap();

        h.machine.soft_reset("u1").await.unwrap();
        let profile = h.db.get_profile("u1").await.unwrap().unwrap();
        assert_eq!(profile.conversation_stage, ConversationStage::Greeting);
        assert_eq!(profile.name, "سارة");
        assert_eq!(profile.business_type, "مديرة");

        h.machine.hard_reset("u1").await.unwrap();
        let profile = h.db.get_profile("u1").await.unwrap().unwrap();
        assert_eq!(profile.conversation_stage, ConversationStage::Greeting);
        assert!(profile.name.is_empty());
        assert!(profile.business_type.is_empty());
    }

    #[tokio::test]
    async fn concurrent_messages_for_one_user_advance_once_each() {
        let h = harness(StaticFetcher::serving(shop_page()), MockLlm::replying("r")).await;
        h.machine.process("u1", "أنا سارة").await.unwrap();

        let a = {
            let machine = h.machine.clone();
            tokio::spawn(async move { machine.process("u1", "مديرة").await })
        };
        let b = {
            let machine = h.machine.clone();
            tokio::spawn(async move { machine.process("u1", "نمو").await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let profile = h.db.get_profile("u1").await.unwrap().unwrap();
        assert_eq!(profile.conversation_stage, ConversationStage::Goals);
        assert!(!profile.business_type.is_empty());
        assert!(!profile.goals.is_empty());
        assert_ne!(profile.business_type, profile.goals);
        assert!(h.machine.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn user_locks_are_released_after_each_call() {
        let h = harness(StaticFetcher::serving(shop_page()), MockLlm::replying("r")).await;

        for i in 0..20 {
            let user_id = format!("user-{i}");
            h.machine.process(&user_id, "أنا سارة").await.unwrap();
            h.machine.soft_reset(&user_id).await.unwrap();
        }
        h.machine.hard_reset("user-0").await.unwrap();
        assert!(h.machine.locks.lock().await.is_empty());

        // A released user can still be served.
        let outcome = h.machine.process("user-0", "أنا ليلى").await.unwrap();
        assert_eq!(outcome.stage, ConversationStage::Name);
        assert!(h.machine.locks.lock().await.is_empty());
    }
}
