//! Orchestrator: produces the assistant's reply to one chat message.
//!
//! Users still onboarding get the scripted question from the stage machine.
//! Users with a complete profile get a generated answer built from the
//! persona, their profile, retrieved knowledge and recent history.

use std::sync::Arc;

use crate::config::AssistantConfig;
use crate::error::Error;
use crate::llm::{CompletionRequest, LlmProvider};
use crate::onboarding::prompts::{PERSONA, build_messages};
use crate::onboarding::{Profile, StageMachine};
use crate::retrieval::ContextRetriever;
use crate::store::Database;

pub struct Orchestrator {
    machine: Arc<StageMachine>,
    db: Arc<dyn Database>,
    retriever: ContextRetriever,
    llm: Arc<dyn LlmProvider>,
    config: AssistantConfig,
}

impl Orchestrator {
    pub fn new(
        machine: Arc<StageMachine>,
        db: Arc<dyn Database>,
        retriever: ContextRetriever,
        llm: Arc<dyn LlmProvider>,
        config: AssistantConfig,
    ) -> Self {
        Self {
            machine,
            db,
            retriever,
            llm,
            config,
        }
    }

    /// Reply to `message`. `history` is the user's session log, oldest first.
    ///
    /// Only a model failure while generating the reply is an error; retrieval
    /// problems degrade to an answer without context.
    pub async fn respond(
        &self,
        user_id: &str,
        message: &str,
        history: &[String],
    ) -> Result<String, Error> {
        let profile = self.db.get_profile(user_id).await?;

        let profile = if profile.as_ref().is_some_and(Profile::is_complete) {
            profile
        } else {
            let outcome = self.machine.process(user_id, message).await?;
            if let Some(question) = outcome.next_question {
                return Ok(question);
            }
            // This message finished onboarding; answer it with the new profile.
            tracing::info!(user_id = %user_id, "Onboarding complete");
            self.db.get_profile(user_id).await?
        };

        let summary = profile.as_ref().map(Profile::summary).unwrap_or_default();
        let context = self.retriever.retrieve(message).await;
        let messages = build_messages(
            PERSONA,
            &summary,
            &context,
            history,
            self.config.history_window,
            message,
        );

        let request = CompletionRequest::new(messages).with_temperature(self.config.temperature);
        let response = self.llm.complete(request).await.map_err(|e| {
            tracing::error!(user_id = %user_id, "Response generation failed: {}", e);
            e
        })?;

        if response.finish_reason.is_cut_short() {
            tracing::warn!(
                user_id = %user_id,
                finish_reason = ?response.finish_reason,
                "Reply was cut short by the model"
            );
        }
        tracing::debug!(
            user_id = %user_id,
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "Response generated"
        );
        Ok(response.content.trim().to_string())
    }
}
