//! User profile and onboarding data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::ConversationStage;

/// Outcome of analyzing the user's website during onboarding.
///
/// A failed analysis is kept as a reason, not as report text, so callers can
/// render it however they like.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "text", rename_all = "snake_case")]
pub enum WebsiteAnalysis {
    Report(String),
    Failed(String),
}

impl WebsiteAnalysis {
    /// The report text, if the analysis succeeded.
    pub fn report(&self) -> Option<&str> {
        match self {
            Self::Report(text) => Some(text),
            Self::Failed(_) => None,
        }
    }

    /// The failure reason, if the analysis failed.
    pub fn failure(&self) -> Option<&str> {
        match self {
            Self::Report(_) => None,
            Self::Failed(reason) => Some(reason),
        }
    }
}

/// Profile built during onboarding and used to personalize responses.
///
/// Text fields use the empty string for "not collected yet".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: String,
    pub name: String,
    pub business_type: String,
    pub goals: String,
    pub website_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_analysis: Option<WebsiteAnalysis>,
    pub conversation_stage: ConversationStage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// A fresh profile with nothing collected.
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            name: String::new(),
            business_type: String::new(),
            goals: String::new(),
            website_url: String::new(),
            website_analysis: None,
            conversation_stage: ConversationStage::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Complete iff the four collected fields are all non-empty.
    /// `website_analysis` does not count.
    pub fn is_complete(&self) -> bool {
        [
            &self.name,
            &self.business_type,
            &self.goals,
            &self.website_url,
        ]
        .iter()
        .all(|field| !field.trim().is_empty())
    }

    /// Textual digest injected into generation prompts.
    ///
    /// Empty for incomplete profiles. A failed website analysis is left out.
    pub fn summary(&self) -> String {
        if !self.is_complete() {
            return String::new();
        }

        let mut summary = format!(
            "معلومات المستخدم الأساسية:\n\
             - الاسم: {}\n\
             - الوظيفة: {}\n\
             - الأهداف التسويقية: {}\n\
             - موقع الشركة: {}",
            self.name, self.business_type, self.goals, self.website_url
        );

        if let Some(report) = self.website_analysis.as_ref().and_then(|a| a.report()) {
            summary.push_str(&format!("\n\nتحليل الموقع:\n{report}"));
        }

        summary
    }
}

/// A partial set of profile field values to write.
///
/// `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub business_type: Option<String>,
    pub goals: Option<String>,
    pub website_url: Option<String>,
    pub website_analysis: Option<WebsiteAnalysis>,
    pub conversation_stage: Option<ConversationStage>,
}

impl ProfileUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn business_type(mut self, business_type: impl Into<String>) -> Self {
        self.business_type = Some(business_type.into());
        self
    }

    pub fn goals(mut self, goals: impl Into<String>) -> Self {
        self.goals = Some(goals.into());
        self
    }

    pub fn website_url(mut self, website_url: impl Into<String>) -> Self {
        self.website_url = Some(website_url.into());
        self
    }

    pub fn website_analysis(mut self, analysis: WebsiteAnalysis) -> Self {
        self.website_analysis = Some(analysis);
        self
    }

    pub fn stage(mut self, stage: ConversationStage) -> Self {
        self.conversation_stage = Some(stage);
        self
    }

    /// Apply the update to an in-memory profile.
    pub fn apply_to(&self, profile: &mut Profile) {
        if let Some(ref v) = self.name {
            profile.name = v.clone();
        }
        if let Some(ref v) = self.business_type {
            profile.business_type = v.clone();
        }
        if let Some(ref v) = self.goals {
            profile.goals = v.clone();
        }
        if let Some(ref v) = self.website_url {
            profile.website_url = v.clone();
        }
        if let Some(ref v) = self.website_analysis {
            profile.website_analysis = Some(v.clone());
        }
        if let Some(stage) = self.conversation_stage {
            profile.conversation_stage = stage;
        }
        profile.updated_at = Utc::now();
    }
}
