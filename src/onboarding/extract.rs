//! Per-stage field extraction from raw user messages.
//!
//! Extraction is deterministic and never fails: a message that doesn't yield
//! a usable value produces `None` and the conversation stays where it is.

use std::sync::LazyLock;

use serde::Serialize;

use regex::Regex;

use super::state::ConversationStage;

static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"http[s]?://(?:[a-zA-Z]|[0-9]|[$-_@.&+]|[!*\\(\\),]|(?:%[0-9a-fA-F][0-9a-fA-F]))+")
        .expect("hardcoded regex must compile")
});

static NAME_REJECT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[0-9@#$%^&*(),.?":{}|<>]"#).expect("hardcoded regex must compile")
});

/// Greeting and self-introduction prefixes, stripped in this order.
const NAME_PREFIXES: &[&str] = &[
    "انا ",
    "أنا ",
    "اسمي ",
    "إسمي ",
    "مرحبا ",
    "مرحباً ",
    "السلام عليكم",
    "http",
    "www",
    ".com",
    ".net",
    ".org",
];

const MIN_NAME_CHARS: usize = 2;
const MAX_NAME_CHARS: usize = 20;

/// The profile field collected while in a given stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileField {
    Name,
    BusinessType,
    Goals,
    WebsiteUrl,
}

impl ProfileField {
    /// Which field a message received in `stage` answers. `Complete` collects nothing.
    pub fn for_stage(stage: ConversationStage) -> Option<Self> {
        match stage {
            ConversationStage::Greeting => Some(Self::Name),
            ConversationStage::Name => Some(Self::BusinessType),
            ConversationStage::BusinessType => Some(Self::Goals),
            ConversationStage::Goals => Some(Self::WebsiteUrl),
            ConversationStage::Complete => None,
        }
    }
}

/// A value pulled out of a message for one profile field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Extraction {
    pub field: ProfileField,
    pub value: String,
}

/// Extract the field the current stage is waiting for.
pub fn extract(stage: ConversationStage, message: &str) -> Option<Extraction> {
    let field = ProfileField::for_stage(stage)?;
    let value = match field {
        ProfileField::Name => extract_name(message),
        // Free-text answers are stored as typed.
        ProfileField::BusinessType | ProfileField::Goals => {
            (!message.trim().is_empty()).then(|| message.to_string())
        }
        ProfileField::WebsiteUrl => extract_website_url(message),
    }?;
    Some(Extraction { field, value })
}

/// Pull a plausible first name out of a greeting.
///
/// Messages containing a URL never yield a name.
pub fn extract_name(message: &str) -> Option<String> {
    let mut text = message.trim();
    if URL_PATTERN.is_match(text) {
        return None;
    }

    for prefix in NAME_PREFIXES {
        if let Some(rest) = text.strip_prefix(prefix) {
            text = rest.trim();
        }
    }

    let candidate = text.split_whitespace().next()?;
    let len = candidate.chars().count();
    if !(MIN_NAME_CHARS..=MAX_NAME_CHARS).contains(&len) {
        return None;
    }
    if NAME_REJECT_PATTERN.is_match(candidate) {
        return None;
    }

    Some(candidate.to_string())
}

/// First `http(s)://` URL in the message, or the whole trimmed message as a
/// bare domain when there is none.
pub fn extract_website_url(message: &str) -> Option<String> {
    if let Some(url) = find_url(message) {
        return Some(url);
    }
    non_empty(message.trim())
}

/// First `http(s)://` URL in the message, if any.
pub fn find_url(message: &str) -> Option<String> {
    URL_PATTERN.find(message).map(|m| m.as_str().to_string())
}

fn non_empty(text: &str) -> Option<String> {
    (!text.is_empty()).then(|| text.to_string())
}
