//! Configuration types.

use std::path::PathBuf;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::LlmConfig;

/// Default model used for both chat responses and website reports.
pub const DEFAULT_MODEL: &str = "gpt-4";

/// Default OpenAI-compatible endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Process-wide configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: LlmConfig,
    /// Path to the libSQL database file.
    pub database_path: PathBuf,
    /// Directory of `.txt` / `.md` documents used as retrieval context.
    pub knowledge_dir: PathBuf,
    /// HTTP listen port.
    pub port: u16,
    pub assistant: AssistantConfig,
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Fails when `OPENAI_API_KEY` is absent.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let api_key = optional_env("OPENAI_API_KEY")?
            .ok_or_else(|| ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()))?;

        let llm = LlmConfig {
            api_key: SecretString::from(api_key),
            model: optional_env("MORVO_MODEL")?.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: optional_env("OPENAI_BASE_URL")?
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        };

        let defaults = AssistantConfig::default();
        let assistant = AssistantConfig {
            temperature: parse_optional_env("MORVO_TEMPERATURE", defaults.temperature)?,
            context_top_k: parse_optional_env("MORVO_CONTEXT_TOP_K", defaults.context_top_k)?,
            history_window: parse_optional_env("MORVO_HISTORY_WINDOW", defaults.history_window)?,
        };
        if !(0.0..=2.0).contains(&assistant.temperature) {
            return Err(ConfigError::InvalidValue {
                key: "MORVO_TEMPERATURE".to_string(),
                message: format!("{} is outside 0.0..=2.0", assistant.temperature),
            });
        }

        Ok(Self {
            llm,
            database_path: optional_env("MORVO_DB_PATH")?
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/morvo.db")),
            knowledge_dir: optional_env("MORVO_KNOWLEDGE_DIR")?
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./docs")),
            port: parse_optional_env("MORVO_PORT", 8000)?,
            assistant,
        })
    }
}

/// Tuning for the response pipeline.
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// Sampling temperature for every model call.
    pub temperature: f32,
    /// Number of knowledge chunks retrieved per message.
    pub context_top_k: usize,
    /// Number of session-log entries replayed into the prompt.
    pub history_window: usize,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            context_top_k: 4,
            history_window: 6,
        }
    }
}

pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(val) if val.is_empty() => Ok(None),
        Ok(val) => Ok(Some(val)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::ParseError(format!("failed to read {key}: {e}"))),
    }
}

pub(crate) fn parse_optional_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(key)?
        .map(|s| {
            s.parse().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{e}"),
            })
        })
        .transpose()
        .map(|opt| opt.unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that touch process environment variables.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn optional_env_treats_empty_as_missing() {
        let _lock = ENV_LOCK.lock();
        unsafe { std::env::set_var("_MORVO_TEST_EMPTY", "") };
        assert!(optional_env("_MORVO_TEST_EMPTY").unwrap().is_none());
        unsafe { std::env::remove_var("_MORVO_TEST_EMPTY") };
        assert!(optional_env("_MORVO_TEST_EMPTY").unwrap().is_none());
    }

    #[test]
    fn parse_optional_env_uses_default_and_parses() {
        let _lock = ENV_LOCK.lock();
        unsafe { std::env::remove_var("_MORVO_TEST_PORT") };
        assert_eq!(parse_optional_env("_MORVO_TEST_PORT", 8000u16).unwrap(), 8000);

        unsafe { std::env::set_var("_MORVO_TEST_PORT", "9001") };
        assert_eq!(parse_optional_env("_MORVO_TEST_PORT", 8000u16).unwrap(), 9001);

        unsafe { std::env::set_var("_MORVO_TEST_PORT", "not-a-port") };
        let err = parse_optional_env("_MORVO_TEST_PORT", 8000u16).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "_MORVO_TEST_PORT"));
        unsafe { std::env::remove_var("_MORVO_TEST_PORT") };
    }

    #[test]
    fn assistant_defaults() {
        let cfg = AssistantConfig::default();
        assert!((cfg.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(cfg.context_top_k, 4);
        assert_eq!(cfg.history_window, 6);
    }
}
