//! Morvo: Arabic marketing assistant with scripted onboarding and website
//! analysis.

pub mod api;
pub mod config;
pub mod error;
pub mod llm;
pub mod onboarding;
pub mod orchestrator;
pub mod retrieval;
pub mod session;
pub mod store;
pub mod testing;
pub mod website;
