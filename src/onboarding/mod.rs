//! Onboarding: the scripted conversation that builds a user's profile.
//!
//! A new user is asked four questions in order (name, role, goals,
//! website). Each answer is extracted, stored and advances the stage. Once
//! all four are collected the profile feeds every generated response.

pub mod extract;
pub mod machine;
pub mod model;
pub mod prompts;
pub mod state;

pub use extract::{Extraction, ProfileField};
pub use machine::{ConversationStatus, StageMachine, StageOutcome};
pub use model::{Profile, ProfileUpdate, WebsiteAnalysis};
pub use state::ConversationStage;
