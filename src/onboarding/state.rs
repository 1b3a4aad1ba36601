//! Conversation stage machine: tracks which profile field is being collected.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The stages of the onboarding conversation.
///
/// Progresses linearly: Greeting → Name → BusinessType → Goals → Complete.
/// Each stage is named after the question that was last asked, so the
/// message received while in a stage answers that question:
/// `Greeting` expects a name, `Name` expects a job/business type,
/// `BusinessType` expects goals and `Goals` expects a website.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStage {
    Greeting,
    Name,
    BusinessType,
    Goals,
    Complete,
}

impl ConversationStage {
    /// All stages in order.
    pub const ALL: [ConversationStage; 5] = [
        Self::Greeting,
        Self::Name,
        Self::BusinessType,
        Self::Goals,
        Self::Complete,
    ];

    /// The next stage in the linear progression. `Complete` stays `Complete`.
    pub fn next(&self) -> ConversationStage {
        use ConversationStage::*;
        match self {
            Greeting => Name,
            Name => BusinessType,
            BusinessType => Goals,
            Goals | Complete => Complete,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Name => "name",
            Self::BusinessType => "business_type",
            Self::Goals => "goals",
            Self::Complete => "complete",
        }
    }
}

impl Default for ConversationStage {
    fn default() -> Self {
        Self::Greeting
    }
}

impl std::fmt::Display for ConversationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversationStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown conversation stage: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_follows_question_order() {
        use ConversationStage::*;
        let steps = [
            (Greeting, Name),
            (Name, BusinessType),
            (BusinessType, Goals),
            (Goals, Complete),
        ];
        for (from, to) in steps {
            assert_eq!(from.next(), to, "{from} should advance to {to}");
        }
    }

    #[test]
    fn four_advances_reach_complete_and_stay() {
        let mut stage = ConversationStage::Greeting;
        for _ in 0..4 {
            assert_ne!(stage, ConversationStage::Complete);
            stage = stage.next();
        }
        assert_eq!(stage, ConversationStage::Complete);
        assert_eq!(stage.next(), ConversationStage::Complete);
        assert_eq!(stage.next().next(), ConversationStage::Complete);
    }

    #[test]
    fn display_matches_serde() {
        for stage in ConversationStage::ALL {
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(format!("\"{stage}\""), json, "Display and serde should match for {stage:?}");
        }
    }

    #[test]
    fn parse_roundtrip_and_unknown() {
        for stage in ConversationStage::ALL {
            assert_eq!(stage.as_str().parse::<ConversationStage>().unwrap(), stage);
        }
        assert!("website".parse::<ConversationStage>().is_err());
    }

    #[test]
    fn default_is_greeting() {
        assert_eq!(ConversationStage::default(), ConversationStage::Greeting);
    }
}
