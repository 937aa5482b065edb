use serde::{Deserialize, Serialize};

/// Communicative purpose of a query. Closed set; every consumer matches
/// exhaustively so a new variant is a compile-time change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    Greeting,
    Farewell,
    Gratitude,
    Help,
    ChitChat,
    OutOfScope,
    Question,
    Unclear,
    Unknown,
}

impl Intent {
    pub const ALL: [Intent; 9] = [
        Intent::Greeting,
        Intent::Farewell,
        Intent::Gratitude,
        Intent::Help,
        Intent::ChitChat,
        Intent::OutOfScope,
        Intent::Question,
        Intent::Unclear,
        Intent::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeting => "GREETING",
            Self::Farewell => "FAREWELL",
            Self::Gratitude => "GRATITUDE",
            Self::Help => "HELP",
            Self::ChitChat => "CHIT_CHAT",
            Self::OutOfScope => "OUT_OF_SCOPE",
            Self::Question => "QUESTION",
            Self::Unclear => "UNCLEAR",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        Self::ALL.into_iter().find(|intent| intent.as_str() == normalized)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationTier {
    Pattern,
    Llm,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: Intent,
    pub confidence: f64,
    pub tier: ClassificationTier,
}

impl Classification {
    pub fn pattern(intent: Intent, confidence: f64) -> Self {
        Self { intent, confidence, tier: ClassificationTier::Pattern }
    }

    pub fn llm(intent: Intent, confidence: f64) -> Self {
        Self { intent, confidence: confidence.clamp(0.0, 1.0), tier: ClassificationTier::Llm }
    }

    pub fn unknown(tier: ClassificationTier) -> Self {
        Self { intent: Intent::Unknown, confidence: 0.0, tier }
    }
}

#[cfg(test)]
mod tests {
    use super::Intent;

    #[test]
    fn parse_round_trips_every_label() {
        for intent in Intent::ALL {
            assert_eq!(Intent::parse(intent.as_str()), Some(intent));
        }
    }

    #[test]
    fn parse_tolerates_spacing_and_case() {
        assert_eq!(Intent::parse("chit chat"), Some(Intent::ChitChat));
        assert_eq!(Intent::parse(" out-of-scope "), Some(Intent::OutOfScope));
        assert_eq!(Intent::parse("SMALLTALK"), None);
    }
}
