use serde::{Deserialize, Serialize};

use crate::domain::intent::Intent;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    FastPath,
    PlanningPath,
    RagPath,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FastPath => "fast_path",
            Self::PlanningPath => "planning_path",
            Self::RagPath => "rag_path",
        }
    }
}

const CONNECTIVES: &[&str] = &[
    "first",
    "then",
    "also",
    "after that",
    "afterwards",
    "next",
    "finally",
    "as well",
    "in addition",
    "and then",
];

/// Maps an intent to the pipeline path that serves it.
pub fn route(intent: Intent, query_text: &str) -> Route {
    match intent {
        Intent::Greeting
        | Intent::Farewell
        | Intent::Gratitude
        | Intent::Help
        | Intent::OutOfScope
        | Intent::Unclear
        | Intent::ChitChat => Route::FastPath,
        Intent::Question | Intent::Unknown => {
            if needs_planning(query_text, intent) {
                Route::PlanningPath
            } else {
                Route::RagPath
            }
        }
    }
}

/// True when a query looks like a multi-part request.
pub fn needs_planning(query_text: &str, intent: Intent) -> bool {
    if intent == Intent::Unknown {
        return true;
    }

    let lowered = query_text.to_lowercase();
    let words = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>();

    let has_connective = CONNECTIVES.iter().any(|connective| {
        let needle = connective.split(' ').collect::<Vec<_>>();
        words.windows(needle.len()).any(|window| window == needle.as_slice())
    });

    has_connective || lowered.matches('?').count() > 1 || lowered.matches(" and ").count() >= 2
}

#[cfg(test)]
mod tests {
    use super::{needs_planning, route, Route};
    use crate::domain::intent::Intent;

    #[test]
    fn fast_path_intents_never_plan() {
        for intent in [
            Intent::Greeting,
            Intent::Farewell,
            Intent::Gratitude,
            Intent::Help,
            Intent::OutOfScope,
            Intent::Unclear,
            Intent::ChitChat,
        ] {
            assert_eq!(route(intent, "first do this and then that"), Route::FastPath);
        }
    }

    #[test]
    fn single_question_goes_to_rag() {
        assert_eq!(route(Intent::Question, "What is your email?"), Route::RagPath);
    }

    #[test]
    fn connectives_trigger_planning() {
        let query = "Find the contact email for Githaf, then send them a meeting request";
        assert!(needs_planning(query, Intent::Question));
        assert_eq!(route(Intent::Question, query), Route::PlanningPath);
    }

    #[test]
    fn connectives_match_whole_words_only() {
        assert!(!needs_planning("Is the office open at weekends?", Intent::Question));
        assert!(!needs_planning("What does Githaf do nextday?", Intent::Question));
    }

    #[test]
    fn multiple_questions_or_conjunctions_trigger_planning() {
        assert!(needs_planning("Where are you? What do you charge?", Intent::Question));
        assert!(needs_planning(
            "I want pricing and hours and a contact number",
            Intent::Question
        ));
        assert!(!needs_planning("pricing and hours please", Intent::Question));
    }

    #[test]
    fn unknown_intent_always_plans() {
        assert!(needs_planning("refund", Intent::Unknown));
        assert_eq!(route(Intent::Unknown, "refund"), Route::PlanningPath);
    }
}
