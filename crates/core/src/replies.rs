//! Fixed reply texts for the fast path and for degraded outcomes.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::domain::intent::Intent;
use crate::intent::{normalize, ACKNOWLEDGEMENTS};

pub const NO_CONTEXT_RESPONSE: &str = "I'm sorry, I don't have enough information to answer that question. Could you rephrase it, or ask about our services, pricing, or how to contact us?";
pub const GENERATION_FAILED_RESPONSE: &str =
    "I'm sorry, I couldn't generate a response right now. Please try again in a moment.";
pub const UNCLEAR_QUERY_RESPONSE: &str =
    "I'm not quite sure what you're asking. Could you give me a little more detail?";

pub const GREETING_REPLIES: &[&str] = &[
    "Hello! How can I help you today?",
    "Hi there! What would you like to know?",
    "Hey! Ask me anything about our services.",
    "Welcome! What can I do for you today?",
];

pub const FAREWELL_REPLIES: &[&str] = &[
    "Goodbye! Feel free to come back if you have more questions.",
    "Take care! I'm here whenever you need help.",
    "Thanks for stopping by. Have a great day!",
];

pub const GRATITUDE_REPLIES: &[&str] = &[
    "You're welcome! Is there anything else I can help with?",
    "Happy to help! Let me know if you have other questions.",
    "My pleasure. Anything else you'd like to know?",
];

pub const HELP_REPLIES: &[&str] = &[
    "I can answer questions about our services, pricing, and how to get in touch. Just ask!",
    "Ask me about what we offer, how we work, or how to contact the team and I'll find the answer.",
    "I'm here to help with questions about the company: services, contact details, opening hours and more.",
];

pub const OUT_OF_SCOPE_REPLIES: &[&str] = &[
    "That's outside what I can help with. I can answer questions about our services and how to reach us.",
    "I'm only able to help with questions about the company. Is there something about our services I can answer?",
    "Sorry, I can't help with that one. Try asking me about what we offer or how to contact us.",
];

pub const HOW_ARE_YOU_REPLIES: &[&str] = &[
    "I'm doing well, thanks for asking! How can I help you today?",
    "All good here! What can I help you with?",
    "Great, thank you! Anything I can look up for you?",
];

pub const NAME_REPLIES: &[&str] = &[
    "I'm the virtual assistant for this site. I answer questions using the company's knowledge base.",
    "I'm an assistant here to help with questions about the company and its services.",
    "You can think of me as the help desk. Ask me anything about our services.",
];

pub const BOT_REPLIES: &[&str] = &[
    "Yes, I'm an AI assistant. I answer from the company's own documents.",
    "I am an automated assistant, but I'll do my best to help!",
    "That's right, I'm a bot. What can I help you find?",
];

pub const CHIT_CHAT_DEFAULT_REPLIES: &[&str] = &[
    "Is there anything I can help you with today?",
    "Happy to chat! Do you have a question about our services?",
    "Let me know if there's anything you'd like to know about us.",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClarificationCategory {
    Email,
    Pricing,
    Contact,
    Services,
    Hours,
    Default,
}

impl ClarificationCategory {
    /// Categories are checked in declaration order and a later match replaces
    /// an earlier one, so "email cost" resolves to pricing.
    pub fn detect(query_text: &str) -> Self {
        const RULES: &[(ClarificationCategory, &[&str])] = &[
            (ClarificationCategory::Email, &["email"]),
            (ClarificationCategory::Pricing, &["pricing", "price", "cost", "payment", "fee"]),
            (ClarificationCategory::Contact, &["contact", "phone", "address", "location"]),
            (ClarificationCategory::Services, &["services", "service"]),
            (ClarificationCategory::Hours, &["hours", "schedule", "availability"]),
        ];

        let lowered = query_text.to_lowercase();
        RULES
            .iter()
            .filter(|(_, keywords)| keywords.iter().any(|keyword| lowered.contains(keyword)))
            .map(|(category, _)| *category)
            .last()
            .unwrap_or(Self::Default)
    }

    pub fn replies(&self) -> &'static [&'static str] {
        match self {
            Self::Email => &[
                "Are you looking for our email address, or would you like to know what to email us about?",
                "Do you want our contact email, or help with something you've already sent us?",
                "Would you like the email address to reach the team?",
            ],
            Self::Pricing => &[
                "Are you asking about pricing for a specific service? Let me know which one.",
                "Which service would you like pricing information for?",
                "Could you tell me which service or package you'd like a price for?",
            ],
            Self::Contact => &[
                "Would you like our email, phone number, or office address?",
                "How would you prefer to reach us: email, phone, or in person?",
                "Which contact detail are you after: email, phone, or address?",
            ],
            Self::Services => &[
                "Which of our services would you like to know more about?",
                "Are you looking for an overview of all services, or details on a particular one?",
                "Could you tell me a bit more about what kind of service you need?",
            ],
            Self::Hours => &[
                "Are you asking about our office hours or about booking a meeting?",
                "Would you like to know our opening hours or check availability for a call?",
                "Do you mean office hours, or when the team is available to meet?",
            ],
            Self::Default => &[
                "Could you give me a bit more detail about what you're looking for?",
                "I want to make sure I help with the right thing. Could you rephrase your question?",
                "Can you tell me a little more about what you need?",
            ],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChitChatTopic {
    HowAreYou,
    Name,
    Bot,
    Acknowledgement,
    Default,
}

impl ChitChatTopic {
    pub fn detect(query_text: &str) -> Self {
        let lowered = query_text.to_lowercase();
        let tokens = normalize(query_text);
        let has_token = |candidates: &[&str]| {
            tokens.iter().any(|token| candidates.contains(&token.as_str()))
        };

        if lowered.contains("how are you") || lowered.contains("how r u") {
            Self::HowAreYou
        } else if lowered.contains("your name")
            || lowered.contains("who are you")
            || lowered.contains("what are you")
        {
            Self::Name
        } else if has_token(&["bot", "robot", "ai", "human"]) {
            Self::Bot
        } else if tokens.len() == 1 && has_token(ACKNOWLEDGEMENTS) {
            Self::Acknowledgement
        } else {
            Self::Default
        }
    }

    pub fn replies(&self) -> &'static [&'static str] {
        match self {
            Self::HowAreYou => HOW_ARE_YOU_REPLIES,
            Self::Name => NAME_REPLIES,
            Self::Bot => BOT_REPLIES,
            Self::Acknowledgement | Self::Default => CHIT_CHAT_DEFAULT_REPLIES,
        }
    }
}

/// Template set for intents that are answered without the knowledge base.
/// Chit-chat and clarification have their own topic selection.
pub fn intent_replies(intent: Intent) -> &'static [&'static str] {
    match intent {
        Intent::Greeting => GREETING_REPLIES,
        Intent::Farewell => FAREWELL_REPLIES,
        Intent::Gratitude => GRATITUDE_REPLIES,
        Intent::Help => HELP_REPLIES,
        Intent::OutOfScope => OUT_OF_SCOPE_REPLIES,
        Intent::ChitChat => CHIT_CHAT_DEFAULT_REPLIES,
        Intent::Unclear => ClarificationCategory::Default.replies(),
        Intent::Question | Intent::Unknown => &[UNCLEAR_QUERY_RESPONSE],
    }
}

pub fn pick<R: Rng + ?Sized>(templates: &'static [&'static str], rng: &mut R) -> &'static str {
    templates.choose(rng).copied().unwrap_or(UNCLEAR_QUERY_RESPONSE)
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::{intent_replies, pick, ChitChatTopic, ClarificationCategory, GREETING_REPLIES};
    use crate::domain::intent::Intent;

    #[test]
    fn every_template_intent_has_at_least_three_replies() {
        for intent in
            [Intent::Greeting, Intent::Farewell, Intent::Gratitude, Intent::Help, Intent::OutOfScope]
        {
            assert!(intent_replies(intent).len() >= 3, "{intent:?} needs three templates");
        }
    }

    #[test]
    fn seeded_selection_is_reproducible_and_in_set() {
        let mut first = StdRng::seed_from_u64(7);
        let mut second = StdRng::seed_from_u64(7);
        for _ in 0..10 {
            let a = pick(GREETING_REPLIES, &mut first);
            let b = pick(GREETING_REPLIES, &mut second);
            assert_eq!(a, b);
            assert!(GREETING_REPLIES.contains(&a));
        }
    }

    #[test]
    fn later_clarification_categories_override_earlier_ones() {
        assert_eq!(ClarificationCategory::detect("email"), ClarificationCategory::Email);
        assert_eq!(ClarificationCategory::detect("email cost"), ClarificationCategory::Pricing);
        assert_eq!(
            ClarificationCategory::detect("price of the service"),
            ClarificationCategory::Services
        );
        assert_eq!(ClarificationCategory::detect("phone hours"), ClarificationCategory::Hours);
        assert_eq!(ClarificationCategory::detect("hmm"), ClarificationCategory::Default);
    }

    #[test]
    fn chit_chat_topics() {
        assert_eq!(ChitChatTopic::detect("Hey, how are you?"), ChitChatTopic::HowAreYou);
        assert_eq!(ChitChatTopic::detect("what's your name"), ChitChatTopic::Name);
        assert_eq!(ChitChatTopic::detect("are you a bot"), ChitChatTopic::Bot);
        assert_eq!(ChitChatTopic::detect("Okay!"), ChitChatTopic::Acknowledgement);
        assert_eq!(ChitChatTopic::detect("said nothing"), ChitChatTopic::Default);
        assert_eq!(ChitChatTopic::detect("cool"), ChitChatTopic::Default);
    }
}
