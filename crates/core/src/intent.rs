//! Pattern tier of intent classification.
//!
//! Curated phrase sets are checked in a fixed order and the first category
//! that matches wins; there is no scoring across categories. A phrase
//! matches in one of two ways:
//!
//! - `exact`: the whole normalized query is the phrase, or the query starts
//!   with the phrase and adds at most two courtesy words with no question
//!   marker ("hello there team", "hi thanks"). Courtesy words are the words
//!   of curated exact phrases plus a short filler list, so "hello refund
//!   status" is not a greeting.
//! - `contains`: the phrase's words appear contiguously anywhere in the query.
//!
//! Queries that match nothing fall back to a question-indicator test.

use crate::domain::intent::{Classification, Intent};
use crate::domain::query::ProcessedQuery;

/// Pattern results at or above this confidence skip the LLM tier.
pub const LLM_TIER_THRESHOLD: f64 = 0.8;

pub const EXACT_CONFIDENCE: f64 = 0.95;
pub const PREFIX_CONFIDENCE: f64 = 0.85;
pub const CONTAINS_CONFIDENCE: f64 = 0.9;
pub const QUESTION_CONFIDENCE: f64 = 0.7;

const MAX_PREFIX_EXTRA_WORDS: usize = 2;

const PREFIX_FILLER: &[&str] = &[
    "team", "everyone", "everybody", "all", "folks", "guys", "friend", "friends", "again", "so",
    "very", "much", "a", "lot", "for", "now", "bot",
];

pub struct PatternSet {
    pub intent: Intent,
    pub exact: &'static [&'static str],
    pub contains: &'static [&'static str],
}

/// Declaration order is the tie-break order.
pub const PATTERN_SETS: [PatternSet; 6] = [
    PatternSet {
        intent: Intent::Greeting,
        exact: &[
            "hi",
            "hello",
            "hey",
            "hiya",
            "howdy",
            "greetings",
            "good morning",
            "good afternoon",
            "good evening",
            "hi there",
            "hello there",
            "hey there",
            "hola",
            "buenos dias",
            "buenos días",
            "buenas tardes",
            "bonjour",
            "salut",
            "hallo",
            "guten tag",
            "ciao",
            "olá",
            "salaam",
            "assalamu alaikum",
            "namaste",
        ],
        contains: &[],
    },
    PatternSet {
        intent: Intent::Farewell,
        exact: &[
            "bye",
            "goodbye",
            "good bye",
            "bye bye",
            "see you",
            "see you later",
            "see ya",
            "good night",
            "take care",
            "farewell",
            "talk to you later",
            "adios",
            "adiós",
            "hasta luego",
            "au revoir",
            "tschüss",
            "auf wiedersehen",
        ],
        contains: &[],
    },
    PatternSet {
        intent: Intent::Gratitude,
        exact: &[
            "thanks",
            "thank you",
            "thx",
            "ty",
            "thanks a lot",
            "thank you so much",
            "many thanks",
            "much appreciated",
            "appreciate it",
            "cheers",
            "gracias",
            "muchas gracias",
            "merci",
            "merci beaucoup",
            "danke",
            "danke schön",
            "obrigado",
            "shukran",
        ],
        contains: &[],
    },
    PatternSet {
        intent: Intent::Help,
        exact: &["help", "help me", "ayuda", "aide", "hilfe", "menu", "options"],
        contains: &[
            "what can you do",
            "what can you help with",
            "how can you help",
            "how do you work",
            "what are your capabilities",
            "what questions can i ask",
        ],
    },
    PatternSet {
        intent: Intent::ChitChat,
        exact: &[
            "yes",
            "ok",
            "okay",
            "sure",
            "yep",
            "yeah",
            "yup",
            "cool",
            "nice",
            "great",
            "awesome",
            "lol",
            "haha",
            "who are you",
            "what are you",
        ],
        contains: &[
            "how are you",
            "how r u",
            "how is it going",
            "how's it going",
            "what's up",
            "whats up",
            "your name",
            "are you a bot",
            "are you a robot",
            "are you human",
            "are you real",
            "tell me a joke",
            "who made you",
        ],
    },
    PatternSet {
        intent: Intent::OutOfScope,
        exact: &[],
        contains: &[
            "weather",
            "stock price",
            "stock market",
            "bitcoin",
            "lottery",
            "recipe",
            "sports score",
            "football score",
            "homework",
            "write a poem",
            "write me a poem",
            "tell me a story",
            "movie recommendation",
            "horoscope",
            "el tiempo",
            "la météo",
        ],
    },
];

const QUESTION_WORDS: &[&str] = &[
    "what", "what's", "where", "where's", "when", "who", "who's", "whom", "whose", "why", "how",
    "how's", "which", "qué", "que", "dónde", "donde", "cuándo", "cuando", "cómo", "como", "quoi",
    "où", "comment", "quand", "pourquoi",
];

/// Words the acknowledgement path of the chit-chat responder reacts to.
pub const ACKNOWLEDGEMENTS: &[&str] = &["yes", "okay", "ok", "sure", "yep", "yeah", "yup"];

pub fn normalize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '\'' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

pub fn has_question_indicator(raw: &str, tokens: &[String]) -> bool {
    raw.contains('?') || tokens.iter().any(|token| QUESTION_WORDS.contains(&token.as_str()))
}

/// Tier-1 classification. Pure and allocation-light; never calls out.
pub fn classify_patterns(query: &ProcessedQuery) -> Classification {
    let tokens = normalize(&query.text);
    if tokens.is_empty() {
        return Classification::pattern(Intent::Unknown, 0.0);
    }
    let questioning = has_question_indicator(&query.text, &tokens);

    for set in &PATTERN_SETS {
        if let Some(confidence) = match_set(set, &tokens, questioning) {
            return Classification::pattern(set.intent, confidence);
        }
    }

    if questioning {
        Classification::pattern(Intent::Question, QUESTION_CONFIDENCE)
    } else {
        Classification::pattern(Intent::Unknown, 0.0)
    }
}

fn match_set(set: &PatternSet, tokens: &[String], questioning: bool) -> Option<f64> {
    for phrase in set.exact {
        let phrase_tokens = normalize(phrase);
        if tokens == phrase_tokens.as_slice() {
            return Some(EXACT_CONFIDENCE);
        }
        let short_prefix = tokens.len() <= phrase_tokens.len() + MAX_PREFIX_EXTRA_WORDS
            && tokens.starts_with(&phrase_tokens)
            && tokens[phrase_tokens.len()..].iter().all(|word| is_courtesy_word(word));
        if short_prefix && !questioning {
            return Some(PREFIX_CONFIDENCE);
        }
    }

    set.contains
        .iter()
        .any(|phrase| contains_sequence(tokens, &normalize(phrase)))
        .then_some(CONTAINS_CONFIDENCE)
}

fn is_courtesy_word(word: &str) -> bool {
    PREFIX_FILLER.contains(&word)
        || PATTERN_SETS
            .iter()
            .flat_map(|set| set.exact.iter())
            .any(|phrase| normalize(phrase).iter().any(|token| token == word))
}

fn contains_sequence(tokens: &[String], phrase: &[String]) -> bool {
    !phrase.is_empty() && tokens.windows(phrase.len()).any(|window| window == phrase)
}

/// Parses the `INTENT:` / `CONFIDENCE:` fields of an LLM classification.
/// Both fields are required; anything else is treated as malformed.
pub fn parse_llm_classification(text: &str) -> Option<Classification> {
    let mut intent = None;
    let mut confidence = None;

    for line in text.lines().map(str::trim) {
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        match field.trim().to_ascii_uppercase().as_str() {
            "INTENT" => {
                let label = value.split_whitespace().next().unwrap_or_default();
                intent = Intent::parse(label.trim_matches(|c: char| !c.is_alphanumeric() && c != '_'));
            }
            "CONFIDENCE" => {
                confidence = value
                    .split_whitespace()
                    .next()
                    .and_then(|number| number.trim_end_matches(['.', ',']).parse::<f64>().ok())
                    .filter(|number| (0.0..=1.0).contains(number));
            }
            _ => {}
        }
    }

    Some(Classification::llm(intent?, confidence?))
}

#[cfg(test)]
mod tests {
    use super::{classify_patterns, parse_llm_classification, LLM_TIER_THRESHOLD, PATTERN_SETS};
    use crate::domain::intent::{ClassificationTier, Intent};
    use crate::domain::query::ProcessedQuery;

    fn query(text: &str) -> ProcessedQuery {
        ProcessedQuery { original: text.to_string(), text: text.to_string() }
    }

    #[test]
    fn every_curated_phrase_classifies_to_its_owner_without_llm() {
        for set in &PATTERN_SETS {
            for phrase in set.exact.iter().chain(set.contains.iter()) {
                let result = classify_patterns(&query(phrase));
                assert_eq!(result.intent, set.intent, "`{phrase}` should be {:?}", set.intent);
                assert!(
                    result.confidence >= LLM_TIER_THRESHOLD,
                    "`{phrase}` should clear the LLM tier threshold"
                );
                assert_eq!(result.tier, ClassificationTier::Pattern);
            }
        }
    }

    #[test]
    fn punctuation_and_case_do_not_matter() {
        assert_eq!(classify_patterns(&query("Hello!!")).intent, Intent::Greeting);
        assert_eq!(classify_patterns(&query("THANK YOU.")).intent, Intent::Gratitude);
        assert_eq!(classify_patterns(&query("¿Hola?")).intent, Intent::Greeting);
    }

    #[test]
    fn short_greeting_prefix_matches_but_greeting_with_question_does_not() {
        let result = classify_patterns(&query("hello there team"));
        assert_eq!(result.intent, Intent::Greeting);

        let result = classify_patterns(&query("hi, what is your email?"));
        assert_eq!(result.intent, Intent::Question);
        assert_eq!(result.confidence, 0.7);
    }

    #[test]
    fn greeting_prefix_with_business_words_is_not_small_talk() {
        for text in ["hello refund status", "hi order 42", "thanks invoice copy"] {
            let result = classify_patterns(&query(text));
            assert_eq!(result.intent, Intent::Unknown, "`{text}` must reach retrieval");
        }
        assert_eq!(classify_patterns(&query("good morning everyone")).intent, Intent::Greeting);
        assert_eq!(classify_patterns(&query("thank you again")).intent, Intent::Gratitude);
    }

    #[test]
    fn first_declared_category_wins() {
        // Both a greeting prefix and chit-chat phrase; the query is too long
        // for the greeting prefix rule, so chit-chat claims it.
        assert_eq!(classify_patterns(&query("hey how are you")).intent, Intent::ChitChat);
        // Greeting is declared before gratitude.
        assert_eq!(classify_patterns(&query("hi thanks")).intent, Intent::Greeting);
    }

    #[test]
    fn out_of_scope_keywords_match_inside_questions() {
        let result = classify_patterns(&query("What's the weather like in Paris?"));
        assert_eq!(result.intent, Intent::OutOfScope);
    }

    #[test]
    fn plain_statement_is_unknown() {
        let result = classify_patterns(&query("refund status for order 42"));
        assert_eq!(result.intent, Intent::Unknown);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn llm_output_requires_both_fields() {
        let parsed = parse_llm_classification("INTENT: QUESTION\nCONFIDENCE: 0.92")
            .expect("well formed output");
        assert_eq!(parsed.intent, Intent::Question);
        assert_eq!(parsed.confidence, 0.92);
        assert_eq!(parsed.tier, ClassificationTier::Llm);

        assert!(parse_llm_classification("INTENT: QUESTION").is_none());
        assert!(parse_llm_classification("INTENT: PIZZA\nCONFIDENCE: 0.9").is_none());
        assert!(parse_llm_classification("I think it's a question").is_none());
        assert!(parse_llm_classification("INTENT: UNCLEAR\nCONFIDENCE: 7").is_none());
    }
}
