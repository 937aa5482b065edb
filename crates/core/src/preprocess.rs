//! Query normalization applied before classification and retrieval.
//!
//! Two rule families run in a fixed order: brand aliases are expanded to the
//! company's full name, then common misspellings are replaced by their
//! canonical term. Both are whole-word and case-insensitive, and neither can
//! produce text the other would rewrite again, so running the preprocessor
//! twice gives the same output as running it once.

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::domain::query::ProcessedQuery;

/// Short company name that should be expanded to its full form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandAlias {
    pub alias: String,
    pub full_name: String,
}

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("invalid rewrite pattern `{pattern}`: {source}")]
    InvalidPattern { pattern: String, source: regex::Error },
}

const MISSPELLINGS: &[(&str, &str)] = &[
    (r"emial|emal|e-mail", "email"),
    (r"contct|contac|contat", "contact"),
    (r"locaton|loction|locaion", "location"),
    (r"addres|adress", "address"),
    (r"phne|phn", "phone"),
    (r"servce|servic|servces", "services"),
    (r"consultin|consultng|consutling", "consulting"),
    (r"bussiness|busines|buisness", "business"),
    (r"queston|questin|qustion", "question"),
    (r"informaton|informtion|infomation", "information"),
    (r"avaliable|availble|avalable", "available"),
    (r"recieve|recive", "receive"),
    (r"responce|reponse", "response"),
];

struct AliasRule {
    pattern: Regex,
    /// Occurrences of the full name; alias hits inside them are left alone.
    full_pattern: Regex,
    full_name: String,
}

pub struct QueryPreprocessor {
    aliases: Vec<AliasRule>,
    misspellings: Vec<(Regex, &'static str)>,
}

impl QueryPreprocessor {
    pub fn new(brand_aliases: &[BrandAlias]) -> Result<Self, PreprocessError> {
        let mut aliases = Vec::with_capacity(brand_aliases.len());
        for brand in brand_aliases {
            let alias = brand.alias.trim();
            let full_name = brand.full_name.trim();
            if alias.is_empty() || full_name.is_empty() {
                continue;
            }
            aliases.push(AliasRule {
                pattern: compile(&whole_words(alias))?,
                full_pattern: compile(&whole_words(full_name))?,
                full_name: full_name.to_string(),
            });
        }

        let misspellings = MISSPELLINGS
            .iter()
            .map(|(pattern, canonical)| {
                compile(&format!(r"(?i)\b(?:{pattern})\b")).map(|regex| (regex, *canonical))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { aliases, misspellings })
    }

    pub fn preprocess(&self, raw: &str) -> ProcessedQuery {
        if raw.trim().is_empty() {
            return ProcessedQuery { original: raw.to_string(), text: raw.to_string() };
        }

        let mut text = raw.to_string();
        for rule in &self.aliases {
            text = expand_alias(rule, &text);
        }
        for (pattern, canonical) in &self.misspellings {
            text = pattern.replace_all(&text, *canonical).into_owned();
        }

        if text != raw {
            info!(
                event_name = "core.preprocess.rewritten",
                original = %raw,
                processed = %text,
                "query rewritten during preprocessing"
            );
        }

        ProcessedQuery { original: raw.to_string(), text }
    }
}

fn compile(pattern: &str) -> Result<Regex, PreprocessError> {
    Regex::new(pattern)
        .map_err(|source| PreprocessError::InvalidPattern { pattern: pattern.to_string(), source })
}

/// `\b` only holds next to a word character, so it is added per side.
fn whole_words(literal: &str) -> String {
    let is_word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');
    let start = if is_word(literal.chars().next()) { r"\b" } else { "" };
    let end = if is_word(literal.chars().last()) { r"\b" } else { "" };
    format!("(?i){start}{}{end}", regex::escape(literal))
}

fn expand_alias(rule: &AliasRule, text: &str) -> String {
    let protected: Vec<(usize, usize)> =
        rule.full_pattern.find_iter(text).map(|span| (span.start(), span.end())).collect();

    let mut output = String::with_capacity(text.len());
    let mut cursor = 0;

    for found in rule.pattern.find_iter(text) {
        let inside_full_name = protected
            .iter()
            .any(|(start, end)| found.start() >= *start && found.end() <= *end);
        if inside_full_name {
            continue;
        }
        output.push_str(&text[cursor..found.start()]);
        output.push_str(&rule.full_name);
        cursor = found.end();
    }
    output.push_str(&text[cursor..]);
    output
}
