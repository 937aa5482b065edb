use serde::{Deserialize, Serialize};

/// Closed set of retrieval adjustments the validator may ask for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdjustmentDirective {
    LowerThreshold,
    WidenFanout,
    Rephrase,
    None,
}

impl AdjustmentDirective {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LowerThreshold => "LOWER_THRESHOLD",
            Self::WidenFanout => "WIDEN_FANOUT",
            Self::Rephrase => "REPHRASE",
            Self::None => "NONE",
        }
    }

    /// Accepts the directive tokens first and falls back to the free-text
    /// phrasings validators produce when they ignore the vocabulary.
    pub fn parse(text: &str) -> Self {
        let normalized = text.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        for directive in [Self::LowerThreshold, Self::WidenFanout, Self::Rephrase, Self::None] {
            if normalized.starts_with(directive.as_str()) {
                return directive;
            }
        }

        let lower = text.to_ascii_lowercase();
        if lower.contains("lower threshold") || lower.contains("expand search") {
            Self::LowerThreshold
        } else if lower.contains("more documents") || lower.contains("increase top_k") {
            Self::WidenFanout
        } else if lower.contains("rephrase") {
            Self::Rephrase
        } else {
            Self::None
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub is_valid: bool,
    pub confidence: f64,
    pub issues: Vec<String>,
    pub retry_recommended: bool,
    pub suggested_adjustment: AdjustmentDirective,
}

pub const ISSUE_DOES_NOT_ANSWER: &str = "doesn't answer question";
pub const ISSUE_NOT_GROUNDED: &str = "not grounded in sources";
pub const ISSUE_HALLUCINATION: &str = "hallucination detected";
pub const ISSUE_LOW_CONFIDENCE: &str = "low confidence";
pub const ISSUE_UNPARSEABLE: &str = "validation_unparseable";
pub const ISSUE_UNAVAILABLE: &str = "validation_unavailable";

impl ValidationVerdict {
    /// Invalid and not retryable: used whenever the validator itself could
    /// not produce a usable judgement, so a bad validator cannot loop.
    pub fn conservative(issue: &str) -> Self {
        Self {
            is_valid: false,
            confidence: 0.0,
            issues: vec![issue.to_string()],
            retry_recommended: false,
            suggested_adjustment: AdjustmentDirective::None,
        }
    }

    /// Parses the `FIELD: value` lines of a validator completion. Returns
    /// `None` when no recognised field is present.
    pub fn parse(text: &str, min_confidence: f64) -> Option<Self> {
        let mut verdict = Self {
            is_valid: true,
            confidence: 1.0,
            issues: Vec::new(),
            retry_recommended: false,
            suggested_adjustment: AdjustmentDirective::None,
        };
        let mut recognised = 0usize;

        for line in text.lines().map(str::trim) {
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            let affirmative = value.to_ascii_lowercase().starts_with("yes");

            match field.trim().to_ascii_uppercase().as_str() {
                "ANSWERS_QUESTION" => {
                    recognised += 1;
                    if !affirmative {
                        verdict.flag(ISSUE_DOES_NOT_ANSWER);
                    }
                }
                "IS_GROUNDED" => {
                    recognised += 1;
                    if !affirmative {
                        verdict.flag(ISSUE_NOT_GROUNDED);
                    }
                }
                "HAS_HALLUCINATION" => {
                    recognised += 1;
                    if affirmative {
                        verdict.flag(ISSUE_HALLUCINATION);
                    }
                }
                "CONFIDENCE" => {
                    if let Some(confidence) = leading_number(value) {
                        recognised += 1;
                        verdict.confidence = confidence.clamp(0.0, 1.0);
                        if verdict.confidence < min_confidence {
                            verdict.flag(ISSUE_LOW_CONFIDENCE);
                        }
                    }
                }
                "RETRY" => {
                    recognised += 1;
                    verdict.retry_recommended = affirmative;
                }
                "ADJUSTMENT" => {
                    recognised += 1;
                    verdict.suggested_adjustment = AdjustmentDirective::parse(value);
                }
                _ => {}
            }
        }

        (recognised > 0).then_some(verdict)
    }

    fn flag(&mut self, issue: &str) {
        self.is_valid = false;
        self.issues.push(issue.to_string());
    }
}

/// The part of a verdict returned to the caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub is_valid: bool,
    pub confidence: f64,
    pub retry_count: u32,
    pub issues: Vec<String>,
}

impl ValidationSummary {
    pub fn from_verdict(verdict: &ValidationVerdict, retry_count: u32) -> Self {
        Self {
            is_valid: verdict.is_valid,
            confidence: verdict.confidence,
            retry_count,
            issues: verdict.issues.clone(),
        }
    }
}

fn leading_number(value: &str) -> Option<f64> {
    let number: String = value
        .chars()
        .skip_while(|c| !c.is_ascii_digit() && *c != '.')
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    number.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::{AdjustmentDirective, ValidationVerdict, ISSUE_HALLUCINATION, ISSUE_NOT_GROUNDED};

    #[test]
    fn well_formed_positive_verdict() {
        let verdict = ValidationVerdict::parse(
            "ANSWERS_QUESTION: yes\nIS_GROUNDED: yes\nHAS_HALLUCINATION: no\nCONFIDENCE: 0.9\nRETRY: no\nADJUSTMENT: NONE",
            0.7,
        )
        .expect("verdict should parse");

        assert!(verdict.is_valid);
        assert_eq!(verdict.confidence, 0.9);
        assert!(verdict.issues.is_empty());
        assert!(!verdict.retry_recommended);
    }

    #[test]
    fn hallucination_and_grounding_issues_are_collected() {
        let verdict = ValidationVerdict::parse(
            "ANSWERS_QUESTION: yes\nIS_GROUNDED: no\nHAS_HALLUCINATION: yes\nCONFIDENCE: 0.4\nRETRY: yes\nADJUSTMENT: lower threshold to find better sources",
            0.7,
        )
        .expect("verdict should parse");

        assert!(!verdict.is_valid);
        assert!(verdict.issues.contains(&ISSUE_NOT_GROUNDED.to_string()));
        assert!(verdict.issues.contains(&ISSUE_HALLUCINATION.to_string()));
        assert!(verdict.retry_recommended);
        assert_eq!(verdict.suggested_adjustment, AdjustmentDirective::LowerThreshold);
    }

    #[test]
    fn confidence_below_floor_invalidates() {
        let verdict = ValidationVerdict::parse("CONFIDENCE: 0.65", 0.7).expect("parse");
        assert!(!verdict.is_valid);
        assert_eq!(verdict.issues, vec!["low confidence".to_string()]);
    }

    #[test]
    fn unrecognised_output_yields_none() {
        assert_eq!(ValidationVerdict::parse("Looks great to me!", 0.7), None);
        assert_eq!(ValidationVerdict::parse("", 0.7), None);
    }

    #[test]
    fn directive_vocabulary_and_free_text_fallbacks() {
        assert_eq!(AdjustmentDirective::parse("WIDEN_FANOUT"), AdjustmentDirective::WidenFanout);
        assert_eq!(AdjustmentDirective::parse("widen fanout"), AdjustmentDirective::WidenFanout);
        assert_eq!(
            AdjustmentDirective::parse("retrieve more documents"),
            AdjustmentDirective::WidenFanout
        );
        assert_eq!(AdjustmentDirective::parse("please rephrase"), AdjustmentDirective::Rephrase);
        assert_eq!(AdjustmentDirective::parse("none needed"), AdjustmentDirective::None);
    }
}
