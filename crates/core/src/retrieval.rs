//! Adaptive retrieval policy.
//!
//! Factual lookups (contact details, addresses) tend to live in short chunks
//! whose embeddings sit far from a natural-language question, so they get a
//! lower similarity threshold, a wider candidate pool, and a content-aware
//! re-rank before truncation.

use serde::{Deserialize, Serialize};

use crate::config::RetrievalConfig;
use crate::domain::knowledge::RetrievedChunk;
use crate::domain::validation::AdjustmentDirective;

const FACTUAL_KEYWORDS: &[&str] = &[
    "email", "phone", "contact", "address", "number", "reach", "call", "location", "where",
    "office",
];
const EMAIL_LOCATION_KEYWORDS: &[&str] = &["email", "location", "where", "address"];
const PHONE_KEYWORDS: &[&str] = &["phone", "call", "number"];
const LOCATION_KEYWORDS: &[&str] = &["location", "where", "address", "office"];

const EMAIL_BOOST: f64 = 1.5;
const PHONE_BOOST: f64 = 1.3;
const LOCATION_BOOST: f64 = 1.6;

const LOWER_THRESHOLD_STEP: f64 = 0.1;
const LOWER_THRESHOLD_FLOOR: f64 = 0.15;
const REPHRASE_STEP: f64 = 0.05;
const REPHRASE_FLOOR: f64 = 0.2;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalCues {
    pub factual: bool,
    pub email_or_location: bool,
    pub email: bool,
    pub phone: bool,
    pub location: bool,
}

impl RetrievalCues {
    pub fn detect(query_text: &str) -> Self {
        let lowered = query_text.to_lowercase();
        let words = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
            .collect::<Vec<_>>();
        let mentions = |keywords: &[&str]| {
            words.iter().any(|word| keywords.iter().any(|keyword| word.starts_with(keyword)))
        };

        Self {
            factual: mentions(FACTUAL_KEYWORDS),
            email_or_location: mentions(EMAIL_LOCATION_KEYWORDS),
            email: mentions(&["email"]),
            phone: mentions(PHONE_KEYWORDS),
            location: mentions(LOCATION_KEYWORDS),
        }
    }
}

/// Parameters of one vector search. `fan_out` is how many candidates the
/// store returns; `top_k` is how many survive re-ranking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievalPlan {
    pub threshold: f64,
    pub top_k: usize,
    pub fan_out: usize,
    pub cues: RetrievalCues,
}

#[derive(Clone, Debug)]
pub struct RetrievalPolicy {
    config: RetrievalConfig,
    address_keywords: Vec<String>,
}

impl RetrievalPolicy {
    pub fn new(config: RetrievalConfig) -> Self {
        let address_keywords =
            config.address_keywords.iter().map(|keyword| keyword.to_lowercase()).collect();
        Self { config, address_keywords }
    }

    pub fn plan(&self, query_text: &str) -> RetrievalPlan {
        self.plan_with_top_k(query_text, self.config.top_k)
    }

    pub fn plan_with_top_k(&self, query_text: &str, top_k: usize) -> RetrievalPlan {
        let cues = RetrievalCues::detect(query_text);
        let threshold = if cues.email_or_location {
            self.config.email_location_threshold
        } else if cues.factual {
            self.config.factual_threshold
        } else {
            self.config.default_threshold
        };
        RetrievalPlan { threshold, top_k, fan_out: self.fan_out_for(top_k, &cues), cues }
    }

    fn fan_out_for(&self, top_k: usize, cues: &RetrievalCues) -> usize {
        if cues.factual {
            top_k.saturating_mul(self.config.fan_out_multiplier)
        } else {
            top_k
        }
    }

    /// Applies a validator directive to the plan used by the next attempt.
    /// Thresholds only ever move down.
    pub fn adjust(&self, plan: &RetrievalPlan, directive: AdjustmentDirective) -> RetrievalPlan {
        let mut next = plan.clone();
        match directive {
            AdjustmentDirective::LowerThreshold => {
                next.threshold = (plan.threshold - LOWER_THRESHOLD_STEP)
                    .max(LOWER_THRESHOLD_FLOOR)
                    .min(plan.threshold);
            }
            AdjustmentDirective::WidenFanout => {
                next.top_k = self.config.widened_top_k.max(plan.top_k);
                next.fan_out = self.fan_out_for(next.top_k, &plan.cues).max(plan.fan_out);
            }
            AdjustmentDirective::Rephrase => {
                next.threshold =
                    (plan.threshold - REPHRASE_STEP).max(REPHRASE_FLOOR).min(plan.threshold);
            }
            AdjustmentDirective::None => {}
        }
        next
    }

    /// Boosts chunks that carry the kind of detail a factual query asks for,
    /// then sorts descending and truncates to `top_k`.
    pub fn rerank(&self, mut chunks: Vec<RetrievedChunk>, plan: &RetrievalPlan) -> Vec<RetrievedChunk> {
        if plan.cues.factual {
            for chunk in &mut chunks {
                chunk.similarity = self.boosted_similarity(chunk, &plan.cues);
            }
        }
        chunks.sort_by(|left, right| right.similarity.total_cmp(&left.similarity));
        chunks.truncate(plan.top_k);
        chunks
    }

    fn boosted_similarity(&self, chunk: &RetrievedChunk, cues: &RetrievalCues) -> f64 {
        let content = chunk.content.to_lowercase();
        let mut similarity = chunk.similarity;

        if cues.email && content.contains('@') {
            similarity = (similarity * EMAIL_BOOST).min(1.0);
        }
        if cues.phone && (content.contains('+') || content.chars().any(|c| c.is_ascii_digit())) {
            similarity = (similarity * PHONE_BOOST).min(1.0);
        }
        if cues.location
            && self.address_keywords.iter().any(|keyword| content.contains(keyword.as_str()))
        {
            similarity = (similarity * LOCATION_BOOST).min(1.0);
        }
        similarity
    }
}

/// Search text used by contact-info lookups inside a plan.
pub fn contact_query(info_type: Option<&str>) -> &'static str {
    match info_type.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
        Some("email") => "contact email address",
        Some("phone") => "contact phone number call",
        Some("address") | Some("location") => "office address location",
        _ => "contact email phone number office address",
    }
}

#[cfg(test)]
mod tests {
    use super::{contact_query, RetrievalCues, RetrievalPolicy};
    use crate::config::AppConfig;
    use crate::domain::knowledge::{ChunkId, DocumentId, RetrievedChunk};
    use crate::domain::validation::AdjustmentDirective;

    fn policy() -> RetrievalPolicy {
        RetrievalPolicy::new(AppConfig::default().retrieval)
    }

    fn chunk(id: &str, content: &str, similarity: f64) -> RetrievedChunk {
        RetrievedChunk {
            id: ChunkId(id.to_string()),
            document_id: DocumentId("doc-1".to_string()),
            content: content.to_string(),
            similarity,
        }
    }

    #[test]
    fn thresholds_follow_query_cues() {
        let policy = policy();

        let plan = policy.plan("What is your email?");
        assert_eq!(plan.threshold, 0.20);
        assert_eq!(plan.fan_out, 10);
        assert_eq!(plan.top_k, 5);

        let plan = policy.plan("Can I phone someone?");
        assert_eq!(plan.threshold, 0.25);
        assert_eq!(plan.fan_out, 10);

        let plan = policy.plan("Tell me about your consulting services");
        assert_eq!(plan.threshold, 0.5);
        assert_eq!(plan.fan_out, 5);
        assert!(!plan.cues.factual);
    }

    #[test]
    fn cue_detection_uses_word_starts() {
        let cues = RetrievalCues::detect("Where are your offices? Any phone numbers?");
        assert!(cues.factual && cues.location && cues.phone && cues.email_or_location);
        assert!(!cues.email);
        assert!(!RetrievalCues::detect("research approach").factual);
        assert_eq!(RetrievalCues::detect("What is my refund status?"), RetrievalCues::default());
    }

    #[test]
    fn email_chunk_outranks_higher_scored_chunk_without_address() {
        let policy = policy();
        let plan = policy.plan("what is your email");
        let ranked = policy.rerank(
            vec![
                chunk("services", "We offer strategy consulting.", 0.5),
                chunk("contact", "Write to hello@example.com", 0.4),
            ],
            &plan,
        );
        assert_eq!(ranked[0].id.0, "contact");
        assert!((ranked[0].similarity - 0.6).abs() < 1e-9);
    }

    #[test]
    fn boosts_are_capped_at_one() {
        let policy = policy();
        let plan = policy.plan("office address and email please");
        let ranked = policy.rerank(
            vec![chunk("hq", "Office: 1 High Street, London. info@example.com", 0.9)],
            &plan,
        );
        assert_eq!(ranked[0].similarity, 1.0);
    }

    #[test]
    fn non_factual_queries_are_not_boosted_but_are_truncated() {
        let policy = policy();
        let plan = policy.plan_with_top_k("tell me about your team", 2);
        let ranked = policy.rerank(
            vec![
                chunk("a", "mail us at a@b.c", 0.6),
                chunk("b", "team bios", 0.9),
                chunk("c", "history", 0.7),
            ],
            &plan,
        );
        let ids = ranked.iter().map(|c| c.id.0.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(ranked[1].similarity, 0.7);
    }

    #[test]
    fn adjustments_move_thresholds_down_with_floors() {
        let policy = policy();
        let plan = policy.plan("tell me about pricing");

        let lowered = policy.adjust(&plan, AdjustmentDirective::LowerThreshold);
        assert!((lowered.threshold - 0.4).abs() < 1e-9);
        let floor = policy.adjust(&policy.plan("email"), AdjustmentDirective::LowerThreshold);
        assert_eq!(floor.threshold, 0.15);

        let rephrased = policy.adjust(&plan, AdjustmentDirective::Rephrase);
        assert!((rephrased.threshold - 0.45).abs() < 1e-9);
        let rephrase_floor = policy.adjust(&policy.plan("email"), AdjustmentDirective::Rephrase);
        assert_eq!(rephrase_floor.threshold, 0.2);

        let widened = policy.adjust(&plan, AdjustmentDirective::WidenFanout);
        assert_eq!(widened.top_k, 10);
        assert_eq!(widened.fan_out, 10);
        assert_eq!(widened.threshold, plan.threshold);

        assert_eq!(policy.adjust(&plan, AdjustmentDirective::None), plan);
    }

    #[test]
    fn contact_queries_target_the_requested_detail() {
        assert_eq!(contact_query(Some("EMAIL")), "contact email address");
        assert!(contact_query(None).contains("phone"));
    }
}
