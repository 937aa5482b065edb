//! Parsing and bounding for the feedback learning loop.
//!
//! The analysis itself is an LLM call made by the agent crate; this module
//! turns its sectioned text into a report and turns suggested parameter
//! changes into clamped proposals. Proposals are recorded for operators and
//! never applied to the running configuration.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::domain::conversation::CompanyId;

const DEFAULT_ANALYSIS_CONFIDENCE: f64 = 0.7;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LearningReportId(pub String);

impl LearningReportId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackAnalysis {
    pub analyzed: usize,
    pub issues: Vec<String>,
    pub root_causes: Vec<String>,
    /// Parameter name to the raw `current → suggested (reason)` text.
    pub threshold_adjustments: BTreeMap<String, String>,
    pub knowledge_gaps: Vec<String>,
    pub recommendations: Vec<String>,
    pub confidence: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Section {
    Issues,
    Causes,
    Thresholds,
    Gaps,
    Recommendations,
}

impl FeedbackAnalysis {
    /// Result for a window with nothing to analyze.
    pub fn empty() -> Self {
        Self { confidence: 1.0, ..Self::default() }
    }

    pub fn parse(text: &str, analyzed: usize) -> Self {
        let mut analysis =
            Self { analyzed, confidence: DEFAULT_ANALYSIS_CONFIDENCE, ..Self::default() };
        let mut section = None;

        for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
            let header = line.split_once(':').map(|(head, rest)| (head.trim(), rest.trim()));
            match header {
                Some(("COMMON_ISSUES", _)) => section = Some(Section::Issues),
                Some(("ROOT_CAUSES", _)) => section = Some(Section::Causes),
                Some(("THRESHOLD_ADJUSTMENTS", _)) => section = Some(Section::Thresholds),
                Some(("KNOWLEDGE_GAPS", _)) => section = Some(Section::Gaps),
                Some(("RECOMMENDATIONS", _)) => section = Some(Section::Recommendations),
                Some(("CONFIDENCE", value)) => {
                    if let Ok(confidence) = value.parse::<f64>() {
                        analysis.confidence = confidence.clamp(0.0, 1.0);
                    }
                }
                _ => analysis.absorb(section, line),
            }
        }

        analysis
    }

    fn absorb(&mut self, section: Option<Section>, line: &str) {
        let bullet = line.strip_prefix('-').or_else(|| line.strip_prefix('•')).map(str::trim);

        match (section, bullet) {
            (Some(Section::Issues), Some(item)) => self.issues.push(item.to_string()),
            (Some(Section::Causes), Some(item)) => self.root_causes.push(item.to_string()),
            (Some(Section::Gaps), Some(item)) => self.knowledge_gaps.push(item.to_string()),
            (Some(Section::Thresholds), _) => {
                let entry = bullet.unwrap_or(line);
                if let Some((name, adjustment)) = entry.split_once(':') {
                    if adjustment.contains('→') || adjustment.contains("->") {
                        self.threshold_adjustments
                            .insert(name.trim().to_string(), adjustment.trim().to_string());
                    }
                }
            }
            (Some(Section::Recommendations), _) => {
                if line.starts_with(|c: char| c.is_ascii_digit()) {
                    let item = line
                        .split_once(['.', ')'])
                        .map(|(_, rest)| rest.trim())
                        .unwrap_or(line);
                    self.recommendations.push(item.to_string());
                } else if let Some(item) = bullet {
                    self.recommendations.push(item.to_string());
                }
            }
            _ => {}
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunableParameter {
    SimilarityThreshold,
    TopK,
    Temperature,
    ValidationConfidence,
}

impl TunableParameter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SimilarityThreshold => "similarity_threshold",
            Self::TopK => "top_k",
            Self::Temperature => "temperature",
            Self::ValidationConfidence => "validation_confidence",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "similarity_threshold" => Some(Self::SimilarityThreshold),
            "top_k" => Some(Self::TopK),
            "temperature" => Some(Self::Temperature),
            "validation_confidence" => Some(Self::ValidationConfidence),
            _ => None,
        }
    }

    pub fn bounds(&self) -> (f64, f64) {
        match self {
            Self::SimilarityThreshold => (0.3, 0.8),
            Self::TopK => (3.0, 10.0),
            Self::Temperature => (0.3, 1.0),
            Self::ValidationConfidence => (0.5, 0.9),
        }
    }

    pub fn clamp_value(&self, value: f64) -> f64 {
        let (low, high) = self.bounds();
        let clamped = value.clamp(low, high);
        match self {
            Self::TopK => clamped.round(),
            _ => clamped,
        }
    }
}

/// Values the running configuration currently uses, for proposal context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TuningBaseline {
    pub values: BTreeMap<TunableParameter, f64>,
}

impl TuningBaseline {
    pub fn from_config(config: &AppConfig) -> Self {
        let values = BTreeMap::from([
            (TunableParameter::SimilarityThreshold, config.retrieval.default_threshold),
            (TunableParameter::TopK, config.retrieval.top_k as f64),
            (TunableParameter::Temperature, f64::from(config.llm.temperature)),
            (TunableParameter::ValidationConfidence, config.validation.min_confidence),
        ]);
        Self { values }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TuningProposal {
    pub parameter: TunableParameter,
    pub current: f64,
    pub suggested: f64,
    pub rationale: Option<String>,
}

/// Extracts `current → suggested (reason)` values and clamps each suggestion
/// into its safe range. Unknown parameters and unparseable values are skipped.
pub fn propose_tuning(
    adjustments: &BTreeMap<String, String>,
    baseline: &TuningBaseline,
) -> Vec<TuningProposal> {
    adjustments
        .iter()
        .filter_map(|(name, text)| {
            let parameter = TunableParameter::parse(name)?;
            let (_, after_arrow) = text.split_once('→').or_else(|| text.split_once("->"))?;
            let (value_text, rationale) = match after_arrow.split_once('(') {
                Some((value, reason)) => {
                    (value, Some(reason.trim_end_matches(')').trim().to_string()))
                }
                None => (after_arrow, None),
            };
            let suggested = value_text.trim().parse::<f64>().ok()?;
            let current = baseline.values.get(&parameter).copied()?;
            Some(TuningProposal {
                parameter,
                current,
                suggested: parameter.clamp_value(suggested),
                rationale: rationale.filter(|reason| !reason.is_empty()),
            })
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LearningReport {
    pub id: LearningReportId,
    pub company_id: CompanyId,
    pub window_days: u32,
    pub analysis: FeedbackAnalysis,
    pub proposals: Vec<TuningProposal>,
    pub created_at: DateTime<Utc>,
}

impl LearningReport {
    /// Proposals are only attached when the analysis clears `min_confidence`.
    pub fn build(
        company_id: CompanyId,
        window_days: u32,
        analysis: FeedbackAnalysis,
        baseline: &TuningBaseline,
        min_confidence: f64,
    ) -> Self {
        let proposals = if analysis.confidence >= min_confidence {
            propose_tuning(&analysis.threshold_adjustments, baseline)
        } else {
            Vec::new()
        };
        Self {
            id: LearningReportId::generate(),
            company_id,
            window_days,
            analysis,
            proposals,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        propose_tuning, FeedbackAnalysis, LearningReport, TunableParameter, TuningBaseline,
    };
    use crate::config::AppConfig;
    use crate::domain::conversation::CompanyId;

    const ANALYSIS: &str = "COMMON_ISSUES:
- Answers miss the office address
- Pricing questions return generic text

ROOT_CAUSES:
- Threshold too strict for short chunks

THRESHOLD_ADJUSTMENTS:
similarity_threshold: 0.5 → 0.2 (contact chunks score low)
top_k: 5 → 14 (need more candidates)
temperature: 0.7 -> 0.6
max_tokens: 500 → 800

KNOWLEDGE_GAPS:
- Pricing tiers

RECOMMENDATIONS:
1. Add a pricing page to the knowledge base
2) Split the contact document into smaller chunks

CONFIDENCE: 0.8";

    #[test]
    fn parses_every_section() {
        let analysis = FeedbackAnalysis::parse(ANALYSIS, 4);
        assert_eq!(analysis.analyzed, 4);
        assert_eq!(analysis.issues.len(), 2);
        assert_eq!(analysis.root_causes, vec!["Threshold too strict for short chunks"]);
        assert_eq!(analysis.threshold_adjustments.len(), 4);
        assert_eq!(analysis.knowledge_gaps, vec!["Pricing tiers"]);
        assert_eq!(
            analysis.recommendations,
            vec![
                "Add a pricing page to the knowledge base",
                "Split the contact document into smaller chunks"
            ]
        );
        assert_eq!(analysis.confidence, 0.8);
    }

    #[test]
    fn missing_confidence_uses_default() {
        let analysis = FeedbackAnalysis::parse("COMMON_ISSUES:\n- something", 1);
        assert_eq!(analysis.confidence, 0.7);
    }

    #[test]
    fn proposals_are_clamped_and_unknown_parameters_skipped() {
        let analysis = FeedbackAnalysis::parse(ANALYSIS, 4);
        let baseline = TuningBaseline::from_config(&AppConfig::default());
        let proposals = propose_tuning(&analysis.threshold_adjustments, &baseline);

        assert_eq!(proposals.len(), 3);
        let by_parameter = |parameter: TunableParameter| {
            proposals.iter().find(|proposal| proposal.parameter == parameter).map(|p| p.suggested)
        };
        assert_eq!(by_parameter(TunableParameter::SimilarityThreshold), Some(0.3));
        assert_eq!(by_parameter(TunableParameter::TopK), Some(10.0));
        assert_eq!(by_parameter(TunableParameter::Temperature), Some(0.6));

        let threshold = proposals
            .iter()
            .find(|proposal| proposal.parameter == TunableParameter::SimilarityThreshold)
            .and_then(|proposal| proposal.rationale.clone());
        assert_eq!(threshold.as_deref(), Some("contact chunks score low"));
    }

    #[test]
    fn clamp_value_keeps_suggestions_in_range() {
        assert_eq!(TunableParameter::TopK.clamp_value(7.4), 7.0);
        assert_eq!(TunableParameter::TopK.clamp_value(42.0), 10.0);
        assert_eq!(TunableParameter::SimilarityThreshold.clamp_value(0.1), 0.3);
        assert_eq!(TunableParameter::ValidationConfidence.clamp_value(0.75), 0.75);
    }

    #[test]
    fn low_confidence_reports_carry_no_proposals() {
        let baseline = TuningBaseline::from_config(&AppConfig::default());
        let mut analysis = FeedbackAnalysis::parse(ANALYSIS, 4);
        analysis.confidence = 0.5;

        let report =
            LearningReport::build(CompanyId("acme".to_string()), 7, analysis, &baseline, 0.6);
        assert!(report.proposals.is_empty());
        assert_eq!(report.analysis.issues.len(), 2);
    }
}
