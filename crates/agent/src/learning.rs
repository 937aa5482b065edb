//! Periodic analysis of low-rated replies.
//!
//! Reports are persisted for operators; nothing here mutates the running
//! configuration.

use std::sync::Arc;

use chrono::{Duration, Utc};
use thiserror::Error;
use tracing::{info, warn};

use ragdesk_core::config::LearningConfig;
use ragdesk_core::domain::conversation::CompanyId;
use ragdesk_core::errors::ProviderError;
use ragdesk_core::learning::{FeedbackAnalysis, LearningReport, TuningBaseline};
use ragdesk_db::repositories::{FeedbackStore, RepositoryError};

use crate::llm::{CompletionRequest, LlmClient};
use crate::prompts::{PromptError, PromptLibrary};

const ANALYSIS_SAMPLE_SIZE: usize = 5;
const ANALYSIS_MAX_TOKENS: u32 = 800;
const ANALYSIS_TEMPERATURE: f32 = 0.3;

#[derive(Debug, Error)]
pub enum LearningError {
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] RepositoryError),
}

/// Outcome of one pass over every company with recent feedback.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LearningRun {
    pub reports: Vec<LearningReport>,
    pub failed: Vec<CompanyId>,
}

pub struct LearningJob {
    feedback: Arc<dyn FeedbackStore>,
    llm: Arc<dyn LlmClient>,
    prompts: Arc<PromptLibrary>,
    baseline: TuningBaseline,
    config: LearningConfig,
}

impl LearningJob {
    pub fn new(
        feedback: Arc<dyn FeedbackStore>,
        llm: Arc<dyn LlmClient>,
        prompts: Arc<PromptLibrary>,
        baseline: TuningBaseline,
        config: LearningConfig,
    ) -> Self {
        Self { feedback, llm, prompts, baseline, config }
    }

    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    /// Asks the LLM for patterns across the first few low-rated exchanges
    /// in the window. No exchanges means an empty analysis and no LLM call.
    pub async fn analyze_feedback(
        &self,
        company_id: &CompanyId,
        days: u32,
    ) -> Result<FeedbackAnalysis, LearningError> {
        let since = Utc::now() - Duration::days(i64::from(days));
        let exchanges = self.feedback.low_rated_exchanges(company_id, since).await?;
        if exchanges.is_empty() {
            info!(
                event_name = "agent.learning.no_feedback",
                company_id = %company_id.0,
                days,
                "no low-rated feedback in window"
            );
            return Ok(FeedbackAnalysis::empty());
        }

        let samples = &exchanges[..exchanges.len().min(ANALYSIS_SAMPLE_SIZE)];
        let prompt = self.prompts.analyze_feedback(exchanges.len(), samples)?;
        let request = CompletionRequest::new(prompt, ANALYSIS_MAX_TOKENS, ANALYSIS_TEMPERATURE);
        let text = self.llm.complete(&request).await?;
        Ok(FeedbackAnalysis::parse(&text, exchanges.len()))
    }

    pub async fn run_for_company(
        &self,
        company_id: &CompanyId,
    ) -> Result<LearningReport, LearningError> {
        let analysis = self.analyze_feedback(company_id, self.config.window_days).await?;
        let report = LearningReport::build(
            company_id.clone(),
            self.config.window_days,
            analysis,
            &self.baseline,
            self.config.min_confidence,
        );
        self.feedback.save_report(report.clone()).await?;

        info!(
            event_name = "agent.learning.report_saved",
            company_id = %company_id.0,
            analyzed = report.analysis.analyzed,
            confidence = report.analysis.confidence,
            proposals = report.proposals.len(),
            "learning report saved"
        );
        Ok(report)
    }

    pub async fn latest_report(
        &self,
        company_id: &CompanyId,
    ) -> Result<Option<LearningReport>, LearningError> {
        Ok(self.feedback.latest_report(company_id).await?)
    }

    /// One report per company with feedback in the window. A failing company
    /// is logged and skipped.
    pub async fn run_once(&self) -> Result<LearningRun, LearningError> {
        let since = Utc::now() - Duration::days(i64::from(self.config.window_days));
        let companies = self.feedback.companies_with_feedback(since).await?;

        let mut run = LearningRun::default();
        for company_id in companies {
            match self.run_for_company(&company_id).await {
                Ok(report) => run.reports.push(report),
                Err(error) => {
                    warn!(
                        event_name = "agent.learning.company_failed",
                        company_id = %company_id.0,
                        error = %error,
                        "learning analysis failed for company"
                    );
                    run.failed.push(company_id);
                }
            }
        }
        Ok(run)
    }
}
