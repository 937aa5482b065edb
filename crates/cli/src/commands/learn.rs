use std::sync::Arc;

use ragdesk_agent::prompts::PromptLibrary;
use ragdesk_agent::{HttpLlmClient, LearningJob, LearningRun};
use ragdesk_core::domain::conversation::CompanyId;
use ragdesk_core::learning::TuningBaseline;
use ragdesk_db::SqlFeedbackStore;
use serde_json::json;

use crate::commands::{
    async_runtime, load_config, open_database, CommandResult, Failure, EXIT_LEARN,
};

/// One learning pass, for a single company or every company with feedback
/// in the window. Reports are stored; config is never touched.
pub fn run(company: Option<String>) -> CommandResult {
    let config = match load_config("learn") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match async_runtime("learn") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let llm = HttpLlmClient::with_timeout(&config.llm)
            .map_err(|error| ("llm_setup", error.to_string(), EXIT_LEARN))?;
        let prompts = PromptLibrary::new()
            .map_err(|error| ("prompt_setup", error.to_string(), EXIT_LEARN))?;
        let job = LearningJob::new(
            Arc::new(SqlFeedbackStore::new(pool.clone())),
            llm,
            Arc::new(prompts),
            TuningBaseline::from_config(&config),
            config.learning.clone(),
        );

        let run = match company {
            Some(company) => {
                let report = job
                    .run_for_company(&CompanyId(company))
                    .await
                    .map_err(|error| ("learning", error.to_string(), EXIT_LEARN))?;
                LearningRun { reports: vec![report], failed: Vec::new() }
            }
            None => job
                .run_once()
                .await
                .map_err(|error| ("learning", error.to_string(), EXIT_LEARN))?,
        };
        pool.close().await;
        Ok::<_, Failure>(run)
    });

    match result {
        Ok(run) => {
            let message =
                format!("{} report(s) saved, {} company(ies) failed", run.reports.len(), run.failed.len());
            let data = json!({
                "reports": run.reports.iter().map(|report| json!({
                    "id": report.id.0,
                    "company_id": report.company_id.0,
                    "analyzed": report.analysis.analyzed,
                    "confidence": report.analysis.confidence,
                    "proposals": report.proposals.len(),
                })).collect::<Vec<_>>(),
                "failed": run.failed.iter().map(|company| company.0.clone()).collect::<Vec<_>>(),
            });
            CommandResult::success_with("learn", message, Some(data))
        }
        Err(failure) => CommandResult::from_failure("learn", failure),
    }
}
