use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use ragdesk_agent::{LearningError, LearningJob, LearningRun};
use ragdesk_core::domain::conversation::CompanyId;
use ragdesk_core::learning::LearningReport;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

const SECS_PER_HOUR: u64 = 3600;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Scheduled,
    Manual,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunSummary {
    pub trigger: RunTrigger,
    pub finished_at: DateTime<Utc>,
    pub reports: usize,
    pub failed: Vec<String>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub running: bool,
    pub interval_hours: u64,
    pub window_days: u32,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<RunSummary>,
}

/// Owns the learning job and what operators can see about its schedule.
pub struct LearningScheduler {
    job: Arc<LearningJob>,
    status: RwLock<SchedulerStatus>,
}

impl LearningScheduler {
    pub fn new(job: Arc<LearningJob>) -> Arc<Self> {
        let config = job.config();
        let status = SchedulerStatus {
            enabled: config.enabled,
            running: false,
            interval_hours: config.interval_hours.max(1),
            window_days: config.window_days,
            next_run: None,
            last_run: None,
        };
        Arc::new(Self { job, status: RwLock::new(status) })
    }

    pub fn job(&self) -> &LearningJob {
        &self.job
    }

    pub fn status(&self) -> SchedulerStatus {
        self.status.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Runs the learning job every `learning.interval_hours`, first run one
    /// interval after startup. `None` when learning is disabled.
    pub fn spawn(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let config = self.job.config();
        if !config.enabled {
            info!(event_name = "server.learning.disabled", "learning scheduler disabled");
            return None;
        }

        let hours = config.interval_hours.max(1);
        let period = Duration::from_secs(hours * SECS_PER_HOUR);
        self.update(|status| {
            status.running = true;
            status.next_run = next_run_after(hours);
        });
        info!(
            event_name = "server.learning.scheduled",
            interval_hours = config.interval_hours,
            window_days = config.window_days,
            "learning scheduler started"
        );

        let scheduler = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                scheduler.run_tick().await;
            }
        }))
    }

    pub async fn run_tick(&self) -> Option<LearningRun> {
        let result = self.job.run_once().await;
        let hours = self.status().interval_hours;
        let next_run = if self.status().running { next_run_after(hours) } else { None };

        match result {
            Ok(run) => {
                info!(
                    event_name = "server.learning.completed",
                    reports = run.reports.len(),
                    failed = run.failed.len(),
                    "learning run completed"
                );
                self.update(|status| {
                    status.next_run = next_run;
                    status.last_run = Some(RunSummary {
                        trigger: RunTrigger::Scheduled,
                        finished_at: Utc::now(),
                        reports: run.reports.len(),
                        failed: run.failed.iter().map(|company| company.0.clone()).collect(),
                        error: None,
                    });
                });
                Some(run)
            }
            Err(error) => {
                warn!(
                    event_name = "server.learning.failed",
                    error = %error,
                    "learning run failed"
                );
                self.update(|status| {
                    status.next_run = next_run;
                    status.last_run = Some(RunSummary {
                        trigger: RunTrigger::Scheduled,
                        finished_at: Utc::now(),
                        reports: 0,
                        failed: Vec::new(),
                        error: Some(error.to_string()),
                    });
                });
                None
            }
        }
    }

    /// Operator-triggered analysis of one company, outside the schedule.
    pub async fn run_now(&self, company_id: &CompanyId) -> Result<LearningReport, LearningError> {
        info!(
            event_name = "server.learning.manual_triggered",
            company_id = %company_id.0,
            "manual learning run triggered"
        );
        let result = self.job.run_for_company(company_id).await;
        let (reports, failed, error) = match &result {
            Ok(_) => (1, Vec::new(), None),
            Err(error) => (0, vec![company_id.0.clone()], Some(error.to_string())),
        };
        self.update(|status| {
            status.last_run = Some(RunSummary {
                trigger: RunTrigger::Manual,
                finished_at: Utc::now(),
                reports,
                failed,
                error,
            });
        });
        result
    }

    fn update(&self, apply: impl FnOnce(&mut SchedulerStatus)) {
        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        apply(&mut status);
    }
}

fn next_run_after(hours: u64) -> Option<DateTime<Utc>> {
    i64::try_from(hours)
        .ok()
        .and_then(chrono::Duration::try_hours)
        .and_then(|period| Utc::now().checked_add_signed(period))
}
