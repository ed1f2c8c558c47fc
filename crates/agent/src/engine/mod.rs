use crate::fine_tune::FineTuningOrchestrator;
use chrono::Utc;
use cron::Schedule;
use futures::future::join_all;
use mimic_core::error::{MimicError, Result};
use mimic_core::types::TRAINING_PROMPT_VERSION;
use std::str::FromStr;
use std::sync::Arc;
use storage::sqlite::SqliteStorage;
use tokio::time::Duration;
use tracing::{debug, error, info};

/// What one scheduler pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SchedulerReport {
    pub polled: usize,
    pub started: Vec<String>,
}

/// Polls in-flight fine-tuning jobs and starts new ones when users cross the
/// auto-trigger threshold.
pub struct FineTuneScheduler {
    orchestrator: Arc<FineTuningOrchestrator>,
    sqlite: Arc<SqliteStorage>,
    schedule: Schedule,
}

impl FineTuneScheduler {
    pub fn new(
        orchestrator: Arc<FineTuningOrchestrator>,
        sqlite: Arc<SqliteStorage>,
        cron_expr: &str,
    ) -> Result<Self> {
        let schedule = Schedule::from_str(cron_expr)
            .map_err(|e| MimicError::Config(format!("invalid poll schedule '{}': {}", cron_expr, e)))?;
        Ok(Self {
            orchestrator,
            sqlite,
            schedule,
        })
    }

    pub async fn start(self: Arc<Self>) {
        info!("Starting fine-tuning scheduler");
        loop {
            let Some(next) = self.schedule.upcoming(Utc).next() else {
                info!("Poll schedule has no further runs; scheduler stopping");
                return;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;

            match self.run_once().await {
                Ok(report) if report.polled > 0 || !report.started.is_empty() => {
                    info!(polled = report.polled, started = report.started.len(), "scheduler pass finished");
                }
                Ok(_) => debug!("scheduler pass found nothing to do"),
                Err(e) => error!("Scheduler pass failed: {}", e),
            }
        }
    }

    pub async fn run_once(&self) -> Result<SchedulerReport> {
        let mut report = SchedulerReport::default();

        let jobs = self.sqlite.list_pollable_jobs().await?;
        report.polled = jobs.len();
        let polls = jobs.iter().map(|job| self.orchestrator.check_status(job.id));
        for (job, outcome) in jobs.iter().zip(join_all(polls).await) {
            if let Err(e) = outcome {
                error!(job_id = %job.id, "Status check failed: {}", e);
            }
        }

        let users = self
            .sqlite
            .users_with_pending_examples(TRAINING_PROMPT_VERSION, self.orchestrator.min_examples())
            .await?;
        for user_id in users {
            match self.orchestrator.should_auto_trigger(&user_id).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    error!(user_id = %user_id, "Auto-trigger check failed: {}", e);
                    continue;
                }
            }
            match self.orchestrator.start_job(&user_id).await {
                Ok(job) => {
                    info!(user_id = %user_id, job_id = %job.id, "auto-started fine-tuning job");
                    report.started.push(user_id);
                }
                Err(MimicError::Conflict(_)) | Err(MimicError::InsufficientData { .. }) => {
                    debug!(user_id = %user_id, "auto-start skipped");
                }
                Err(e) => error!(user_id = %user_id, "Auto-start failed: {}", e),
            }
        }

        Ok(report)
    }
}
