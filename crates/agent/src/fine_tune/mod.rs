//! Fine-tuning job lifecycle: creation, submission, polling and model promotion.

use crate::bounded;
use ai::fine_tune::{training_line, FineTuningProvider};
use chrono::Utc;
use mimic_core::config::{FineTuningConfig, TimeoutConfig};
use mimic_core::error::{MimicError, Result};
use mimic_core::types::{
    FineTuningJob, FineTuningStatus, JobStatus, JobSummary, TrainingExample, TRAINING_PROMPT_VERSION,
};
use std::collections::HashSet;
use std::sync::Arc;
use storage::sqlite::{JobUpdate, SqliteStorage};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const TRAINING_SYSTEM_PROMPT: &str =
    "You draft email replies for the user. Match the user's personal style exactly.";

/// Splits examples into the distinct-by-content batch to train on. Every
/// example id is still returned so duplicates are consumed with the job.
pub fn dedupe(examples: &[TrainingExample]) -> (Vec<&TrainingExample>, Vec<Uuid>) {
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for example in examples {
        if seen.insert(example.content_hash.as_str()) {
            unique.push(example);
        }
    }
    (unique, examples.iter().map(|e| e.id).collect())
}

pub fn training_file(examples: &[&TrainingExample]) -> Result<String> {
    let mut lines = Vec::with_capacity(examples.len());
    for example in examples {
        lines.push(training_line(TRAINING_SYSTEM_PROMPT, &example.prompt, &example.completion)?);
    }
    let mut content = lines.join("\n");
    content.push('\n');
    Ok(content)
}

/// Provider-side model suffix, e.g. `mimic-1a2b3c4d`.
pub fn model_suffix(prefix: &str, user_id: &str) -> String {
    let tag: String = user_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect::<String>()
        .to_ascii_lowercase();
    if tag.is_empty() {
        prefix.to_string()
    } else {
        format!("{}-{}", prefix, tag)
    }
}

pub struct FineTuningOrchestrator {
    sqlite: Arc<SqliteStorage>,
    provider: Arc<dyn FineTuningProvider>,
    config: FineTuningConfig,
    timeouts: TimeoutConfig,
}

impl FineTuningOrchestrator {
    pub fn new(
        sqlite: Arc<SqliteStorage>,
        provider: Arc<dyn FineTuningProvider>,
        config: FineTuningConfig,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            sqlite,
            provider,
            config,
            timeouts,
        }
    }

    pub fn min_examples(&self) -> u64 {
        self.config.min_examples
    }

    pub async fn get_status(&self, user_id: &str) -> Result<FineTuningStatus> {
        let current = self.sqlite.current_model(user_id).await?;
        let total_examples = self.sqlite.count_examples(user_id).await?;
        let pending_examples = self
            .sqlite
            .count_pending_examples(user_id, TRAINING_PROMPT_VERSION)
            .await?;
        let latest = self.sqlite.latest_job(user_id).await?;
        let has_active = latest.as_ref().is_some_and(|job| !job.status.is_terminal());

        Ok(FineTuningStatus {
            has_model: current.is_some(),
            current_model_id: current.as_ref().map(|m| m.model_id.clone()),
            current_version: current.as_ref().map(|m| m.version),
            total_examples,
            pending_examples,
            min_examples: self.config.min_examples,
            can_start: pending_examples >= self.config.min_examples && !has_active,
            latest_job: latest.map(|job| JobSummary {
                job_id: job.id,
                status: job.status,
                error_message: job.error_message,
                created_at: job.created_at,
            }),
        })
    }

    pub async fn start_job(&self, user_id: &str) -> Result<FineTuningJob> {
        if let Some(active) = self.sqlite.find_active_job(user_id).await? {
            info!(user_id, job_id = %active.id, status = %active.status, "fine-tuning job already in progress");
            return Err(MimicError::Conflict(format!(
                "fine-tuning job {} is already {}",
                active.id, active.status
            )));
        }

        let examples = self
            .sqlite
            .list_unused_examples(user_id, TRAINING_PROMPT_VERSION)
            .await?;
        let (batch, example_ids) = dedupe(&examples);
        if (batch.len() as u64) < self.config.min_examples {
            return Err(MimicError::InsufficientData {
                available: batch.len() as u64,
                required: self.config.min_examples,
            });
        }

        let now = Utc::now();
        let job = FineTuningJob {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            base_model: self.config.base_model.clone(),
            training_example_count: batch.len() as u32,
            example_ids,
            status: JobStatus::Uploading,
            provider_job_id: None,
            provider_file_id: None,
            result_model_id: None,
            error_message: None,
            trained_tokens: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        };
        if let Err(e) = self.sqlite.insert_job(&job).await {
            if matches!(e, MimicError::Conflict(_)) {
                info!(user_id, "concurrent fine-tuning start rejected");
            }
            return Err(e);
        }
        info!(user_id, job_id = %job.id, examples = job.training_example_count, "created fine-tuning job");

        let content = match training_file(&batch) {
            Ok(content) => content,
            Err(e) => return Err(self.fail(&job, JobStatus::Uploading, e).await),
        };

        let file_name = format!("mimic-{}.jsonl", job.id);
        let file_id = match bounded("training file upload", self.timeouts.upload(), self.provider.upload_file(&file_name, content)).await {
            Ok(file_id) => file_id,
            Err(e) => return Err(self.fail(&job, JobStatus::Uploading, e).await),
        };
        let uploaded = JobUpdate {
            provider_file_id: Some(file_id.clone()),
            ..JobUpdate::default()
        };
        match self
            .sqlite
            .transition_job(job.id, JobStatus::Uploading, JobStatus::Validating, &uploaded)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                warn!(job_id = %job.id, file_id = %file_id, "job changed during upload; uploaded file is orphaned");
                let e = MimicError::Conflict(format!("fine-tuning job {} changed during upload", job.id));
                return Err(self.fail(&job, JobStatus::Uploading, e).await);
            }
            Err(e) => {
                warn!(job_id = %job.id, file_id = %file_id, "could not record upload; uploaded file is orphaned");
                return Err(self.fail(&job, JobStatus::Uploading, e).await);
            }
        }

        let suffix = model_suffix(&self.config.suffix_prefix, user_id);
        let submitted = bounded(
            "fine-tuning job submission",
            self.timeouts.submit(),
            self.provider.create_job(&file_id, &job.base_model, &suffix),
        )
        .await;
        let provider_job = match submitted {
            Ok(provider_job) => provider_job,
            Err(e) => {
                warn!(job_id = %job.id, file_id = %file_id, "submission failed; uploaded training file is orphaned");
                return Err(self.fail(&job, JobStatus::Validating, e).await);
            }
        };

        let queued = JobUpdate {
            provider_job_id: Some(provider_job.id.clone()),
            started_at: Some(Utc::now()),
            ..JobUpdate::default()
        };
        if let Err(e) = self
            .sqlite
            .submit_job(job.id, JobStatus::Validating, &queued, &job.example_ids)
            .await
        {
            error!(job_id = %job.id, provider_job_id = %provider_job.id, error = %e, "could not mark examples used; cancelling provider job");
            let cancelled = bounded(
                "fine-tuning job cancellation",
                self.timeouts.submit(),
                self.provider.cancel_job(&provider_job.id),
            )
            .await;
            if let Err(cancel) = cancelled {
                error!(provider_job_id = %provider_job.id, error = %cancel, "provider job cancellation failed");
            }
            return Err(self.fail(&job, JobStatus::Validating, e).await);
        }

        info!(user_id, job_id = %job.id, provider_job_id = %provider_job.id, "submitted fine-tuning job");
        self.load(job.id).await
    }

    /// Polls the provider and applies any forward transition. Terminal jobs are
    /// returned as stored; polling failures leave the job untouched.
    pub async fn check_status(&self, job_id: Uuid) -> Result<FineTuningJob> {
        let job = self.load(job_id).await?;
        if job.status.is_terminal() {
            return Ok(job);
        }
        let Some(provider_job_id) = job.provider_job_id.clone() else {
            return Ok(job);
        };

        let remote = match bounded("fine-tuning status poll", self.timeouts.poll(), self.provider.get_job(&provider_job_id)).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "fine-tuning status poll failed; will retry next poll");
                return Ok(job);
            }
        };

        let Some(next) = JobStatus::from_provider(&remote.status) else {
            debug!(job_id = %job.id, status = %remote.status, "unrecognised provider status");
            return Ok(job);
        };
        if !job.status.can_advance_to(next) {
            return Ok(job);
        }

        let now = Utc::now();
        match next {
            JobStatus::Succeeded => match remote.fine_tuned_model.as_deref() {
                Some(model_id) => {
                    if let Some(model) = self
                        .sqlite
                        .complete_job_and_promote(&job, model_id, remote.trained_tokens, now)
                        .await?
                    {
                        info!(user_id = %job.user_id, job_id = %job.id, model_id, version = model.version, "promoted fine-tuned model");
                    }
                }
                None => {
                    let update = JobUpdate {
                        error_message: Some("provider reported success without a model id".into()),
                        trained_tokens: remote.trained_tokens,
                        completed_at: Some(now),
                        ..JobUpdate::default()
                    };
                    self.sqlite
                        .transition_job(job.id, job.status, JobStatus::Failed, &update)
                        .await?;
                }
            },
            JobStatus::Failed | JobStatus::Cancelled => {
                let message = remote.error.clone().unwrap_or_else(|| format!("job {} by provider", next));
                warn!(job_id = %job.id, provider_job_id = %provider_job_id, error = %message, "fine-tuning job ended without a model");
                let update = JobUpdate {
                    error_message: Some(message),
                    trained_tokens: remote.trained_tokens,
                    completed_at: Some(now),
                    ..JobUpdate::default()
                };
                self.sqlite
                    .transition_job(job.id, job.status, next, &update)
                    .await?;
            }
            _ => {
                let update = JobUpdate {
                    trained_tokens: remote.trained_tokens,
                    ..JobUpdate::default()
                };
                self.sqlite
                    .transition_job(job.id, job.status, next, &update)
                    .await?;
            }
        }

        self.load(job_id).await
    }

    pub async fn should_auto_trigger(&self, user_id: &str) -> Result<bool> {
        if self.sqlite.find_active_job(user_id).await?.is_some() {
            return Ok(false);
        }
        let pending = self
            .sqlite
            .count_pending_examples(user_id, TRAINING_PROMPT_VERSION)
            .await?;
        if pending >= self.config.recommended_examples {
            return Ok(true);
        }
        let has_model = self.sqlite.current_model(user_id).await?.is_some();
        Ok(!has_model && pending >= self.config.min_examples)
    }

    async fn load(&self, job_id: Uuid) -> Result<FineTuningJob> {
        self.sqlite
            .get_job(job_id)
            .await?
            .ok_or_else(|| MimicError::NotFound(format!("fine-tuning job {}", job_id)))
    }

    /// Records `cause` on the job and hands it back for propagation.
    async fn fail(&self, job: &FineTuningJob, from: JobStatus, cause: MimicError) -> MimicError {
        error!(user_id = %job.user_id, job_id = %job.id, error = %cause, "fine-tuning job failed");
        let update = JobUpdate {
            error_message: Some(cause.to_string()),
            completed_at: Some(Utc::now()),
            ..JobUpdate::default()
        };
        match self.sqlite.transition_job(job.id, from, JobStatus::Failed, &update).await {
            Ok(true) => {}
            Ok(false) => warn!(job_id = %job.id, "job left {} before it could be marked failed", from),
            Err(e) => error!(job_id = %job.id, error = %e, "could not mark fine-tuning job failed"),
        }
        cause
    }
}
