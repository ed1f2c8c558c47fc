use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Bumped whenever the rendered training prompt changes byte-for-byte.
pub const TRAINING_PROMPT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, strum_macros::Display, strum_macros::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ModificationType {
    SentAsIs,
    MinorEdits,
    ModerateEdits,
    MajorRewrite,
}

/// Score, distance and bucket from a single comparison. Never constructed piecemeal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EditComparison {
    pub similarity: f64,
    pub edit_distance: u32,
    pub modification: ModificationType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingExample {
    pub id: Uuid,
    pub user_id: String,
    pub draft_id: Uuid,
    pub original_from: String,
    pub original_subject: String,
    pub original_body: String,
    pub ai_draft: String,
    pub user_final_subject: String,
    pub user_final: String,
    pub comparison: EditComparison,
    pub prompt: String,
    pub completion: String,
    pub prompt_version: u32,
    pub content_hash: String,
    pub is_valid_for_training: bool,
    pub used_in_fine_tuning_job_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// The user's final text for a draft, as observed after sending.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UserEdit {
    pub draft_id: Uuid,
    #[validate(length(max = 998))]
    pub final_subject: String,
    #[validate(length(min = 1))]
    pub final_body: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Uploading,
    Validating,
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ACTIVE: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Uploading,
        JobStatus::Validating,
        JobStatus::Queued,
        JobStatus::Running,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Uploading => 1,
            JobStatus::Validating => 2,
            JobStatus::Queued => 3,
            JobStatus::Running => 4,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled => 5,
        }
    }

    /// Transitions only move forward and never leave a terminal state.
    pub fn can_advance_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.is_terminal() || next.rank() > self.rank()
    }

    /// Maps the fine-tuning provider's status vocabulary. Unknown values yield `None`.
    pub fn from_provider(status: &str) -> Option<JobStatus> {
        match status {
            "validating_files" => Some(JobStatus::Validating),
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "succeeded" => Some(JobStatus::Succeeded),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FineTuningJob {
    pub id: Uuid,
    pub user_id: String,
    pub base_model: String,
    pub training_example_count: u32,
    /// Every example this job consumes, duplicates included.
    pub example_ids: Vec<Uuid>,
    pub status: JobStatus,
    pub provider_job_id: Option<String>,
    pub provider_file_id: Option<String>,
    pub result_model_id: Option<String>,
    pub error_message: Option<String>,
    pub trained_tokens: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ModelStatus {
    Active,
    Deprecated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FineTunedModel {
    pub id: Uuid,
    pub user_id: String,
    pub model_id: String,
    pub base_model: String,
    pub job_id: Uuid,
    pub training_example_count: u32,
    pub version: i64,
    pub is_current: bool,
    pub status: ModelStatus,
    pub created_at: DateTime<Utc>,
    pub deprecated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FineTuningStatus {
    pub has_model: bool,
    pub current_model_id: Option<String>,
    pub current_version: Option<i64>,
    pub total_examples: u64,
    pub pending_examples: u64,
    pub min_examples: u64,
    pub can_start: bool,
    pub latest_job: Option<JobSummary>,
}
