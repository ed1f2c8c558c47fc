//! Turns a user's final text for a draft into a training example.

use chrono::{DateTime, Utc};
use mimic_core::error::{MimicError, Result};
use mimic_core::similarity::SimilarityPolicy;
use mimic_core::types::{
    DraftRecord, DraftStatus, ModificationType, TrainingExample, UserEdit, TRAINING_PROMPT_VERSION,
};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use storage::sqlite::SqliteStorage;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

/// Renders the prompt the fine-tuned model is later asked to complete.
/// Any byte-level change here requires bumping `TRAINING_PROMPT_VERSION`.
pub fn training_prompt(draft: &DraftRecord, body_chars: usize) -> String {
    let from = match &draft.original_from_name {
        Some(name) if !name.trim().is_empty() => format!("{} <{}>", name.trim(), draft.original_from),
        _ => draft.original_from.clone(),
    };
    let body: String = draft.original_body.trim().chars().take(body_chars).collect();
    format!(
        "Reply to this email.\nFrom: {}\nSubject: {}\nType: {}\nUrgency: {}\n\n{}",
        from,
        draft.original_subject.trim(),
        draft.response_type,
        draft.urgency,
        body
    )
}

pub fn content_hash(prompt: &str, completion: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update([0u8]);
    hasher.update(completion.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Builds the example for `edit` against `draft` without touching storage.
pub fn build_example(
    policy: &SimilarityPolicy,
    body_chars: usize,
    draft: &DraftRecord,
    edit: &UserEdit,
    now: DateTime<Utc>,
) -> TrainingExample {
    let comparison = policy.compare(&draft.draft_body, &edit.final_body);
    let prompt = training_prompt(draft, body_chars);
    let completion = edit.final_body.trim().to_string();

    TrainingExample {
        id: Uuid::new_v4(),
        user_id: draft.user_id.clone(),
        draft_id: draft.id,
        original_from: draft.original_from.clone(),
        original_subject: draft.original_subject.clone(),
        original_body: draft.original_body.clone(),
        ai_draft: draft.draft_body.clone(),
        user_final_subject: edit.final_subject.clone(),
        user_final: edit.final_body.clone(),
        comparison,
        content_hash: content_hash(&prompt, &completion),
        prompt,
        completion,
        prompt_version: TRAINING_PROMPT_VERSION,
        is_valid_for_training: true,
        used_in_fine_tuning_job_id: None,
        created_at: now,
    }
}

pub struct Curator {
    sqlite: Arc<SqliteStorage>,
    policy: SimilarityPolicy,
    body_chars: usize,
}

impl Curator {
    pub fn new(sqlite: Arc<SqliteStorage>, policy: SimilarityPolicy, body_chars: usize) -> Self {
        Self {
            sqlite,
            policy,
            body_chars,
        }
    }

    pub async fn record_user_edit(&self, user_id: &str, edit: &UserEdit) -> Result<TrainingExample> {
        self.record_user_edit_at(user_id, edit, Utc::now()).await
    }

    pub async fn record_user_edit_at(
        &self,
        user_id: &str,
        edit: &UserEdit,
        now: DateTime<Utc>,
    ) -> Result<TrainingExample> {
        edit.validate()?;

        let draft = self
            .sqlite
            .get_draft(user_id, edit.draft_id)
            .await?
            .ok_or_else(|| MimicError::NotFound(format!("draft {}", edit.draft_id)))?;

        if draft.status.is_finalized() {
            return Err(MimicError::Conflict(format!(
                "draft {} already has a recorded user edit",
                draft.id
            )));
        }
        if draft.is_expired(now) {
            return Err(MimicError::Validation(format!(
                "draft {} expired at {} and cannot be used for training",
                draft.id, draft.expires_at
            )));
        }

        let example = build_example(&self.policy, self.body_chars, &draft, edit, now);
        let status = if example.comparison.modification == ModificationType::SentAsIs {
            DraftStatus::Sent
        } else {
            DraftStatus::Modified
        };
        self.sqlite
            .insert_example_and_finalize_draft(&example, status)
            .await?;

        info!(
            user_id,
            draft_id = %draft.id,
            similarity = example.comparison.similarity,
            modification = %example.comparison.modification,
            "recorded training example"
        );
        Ok(example)
    }

    /// Hook for an external curation pass. Returns false if the example does not exist.
    pub async fn set_example_validity(&self, user_id: &str, example_id: Uuid, valid: bool) -> Result<bool> {
        self.sqlite.set_example_validity(user_id, example_id, valid).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimic_core::types::{ResponseType, Urgency};

    fn draft() -> DraftRecord {
        let now = Utc::now();
        DraftRecord {
            id: Uuid::new_v4(),
            user_id: "alice".into(),
            message_id: "m1".into(),
            thread_id: None,
            original_from: "dana@example.com".into(),
            original_from_name: Some("Dana".into()),
            original_subject: " Thursday Sync ".into(),
            original_snippet: String::new(),
            original_body: "Can we move Thursday's sync to 3pm?".into(),
            original_received_at: now,
            draft_subject: "Re: Thursday Sync".into(),
            draft_body: "Works for me, see you at 3pm.".into(),
            draft_html: None,
            draft_reasoning: String::new(),
            provider: None,
            provider_draft_id: None,
            needs_response: true,
            response_type: ResponseType::Scheduling,
            urgency: Urgency::Medium,
            classification_confidence: 0.9,
            status: DraftStatus::Pending,
            agent_reasoning: vec![],
            user_final_subject: None,
            user_final_body: None,
            created_at: now,
            updated_at: now,
            expires_at: now,
        }
    }

    #[test]
    fn training_prompt_is_stable() {
        assert_eq!(
            training_prompt(&draft(), 10),
            "Reply to this email.\nFrom: Dana <dana@example.com>\nSubject: Thursday Sync\nType: scheduling\nUrgency: medium\n\nCan we mov"
        );
    }

    #[test]
    fn identical_text_is_sent_as_is() {
        let edit = UserEdit {
            draft_id: Uuid::new_v4(),
            final_subject: "Re: Thursday Sync".into(),
            final_body: "Works for me, see you at 3pm.".into(),
        };
        let example = build_example(&SimilarityPolicy::default(), 1000, &draft(), &edit, Utc::now());
        assert_eq!(example.comparison.similarity, 1.0);
        assert_eq!(example.comparison.edit_distance, 0);
        assert_eq!(example.comparison.modification, ModificationType::SentAsIs);
        assert!(example.is_valid_for_training);
        assert_eq!(example.prompt_version, TRAINING_PROMPT_VERSION);
    }

    #[test]
    fn hash_separates_prompt_from_completion() {
        assert_ne!(content_hash("ab", "c"), content_hash("a", "bc"));
        assert_eq!(content_hash("a", "b").len(), 64);
    }
}
