mod drafts;
mod fine_tuning;
mod profile;
mod training;

pub use fine_tuning::JobUpdate;

use mimic_core::error::{MimicError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or_else(|| MimicError::Storage("Invalid database path".to_string()))?;

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path_str))
            .map_err(|e| MimicError::Storage(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| MimicError::Storage(e.to_string()))?;

        info!("Connected to SQLite at {}", path_str);

        let storage = Self { pool };
        storage.migrate().await?;

        Ok(storage)
    }

    /// Single-connection in-memory database. Every pooled connection to
    /// `sqlite::memory:` is its own database, so the pool must never recycle it.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| MimicError::Storage(e.to_string()))?;

        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| MimicError::Storage(e.to_string()))?;

        info!("SQLite migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

pub(crate) fn storage_err(e: sqlx::Error) -> MimicError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return MimicError::Conflict(db.message().to_string());
        }
    }
    MimicError::Storage(e.to_string())
}

pub(crate) fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| MimicError::Storage(format!("bad uuid '{}': {}", raw, e)))
}

pub(crate) fn parse_enum<T: FromStr>(raw: &str, column: &str) -> Result<T> {
    T::from_str(raw)
        .map_err(|_| MimicError::Storage(format!("unexpected {} value '{}'", column, raw)))
}

pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(raw: &str, column: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| MimicError::Storage(format!("bad {} json: {}", column, e)))
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| MimicError::Internal(e.to_string()))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{Duration, Utc};
    use mimic_core::types::{
        DraftRecord, DraftStatus, EditComparison, ModificationType, ResponseType, TrainingExample,
        Urgency, TRAINING_PROMPT_VERSION,
    };
    use uuid::Uuid;

    pub fn draft(user_id: &str, message_id: &str, status: DraftStatus) -> DraftRecord {
        let now = Utc::now();
        DraftRecord {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            message_id: message_id.into(),
            thread_id: Some(format!("thread-{}", message_id)),
            original_from: "dana@example.com".into(),
            original_from_name: Some("Dana".into()),
            original_subject: "Thursday sync".into(),
            original_snippet: "Can we move Thursday's sync to 3pm?".into(),
            original_body: "Can we move Thursday's sync to 3pm?".into(),
            original_received_at: now,
            draft_subject: "Re: Thursday sync".into(),
            draft_body: "Works for me, see you at 3pm.".into(),
            draft_html: None,
            draft_reasoning: "Confirms the new time".into(),
            provider: None,
            provider_draft_id: None,
            needs_response: true,
            response_type: ResponseType::Scheduling,
            urgency: Urgency::Medium,
            classification_confidence: 0.9,
            status,
            agent_reasoning: vec!["classified".into(), "generated".into()],
            user_final_subject: None,
            user_final_body: None,
            created_at: now,
            updated_at: now,
            expires_at: now + Duration::days(7),
        }
    }

    pub fn example_for(draft: &DraftRecord, content_hash: &str) -> TrainingExample {
        TrainingExample {
            id: Uuid::new_v4(),
            user_id: draft.user_id.clone(),
            draft_id: draft.id,
            original_from: draft.original_from.clone(),
            original_subject: draft.original_subject.clone(),
            original_body: draft.original_body.clone(),
            ai_draft: draft.draft_body.clone(),
            user_final_subject: draft.draft_subject.clone(),
            user_final: "Works for me. See you then!".into(),
            comparison: EditComparison {
                similarity: 0.7,
                edit_distance: 9,
                modification: ModificationType::ModerateEdits,
            },
            prompt: format!("prompt for {}", draft.message_id),
            completion: "Works for me. See you then!".into(),
            prompt_version: TRAINING_PROMPT_VERSION,
            content_hash: content_hash.into(),
            is_valid_for_training: true,
            used_in_fine_tuning_job_id: None,
            created_at: Utc::now(),
        }
    }
}
