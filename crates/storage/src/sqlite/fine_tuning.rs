use super::{parse_enum, parse_json, parse_uuid, storage_err, to_json, SqliteStorage};
use chrono::{DateTime, Utc};
use mimic_core::error::{MimicError, Result};
use mimic_core::types::{FineTunedModel, FineTuningJob, JobStatus, ModelStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

const JOB_COLUMNS: &str = "id, user_id, base_model, training_example_count, example_ids, status, \
     provider_job_id, provider_file_id, result_model_id, error_message, trained_tokens, \
     created_at, updated_at, started_at, completed_at";

const MODEL_COLUMNS: &str = "id, user_id, model_id, base_model, job_id, training_example_count, \
     version, is_current, status, created_at, deprecated_at";

/// Fields written alongside a status transition. `None` leaves the column as is.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub provider_file_id: Option<String>,
    pub provider_job_id: Option<String>,
    pub result_model_id: Option<String>,
    pub error_message: Option<String>,
    pub trained_tokens: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SqliteStorage {
    /// Inserts a new job. The partial unique index turns a second active job
    /// for the same user into `Conflict`.
    pub async fn insert_job(&self, job: &FineTuningJob) -> Result<()> {
        let sql = format!(
            "INSERT INTO fine_tuning_jobs ({JOB_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(job.id.to_string())
            .bind(&job.user_id)
            .bind(&job.base_model)
            .bind(job.training_example_count as i64)
            .bind(to_json(&job.example_ids)?)
            .bind(job.status.to_string())
            .bind(&job.provider_job_id)
            .bind(&job.provider_file_id)
            .bind(&job.result_model_id)
            .bind(&job.error_message)
            .bind(job.trained_tokens)
            .bind(job.created_at)
            .bind(job.updated_at)
            .bind(job.started_at)
            .bind(job.completed_at)
            .execute(&self.pool)
            .await
            .map_err(|e| match storage_err(e) {
                MimicError::Conflict(_) => MimicError::Conflict(format!(
                    "a fine-tuning job is already in progress for user {}",
                    job.user_id
                )),
                other => other,
            })?;
        Ok(())
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<FineTuningJob>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM fine_tuning_jobs WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(job_from_row).transpose()
    }

    pub async fn find_active_job(&self, user_id: &str) -> Result<Option<FineTuningJob>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM fine_tuning_jobs
             WHERE user_id = ? AND status IN ('pending', 'uploading', 'validating', 'queued', 'running')
             LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(job_from_row).transpose()
    }

    pub async fn list_jobs(&self, user_id: &str, limit: i64) -> Result<Vec<FineTuningJob>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM fine_tuning_jobs WHERE user_id = ?
             ORDER BY created_at DESC LIMIT ?"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter().map(job_from_row).collect()
    }

    pub async fn latest_job(&self, user_id: &str) -> Result<Option<FineTuningJob>> {
        Ok(self.list_jobs(user_id, 1).await?.into_iter().next())
    }

    /// Jobs the provider knows about and that have not finished yet.
    pub async fn list_pollable_jobs(&self) -> Result<Vec<FineTuningJob>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM fine_tuning_jobs
             WHERE status IN ('validating', 'queued', 'running') AND provider_job_id IS NOT NULL
             ORDER BY created_at ASC"
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter().map(job_from_row).collect()
    }

    /// Compare-and-set transition. Returns false when the job is no longer in
    /// `expected` (another poller got there first).
    pub async fn transition_job(
        &self,
        job_id: Uuid,
        expected: JobStatus,
        next: JobStatus,
        update: &JobUpdate,
    ) -> Result<bool> {
        let mut conn = self.pool.acquire().await.map_err(storage_err)?;
        apply_transition(&mut conn, job_id, expected, next, update).await
    }

    /// Moves the job to `queued` and marks every consumed example as used by it,
    /// all or nothing. An example already claimed elsewhere aborts the whole step.
    pub async fn submit_job(
        &self,
        job_id: Uuid,
        expected: JobStatus,
        update: &JobUpdate,
        example_ids: &[Uuid],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        if !apply_transition(&mut tx, job_id, expected, JobStatus::Queued, update).await? {
            return Err(MimicError::Conflict(format!(
                "fine-tuning job {} is no longer {}",
                job_id, expected
            )));
        }

        for example_id in example_ids {
            let result = sqlx::query(
                "UPDATE training_examples SET used_in_fine_tuning_job_id = ?
                 WHERE id = ? AND used_in_fine_tuning_job_id IS NULL",
            )
            .bind(job_id.to_string())
            .bind(example_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

            if result.rows_affected() != 1 {
                return Err(MimicError::Conflict(format!(
                    "training example {} was already consumed",
                    example_id
                )));
            }
        }

        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }

    /// Marks the job succeeded, deprecates the user's current model and inserts
    /// the new one as current with the next version, in one transaction.
    /// Returns `None` when the job had already left `job.status`.
    pub async fn complete_job_and_promote(
        &self,
        job: &FineTuningJob,
        model_id: &str,
        trained_tokens: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Option<FineTunedModel>> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let update = JobUpdate {
            result_model_id: Some(model_id.to_string()),
            trained_tokens,
            completed_at: Some(now),
            ..JobUpdate::default()
        };
        if !apply_transition(&mut tx, job.id, job.status, JobStatus::Succeeded, &update).await? {
            return Ok(None);
        }

        let previous_version: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) FROM fine_tuned_models WHERE user_id = ?",
        )
        .bind(&job.user_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "UPDATE fine_tuned_models SET is_current = 0, status = ?, deprecated_at = ?
             WHERE user_id = ? AND is_current = 1",
        )
        .bind(ModelStatus::Deprecated.to_string())
        .bind(now)
        .bind(&job.user_id)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        let model = FineTunedModel {
            id: Uuid::new_v4(),
            user_id: job.user_id.clone(),
            model_id: model_id.to_string(),
            base_model: job.base_model.clone(),
            job_id: job.id,
            training_example_count: job.training_example_count,
            version: previous_version + 1,
            is_current: true,
            status: ModelStatus::Active,
            created_at: now,
            deprecated_at: None,
        };

        let sql = format!(
            "INSERT INTO fine_tuned_models ({MODEL_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(model.id.to_string())
            .bind(&model.user_id)
            .bind(&model.model_id)
            .bind(&model.base_model)
            .bind(model.job_id.to_string())
            .bind(model.training_example_count as i64)
            .bind(model.version)
            .bind(model.is_current)
            .bind(model.status.to_string())
            .bind(model.created_at)
            .bind(model.deprecated_at)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;
        Ok(Some(model))
    }

    pub async fn current_model(&self, user_id: &str) -> Result<Option<FineTunedModel>> {
        let sql = format!(
            "SELECT {MODEL_COLUMNS} FROM fine_tuned_models WHERE user_id = ? AND is_current = 1"
        );
        let row = sqlx::query(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(model_from_row).transpose()
    }

    pub async fn list_models(&self, user_id: &str) -> Result<Vec<FineTunedModel>> {
        let sql = format!(
            "SELECT {MODEL_COLUMNS} FROM fine_tuned_models WHERE user_id = ? ORDER BY version ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter().map(model_from_row).collect()
    }
}

async fn apply_transition(
    conn: &mut SqliteConnection,
    job_id: Uuid,
    expected: JobStatus,
    next: JobStatus,
    update: &JobUpdate,
) -> Result<bool> {
    if !expected.can_advance_to(next) {
        return Err(MimicError::Internal(format!(
            "illegal job transition {} -> {}",
            expected, next
        )));
    }

    let result = sqlx::query(
        "UPDATE fine_tuning_jobs SET
            status = ?,
            provider_file_id = COALESCE(?, provider_file_id),
            provider_job_id = COALESCE(?, provider_job_id),
            result_model_id = COALESCE(?, result_model_id),
            error_message = COALESCE(?, error_message),
            trained_tokens = COALESCE(?, trained_tokens),
            started_at = COALESCE(?, started_at),
            completed_at = COALESCE(?, completed_at),
            updated_at = ?
         WHERE id = ? AND status = ?",
    )
    .bind(next.to_string())
    .bind(&update.provider_file_id)
    .bind(&update.provider_job_id)
    .bind(&update.result_model_id)
    .bind(&update.error_message)
    .bind(update.trained_tokens)
    .bind(update.started_at)
    .bind(update.completed_at)
    .bind(Utc::now())
    .bind(job_id.to_string())
    .bind(expected.to_string())
    .execute(&mut *conn)
    .await
    .map_err(storage_err)?;

    Ok(result.rows_affected() == 1)
}

fn job_from_row(row: &SqliteRow) -> Result<FineTuningJob> {
    let id: String = row.try_get("id").map_err(storage_err)?;
    let count: i64 = row.try_get("training_example_count").map_err(storage_err)?;
    let example_ids: String = row.try_get("example_ids").map_err(storage_err)?;
    let status: String = row.try_get("status").map_err(storage_err)?;

    Ok(FineTuningJob {
        id: parse_uuid(&id)?,
        user_id: row.try_get("user_id").map_err(storage_err)?,
        base_model: row.try_get("base_model").map_err(storage_err)?,
        training_example_count: count as u32,
        example_ids: parse_json(&example_ids, "example_ids")?,
        status: parse_enum(&status, "status")?,
        provider_job_id: row.try_get("provider_job_id").map_err(storage_err)?,
        provider_file_id: row.try_get("provider_file_id").map_err(storage_err)?,
        result_model_id: row.try_get("result_model_id").map_err(storage_err)?,
        error_message: row.try_get("error_message").map_err(storage_err)?,
        trained_tokens: row.try_get("trained_tokens").map_err(storage_err)?,
        created_at: row.try_get("created_at").map_err(storage_err)?,
        updated_at: row.try_get("updated_at").map_err(storage_err)?,
        started_at: row.try_get("started_at").map_err(storage_err)?,
        completed_at: row.try_get("completed_at").map_err(storage_err)?,
    })
}

fn model_from_row(row: &SqliteRow) -> Result<FineTunedModel> {
    let id: String = row.try_get("id").map_err(storage_err)?;
    let job_id: String = row.try_get("job_id").map_err(storage_err)?;
    let count: i64 = row.try_get("training_example_count").map_err(storage_err)?;
    let status: String = row.try_get("status").map_err(storage_err)?;

    Ok(FineTunedModel {
        id: parse_uuid(&id)?,
        user_id: row.try_get("user_id").map_err(storage_err)?,
        model_id: row.try_get("model_id").map_err(storage_err)?,
        base_model: row.try_get("base_model").map_err(storage_err)?,
        job_id: parse_uuid(&job_id)?,
        training_example_count: count as u32,
        version: row.try_get("version").map_err(storage_err)?,
        is_current: row.try_get("is_current").map_err(storage_err)?,
        status: parse_enum(&status, "status")?,
        created_at: row.try_get("created_at").map_err(storage_err)?,
        deprecated_at: row.try_get("deprecated_at").map_err(storage_err)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(user_id: &str, status: JobStatus) -> FineTuningJob {
        let now = Utc::now();
        FineTuningJob {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            base_model: "gpt-4o-mini-2024-07-18".into(),
            training_example_count: 10,
            example_ids: vec![],
            status,
            provider_job_id: Some("ftjob-1".into()),
            provider_file_id: Some("file-1".into()),
            result_model_id: None,
            error_message: None,
            trained_tokens: None,
            created_at: now,
            updated_at: now,
            started_at: Some(now),
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn second_active_job_is_rejected_by_the_index() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        storage.insert_job(&job("alice", JobStatus::Running)).await.unwrap();

        let err = storage
            .insert_job(&job("alice", JobStatus::Uploading))
            .await
            .unwrap_err();
        assert!(matches!(err, MimicError::Conflict(_)));

        // Other users and terminal jobs are unaffected.
        storage.insert_job(&job("bob", JobStatus::Uploading)).await.unwrap();
        storage.insert_job(&job("alice", JobStatus::Failed)).await.unwrap();
        assert_eq!(storage.list_jobs("alice", 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn transitions_are_compare_and_set() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let queued = job("alice", JobStatus::Queued);
        storage.insert_job(&queued).await.unwrap();

        let update = JobUpdate {
            trained_tokens: Some(1200),
            ..JobUpdate::default()
        };
        assert!(storage
            .transition_job(queued.id, JobStatus::Queued, JobStatus::Running, &update)
            .await
            .unwrap());
        assert!(!storage
            .transition_job(queued.id, JobStatus::Queued, JobStatus::Running, &update)
            .await
            .unwrap());

        let loaded = storage.get_job(queued.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Running);
        assert_eq!(loaded.trained_tokens, Some(1200));
        assert_eq!(loaded.provider_file_id.as_deref(), Some("file-1"));

        let backwards = storage
            .transition_job(queued.id, JobStatus::Running, JobStatus::Queued, &update)
            .await;
        assert!(matches!(backwards, Err(MimicError::Internal(_))));
    }

    #[tokio::test]
    async fn promotion_keeps_a_single_current_model() {
        let storage = SqliteStorage::in_memory().await.unwrap();

        for (i, model_id) in ["ft:one", "ft:two", "ft:three"].iter().enumerate() {
            let running = job("alice", JobStatus::Running);
            storage.insert_job(&running).await.unwrap();
            let model = storage
                .complete_job_and_promote(&running, model_id, Some(100), Utc::now())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(model.version, i as i64 + 1);

            let models = storage.list_models("alice").await.unwrap();
            assert_eq!(models.iter().filter(|m| m.is_current).count(), 1);
        }

        let models = storage.list_models("alice").await.unwrap();
        assert_eq!(models.len(), 3);
        assert!(models[..2]
            .iter()
            .all(|m| m.status == ModelStatus::Deprecated && m.deprecated_at.is_some()));
        let current = storage.current_model("alice").await.unwrap().unwrap();
        assert_eq!(current.model_id, "ft:three");
    }

    #[tokio::test]
    async fn promotion_is_idempotent_per_job() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let running = job("alice", JobStatus::Running);
        storage.insert_job(&running).await.unwrap();

        assert!(storage
            .complete_job_and_promote(&running, "ft:abc123", None, Utc::now())
            .await
            .unwrap()
            .is_some());
        assert!(storage
            .complete_job_and_promote(&running, "ft:abc123", None, Utc::now())
            .await
            .unwrap()
            .is_none());
        assert_eq!(storage.list_models("alice").await.unwrap().len(), 1);
    }
}
