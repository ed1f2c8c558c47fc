use super::{parse_enum, parse_uuid, storage_err, SqliteStorage};
use chrono::Utc;
use mimic_core::error::{MimicError, Result};
use mimic_core::types::{DraftStatus, EditComparison, TrainingExample};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

const EXAMPLE_COLUMNS: &str = "id, user_id, draft_id, original_from, original_subject, \
     original_body, ai_draft, user_final_subject, user_final, similarity_score, \
     modification_type, edit_distance, prompt, completion, prompt_version, content_hash, \
     is_valid_for_training, used_in_fine_tuning_job_id, created_at";

impl SqliteStorage {
    /// Stores the example and finalizes its draft in one transaction.
    /// Fails with `Conflict` when the draft was already finalized or already
    /// has an example.
    pub async fn insert_example_and_finalize_draft(
        &self,
        example: &TrainingExample,
        draft_status: DraftStatus,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let updated = sqlx::query(
            "UPDATE drafts
             SET status = ?, user_final_subject = ?, user_final_body = ?, updated_at = ?
             WHERE id = ? AND user_id = ? AND status NOT IN ('sent', 'modified')",
        )
        .bind(draft_status.to_string())
        .bind(&example.user_final_subject)
        .bind(&example.user_final)
        .bind(Utc::now())
        .bind(example.draft_id.to_string())
        .bind(&example.user_id)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        if updated.rows_affected() != 1 {
            return Err(MimicError::Conflict(format!(
                "draft {} already has a recorded user edit",
                example.draft_id
            )));
        }

        let sql = format!(
            "INSERT INTO training_examples ({EXAMPLE_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(example.id.to_string())
            .bind(&example.user_id)
            .bind(example.draft_id.to_string())
            .bind(&example.original_from)
            .bind(&example.original_subject)
            .bind(&example.original_body)
            .bind(&example.ai_draft)
            .bind(&example.user_final_subject)
            .bind(&example.user_final)
            .bind(example.comparison.similarity)
            .bind(example.comparison.modification.to_string())
            .bind(example.comparison.edit_distance as i64)
            .bind(&example.prompt)
            .bind(&example.completion)
            .bind(example.prompt_version as i64)
            .bind(&example.content_hash)
            .bind(example.is_valid_for_training)
            .bind(example.used_in_fine_tuning_job_id.map(|id| id.to_string()))
            .bind(example.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| match storage_err(e) {
                MimicError::Conflict(_) => MimicError::Conflict(format!(
                    "a training example already exists for draft {}",
                    example.draft_id
                )),
                other => other,
            })?;

        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }

    pub async fn get_example(&self, user_id: &str, example_id: Uuid) -> Result<Option<TrainingExample>> {
        let sql = format!("SELECT {EXAMPLE_COLUMNS} FROM training_examples WHERE id = ? AND user_id = ?");
        let row = sqlx::query(&sql)
            .bind(example_id.to_string())
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        row.as_ref().map(example_from_row).transpose()
    }

    pub async fn count_examples(&self, user_id: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM training_examples WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(count as u64)
    }

    /// Distinct, valid, unconsumed examples rendered with `prompt_version`.
    pub async fn count_pending_examples(&self, user_id: &str, prompt_version: u32) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT content_hash) FROM training_examples
             WHERE user_id = ? AND is_valid_for_training = 1
               AND used_in_fine_tuning_job_id IS NULL AND prompt_version = ?",
        )
        .bind(user_id)
        .bind(prompt_version as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(count as u64)
    }

    /// Oldest first, so duplicate detection keeps the earliest copy.
    pub async fn list_unused_examples(
        &self,
        user_id: &str,
        prompt_version: u32,
    ) -> Result<Vec<TrainingExample>> {
        let sql = format!(
            "SELECT {EXAMPLE_COLUMNS} FROM training_examples
             WHERE user_id = ? AND is_valid_for_training = 1
               AND used_in_fine_tuning_job_id IS NULL AND prompt_version = ?
             ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(prompt_version as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;

        rows.iter().map(example_from_row).collect()
    }

    /// Hook for a later curation pass. Returns false when the example is unknown.
    pub async fn set_example_validity(
        &self,
        user_id: &str,
        example_id: Uuid,
        valid: bool,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE training_examples SET is_valid_for_training = ? WHERE id = ? AND user_id = ?",
        )
        .bind(valid)
        .bind(example_id.to_string())
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn users_with_pending_examples(
        &self,
        prompt_version: u32,
        at_least: u64,
    ) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            "SELECT user_id FROM training_examples
             WHERE is_valid_for_training = 1 AND used_in_fine_tuning_job_id IS NULL
               AND prompt_version = ?
             GROUP BY user_id
             HAVING COUNT(DISTINCT content_hash) >= ?
             ORDER BY user_id",
        )
        .bind(prompt_version as i64)
        .bind(at_least as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)
    }
}

fn example_from_row(row: &SqliteRow) -> Result<TrainingExample> {
    let id: String = row.try_get("id").map_err(storage_err)?;
    let draft_id: String = row.try_get("draft_id").map_err(storage_err)?;
    let modification: String = row.try_get("modification_type").map_err(storage_err)?;
    let edit_distance: i64 = row.try_get("edit_distance").map_err(storage_err)?;
    let prompt_version: i64 = row.try_get("prompt_version").map_err(storage_err)?;
    let used_in: Option<String> = row
        .try_get("used_in_fine_tuning_job_id")
        .map_err(storage_err)?;

    Ok(TrainingExample {
        id: parse_uuid(&id)?,
        user_id: row.try_get("user_id").map_err(storage_err)?,
        draft_id: parse_uuid(&draft_id)?,
        original_from: row.try_get("original_from").map_err(storage_err)?,
        original_subject: row.try_get("original_subject").map_err(storage_err)?,
        original_body: row.try_get("original_body").map_err(storage_err)?,
        ai_draft: row.try_get("ai_draft").map_err(storage_err)?,
        user_final_subject: row.try_get("user_final_subject").map_err(storage_err)?,
        user_final: row.try_get("user_final").map_err(storage_err)?,
        comparison: EditComparison {
            similarity: row.try_get("similarity_score").map_err(storage_err)?,
            edit_distance: edit_distance as u32,
            modification: parse_enum(&modification, "modification_type")?,
        },
        prompt: row.try_get("prompt").map_err(storage_err)?,
        completion: row.try_get("completion").map_err(storage_err)?,
        prompt_version: prompt_version as u32,
        content_hash: row.try_get("content_hash").map_err(storage_err)?,
        is_valid_for_training: row.try_get("is_valid_for_training").map_err(storage_err)?,
        used_in_fine_tuning_job_id: used_in.as_deref().map(parse_uuid).transpose()?,
        created_at: row.try_get("created_at").map_err(storage_err)?,
    })
}
