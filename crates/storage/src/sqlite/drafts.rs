use super::{parse_enum, parse_json, parse_uuid, storage_err, to_json, SqliteStorage};
use mimic_core::error::Result;
use mimic_core::types::{DraftRecord, DraftStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

const DRAFT_COLUMNS: &str = "id, user_id, message_id, thread_id, original_from, original_from_name, \
     original_subject, original_snippet, original_body, original_received_at, draft_subject, \
     draft_body, draft_html, draft_reasoning, provider, provider_draft_id, needs_response, \
     response_type, urgency, classification_confidence, status, agent_reasoning, \
     user_final_subject, user_final_body, created_at, updated_at, expires_at";

impl SqliteStorage {
    /// Writes the whole draft row in one statement, keyed by (user, message).
    /// A re-run replaces an unfinalized draft; a sent or modified one is left
    /// untouched and `None` is returned.
    pub async fn upsert_draft(&self, draft: &DraftRecord) -> Result<Option<Uuid>> {
        let sql = format!(
            "INSERT INTO drafts ({DRAFT_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id, message_id) DO UPDATE SET
                thread_id = excluded.thread_id,
                original_from = excluded.original_from,
                original_from_name = excluded.original_from_name,
                original_subject = excluded.original_subject,
                original_snippet = excluded.original_snippet,
                original_body = excluded.original_body,
                original_received_at = excluded.original_received_at,
                draft_subject = excluded.draft_subject,
                draft_body = excluded.draft_body,
                draft_html = excluded.draft_html,
                draft_reasoning = excluded.draft_reasoning,
                provider = excluded.provider,
                provider_draft_id = excluded.provider_draft_id,
                needs_response = excluded.needs_response,
                response_type = excluded.response_type,
                urgency = excluded.urgency,
                classification_confidence = excluded.classification_confidence,
                status = excluded.status,
                agent_reasoning = excluded.agent_reasoning,
                updated_at = excluded.updated_at,
                expires_at = excluded.expires_at
             WHERE drafts.status NOT IN ('sent', 'modified')
             RETURNING id"
        );

        let row = sqlx::query(&sql)
            .bind(draft.id.to_string())
            .bind(&draft.user_id)
            .bind(&draft.message_id)
            .bind(&draft.thread_id)
            .bind(&draft.original_from)
            .bind(&draft.original_from_name)
            .bind(&draft.original_subject)
            .bind(&draft.original_snippet)
            .bind(&draft.original_body)
            .bind(draft.original_received_at)
            .bind(&draft.draft_subject)
            .bind(&draft.draft_body)
            .bind(&draft.draft_html)
            .bind(&draft.draft_reasoning)
            .bind(draft.provider.map(|p| p.to_string()))
            .bind(&draft.provider_draft_id)
            .bind(draft.needs_response)
            .bind(draft.response_type.to_string())
            .bind(draft.urgency.to_string())
            .bind(draft.classification_confidence as f64)
            .bind(draft.status.to_string())
            .bind(to_json(&draft.agent_reasoning)?)
            .bind(&draft.user_final_subject)
            .bind(&draft.user_final_body)
            .bind(draft.created_at)
            .bind(draft.updated_at)
            .bind(draft.expires_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        match row {
            Some(row) => {
                let id: String = row.try_get("id").map_err(storage_err)?;
                Ok(Some(parse_uuid(&id)?))
            }
            None => Ok(None),
        }
    }

    /// Fetches a draft only if it belongs to `user_id`.
    pub async fn get_draft(&self, user_id: &str, draft_id: Uuid) -> Result<Option<DraftRecord>> {
        let sql = format!("SELECT {DRAFT_COLUMNS} FROM drafts WHERE id = ? AND user_id = ?");
        let row = sqlx::query(&sql)
            .bind(draft_id.to_string())
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        row.as_ref().map(draft_from_row).transpose()
    }

    pub async fn get_draft_by_message(
        &self,
        user_id: &str,
        message_id: &str,
    ) -> Result<Option<DraftRecord>> {
        let sql = format!("SELECT {DRAFT_COLUMNS} FROM drafts WHERE user_id = ? AND message_id = ?");
        let row = sqlx::query(&sql)
            .bind(user_id)
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        row.as_ref().map(draft_from_row).transpose()
    }

    pub async fn list_drafts(
        &self,
        user_id: &str,
        status: Option<DraftStatus>,
        limit: i64,
    ) -> Result<Vec<DraftRecord>> {
        let rows = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {DRAFT_COLUMNS} FROM drafts WHERE user_id = ? AND status = ?
                     ORDER BY created_at DESC LIMIT ?"
                );
                sqlx::query(&sql)
                    .bind(user_id)
                    .bind(status.to_string())
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                let sql = format!(
                    "SELECT {DRAFT_COLUMNS} FROM drafts WHERE user_id = ?
                     ORDER BY created_at DESC LIMIT ?"
                );
                sqlx::query(&sql)
                    .bind(user_id)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(storage_err)?;

        rows.iter().map(draft_from_row).collect()
    }
}

fn draft_from_row(row: &SqliteRow) -> Result<DraftRecord> {
    let id: String = row.try_get("id").map_err(storage_err)?;
    let provider: Option<String> = row.try_get("provider").map_err(storage_err)?;
    let response_type: String = row.try_get("response_type").map_err(storage_err)?;
    let urgency: String = row.try_get("urgency").map_err(storage_err)?;
    let status: String = row.try_get("status").map_err(storage_err)?;
    let reasoning: String = row.try_get("agent_reasoning").map_err(storage_err)?;
    let confidence: f64 = row.try_get("classification_confidence").map_err(storage_err)?;

    Ok(DraftRecord {
        id: parse_uuid(&id)?,
        user_id: row.try_get("user_id").map_err(storage_err)?,
        message_id: row.try_get("message_id").map_err(storage_err)?,
        thread_id: row.try_get("thread_id").map_err(storage_err)?,
        original_from: row.try_get("original_from").map_err(storage_err)?,
        original_from_name: row.try_get("original_from_name").map_err(storage_err)?,
        original_subject: row.try_get("original_subject").map_err(storage_err)?,
        original_snippet: row.try_get("original_snippet").map_err(storage_err)?,
        original_body: row.try_get("original_body").map_err(storage_err)?,
        original_received_at: row.try_get("original_received_at").map_err(storage_err)?,
        draft_subject: row.try_get("draft_subject").map_err(storage_err)?,
        draft_body: row.try_get("draft_body").map_err(storage_err)?,
        draft_html: row.try_get("draft_html").map_err(storage_err)?,
        draft_reasoning: row.try_get("draft_reasoning").map_err(storage_err)?,
        provider: provider
            .map(|p| parse_enum(&p, "provider"))
            .transpose()?,
        provider_draft_id: row.try_get("provider_draft_id").map_err(storage_err)?,
        needs_response: row.try_get("needs_response").map_err(storage_err)?,
        response_type: parse_enum(&response_type, "response_type")?,
        urgency: parse_enum(&urgency, "urgency")?,
        classification_confidence: confidence as f32,
        status: parse_enum(&status, "status")?,
        agent_reasoning: parse_json(&reasoning, "agent_reasoning")?,
        user_final_subject: row.try_get("user_final_subject").map_err(storage_err)?,
        user_final_body: row.try_get("user_final_body").map_err(storage_err)?,
        created_at: row.try_get("created_at").map_err(storage_err)?,
        updated_at: row.try_get("updated_at").map_err(storage_err)?,
        expires_at: row.try_get("expires_at").map_err(storage_err)?,
    })
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::draft;
    use super::*;

    #[tokio::test]
    async fn upsert_then_fetch_by_owner_only() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let record = draft("alice", "msg-1", DraftStatus::Pending);

        let id = storage.upsert_draft(&record).await.unwrap().unwrap();
        assert_eq!(id, record.id);

        let loaded = storage.get_draft("alice", id).await.unwrap().unwrap();
        assert_eq!(loaded.draft_body, record.draft_body);
        assert_eq!(loaded.agent_reasoning, record.agent_reasoning);
        assert_eq!(loaded.status, DraftStatus::Pending);

        assert!(storage.get_draft("mallory", id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rerun_replaces_unfinalized_draft_in_place() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let first = draft("alice", "msg-1", DraftStatus::Failed);
        storage.upsert_draft(&first).await.unwrap();

        let mut second = draft("alice", "msg-1", DraftStatus::Created);
        second.draft_body = "Second attempt".into();
        second.provider_draft_id = Some("r-99".into());

        let id = storage.upsert_draft(&second).await.unwrap().unwrap();
        assert_eq!(id, first.id, "the original row id is kept");

        let loaded = storage.get_draft("alice", id).await.unwrap().unwrap();
        assert_eq!(loaded.status, DraftStatus::Created);
        assert_eq!(loaded.draft_body, "Second attempt");
        assert_eq!(loaded.provider_draft_id.as_deref(), Some("r-99"));
        assert_eq!(storage.list_drafts("alice", None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn finalized_draft_is_not_overwritten() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        storage
            .upsert_draft(&draft("alice", "msg-1", DraftStatus::Sent))
            .await
            .unwrap();

        let rerun = draft("alice", "msg-1", DraftStatus::Pending);
        assert!(storage.upsert_draft(&rerun).await.unwrap().is_none());

        let sent = storage
            .list_drafts("alice", Some(DraftStatus::Sent), 10)
            .await
            .unwrap();
        assert_eq!(sent.len(), 1);
    }
}
