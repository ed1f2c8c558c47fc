use super::{parse_enum, parse_json, storage_err, to_json, SqliteStorage};
use chrono::Utc;
use mimic_core::error::Result;
use mimic_core::types::{DraftSettings, MailConnection, Memory, WritingStyle};
use sqlx::Row;

impl SqliteStorage {
    pub async fn get_draft_settings(&self, user_id: &str) -> Result<Option<DraftSettings>> {
        let row = sqlx::query(
            "SELECT auto_create_in_provider, require_approval, max_response_words, include_signature, signature
             FROM draft_settings WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        match row {
            Some(row) => {
                let max_words: i64 = row.try_get("max_response_words").map_err(storage_err)?;
                Ok(Some(DraftSettings {
                    auto_create_in_provider: row
                        .try_get("auto_create_in_provider")
                        .map_err(storage_err)?,
                    require_approval: row.try_get("require_approval").map_err(storage_err)?,
                    max_response_words: max_words as u32,
                    include_signature: row.try_get("include_signature").map_err(storage_err)?,
                    signature: row.try_get("signature").map_err(storage_err)?,
                }))
            }
            None => Ok(None),
        }
    }

    pub async fn save_draft_settings(&self, user_id: &str, settings: &DraftSettings) -> Result<()> {
        sqlx::query(
            "INSERT INTO draft_settings (user_id, auto_create_in_provider, require_approval, max_response_words, include_signature, signature, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                auto_create_in_provider = excluded.auto_create_in_provider,
                require_approval = excluded.require_approval,
                max_response_words = excluded.max_response_words,
                include_signature = excluded.include_signature,
                signature = excluded.signature,
                updated_at = excluded.updated_at",
        )
        .bind(user_id)
        .bind(settings.auto_create_in_provider)
        .bind(settings.require_approval)
        .bind(settings.max_response_words as i64)
        .bind(settings.include_signature)
        .bind(&settings.signature)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    pub async fn get_writing_style(&self, user_id: &str) -> Result<Option<WritingStyle>> {
        let profile: Option<String> =
            sqlx::query_scalar("SELECT profile_json FROM writing_styles WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage_err)?;

        profile
            .map(|json| parse_json(&json, "profile_json"))
            .transpose()
    }

    pub async fn save_writing_style(&self, user_id: &str, style: &WritingStyle) -> Result<()> {
        sqlx::query(
            "INSERT INTO writing_styles (user_id, profile_json, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET profile_json = excluded.profile_json, updated_at = excluded.updated_at",
        )
        .bind(user_id)
        .bind(to_json(style)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    /// Most confident facts first.
    pub async fn list_memories(&self, user_id: &str, limit: u32) -> Result<Vec<Memory>> {
        let rows = sqlx::query(
            "SELECT category, key, value, confidence FROM user_memories
             WHERE user_id = ? ORDER BY confidence DESC, updated_at DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.into_iter()
            .map(|row| {
                let confidence: f64 = row.try_get("confidence").map_err(storage_err)?;
                Ok(Memory {
                    category: row.try_get("category").map_err(storage_err)?,
                    key: row.try_get("key").map_err(storage_err)?,
                    value: row.try_get("value").map_err(storage_err)?,
                    confidence: confidence as f32,
                })
            })
            .collect()
    }

    pub async fn upsert_memory(&self, user_id: &str, memory: &Memory) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_memories (user_id, category, key, value, confidence, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id, category, key) DO UPDATE SET
                value = excluded.value, confidence = excluded.confidence, updated_at = excluded.updated_at",
        )
        .bind(user_id)
        .bind(&memory.category)
        .bind(&memory.key)
        .bind(&memory.value)
        .bind(memory.confidence as f64)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    pub async fn get_mail_connection(&self, user_id: &str) -> Result<Option<MailConnection>> {
        let row = sqlx::query(
            "SELECT provider, access_token, expires_at FROM mail_connections WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        match row {
            Some(row) => {
                let provider: String = row.try_get("provider").map_err(storage_err)?;
                Ok(Some(MailConnection {
                    user_id: user_id.to_string(),
                    provider: parse_enum(&provider, "provider")?,
                    access_token: row.try_get("access_token").map_err(storage_err)?,
                    expires_at: row.try_get("expires_at").map_err(storage_err)?,
                }))
            }
            None => Ok(None),
        }
    }

    pub async fn save_mail_connection(&self, connection: &MailConnection) -> Result<()> {
        sqlx::query(
            "INSERT INTO mail_connections (user_id, provider, access_token, expires_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                provider = excluded.provider, access_token = excluded.access_token,
                expires_at = excluded.expires_at, updated_at = excluded.updated_at",
        )
        .bind(&connection.user_id)
        .bind(connection.provider.to_string())
        .bind(&connection.access_token)
        .bind(connection.expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }
}
