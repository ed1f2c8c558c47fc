use async_trait::async_trait;
use mimic_core::error::Result;
use mimic_core::types::PersonalizationContext;
use std::sync::Arc;
use storage::sqlite::SqliteStorage;

/// Read-only source of a user's style profile, remembered facts and current model.
#[async_trait]
pub trait PersonalizationProvider: Send + Sync {
    async fn load(&self, user_id: &str) -> Result<PersonalizationContext>;
}

pub struct StoredPersonalization {
    sqlite: Arc<SqliteStorage>,
    memory_limit: u32,
}

impl StoredPersonalization {
    pub fn new(sqlite: Arc<SqliteStorage>, memory_limit: u32) -> Self {
        Self {
            sqlite,
            memory_limit,
        }
    }
}

#[async_trait]
impl PersonalizationProvider for StoredPersonalization {
    async fn load(&self, user_id: &str) -> Result<PersonalizationContext> {
        let (style, memories, model) = tokio::join!(
            self.sqlite.get_writing_style(user_id),
            self.sqlite.list_memories(user_id, self.memory_limit),
            self.sqlite.current_model(user_id),
        );

        Ok(PersonalizationContext {
            style: style?,
            memories: memories?,
            fine_tuned_model: model?.map(|m| m.model_id),
        })
    }
}
