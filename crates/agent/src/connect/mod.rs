use async_trait::async_trait;
use chrono::Utc;
use mailbox::{GmailProvider, GraphMailProvider, MailProvider};
use mimic_core::error::Result;
use mimic_core::types::MailProviderKind;
use std::sync::Arc;
use storage::sqlite::SqliteStorage;
use tracing::debug;

/// Resolves a user's mailbox. `Ok(None)` means there is no usable connection.
#[async_trait]
pub trait MailConnector: Send + Sync {
    async fn connect(&self, user_id: &str) -> Result<Option<Arc<dyn MailProvider>>>;
}

/// Builds providers from the access tokens kept in storage.
pub struct StoredTokenConnector {
    sqlite: Arc<SqliteStorage>,
}

impl StoredTokenConnector {
    pub fn new(sqlite: Arc<SqliteStorage>) -> Self {
        Self { sqlite }
    }
}

#[async_trait]
impl MailConnector for StoredTokenConnector {
    async fn connect(&self, user_id: &str) -> Result<Option<Arc<dyn MailProvider>>> {
        let Some(connection) = self.sqlite.get_mail_connection(user_id).await? else {
            return Ok(None);
        };
        if !connection.is_usable(Utc::now()) {
            debug!(user_id, provider = %connection.provider, "mail connection token is missing or expired");
            return Ok(None);
        }

        let provider: Arc<dyn MailProvider> = match connection.provider {
            MailProviderKind::Gmail => Arc::new(GmailProvider::new(connection.access_token)),
            MailProviderKind::Outlook => Arc::new(GraphMailProvider::new(connection.access_token)),
        };
        Ok(Some(provider))
    }
}
