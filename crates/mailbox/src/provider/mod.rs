use async_trait::async_trait;
use mimic_core::error::{MimicError, Result};
use mimic_core::types::MailProviderKind;
use serde::{Deserialize, Serialize};

/// A reply draft to be placed in the user's mailbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftRequest {
    /// Provider id of the message being answered.
    pub reply_to_message_id: String,
    pub thread_id: Option<String>,
    /// RFC 5322 `Message-ID` of the message being answered.
    pub in_reply_to: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub body_text: String,
    pub body_html: Option<String>,
}

/// Gmail / Outlook draft operations. Implementations must never change the
/// read state of the original message.
#[async_trait]
pub trait MailProvider: Send + Sync {
    fn kind(&self) -> MailProviderKind;

    /// Creates the draft and returns the provider's draft id.
    async fn create_draft(&self, request: &DraftRequest) -> Result<String>;

    /// Removes a draft created by `create_draft`.
    async fn delete_draft(&self, draft_id: &str) -> Result<()>;
}

pub(crate) async fn read_json(response: reqwest::Response, what: &str) -> Result<serde_json::Value> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(MimicError::Upstream(format!(
            "{} failed with {}: {}",
            what, status, body
        )));
    }
    response
        .json()
        .await
        .map_err(|e| MimicError::Upstream(format!("{} returned invalid JSON: {}", what, e)))
}

pub(crate) async fn expect_success(response: reqwest::Response, what: &str) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(MimicError::Upstream(format!(
        "{} failed with {}: {}",
        what, status, body
    )))
}
