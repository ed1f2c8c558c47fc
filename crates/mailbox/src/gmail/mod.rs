use crate::mime::{build_reply_message, encode_raw};
use crate::provider::{expect_success, read_json, DraftRequest, MailProvider};
use async_trait::async_trait;
use mimic_core::error::{MimicError, Result};
use mimic_core::types::MailProviderKind;
use tracing::debug;
use uuid::Uuid;

const GMAIL_API: &str = "https://gmail.googleapis.com";

pub struct GmailProvider {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl GmailProvider {
    pub fn new(access_token: String) -> Self {
        Self::with_base_url(GMAIL_API.to_string(), access_token)
    }

    pub fn with_base_url(base_url: String, access_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            access_token,
        }
    }

    fn drafts_url(&self) -> String {
        format!("{}/gmail/v1/users/me/drafts", self.base_url)
    }
}

/// Drafts resource body. Creating a draft leaves the original's UNREAD label untouched.
pub fn draft_payload(request: &DraftRequest, boundary: &str) -> serde_json::Value {
    let raw = encode_raw(&build_reply_message(request, boundary));
    let mut message = serde_json::json!({ "raw": raw });
    if let Some(thread_id) = &request.thread_id {
        message["threadId"] = serde_json::Value::String(thread_id.clone());
    }
    serde_json::json!({ "message": message })
}

#[async_trait]
impl MailProvider for GmailProvider {
    fn kind(&self) -> MailProviderKind {
        MailProviderKind::Gmail
    }

    async fn create_draft(&self, request: &DraftRequest) -> Result<String> {
        let boundary = format!("mimic-{}", Uuid::new_v4().simple());
        let response = self
            .client
            .post(self.drafts_url())
            .bearer_auth(&self.access_token)
            .json(&draft_payload(request, &boundary))
            .send()
            .await
            .map_err(|e| MimicError::Upstream(format!("Gmail draft request failed: {}", e)))?;

        let body = read_json(response, "Gmail draft creation").await?;
        let id = body["id"]
            .as_str()
            .ok_or_else(|| MimicError::Upstream("Gmail draft response has no id".into()))?;
        debug!(draft_id = id, "created Gmail draft");
        Ok(id.to_string())
    }

    async fn delete_draft(&self, draft_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/{}", self.drafts_url(), draft_id))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| MimicError::Upstream(format!("Gmail draft delete failed: {}", e)))?;
        expect_success(response, "Gmail draft deletion").await
    }
}
