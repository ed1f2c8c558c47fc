use crate::provider::{expect_success, read_json, DraftRequest, MailProvider};
use async_trait::async_trait;
use mimic_core::error::{MimicError, Result};
use mimic_core::types::MailProviderKind;
use serde_json::{json, Value};
use tracing::{debug, warn};

const GRAPH_API: &str = "https://graph.microsoft.com/v1.0";

/// Outlook drafts through Microsoft Graph.
///
/// `createReply` produces a threaded draft in the Drafts folder; the draft is
/// then patched with our subject and body. Neither call touches `isRead` on
/// the original message.
pub struct GraphMailProvider {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl GraphMailProvider {
    pub fn new(access_token: String) -> Self {
        Self::with_base_url(GRAPH_API.to_string(), access_token)
    }

    pub fn with_base_url(base_url: String, access_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            access_token,
        }
    }
}

fn recipients(addresses: &[String]) -> Value {
    Value::Array(
        addresses
            .iter()
            .map(|a| json!({ "emailAddress": { "address": a } }))
            .collect(),
    )
}

pub fn reply_patch(request: &DraftRequest) -> Value {
    let body = match &request.body_html {
        Some(html) => json!({ "contentType": "HTML", "content": html }),
        None => json!({ "contentType": "Text", "content": request.body_text }),
    };
    let mut patch = json!({
        "subject": request.subject,
        "body": body,
        "toRecipients": recipients(&request.to),
    });
    if !request.cc.is_empty() {
        patch["ccRecipients"] = recipients(&request.cc);
    }
    patch
}

#[async_trait]
impl MailProvider for GraphMailProvider {
    fn kind(&self) -> MailProviderKind {
        MailProviderKind::Outlook
    }

    async fn create_draft(&self, request: &DraftRequest) -> Result<String> {
        let url = format!(
            "{}/me/messages/{}/createReply",
            self.base_url, request.reply_to_message_id
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| MimicError::Upstream(format!("Graph createReply failed: {}", e)))?;
        let created = read_json(response, "Graph createReply").await?;
        let draft_id = created["id"]
            .as_str()
            .ok_or_else(|| MimicError::Upstream("Graph createReply response has no id".into()))?
            .to_string();

        let patched = match self
            .client
            .patch(format!("{}/me/messages/{}", self.base_url, draft_id))
            .bearer_auth(&self.access_token)
            .json(&reply_patch(request))
            .send()
            .await
        {
            Ok(response) => expect_success(response, "Graph draft update").await,
            Err(e) => Err(MimicError::Upstream(format!("Graph draft update failed: {}", e))),
        };

        if let Err(e) = patched {
            // an unpatched reply draft would otherwise linger in the user's Drafts folder
            if let Err(cleanup) = self.delete_draft(&draft_id).await {
                warn!(draft_id = %draft_id, error = %cleanup, "could not remove unpatched Outlook reply draft");
            }
            return Err(e);
        }

        debug!(draft_id = %draft_id, "created Outlook draft");
        Ok(draft_id)
    }

    async fn delete_draft(&self, draft_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/me/messages/{}", self.base_url, draft_id))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| MimicError::Upstream(format!("Graph draft delete failed: {}", e)))?;
        expect_success(response, "Graph draft deletion").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    fn request() -> DraftRequest {
        DraftRequest {
            reply_to_message_id: "AAMkAD".into(),
            thread_id: None,
            in_reply_to: None,
            to: vec!["dana@example.com".into()],
            cc: vec!["sam@example.com".into()],
            subject: "Re: Thursday Sync".into(),
            body_text: "Works for me.".into(),
            body_html: None,
        }
    }

    #[test]
    fn patch_uses_text_body_without_html() {
        let patch = reply_patch(&request());
        assert_eq!(patch["body"]["contentType"], "Text");
        assert_eq!(patch["toRecipients"][0]["emailAddress"]["address"], "dana@example.com");
        assert_eq!(patch["ccRecipients"][0]["emailAddress"]["address"], "sam@example.com");
        assert!(patch.get("isRead").is_none());
    }

    /// Answers one request per connection with the scripted status and body,
    /// returning the request lines it saw.
    async fn scripted_server(replies: Vec<(u16, &'static str)>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            for (status, body) in replies {
                let (mut socket, _) = listener.accept().await.unwrap();
                let request = read_request(&mut socket).await;
                seen.push(request.lines().next().unwrap_or_default().to_string());
                let reply = format!(
                    "HTTP/1.1 {} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
            seen
        });
        (base_url, handle)
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).into_owned();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    #[tokio::test]
    async fn failed_patch_removes_the_reply_draft() {
        let (base_url, server) = scripted_server(vec![
            (201, r#"{"id": "draft-1"}"#),
            (500, r#"{"error": "patch rejected"}"#),
            (503, r#"{"error": "delete rejected"}"#),
        ])
        .await;
        let provider = GraphMailProvider::with_base_url(base_url, "token".into());

        let err = provider.create_draft(&request()).await.unwrap_err();

        assert!(err.to_string().contains("patch rejected"));
        let seen = server.await.unwrap();
        assert!(seen[0].starts_with("POST /me/messages/AAMkAD/createReply"));
        assert!(seen[1].starts_with("PATCH /me/messages/draft-1"));
        assert!(seen[2].starts_with("DELETE /me/messages/draft-1"));
    }

    #[test]
    fn patch_prefers_html_body() {
        let mut req = request();
        req.body_html = Some("<p>Works for me.</p>".into());
        assert_eq!(reply_patch(&req)["body"]["contentType"], "HTML");
    }
}
