//! External fine-tuning provider: training-file upload and job lifecycle.

use crate::provider::Message;
use async_trait::async_trait;
use mimic_core::error::{MimicError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Provider-side view of a fine-tuning job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderJob {
    pub id: String,
    /// Provider status vocabulary, e.g. `validating_files`, `running`, `succeeded`.
    pub status: String,
    pub fine_tuned_model: Option<String>,
    pub trained_tokens: Option<i64>,
    pub error: Option<String>,
}

#[async_trait]
pub trait FineTuningProvider: Send + Sync {
    /// Uploads a JSONL training file, returning the provider file id.
    async fn upload_file(&self, file_name: &str, content: String) -> Result<String>;
    async fn create_job(&self, file_id: &str, base_model: &str, suffix: &str) -> Result<ProviderJob>;
    async fn get_job(&self, job_id: &str) -> Result<ProviderJob>;
    async fn cancel_job(&self, job_id: &str) -> Result<()>;
}

/// One chat-format training line: system, user prompt, assistant completion.
pub fn training_line(system: &str, prompt: &str, completion: &str) -> Result<String> {
    let messages = [
        Message::system(system),
        Message::user(prompt),
        Message::assistant(completion),
    ];
    serde_json::to_string(&serde_json::json!({ "messages": messages }))
        .map_err(|e| MimicError::Internal(e.to_string()))
}

pub struct OpenAIFineTuningProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAIFineTuningProvider {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder, what: &str) -> Result<Value> {
        let response = self
            .authorized(builder)
            .send()
            .await
            .map_err(|e| MimicError::Upstream(format!("{}: {}", what, e)))?;
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
            .map_err(|e| MimicError::Upstream(format!("{}: {}", what, e)))
    }
}

fn provider_job(body: &Value) -> Result<ProviderJob> {
    let id = body["id"]
        .as_str()
        .ok_or_else(|| MimicError::Upstream("fine-tuning job response has no id".into()))?;
    Ok(ProviderJob {
        id: id.to_string(),
        status: body["status"].as_str().unwrap_or_default().to_string(),
        fine_tuned_model: body["fine_tuned_model"].as_str().map(String::from),
        trained_tokens: body["trained_tokens"].as_i64(),
        error: body["error"]["message"]
            .as_str()
            .filter(|m| !m.is_empty())
            .map(String::from),
    })
}

#[async_trait]
impl FineTuningProvider for OpenAIFineTuningProvider {
    async fn upload_file(&self, file_name: &str, content: String) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(content.into_bytes())
            .file_name(file_name.to_string())
            .mime_str("application/jsonl")
            .map_err(|e| MimicError::Internal(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("purpose", "fine-tune")
            .part("file", part);

        let body = self
            .send(
                self.client
                    .post(format!("{}/files", self.base_url))
                    .multipart(form),
                "training file upload",
            )
            .await?;
        body["id"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| MimicError::Upstream("file upload response has no id".into()))
    }

    async fn create_job(&self, file_id: &str, base_model: &str, suffix: &str) -> Result<ProviderJob> {
        let body = self
            .send(
                self.client
                    .post(format!("{}/fine_tuning/jobs", self.base_url))
                    .json(&serde_json::json!({
                        "training_file": file_id,
                        "model": base_model,
                        "suffix": suffix,
                    })),
                "fine-tuning job submission",
            )
            .await?;
        provider_job(&body)
    }

    async fn get_job(&self, job_id: &str) -> Result<ProviderJob> {
        let body = self
            .send(
                self.client
                    .get(format!("{}/fine_tuning/jobs/{}", self.base_url, job_id)),
                "fine-tuning job status",
            )
            .await?;
        provider_job(&body)
    }

    async fn cancel_job(&self, job_id: &str) -> Result<()> {
        self.send(
            self.client
                .post(format!("{}/fine_tuning/jobs/{}/cancel", self.base_url, job_id)),
            "fine-tuning job cancellation",
        )
        .await
        .map(|_| ())
    }
}
