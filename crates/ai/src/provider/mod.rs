use async_trait::async_trait;
use mimic_core::config::AiConfig;
use mimic_core::error::{MimicError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[async_trait]
pub trait AiProvider: Send + Sync {
    async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    /// Overrides the provider's configured model, e.g. with a user's fine-tuned model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ChatRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>, temperature: f32) -> Self {
        Self {
            messages: vec![Message::system(system), Message::user(user)],
            temperature,
            response_format: None,
            model: None,
        }
    }

    pub fn json(mut self) -> Self {
        self.response_format = Some(ResponseFormat::Json);
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResponseFormat {
    #[serde(rename = "json_object")]
    Json,
    #[serde(rename = "text")]
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub usage: Usage,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Builds the configured chat provider.
pub fn from_config(config: &AiConfig) -> Result<Arc<dyn AiProvider>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaProvider::new(
            config.base_url.clone(),
            config.model.clone(),
        ))),
        "openai" => Ok(Arc::new(OpenAICompatibleProvider::new(
            config.base_url.clone(),
            config.api_key.clone(),
            config.model.clone(),
        ))),
        other => Err(MimicError::Config(format!("unknown ai provider '{}'", other))),
    }
}

fn upstream(e: impl std::fmt::Display) -> MimicError {
    MimicError::Upstream(e.to_string())
}

async fn json_body(response: reqwest::Response) -> Result<serde_json::Value> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(MimicError::Upstream(format!(
            "AI provider returned {}: {}",
            status, body
        )));
    }
    response.json().await.map_err(upstream)
}

pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model_name: Option<String>,
}

impl OllamaProvider {
    pub fn new(base_url: String, model_name: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            model_name,
        }
    }
}

#[async_trait]
impl AiProvider for OllamaProvider {
    async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/api/chat", self.base_url);

        let model = request
            .model
            .or(self.model_name.clone())
            .unwrap_or_else(|| "llama3".to_string());

        let ollama_req = serde_json::json!({
            "model": model,
            "messages": request.messages,
            "stream": false,
            "options": { "temperature": request.temperature },
            "format": match request.response_format {
                Some(ResponseFormat::Json) => "json",
                _ => "",
            }
        });

        let response = self
            .client
            .post(&url)
            .json(&ollama_req)
            .send()
            .await
            .map_err(upstream)?;
        let body = json_body(response).await?;

        let content = body["message"]["content"]
            .as_str()
            .ok_or_else(|| MimicError::Upstream("Invalid Ollama response".into()))?
            .to_string();

        let usage = Usage {
            prompt_tokens: body["prompt_eval_count"].as_u64().unwrap_or(0) as u32,
            completion_tokens: body["eval_count"].as_u64().unwrap_or(0) as u32,
        };

        Ok(ChatResponse { content, usage })
    }
}

pub struct OpenAICompatibleProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model_name: Option<String>,
}

impl OpenAICompatibleProvider {
    pub fn new(base_url: String, api_key: Option<String>, model_name: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            model_name,
        }
    }
}

#[async_trait]
impl AiProvider for OpenAICompatibleProvider {
    async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self.client.post(&url);

        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let mut req_json = serde_json::to_value(&request).map_err(upstream)?;
        if let Some(obj) = req_json.as_object_mut() {
            if !obj.contains_key("model") {
                if let Some(m) = &self.model_name {
                    obj.insert("model".to_string(), serde_json::Value::String(m.clone()));
                }
            }
        }

        let response = builder.json(&req_json).send().await.map_err(upstream)?;
        let body = json_body(response).await?;

        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| MimicError::Upstream("Invalid AI response format".into()))?
            .to_string();

        let usage = Usage {
            prompt_tokens: body["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: body["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
        };

        Ok(ChatResponse { content, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_model_override_only_when_set() {
        let plain = serde_json::to_value(ChatRequest::new("s", "u", 0.2)).unwrap();
        assert!(plain.get("model").is_none());
        assert!(plain.get("response_format").is_none());

        let tuned = ChatRequest::new("s", "u", 0.2)
            .json()
            .with_model(Some("ft:gpt-4o-mini:mimic-alice".into()));
        let value = serde_json::to_value(tuned).unwrap();
        assert_eq!(value["model"], "ft:gpt-4o-mini:mimic-alice");
        assert_eq!(value["response_format"]["type"], "json_object");
    }

    #[test]
    fn unknown_provider_is_a_config_error() {
        let config = AiConfig {
            provider: "bard".into(),
            ..AiConfig::default()
        };
        assert!(matches!(from_config(&config), Err(MimicError::Config(_))));
    }
}
