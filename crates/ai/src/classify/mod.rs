use crate::provider::{AiProvider, ChatRequest};
use crate::schema::{parse_classification, parse_json, SchemaValidator};
use async_trait::async_trait;
use mimic_core::error::Result;
use mimic_core::types::{EmailClassification, OriginalEmail};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Decides whether an inbound email needs a reply, and what kind.
#[async_trait]
pub trait EmailClassifier: Send + Sync {
    async fn classify(&self, email: &OriginalEmail) -> Result<EmailClassification>;
}

const CLASSIFIER_SYSTEM: &str = "You are an expert email triage assistant. Output valid JSON only.";
const REPAIR_SYSTEM: &str = "You are a JSON repair specialist. Output corrected JSON only.";

pub struct LlmClassifier {
    ai: Arc<dyn AiProvider>,
    validator: SchemaValidator,
    body_chars: usize,
}

impl LlmClassifier {
    pub fn new(ai: Arc<dyn AiProvider>, body_chars: usize) -> Result<Self> {
        Ok(Self {
            ai,
            validator: SchemaValidator::classification()?,
            body_chars,
        })
    }

    fn prompt(&self, email: &OriginalEmail) -> String {
        let body: String = email.body_text.chars().take(self.body_chars).collect();
        format!(
            "Decide whether the user should reply to the email below.
Respond ONLY with a JSON object matching this schema:
{{
  \"needs_response\": true|false,
  \"response_type\": \"scheduling|question|request|follow_up|acknowledgement|decline|information|other\",
  \"urgency\": \"low|medium|high|critical\",
  \"suggested_points\": [\"string\"],
  \"confidence\": 0.0-1.0,
  \"reasoning\": \"string\"
}}
Newsletters, receipts, automated notifications and FYI messages do not need a response.

From: {}
Subject: {}
Labels: {}
Body: {}",
            email.sender_display(),
            email.subject,
            email.labels.join(", "),
            body
        )
    }

    async fn run(&self, system: &str, prompt: String) -> Result<Value> {
        let request = ChatRequest::new(system, prompt, 0.0).json();
        let res = self.ai.chat_completion(request).await?;
        parse_json(&res.content)
    }

    async fn run_repair(&self, prompt: &str, invalid: &str) -> Result<Value> {
        let repair_prompt = format!(
            "The previous JSON output was invalid according to the schema. Fix it.\n\nTask: {}\n\nInvalid JSON: {}",
            prompt, invalid
        );
        self.run(REPAIR_SYSTEM, repair_prompt).await
    }
}

#[async_trait]
impl EmailClassifier for LlmClassifier {
    async fn classify(&self, email: &OriginalEmail) -> Result<EmailClassification> {
        let prompt = self.prompt(email);
        let first = self.run(CLASSIFIER_SYSTEM, prompt.clone()).await;

        let response = match first {
            Ok(json) if self.validator.is_valid(&json) => json,
            Ok(json) => {
                warn!(message_id = %email.message_id, "classification failed validation, attempting repair pass");
                self.run_repair(&prompt, &json.to_string()).await?
            }
            Err(e) => {
                warn!(message_id = %email.message_id, error = %e, "classification was not JSON, attempting repair pass");
                self.run_repair(&prompt, &e.to_string()).await?
            }
        };

        parse_classification(&self.validator, response)
    }
}
