pub mod training;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

pub use training::*;

/// An inbound message as fetched from the mail provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginalEmail {
    /// Provider-assigned message id.
    pub message_id: String,
    pub thread_id: Option<String>,
    /// RFC 5322 `Message-ID` header, used for `In-Reply-To`.
    #[serde(default)]
    pub internet_message_id: Option<String>,
    pub from_address: String,
    pub from_name: Option<String>,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    pub subject: String,
    pub body_text: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub labels: Vec<String>,
    pub received_at: DateTime<Utc>,
}

impl OriginalEmail {
    pub fn sender_display(&self) -> String {
        match &self.from_name {
            Some(name) if !name.trim().is_empty() => format!("{} <{}>", name, self.from_address),
            _ => self.from_address.clone(),
        }
    }

    pub fn reply_subject(&self) -> String {
        let trimmed = self.subject.trim();
        if trimmed.to_ascii_lowercase().starts_with("re:") {
            trimmed.to_string()
        } else {
            format!("Re: {}", trimmed)
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Verbosity {
    Terse,
    Concise,
    Moderate,
    Detailed,
}

/// Learned writing-style profile. Produced elsewhere, read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WritingStyle {
    #[serde(default)]
    pub greeting_patterns: Vec<String>,
    #[serde(default)]
    pub signoff_patterns: Vec<String>,
    pub formality_score: f32,
    pub warmth_score: f32,
    pub verbosity: Verbosity,
    pub avg_length_words: u32,
    #[serde(default)]
    pub uses_emoji: bool,
    #[serde(default)]
    pub uses_bullets: bool,
    #[serde(default)]
    pub common_phrases: Vec<String>,
    #[serde(default)]
    pub sample_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub category: String,
    pub key: String,
    pub value: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonalizationContext {
    pub style: Option<WritingStyle>,
    pub memories: Vec<Memory>,
    /// Current fine-tuned model for this user, if one has been promoted.
    pub fine_tuned_model: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResponseType {
    Scheduling,
    Question,
    Request,
    FollowUp,
    Acknowledgement,
    Decline,
    Information,
    Other,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailClassification {
    pub needs_response: bool,
    pub response_type: ResponseType,
    pub urgency: Urgency,
    pub suggested_points: Vec<String>,
    pub confidence: f32,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedDraft {
    pub subject: String,
    pub body: String,
    pub body_html: Option<String>,
    pub reasoning: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DraftStatus {
    Pending,
    Created,
    Sent,
    Modified,
    Failed,
}

impl DraftStatus {
    /// The user has acted on the draft; it can no longer be regenerated or re-curated.
    pub fn is_finalized(&self) -> bool {
        matches!(self, DraftStatus::Sent | DraftStatus::Modified)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MailProviderKind {
    Gmail,
    Outlook,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftRecord {
    pub id: Uuid,
    pub user_id: String,
    pub message_id: String,
    pub thread_id: Option<String>,
    pub original_from: String,
    pub original_from_name: Option<String>,
    pub original_subject: String,
    pub original_snippet: String,
    pub original_body: String,
    pub original_received_at: DateTime<Utc>,
    pub draft_subject: String,
    pub draft_body: String,
    pub draft_html: Option<String>,
    pub draft_reasoning: String,
    pub provider: Option<MailProviderKind>,
    pub provider_draft_id: Option<String>,
    pub needs_response: bool,
    pub response_type: ResponseType,
    pub urgency: Urgency,
    pub classification_confidence: f32,
    pub status: DraftStatus,
    /// Reasoning trail of the agent run that produced this draft, verbatim.
    pub agent_reasoning: Vec<String>,
    pub user_final_subject: Option<String>,
    pub user_final_body: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl DraftRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn expiry_from(created_at: DateTime<Utc>, expiry_days: i64) -> DateTime<Utc> {
        created_at + Duration::days(expiry_days)
    }
}

/// Per-user drafting preferences.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DraftSettings {
    pub auto_create_in_provider: bool,
    pub require_approval: bool,
    #[validate(range(min = 20, max = 2000))]
    pub max_response_words: u32,
    pub include_signature: bool,
    #[validate(length(max = 1000))]
    pub signature: Option<String>,
}

impl Default for DraftSettings {
    fn default() -> Self {
        Self {
            auto_create_in_provider: false,
            require_approval: true,
            max_response_words: 300,
            include_signature: true,
            signature: None,
        }
    }
}

impl DraftSettings {
    pub fn allows_remote_creation(&self) -> bool {
        self.auto_create_in_provider && !self.require_approval
    }
}

/// Stored OAuth connection for a user's mailbox. Token refresh happens elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConnection {
    pub user_id: String,
    pub provider: MailProviderKind,
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl MailConnection {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty() && self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Skipped,
    Failed,
}

/// Result of one draft-agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftRunResult {
    pub status: RunStatus,
    pub draft_id: Option<Uuid>,
    pub provider_draft_id: Option<String>,
    pub classification: Option<EmailClassification>,
    pub draft: Option<GeneratedDraft>,
    pub error: Option<String>,
    /// Raw generator output kept when it could not be parsed.
    pub raw_output: Option<String>,
    pub reasoning: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn email(subject: &str) -> OriginalEmail {
        OriginalEmail {
            message_id: "m1".into(),
            thread_id: Some("t1".into()),
            internet_message_id: None,
            from_address: "dana@example.com".into(),
            from_name: Some("Dana".into()),
            to: vec!["me@example.com".into()],
            cc: vec![],
            subject: subject.into(),
            body_text: "hi".into(),
            snippet: "hi".into(),
            labels: vec![],
            received_at: Utc::now(),
        }
    }

    #[test]
    fn reply_subject_adds_prefix_once() {
        assert_eq!(email("Thursday Sync").reply_subject(), "Re: Thursday Sync");
        assert_eq!(email("RE: Thursday Sync").reply_subject(), "RE: Thursday Sync");
    }

    #[test]
    fn sender_display_prefers_name() {
        assert_eq!(email("x").sender_display(), "Dana <dana@example.com>");
    }

    #[test]
    fn remote_creation_needs_auto_create_without_approval() {
        let mut settings = DraftSettings::default();
        assert!(!settings.allows_remote_creation());
        settings.auto_create_in_provider = true;
        assert!(!settings.allows_remote_creation());
        settings.require_approval = false;
        assert!(settings.allows_remote_creation());
    }

    #[test]
    fn settings_reject_tiny_length_limit() {
        let settings = DraftSettings {
            max_response_words: 5,
            ..DraftSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn enums_round_trip_through_their_storage_names() {
        assert_eq!(ResponseType::FollowUp.to_string(), "follow_up");
        assert_eq!(Urgency::from_str("critical").unwrap(), Urgency::Critical);
        assert_eq!(DraftStatus::from_str("modified").unwrap(), DraftStatus::Modified);
    }
}
