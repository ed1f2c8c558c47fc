#![allow(dead_code)]

use agent::connect::MailConnector;
use agent::context::PersonalizationProvider;
use agent::curation::Curator;
use agent::service::{Collaborators, MimicService};
use ai::classify::EmailClassifier;
use ai::fine_tune::{FineTuningProvider, ProviderJob};
use ai::provider::{AiProvider, ChatRequest, ChatResponse, Usage};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::{BoxFuture, Future, FutureExt};
use mailbox::{DraftRequest, MailProvider};
use mimic_core::config::MimicConfig;
use mimic_core::error::{MimicError, Result};
use mimic_core::types::{
    DraftRecord, DraftStatus, EmailClassification, MailProviderKind, OriginalEmail,
    PersonalizationContext, ResponseType, TrainingExample, Urgency, UserEdit,
};
use std::sync::{Arc, Mutex};
use storage::sqlite::SqliteStorage;
use uuid::Uuid;

pub const THURSDAY_DRAFT: &str =
    r#"{"subject": "Re: Thursday Sync", "body": "Works for me, see you at 3pm.", "reasoning": "Confirms the new time."}"#;

pub async fn storage() -> Arc<SqliteStorage> {
    Arc::new(SqliteStorage::in_memory().await.unwrap())
}

pub fn email(message_id: &str) -> OriginalEmail {
    OriginalEmail {
        message_id: message_id.into(),
        thread_id: Some(format!("thread-{}", message_id)),
        internet_message_id: Some(format!("<{}@mail.example.com>", message_id)),
        from_address: "dana@example.com".into(),
        from_name: Some("Dana".into()),
        to: vec!["alex@example.com".into()],
        cc: vec![],
        subject: "Thursday Sync".into(),
        body_text: "Can we move Thursday's sync to 3pm?".into(),
        snippet: "Can we move Thursday's sync".into(),
        labels: vec!["INBOX".into(), "UNREAD".into()],
        received_at: Utc::now(),
    }
}

pub fn classification(needs_response: bool) -> EmailClassification {
    EmailClassification {
        needs_response,
        response_type: if needs_response {
            ResponseType::Scheduling
        } else {
            ResponseType::Information
        },
        urgency: Urgency::Medium,
        suggested_points: vec!["agree to 3pm".into()],
        confidence: 0.93,
        reasoning: if needs_response {
            "Asks to reschedule a meeting".into()
        } else {
            "Automated newsletter".into()
        },
    }
}

/// Chat provider replaying scripted outputs and recording every request.
pub struct FakeAi {
    replies: Mutex<Vec<Result<String>>>,
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl FakeAi {
    pub fn replying(replies: Vec<Result<String>>) -> Arc<Self> {
        let mut replies = replies;
        replies.reverse();
        Arc::new(Self {
            replies: Mutex::new(replies),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl AiProvider for FakeAi {
    async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse> {
        self.requests.lock().unwrap().push(request);
        let content = self
            .replies
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Err(MimicError::Upstream("no scripted reply".into())))?;
        Ok(ChatResponse {
            content,
            usage: Usage::default(),
        })
    }
}

/// Gives the same verdict for every email.
pub struct FakeClassifier {
    result: Result<EmailClassification>,
}

impl FakeClassifier {
    pub fn returning(result: Result<EmailClassification>) -> Arc<Self> {
        Arc::new(Self { result })
    }
}

#[async_trait]
impl EmailClassifier for FakeClassifier {
    async fn classify(&self, _email: &OriginalEmail) -> Result<EmailClassification> {
        match &self.result {
            Ok(classification) => Ok(classification.clone()),
            Err(e) => Err(MimicError::Upstream(e.to_string())),
        }
    }
}

/// Runs once, from inside a fake call, before the fake answers.
pub type Hook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

pub fn hook<F, Fut>(f: F) -> Option<Hook>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Some(Box::new(move || f().boxed()))
}

async fn run_hook(slot: &Mutex<Option<Hook>>) {
    let hook = slot.lock().unwrap().take();
    if let Some(hook) = hook {
        hook().await;
    }
}

pub struct FakePersonalization(pub PersonalizationContext);

#[async_trait]
impl PersonalizationProvider for FakePersonalization {
    async fn load(&self, _user_id: &str) -> Result<PersonalizationContext> {
        Ok(self.0.clone())
    }
}

#[derive(Default)]
pub struct FakeMail {
    pub fail_create: bool,
    pub on_create: Mutex<Option<Hook>>,
    pub created: Mutex<Vec<DraftRequest>>,
    pub deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl MailProvider for FakeMail {
    fn kind(&self) -> MailProviderKind {
        MailProviderKind::Gmail
    }

    async fn create_draft(&self, request: &DraftRequest) -> Result<String> {
        run_hook(&self.on_create).await;
        if self.fail_create {
            return Err(MimicError::Upstream("Gmail draft creation failed with 503".into()));
        }
        let mut created = self.created.lock().unwrap();
        created.push(request.clone());
        Ok(format!("r-{}", created.len()))
    }

    async fn delete_draft(&self, draft_id: &str) -> Result<()> {
        self.deleted.lock().unwrap().push(draft_id.to_string());
        Ok(())
    }
}

pub struct FakeConnector(pub Option<Arc<FakeMail>>);

#[async_trait]
impl MailConnector for FakeConnector {
    async fn connect(&self, _user_id: &str) -> Result<Option<Arc<dyn MailProvider>>> {
        Ok(self.0.clone().map(|mail| mail as Arc<dyn MailProvider>))
    }
}

/// Fine-tuning provider with a settable remote job state.
#[derive(Default)]
pub struct FakeFineTuning {
    pub fail_upload: Mutex<bool>,
    pub fail_submit: Mutex<bool>,
    pub fail_poll: Mutex<bool>,
    pub on_create_job: Mutex<Option<Hook>>,
    pub uploads: Mutex<Vec<String>>,
    pub submitted: Mutex<Vec<(String, String, String)>>,
    pub cancelled: Mutex<Vec<String>>,
    pub remote: Mutex<Option<ProviderJob>>,
}

impl FakeFineTuning {
    pub fn set_remote(&self, status: &str, model: Option<&str>, error: Option<&str>) {
        let id = format!("ftjob-{}", self.submitted.lock().unwrap().len());
        *self.remote.lock().unwrap() = Some(ProviderJob {
            id,
            status: status.to_string(),
            fine_tuned_model: model.map(String::from),
            trained_tokens: Some(4096),
            error: error.map(String::from),
        });
    }
}

#[async_trait]
impl FineTuningProvider for FakeFineTuning {
    async fn upload_file(&self, _file_name: &str, content: String) -> Result<String> {
        if *self.fail_upload.lock().unwrap() {
            return Err(MimicError::Upstream("upload failed with 500".into()));
        }
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push(content);
        Ok(format!("file-{}", uploads.len()))
    }

    async fn create_job(&self, file_id: &str, base_model: &str, suffix: &str) -> Result<ProviderJob> {
        run_hook(&self.on_create_job).await;
        if *self.fail_submit.lock().unwrap() {
            return Err(MimicError::Upstream("fine-tuning job submission failed with 429".into()));
        }
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push((file_id.to_string(), base_model.to_string(), suffix.to_string()));
        Ok(ProviderJob {
            id: format!("ftjob-{}", submitted.len()),
            status: "validating_files".into(),
            fine_tuned_model: None,
            trained_tokens: None,
            error: None,
        })
    }

    async fn get_job(&self, job_id: &str) -> Result<ProviderJob> {
        if *self.fail_poll.lock().unwrap() {
            return Err(MimicError::Upstream("status poll failed with 502".into()));
        }
        let remote = self.remote.lock().unwrap().clone();
        remote
            .map(|job| ProviderJob {
                id: job_id.to_string(),
                ..job
            })
            .ok_or_else(|| MimicError::Upstream("unknown job".into()))
    }

    async fn cancel_job(&self, job_id: &str) -> Result<()> {
        self.cancelled.lock().unwrap().push(job_id.to_string());
        Ok(())
    }
}

pub fn config() -> MimicConfig {
    MimicConfig::default()
}

pub struct Harness {
    pub sqlite: Arc<SqliteStorage>,
    pub ai: Arc<FakeAi>,
    pub mail: Arc<FakeMail>,
    pub fine_tuning: Arc<FakeFineTuning>,
    pub service: MimicService,
}

pub struct HarnessOptions {
    pub ai_replies: Vec<Result<String>>,
    pub classification: Result<EmailClassification>,
    pub personalization: PersonalizationContext,
    pub mail: FakeMail,
    pub connected: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            ai_replies: vec![Ok(THURSDAY_DRAFT.to_string())],
            classification: Ok(classification(true)),
            personalization: PersonalizationContext::default(),
            mail: FakeMail::default(),
            connected: true,
        }
    }
}

pub async fn harness(options: HarnessOptions) -> Harness {
    let sqlite = storage().await;
    let ai = FakeAi::replying(options.ai_replies);
    let mail = Arc::new(options.mail);
    let fine_tuning = Arc::new(FakeFineTuning::default());
    let collaborators = Collaborators {
        ai: ai.clone(),
        classifier: FakeClassifier::returning(options.classification),
        personalization: Arc::new(FakePersonalization(options.personalization)),
        connector: Arc::new(FakeConnector(options.connected.then(|| mail.clone()))),
        fine_tuning: fine_tuning.clone(),
    };
    let service = MimicService::new(sqlite.clone(), collaborators, &config()).unwrap();
    Harness {
        sqlite,
        ai,
        mail,
        fine_tuning,
        service,
    }
}

/// A stored draft awaiting the user's action. `n` varies its content.
pub fn draft_record(user_id: &str, n: usize) -> DraftRecord {
    let now = Utc::now();
    DraftRecord {
        id: Uuid::new_v4(),
        user_id: user_id.into(),
        message_id: format!("msg-{}", n),
        thread_id: None,
        original_from: "dana@example.com".into(),
        original_from_name: Some("Dana".into()),
        original_subject: format!("Question {}", n),
        original_snippet: String::new(),
        original_body: format!("Could you send over the numbers for region {}?", n),
        original_received_at: now,
        draft_subject: format!("Re: Question {}", n),
        draft_body: format!("Hi Dana, attached are the numbers for region {}.", n),
        draft_html: None,
        draft_reasoning: String::new(),
        provider: None,
        provider_draft_id: None,
        needs_response: true,
        response_type: ResponseType::Request,
        urgency: Urgency::Low,
        classification_confidence: 0.8,
        status: DraftStatus::Pending,
        agent_reasoning: vec![],
        user_final_subject: None,
        user_final_body: None,
        created_at: now,
        updated_at: now,
        expires_at: DraftRecord::expiry_from(now, 7),
    }
}

pub async fn seed_draft(sqlite: &SqliteStorage, user_id: &str, n: usize) -> DraftRecord {
    let record = draft_record(user_id, n);
    let id = sqlite.upsert_draft(&record).await.unwrap().unwrap();
    DraftRecord { id, ..record }
}

/// Curates `count` distinct examples starting at index `from`.
pub async fn seed_examples(
    sqlite: &Arc<SqliteStorage>,
    user_id: &str,
    from: usize,
    count: usize,
) -> Vec<TrainingExample> {
    let curator = Curator::new(sqlite.clone(), Default::default(), 1000);
    let mut examples = Vec::with_capacity(count);
    for n in from..from + count {
        let draft = seed_draft(sqlite, user_id, n).await;
        let edit = UserEdit {
            draft_id: draft.id,
            final_subject: draft.draft_subject.clone(),
            final_body: format!("numbers for region {} attached. -A", n),
        };
        examples.push(curator.record_user_edit(user_id, &edit).await.unwrap());
    }
    examples
}
