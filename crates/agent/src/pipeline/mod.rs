pub mod draft;

use crate::bounded;
use crate::connect::MailConnector;
use crate::context::PersonalizationProvider;
use ai::classify::EmailClassifier;
use ai::provider::{AiProvider, ChatRequest};
use ai::schema::{parse_draft, SchemaValidator};
use chrono::Utc;
use mailbox::{DraftRequest, MailProvider};
use mimic_core::config::{DraftConfig, TimeoutConfig};
use mimic_core::error::{MimicError, Result};
use mimic_core::types::{
    DraftRecord, DraftRunResult, DraftSettings, DraftStatus, EmailClassification, GeneratedDraft,
    MailProviderKind, OriginalEmail, PersonalizationContext, RunStatus,
};
use std::sync::Arc;
use storage::sqlite::SqliteStorage;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Everything loaded during initialization; read-only for the rest of the run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub personalization: PersonalizationContext,
    pub settings: DraftSettings,
}

/// Non-terminal states of one draft run. Terminal outcomes are `DraftRunResult`s.
#[derive(Debug)]
pub enum DraftState {
    Initializing,
    Classifying(RunContext),
    Generating(RunContext, EmailClassification),
    CreatingDraft(RunContext, EmailClassification, GeneratedDraft),
}

impl DraftState {
    pub fn name(&self) -> &'static str {
        match self {
            DraftState::Initializing => "initializing",
            DraftState::Classifying(..) => "classifying",
            DraftState::Generating(..) => "generating",
            DraftState::CreatingDraft(..) => "creating_draft",
        }
    }
}

enum Transition {
    Next(DraftState),
    Done(Result<DraftRunResult>),
}

/// Mutable bookkeeping for one run: the email and its reasoning trail.
struct Run<'a> {
    user_id: &'a str,
    email: &'a OriginalEmail,
    reasoning: Vec<String>,
}

impl Run<'_> {
    fn note(&mut self, line: impl Into<String>) {
        self.reasoning.push(line.into());
    }

    fn finish(
        &mut self,
        status: RunStatus,
        classification: Option<EmailClassification>,
        draft: Option<GeneratedDraft>,
    ) -> DraftRunResult {
        DraftRunResult {
            status,
            draft_id: None,
            provider_draft_id: None,
            classification,
            draft,
            error: None,
            raw_output: None,
            reasoning: std::mem::take(&mut self.reasoning),
        }
    }

    fn fail(&mut self, error: &MimicError, classification: Option<EmailClassification>) -> DraftRunResult {
        self.note(format!("Failed: {}", error));
        let mut result = self.finish(RunStatus::Failed, classification, None);
        result.error = Some(error.to_string());
        result
    }
}

pub struct DraftAgent {
    sqlite: Arc<SqliteStorage>,
    ai: Arc<dyn AiProvider>,
    classifier: Arc<dyn EmailClassifier>,
    personalization: Arc<dyn PersonalizationProvider>,
    connector: Arc<dyn MailConnector>,
    validator: SchemaValidator,
    drafts: DraftConfig,
    timeouts: TimeoutConfig,
    temperature: f32,
}

impl DraftAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sqlite: Arc<SqliteStorage>,
        ai: Arc<dyn AiProvider>,
        classifier: Arc<dyn EmailClassifier>,
        personalization: Arc<dyn PersonalizationProvider>,
        connector: Arc<dyn MailConnector>,
        drafts: DraftConfig,
        timeouts: TimeoutConfig,
        temperature: f32,
    ) -> Result<Self> {
        Ok(Self {
            sqlite,
            ai,
            classifier,
            personalization,
            connector,
            validator: SchemaValidator::draft()?,
            drafts,
            timeouts,
            temperature,
        })
    }

    /// Drives one email through the state machine.
    ///
    /// Upstream failures end the run as `RunStatus::Failed` with the trail intact.
    /// Bad input and an already finalized draft for this email are returned as errors.
    pub async fn run(&self, user_id: &str, email: &OriginalEmail) -> Result<DraftRunResult> {
        if user_id.trim().is_empty() || email.message_id.trim().is_empty() {
            return Err(MimicError::Validation(
                "user id and message id are required".into(),
            ));
        }
        if let Some(existing) = self.sqlite.get_draft_by_message(user_id, &email.message_id).await? {
            if existing.status.is_finalized() {
                return Err(MimicError::Conflict(format!(
                    "draft {} for message {} was already {}",
                    existing.id, email.message_id, existing.status
                )));
            }
        }

        info!(user_id, message_id = %email.message_id, "starting draft run");
        let mut run = Run {
            user_id,
            email,
            reasoning: Vec::new(),
        };
        let mut state = DraftState::Initializing;
        loop {
            let from = state.name();
            match self.step(&mut run, state).await {
                Transition::Next(next) => {
                    tracing::debug!(message_id = %email.message_id, from, to = next.name(), "draft run transition");
                    state = next;
                }
                Transition::Done(outcome) => {
                    if let Ok(result) = &outcome {
                        info!(user_id, message_id = %email.message_id, status = %result.status, "draft run finished");
                    }
                    return outcome;
                }
            }
        }
    }

    async fn step(&self, run: &mut Run<'_>, state: DraftState) -> Transition {
        match state {
            DraftState::Initializing => Transition::Next(DraftState::Classifying(self.initialize(run).await)),
            DraftState::Classifying(ctx) => self.classify(run, ctx).await,
            DraftState::Generating(ctx, classification) => self.generate(run, ctx, classification).await,
            DraftState::CreatingDraft(ctx, classification, draft) => {
                Transition::Done(self.create_draft(run, ctx, classification, draft).await)
            }
        }
    }

    /// Never fails: missing context or settings fall back to defaults.
    async fn initialize(&self, run: &mut Run<'_>) -> RunContext {
        let (personalization, settings) = tokio::join!(
            self.personalization.load(run.user_id),
            self.sqlite.get_draft_settings(run.user_id)
        );

        let personalization = match personalization {
            Ok(ctx) => {
                run.note(match &ctx.style {
                    Some(style) => format!(
                        "Loaded writing style from {} samples and {} remembered facts",
                        style.sample_count,
                        ctx.memories.len()
                    ),
                    None => format!(
                        "No writing style profile yet; loaded {} remembered facts",
                        ctx.memories.len()
                    ),
                });
                if let Some(model) = &ctx.fine_tuned_model {
                    run.note(format!("Using personalized model {}", model));
                }
                ctx
            }
            Err(e) => {
                warn!(user_id = run.user_id, error = %e, "personalization unavailable, using defaults");
                run.note(format!("Personalization unavailable ({}); using generic style", e));
                PersonalizationContext::default()
            }
        };

        let settings = match settings {
            Ok(Some(settings)) => settings,
            Ok(None) => {
                run.note("No draft settings saved; using defaults (local draft, approval required)");
                DraftSettings::default()
            }
            Err(e) => {
                warn!(user_id = run.user_id, error = %e, "draft settings unavailable, using defaults");
                run.note(format!("Draft settings unavailable ({}); using defaults", e));
                DraftSettings::default()
            }
        };

        RunContext {
            personalization,
            settings,
        }
    }

    async fn classify(&self, run: &mut Run<'_>, ctx: RunContext) -> Transition {
        let classified = bounded(
            "classification",
            self.timeouts.classify(),
            self.classifier.classify(run.email),
        )
        .await;

        match classified {
            Err(e) => {
                warn!(message_id = %run.email.message_id, error = %e, "classification failed");
                Transition::Done(Ok(run.fail(&e, None)))
            }
            Ok(classification) if !classification.needs_response => {
                run.note(format!("No response needed: {}", classification.reasoning));
                Transition::Done(Ok(run.finish(RunStatus::Skipped, Some(classification), None)))
            }
            Ok(classification) => {
                run.note(format!(
                    "Needs a {} response ({} urgency, confidence {:.2}): {}",
                    classification.response_type,
                    classification.urgency,
                    classification.confidence,
                    classification.reasoning
                ));
                Transition::Next(DraftState::Generating(ctx, classification))
            }
        }
    }

    async fn generate(&self, run: &mut Run<'_>, ctx: RunContext, classification: EmailClassification) -> Transition {
        let prompt = draft::generation_prompt(
            run.email,
            &classification,
            &ctx.personalization,
            &ctx.settings,
            self.drafts.original_body_chars,
        );
        let request = ChatRequest::new(draft::GENERATOR_SYSTEM, prompt, self.temperature)
            .json()
            .with_model(ctx.personalization.fine_tuned_model.clone());

        let response = match bounded("draft generation", self.timeouts.generate(), self.ai.chat_completion(request)).await {
            Ok(response) => response,
            Err(e) => {
                warn!(message_id = %run.email.message_id, error = %e, "draft generation failed");
                return Transition::Done(Ok(run.fail(&e, Some(classification))));
            }
        };

        let mut generated = match parse_draft(&self.validator, &response.content) {
            Ok(generated) => generated,
            Err(e) => {
                warn!(message_id = %run.email.message_id, error = %e, "generator returned malformed draft");
                let mut result = run.fail(&e, Some(classification));
                result.raw_output = Some(response.content);
                return Transition::Done(Ok(result));
            }
        };

        generated.body = draft::with_signature(&generated.body, &ctx.settings);
        generated.body_html = Some(draft::render_html(&generated.body));

        let words = draft::word_count(&generated.body);
        if words as u32 > ctx.settings.max_response_words {
            run.note(format!(
                "Generated draft \"{}\" is {} words, over the {} word limit",
                generated.subject, words, ctx.settings.max_response_words
            ));
        } else {
            run.note(format!("Generated draft \"{}\" ({} words)", generated.subject, words));
        }

        Transition::Next(DraftState::CreatingDraft(ctx, classification, generated))
    }

    async fn create_draft(
        &self,
        run: &mut Run<'_>,
        ctx: RunContext,
        classification: EmailClassification,
        generated: GeneratedDraft,
    ) -> Result<DraftRunResult> {
        let mut remote: Option<(Arc<dyn MailProvider>, String)> = None;
        let mut remote_error: Option<MimicError> = None;
        let previous = self
            .sqlite
            .get_draft_by_message(run.user_id, &run.email.message_id)
            .await?
            .filter(|existing| !existing.status.is_finalized());

        if ctx.settings.allows_remote_creation() {
            match self.connector.connect(run.user_id).await {
                Ok(Some(provider)) => {
                    let request = draft_request(run.email, &generated);
                    match bounded("mail draft creation", self.timeouts.mail(), provider.create_draft(&request)).await {
                        Ok(draft_id) => {
                            run.note(format!("Created draft {} in {}", draft_id, provider.kind()));
                            remote = Some((provider, draft_id));
                        }
                        Err(e) => {
                            warn!(user_id = run.user_id, error = %e, "mail provider draft creation failed");
                            run.note(format!("Mail provider draft creation failed: {}", e));
                            remote_error = Some(e);
                        }
                    }
                }
                Ok(None) => run.note("No usable mail connection; stored the draft locally only"),
                Err(e) => {
                    warn!(user_id = run.user_id, error = %e, "could not resolve mail connection");
                    run.note(format!("Mail connection lookup failed ({}); stored the draft locally only", e));
                }
            }
        } else if ctx.settings.require_approval {
            run.note("Approval required; stored the draft locally for review");
        } else {
            run.note("Automatic provider drafts are disabled; stored the draft locally");
        }

        let status = match (&remote, &remote_error) {
            (Some(_), _) => DraftStatus::Created,
            (None, Some(_)) => DraftStatus::Failed,
            (None, None) => DraftStatus::Pending,
        };
        let superseded = previous.and_then(|existing| match (existing.provider, existing.provider_draft_id) {
            (Some(kind), Some(id)) => Some((kind, id)),
            _ => None,
        });
        if let Some((kind, id)) = &superseded {
            run.note(format!("Replacing draft {} left in {} by an earlier run", id, kind));
        }
        match &remote_error {
            Some(e) => run.note(format!("Failed: {}", e)),
            None => run.note(format!("Saving draft as {}", status)),
        }
        let record = self.record(
            run,
            &classification,
            &generated,
            status,
            remote.as_ref().map(|(p, id)| (p.kind(), id.clone())),
        );

        let draft_id = match self.sqlite.upsert_draft(&record).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                self.compensate(remote.as_ref()).await;
                return Err(MimicError::Conflict(format!(
                    "draft for message {} was finalized during the run",
                    run.email.message_id
                )));
            }
            Err(e) => {
                error!(user_id = run.user_id, message_id = %run.email.message_id, error = %e, "failed to persist draft");
                self.compensate(remote.as_ref()).await;
                return Ok(run.fail(&e, Some(classification)));
            }
        };

        if let Some((kind, id)) = superseded {
            self.remove_superseded(run.user_id, remote.as_ref(), kind, &id).await;
        }

        let provider_draft_id = remote.map(|(_, id)| id);
        let mut result = match remote_error {
            Some(e) => {
                let mut result = run.finish(RunStatus::Failed, Some(classification), Some(generated));
                result.error = Some(e.to_string());
                result
            }
            None => run.finish(RunStatus::Completed, Some(classification), Some(generated)),
        };
        info!(user_id = run.user_id, draft_id = %draft_id, status = %status, "saved draft");
        result.draft_id = Some(draft_id);
        result.provider_draft_id = provider_draft_id;
        Ok(result)
    }

    /// Removes a remote draft whose local record could not be written.
    async fn compensate(&self, remote: Option<&(Arc<dyn MailProvider>, String)>) {
        let Some((provider, draft_id)) = remote else {
            return;
        };
        if let Err(e) = bounded("mail draft deletion", self.timeouts.mail(), provider.delete_draft(draft_id)).await {
            error!(draft_id = %draft_id, error = %e, "could not remove provider draft after local write failed");
        }
    }

    /// Deletes the provider draft an earlier run created once the local record
    /// no longer points at it.
    async fn remove_superseded(
        &self,
        user_id: &str,
        remote: Option<&(Arc<dyn MailProvider>, String)>,
        kind: MailProviderKind,
        draft_id: &str,
    ) {
        if remote.is_some_and(|(_, id)| id == draft_id) {
            return;
        }
        let provider = match remote {
            Some((provider, _)) if provider.kind() == kind => Some(provider.clone()),
            _ => match self.connector.connect(user_id).await {
                Ok(provider) => provider.filter(|p| p.kind() == kind),
                Err(e) => {
                    warn!(user_id, draft_id, error = %e, "could not resolve mail connection for superseded draft");
                    None
                }
            },
        };
        let Some(provider) = provider else {
            warn!(user_id, draft_id, provider = %kind, "superseded provider draft left in place");
            return;
        };
        if let Err(e) = bounded("mail draft deletion", self.timeouts.mail(), provider.delete_draft(draft_id)).await {
            warn!(user_id, draft_id, error = %e, "could not remove superseded provider draft");
        }
    }

    fn record(
        &self,
        run: &Run<'_>,
        classification: &EmailClassification,
        generated: &GeneratedDraft,
        status: DraftStatus,
        remote: Option<(MailProviderKind, String)>,
    ) -> DraftRecord {
        let email = run.email;
        let now = Utc::now();
        let (provider, provider_draft_id) = match remote {
            Some((kind, id)) => (Some(kind), Some(id)),
            None => (None, None),
        };
        DraftRecord {
            id: Uuid::new_v4(),
            user_id: run.user_id.to_string(),
            message_id: email.message_id.clone(),
            thread_id: email.thread_id.clone(),
            original_from: email.from_address.clone(),
            original_from_name: email.from_name.clone(),
            original_subject: email.subject.clone(),
            original_snippet: email.snippet.clone(),
            original_body: email.body_text.chars().take(self.drafts.original_body_chars).collect(),
            original_received_at: email.received_at,
            draft_subject: generated.subject.clone(),
            draft_body: generated.body.clone(),
            draft_html: generated.body_html.clone(),
            draft_reasoning: generated.reasoning.clone(),
            provider,
            provider_draft_id,
            needs_response: classification.needs_response,
            response_type: classification.response_type,
            urgency: classification.urgency,
            classification_confidence: classification.confidence,
            status,
            agent_reasoning: run.reasoning.clone(),
            user_final_subject: None,
            user_final_body: None,
            created_at: now,
            updated_at: now,
            expires_at: DraftRecord::expiry_from(now, self.drafts.expiry_days),
        }
    }
}

fn draft_request(email: &OriginalEmail, generated: &GeneratedDraft) -> DraftRequest {
    DraftRequest {
        reply_to_message_id: email.message_id.clone(),
        thread_id: email.thread_id.clone(),
        in_reply_to: email.internet_message_id.clone(),
        to: vec![email.from_address.clone()],
        cc: Vec::new(),
        subject: generated.subject.clone(),
        body_text: generated.body.clone(),
        body_html: generated.body_html.clone(),
    }
}
