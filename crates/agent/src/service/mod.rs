use crate::connect::MailConnector;
use crate::context::PersonalizationProvider;
use crate::curation::Curator;
use crate::engine::FineTuneScheduler;
use crate::fine_tune::FineTuningOrchestrator;
use crate::pipeline::DraftAgent;
use ai::classify::EmailClassifier;
use ai::fine_tune::FineTuningProvider;
use ai::provider::AiProvider;
use mimic_core::config::MimicConfig;
use mimic_core::error::Result;
use mimic_core::types::{
    DraftRecord, DraftRunResult, DraftSettings, DraftStatus, FineTunedModel, FineTuningJob,
    FineTuningStatus, OriginalEmail, TrainingExample, UserEdit,
};
use std::sync::Arc;
use storage::sqlite::SqliteStorage;
use uuid::Uuid;
use validator::Validate;

/// External systems the service talks to.
pub struct Collaborators {
    pub ai: Arc<dyn AiProvider>,
    pub classifier: Arc<dyn EmailClassifier>,
    pub personalization: Arc<dyn PersonalizationProvider>,
    pub connector: Arc<dyn MailConnector>,
    pub fine_tuning: Arc<dyn FineTuningProvider>,
}

/// The operations exposed to callers.
pub struct MimicService {
    sqlite: Arc<SqliteStorage>,
    agent: DraftAgent,
    curator: Curator,
    fine_tuning: Arc<FineTuningOrchestrator>,
    poll_schedule: String,
}

impl MimicService {
    pub fn new(sqlite: Arc<SqliteStorage>, collaborators: Collaborators, config: &MimicConfig) -> Result<Self> {
        let agent = DraftAgent::new(
            sqlite.clone(),
            collaborators.ai,
            collaborators.classifier,
            collaborators.personalization,
            collaborators.connector,
            config.drafts.clone(),
            config.timeouts.clone(),
            config.ai.temperature,
        )?;
        let curator = Curator::new(
            sqlite.clone(),
            config.curation.similarity.clone(),
            config.curation.prompt_body_chars,
        );
        let fine_tuning = Arc::new(FineTuningOrchestrator::new(
            sqlite.clone(),
            collaborators.fine_tuning,
            config.fine_tuning.clone(),
            config.timeouts.clone(),
        ));

        Ok(Self {
            sqlite,
            agent,
            curator,
            fine_tuning,
            poll_schedule: config.fine_tuning.poll_schedule.clone(),
        })
    }

    pub fn scheduler(&self) -> Result<FineTuneScheduler> {
        FineTuneScheduler::new(self.fine_tuning.clone(), self.sqlite.clone(), &self.poll_schedule)
    }

    pub async fn run_draft_agent(&self, user_id: &str, email: &OriginalEmail) -> Result<DraftRunResult> {
        self.agent.run(user_id, email).await
    }

    pub async fn record_user_edit(&self, user_id: &str, edit: &UserEdit) -> Result<TrainingExample> {
        self.curator.record_user_edit(user_id, edit).await
    }

    pub async fn set_example_validity(&self, user_id: &str, example_id: Uuid, valid: bool) -> Result<bool> {
        self.curator.set_example_validity(user_id, example_id, valid).await
    }

    pub async fn get_fine_tuning_status(&self, user_id: &str) -> Result<FineTuningStatus> {
        self.fine_tuning.get_status(user_id).await
    }

    pub async fn start_fine_tuning_job(&self, user_id: &str) -> Result<FineTuningJob> {
        self.fine_tuning.start_job(user_id).await
    }

    pub async fn check_fine_tuning_job_status(&self, job_id: Uuid) -> Result<FineTuningJob> {
        self.fine_tuning.check_status(job_id).await
    }

    pub async fn should_auto_trigger(&self, user_id: &str) -> Result<bool> {
        self.fine_tuning.should_auto_trigger(user_id).await
    }

    pub async fn get_draft_settings(&self, user_id: &str) -> Result<DraftSettings> {
        Ok(self.sqlite.get_draft_settings(user_id).await?.unwrap_or_default())
    }

    pub async fn save_draft_settings(&self, user_id: &str, settings: &DraftSettings) -> Result<()> {
        settings.validate()?;
        self.sqlite.save_draft_settings(user_id, settings).await
    }

    pub async fn list_drafts(&self, user_id: &str, status: Option<DraftStatus>, limit: i64) -> Result<Vec<DraftRecord>> {
        self.sqlite.list_drafts(user_id, status, limit).await
    }

    pub async fn list_jobs(&self, user_id: &str, limit: i64) -> Result<Vec<FineTuningJob>> {
        self.sqlite.list_jobs(user_id, limit).await
    }

    pub async fn list_models(&self, user_id: &str) -> Result<Vec<FineTunedModel>> {
        self.sqlite.list_models(user_id).await
    }
}
