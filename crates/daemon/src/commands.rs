use agent::connect::StoredTokenConnector;
use agent::context::StoredPersonalization;
use agent::service::{Collaborators, MimicService};
use ai::classify::LlmClassifier;
use ai::fine_tune::OpenAIFineTuningProvider;
use mimic_core::config::MimicConfig;
use mimic_core::error::{MimicError, Result};
use mimic_core::types::{DraftSettings, DraftStatus, OriginalEmail, UserEdit};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use storage::sqlite::SqliteStorage;
use tracing::info;
use uuid::Uuid;

const DEFAULT_LIST_LIMIT: i64 = 50;

#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    RunDraftAgent {
        user_id: String,
        email: OriginalEmail,
    },
    RecordUserEdit {
        user_id: String,
        #[serde(flatten)]
        edit: UserEdit,
    },
    SetExampleValidity {
        user_id: String,
        example_id: Uuid,
        valid: bool,
    },
    GetFineTuningStatus {
        user_id: String,
    },
    StartFineTuningJob {
        user_id: String,
    },
    CheckFineTuningJobStatus {
        job_id: Uuid,
    },
    GetDraftSettings {
        user_id: String,
    },
    SaveDraftSettings {
        user_id: String,
        settings: DraftSettings,
    },
    ListDrafts {
        user_id: String,
        status: Option<DraftStatus>,
        limit: Option<i64>,
    },
    ListJobs {
        user_id: String,
        limit: Option<i64>,
    },
    ListModels {
        user_id: String,
    },
}

/// One input line: a command plus an optional caller-chosen id echoed back.
#[derive(Debug, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(flatten)]
    pub command: Command,
}

/// Wires the production collaborators around one storage handle.
pub fn build_service(config: &MimicConfig, sqlite: Arc<SqliteStorage>) -> Result<MimicService> {
    let ai = ai::provider::from_config(&config.ai)?;
    let collaborators = Collaborators {
        classifier: Arc::new(LlmClassifier::new(ai.clone(), config.drafts.original_body_chars)?),
        ai,
        personalization: Arc::new(StoredPersonalization::new(sqlite.clone(), config.drafts.memory_limit)),
        connector: Arc::new(StoredTokenConnector::new(sqlite.clone())),
        fine_tuning: Arc::new(OpenAIFineTuningProvider::new(
            config.fine_tuning.base_url.clone(),
            config.fine_tuning.api_key.clone(),
        )),
    };
    MimicService::new(sqlite, collaborators, config)
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| MimicError::Internal(e.to_string()))
}

pub async fn dispatch(service: &MimicService, command: Command) -> Result<Value> {
    match command {
        Command::RunDraftAgent { user_id, email } => {
            to_value(service.run_draft_agent(&user_id, &email).await?)
        }
        Command::RecordUserEdit { user_id, edit } => {
            to_value(service.record_user_edit(&user_id, &edit).await?)
        }
        Command::SetExampleValidity {
            user_id,
            example_id,
            valid,
        } => {
            if !service.set_example_validity(&user_id, example_id, valid).await? {
                return Err(MimicError::NotFound(format!("training example {}", example_id)));
            }
            Ok(json!({ "example_id": example_id, "valid": valid }))
        }
        Command::GetFineTuningStatus { user_id } => {
            to_value(service.get_fine_tuning_status(&user_id).await?)
        }
        Command::StartFineTuningJob { user_id } => {
            let job = service.start_fine_tuning_job(&user_id).await?;
            Ok(json!({ "job_id": job.id, "status": job.status }))
        }
        Command::CheckFineTuningJobStatus { job_id } => {
            to_value(service.check_fine_tuning_job_status(job_id).await?)
        }
        Command::GetDraftSettings { user_id } => to_value(service.get_draft_settings(&user_id).await?),
        Command::SaveDraftSettings { user_id, settings } => {
            service.save_draft_settings(&user_id, &settings).await?;
            info!(user_id = %user_id, "saved draft settings");
            to_value(settings)
        }
        Command::ListDrafts {
            user_id,
            status,
            limit,
        } => to_value(
            service
                .list_drafts(&user_id, status, limit.unwrap_or(DEFAULT_LIST_LIMIT))
                .await?,
        ),
        Command::ListJobs { user_id, limit } => to_value(
            service
                .list_jobs(&user_id, limit.unwrap_or(DEFAULT_LIST_LIMIT))
                .await?,
        ),
        Command::ListModels { user_id } => to_value(service.list_models(&user_id).await?),
    }
}

pub fn ok_response(id: Option<Value>, data: Value) -> Value {
    let mut response = json!({ "ok": true, "data": data });
    if let Some(id) = id {
        response["id"] = id;
    }
    response
}

pub fn error_response(id: Option<Value>, error: &MimicError) -> Value {
    let mut response = json!({
        "ok": false,
        "error": { "kind": error.kind(), "message": error.to_string() }
    });
    if let Some(id) = id {
        response["id"] = id;
    }
    response
}

/// Handles one raw input line end to end.
pub async fn handle_line(service: &MimicService, line: &str) -> Value {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            let error = MimicError::Validation(format!("malformed command: {}", e));
            return error_response(None, &error);
        }
    };

    match dispatch(service, request.command).await {
        Ok(data) => ok_response(request.id, data),
        Err(e) => error_response(request.id, &e),
    }
}
