use crate::error::{MimicError, Result};
use crate::similarity::SimilarityPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MimicConfig {
    pub database_path: String,
    pub log_level: String,
    pub ai: AiConfig,
    pub fine_tuning: FineTuningConfig,
    pub curation: CurationConfig,
    pub drafts: DraftConfig,
    pub timeouts: TimeoutConfig,
}

impl Default for MimicConfig {
    fn default() -> Self {
        Self {
            database_path: "mimic.db".into(),
            log_level: "info".into(),
            ai: AiConfig::default(),
            fine_tuning: FineTuningConfig::default(),
            curation: CurationConfig::default(),
            drafts: DraftConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// `ollama` or `openai` (any OpenAI-compatible endpoint).
    pub provider: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub temperature: f32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".into(),
            base_url: "http://localhost:11434".into(),
            api_key: None,
            model: None,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FineTuningConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub base_model: String,
    pub suffix_prefix: String,
    /// Hard minimum enforced by the fine-tuning provider.
    pub min_examples: u64,
    /// Auto-trigger threshold once a user already has a model.
    pub recommended_examples: u64,
    pub poll_schedule: String,
}

impl Default for FineTuningConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            api_key: None,
            base_model: "gpt-4o-mini-2024-07-18".into(),
            suffix_prefix: "mimic".into(),
            min_examples: 10,
            recommended_examples: 50,
            poll_schedule: "0 */5 * * * *".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CurationConfig {
    #[serde(flatten)]
    pub similarity: SimilarityPolicy,
    /// Characters of the original body embedded in the training prompt.
    pub prompt_body_chars: usize,
}

impl Default for CurationConfig {
    fn default() -> Self {
        Self {
            similarity: SimilarityPolicy::default(),
            prompt_body_chars: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DraftConfig {
    pub expiry_days: i64,
    pub original_body_chars: usize,
    pub memory_limit: u32,
}

impl Default for DraftConfig {
    fn default() -> Self {
        Self {
            expiry_days: 7,
            original_body_chars: 4000,
            memory_limit: 20,
        }
    }
}

/// Per-call deadlines, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub classify: u64,
    pub generate: u64,
    pub mail: u64,
    pub upload: u64,
    pub submit: u64,
    pub poll: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            classify: 30,
            generate: 60,
            mail: 30,
            upload: 300,
            submit: 60,
            poll: 30,
        }
    }
}

impl TimeoutConfig {
    pub fn classify(&self) -> Duration {
        Duration::from_secs(self.classify)
    }
    pub fn generate(&self) -> Duration {
        Duration::from_secs(self.generate)
    }
    pub fn mail(&self) -> Duration {
        Duration::from_secs(self.mail)
    }
    pub fn upload(&self) -> Duration {
        Duration::from_secs(self.upload)
    }
    pub fn submit(&self) -> Duration {
        Duration::from_secs(self.submit)
    }
    pub fn poll(&self) -> Duration {
        Duration::from_secs(self.poll)
    }
}

impl MimicConfig {
    /// Reads a TOML file (defaults when absent), then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let content = std::fs::read_to_string(p)
                    .map_err(|e| MimicError::Config(format!("{}: {}", p.display(), e)))?;
                Self::from_toml(&content)?
            }
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| MimicError::Config(e.to_string()))
    }

    pub fn apply_env<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        if let Some(key) = lookup("MIMIC_AI_API_KEY") {
            self.ai.api_key = Some(key);
        }
        if let Some(key) = lookup("MIMIC_FINE_TUNING_API_KEY") {
            self.fine_tuning.api_key = Some(key);
        }
        if let Some(path) = lookup("MIMIC_DATABASE_PATH") {
            self.database_path = path;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.curation.similarity;
        let ordered = s.sent_as_is <= 1.0
            && s.sent_as_is >= s.minor_edits
            && s.minor_edits >= s.moderate_edits
            && s.moderate_edits >= 0.0;
        if !ordered {
            return Err(MimicError::Config(format!(
                "similarity thresholds must satisfy 1 >= sent_as_is ({}) >= minor_edits ({}) >= moderate_edits ({}) >= 0",
                s.sent_as_is, s.minor_edits, s.moderate_edits
            )));
        }
        if s.max_compare_chars == 0 {
            return Err(MimicError::Config("max_compare_chars must be positive".into()));
        }

        let ft = &self.fine_tuning;
        if ft.min_examples == 0 {
            return Err(MimicError::Config("min_examples must be positive".into()));
        }
        if ft.recommended_examples < ft.min_examples {
            return Err(MimicError::Config(format!(
                "recommended_examples ({}) is below min_examples ({})",
                ft.recommended_examples, ft.min_examples
            )));
        }
        cron::Schedule::from_str(&ft.poll_schedule).map_err(|e| {
            MimicError::Config(format!("invalid poll_schedule '{}': {}", ft.poll_schedule, e))
        })?;

        if self.drafts.expiry_days <= 0 {
            return Err(MimicError::Config("expiry_days must be positive".into()));
        }
        Ok(())
    }
}
