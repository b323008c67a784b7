use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AssistantError, Result};

pub const DEFAULT_MODEL_NAME: &str = "google/flan-t5-small";
pub const DEFAULT_MODEL_DIR: &str = "models/flan-t5-small";
pub const DEFAULT_CONTEXT_PATH: &str = "context.txt";

// FLAN-T5 encoder window.
pub const DEFAULT_MAX_INPUT_TOKENS: usize = 512;
pub const SUMMARY_MAX_NEW_TOKENS: usize = 160;
pub const ANSWER_MAX_NEW_TOKENS: usize = 120;

pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_TOP_P: f64 = 0.9;

/// Decoding policy. With `seed` unset every call draws a fresh seed, so
/// identical prompts may produce different text.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SamplingConfig {
    pub temperature: f64,
    pub top_p: f64,
    pub seed: Option<u64>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            seed: None,
        }
    }
}

impl SamplingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.temperature.is_nan() || self.temperature <= 0.0 {
            return Err(AssistantError::Config(format!(
                "temperature must be positive, got {}",
                self.temperature
            )));
        }
        if self.top_p.is_nan() || self.top_p <= 0.0 || self.top_p > 1.0 {
            return Err(AssistantError::Config(format!(
                "top_p must be in (0, 1], got {}",
                self.top_p
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssistantConfig {
    /// Display label only; the weights always come from `model_dir`.
    pub model_name: String,
    pub model_dir: PathBuf,
    pub context_path: PathBuf,
    pub max_input_tokens: usize,
    pub summary_max_new_tokens: usize,
    pub answer_max_new_tokens: usize,
    pub strict_context: bool,
    pub sampling: SamplingConfig,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL_NAME.to_string(),
            model_dir: PathBuf::from(DEFAULT_MODEL_DIR),
            context_path: PathBuf::from(DEFAULT_CONTEXT_PATH),
            max_input_tokens: DEFAULT_MAX_INPUT_TOKENS,
            summary_max_new_tokens: SUMMARY_MAX_NEW_TOKENS,
            answer_max_new_tokens: ANSWER_MAX_NEW_TOKENS,
            strict_context: false,
            sampling: SamplingConfig::default(),
        }
    }
}

impl AssistantConfig {
    /// Reads a JSON config file. Missing keys fall back to the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AssistantError::Config(format!(
                "config file not found at {}",
                path.display()
            )));
        }
        let contents = fs::read_to_string(path)?;
        let config: AssistantConfig = serde_json::from_str(&contents).map_err(|e| {
            AssistantError::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_input_tokens == 0 {
            return Err(AssistantError::Config(
                "max_input_tokens must be greater than zero".to_string(),
            ));
        }
        if self.summary_max_new_tokens == 0 || self.answer_max_new_tokens == 0 {
            return Err(AssistantError::Config(
                "token budgets must be greater than zero".to_string(),
            ));
        }
        self.sampling.validate()
    }
}
