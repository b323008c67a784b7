use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error("max_new_tokens must be greater than zero")]
    ZeroTokenBudget,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to load model from {path:?}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AssistantError>;
