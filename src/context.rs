use log::{debug, warn};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::error::Result;
use crate::prompt::is_blank;

pub const MISSING_CONTEXT_SENTINEL: &str =
    "No context file found. Please provide a valid context.txt file.";

/// Outcome of reading the Q&A context file. Read fresh on every question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadedContext {
    /// The file exists; its contents may still be empty.
    Found(String),
    Missing,
}

impl LoadedContext {
    /// Text handed to the QA prompt. A missing file renders as the sentinel,
    /// which is not blank and therefore still reaches the model.
    pub fn as_prompt_text(&self) -> &str {
        match self {
            LoadedContext::Found(text) => text,
            LoadedContext::Missing => MISSING_CONTEXT_SENTINEL,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, LoadedContext::Missing)
    }

    /// True only for a file that exists but holds nothing but whitespace.
    pub fn is_blank(&self) -> bool {
        match self {
            LoadedContext::Found(text) => is_blank(text),
            LoadedContext::Missing => false,
        }
    }
}

/// Reads a UTF-8 context file. Only "not found" is recovered; other I/O
/// failures are returned.
pub fn load_context(path: &Path) -> Result<LoadedContext> {
    match fs::read_to_string(path) {
        Ok(text) => {
            debug!("Loaded {} bytes of context from {}", text.len(), path.display());
            Ok(LoadedContext::Found(text))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!("Context file {} not found", path.display());
            Ok(LoadedContext::Missing)
        }
        Err(e) => Err(e.into()),
    }
}

/// Decides whether a loaded context may be sent to the model. `Err` carries
/// the message to show instead.
///
/// A missing file is passed on as the sentinel text unless `strict` is set.
pub fn usable_context<'c>(
    loaded: &'c LoadedContext,
    path: &Path,
    strict: bool,
) -> std::result::Result<&'c str, String> {
    if loaded.is_missing() {
        if strict {
            return Err(MISSING_CONTEXT_SENTINEL.to_string());
        }
        warn!(
            "Answering against the missing-file placeholder for {}",
            path.display()
        );
    } else if loaded.is_blank() {
        return Err(format!(
            "No context available in {}. Please provide a valid context file.",
            path.display()
        ));
    }
    Ok(loaded.as_prompt_text())
}
