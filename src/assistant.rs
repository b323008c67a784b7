use log::{debug, info};

use crate::config::{ANSWER_MAX_NEW_TOKENS, SUMMARY_MAX_NEW_TOKENS};
use crate::error::Result;
use crate::model::TextGenerator;
use crate::prompt::{
    build_qa_prompt, build_summary_prompt, clean, is_blank, NO_CONTEXT_MESSAGE,
    NO_QUESTION_MESSAGE, NO_TEXT_MESSAGE,
};

/// Single-turn summarize / answer pipeline over a borrowed generator.
pub struct Assistant<'a, G: TextGenerator> {
    engine: &'a G,
    summary_max_new_tokens: usize,
    answer_max_new_tokens: usize,
}

impl<'a, G: TextGenerator> Assistant<'a, G> {
    pub fn new(engine: &'a G) -> Self {
        Self {
            engine,
            summary_max_new_tokens: SUMMARY_MAX_NEW_TOKENS,
            answer_max_new_tokens: ANSWER_MAX_NEW_TOKENS,
        }
    }

    pub fn with_budgets(mut self, summary_max_new_tokens: usize, answer_max_new_tokens: usize) -> Self {
        self.summary_max_new_tokens = summary_max_new_tokens;
        self.answer_max_new_tokens = answer_max_new_tokens;
        self
    }

    pub fn summarize(&self, text: &str) -> Result<String> {
        if is_blank(text) {
            return Ok(NO_TEXT_MESSAGE.to_string());
        }
        info!("Summarizing {} bytes of text", text.len());
        let prompt = build_summary_prompt(text);
        self.run(&prompt, self.summary_max_new_tokens)
    }

    /// Answers from `context` only. A blank context or question returns a
    /// fixed message without touching the engine.
    pub fn answer_from_context(&self, question: &str, context: &str) -> Result<String> {
        if is_blank(context) {
            return Ok(NO_CONTEXT_MESSAGE.to_string());
        }
        if is_blank(question) {
            return Ok(NO_QUESTION_MESSAGE.to_string());
        }
        info!(
            "Answering question against {} bytes of context",
            context.len()
        );
        let prompt = build_qa_prompt(question, context);
        self.run(&prompt, self.answer_max_new_tokens)
    }

    fn run(&self, prompt: &str, max_new_tokens: usize) -> Result<String> {
        debug!("Prompt ({} bytes, max_new_tokens={})", prompt.len(), max_new_tokens);
        let raw = self.engine.complete(prompt, max_new_tokens)?;
        Ok(clean(&raw))
    }
}
