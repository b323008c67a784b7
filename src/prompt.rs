//! Prompt templates and output post-processing.

pub const SUMMARY_PREFIX: &str = "summarize: ";

/// The model is asked to emit this exact string when the context does not
/// contain the answer. Nothing checks that it does.
pub const NOT_FOUND_SENTINEL: &str = "Not found.";

pub const NO_CONTEXT_MESSAGE: &str = "No context available to answer the question.";
pub const NO_TEXT_MESSAGE: &str = "No text provided for summarization. Please try again.";
pub const NO_QUESTION_MESSAGE: &str = "No question provided. Please try again.";

const QA_INSTRUCTION: &str = "You are a helpful assistant. Answer the question ONLY using the context.\n\
If the answer is not in the context, reply exactly : ";

pub fn build_summary_prompt(text: &str) -> String {
    format!("{SUMMARY_PREFIX}{text}")
}

/// Callers must short-circuit on a blank context before building this prompt.
pub fn build_qa_prompt(question: &str, context: &str) -> String {
    format!(
        "{QA_INSTRUCTION}{NOT_FOUND_SENTINEL}\n\nContext:\n{context}\n\nQuestion: {question}\nAnswer:"
    )
}

pub fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

/// Strips surrounding whitespace from raw model output.
pub fn clean(raw_text: &str) -> String {
    raw_text.trim().to_string()
}
