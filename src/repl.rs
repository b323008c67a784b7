use log::error;
use std::io::{BufRead, Write};
use std::path::PathBuf;

use crate::assistant::Assistant;
use crate::context::{load_context, usable_context};
use crate::error::Result;
use crate::model::TextGenerator;
use crate::prompt::{is_blank, NO_QUESTION_MESSAGE, NO_TEXT_MESSAGE};

const RULE: &str = "-------------------------------";

enum Turn {
    Continue,
    Exit,
}

/// Line-oriented menu: 1 summarize, 2 answer from the context file, 0 exit.
pub struct Repl<'a, G: TextGenerator, R: BufRead, W: Write> {
    assistant: Assistant<'a, G>,
    context_path: PathBuf,
    strict_context: bool,
    input: R,
    output: W,
}

impl<'a, G: TextGenerator, R: BufRead, W: Write> Repl<'a, G, R, W> {
    pub fn new(
        assistant: Assistant<'a, G>,
        context_path: PathBuf,
        strict_context: bool,
        input: R,
        output: W,
    ) -> Self {
        Self {
            assistant,
            context_path,
            strict_context,
            input,
            output,
        }
    }

    /// Runs until the user picks 0 or input ends.
    pub fn run(&mut self) -> Result<()> {
        self.print_menu()?;
        loop {
            let Some(choice) = self.prompt_line("Enter your choice (1/2/0): ")? else {
                writeln!(self.output)?;
                break;
            };
            match self.dispatch(choice.trim())? {
                Turn::Continue => {}
                Turn::Exit => break,
            }
        }
        writeln!(self.output, "Thank you for using the FLAN-T5 assistant. Goodbye!")?;
        Ok(())
    }

    fn print_menu(&mut self) -> Result<()> {
        writeln!(self.output, "{RULE}")?;
        writeln!(self.output, "FLAN-T5 Summarizer and Q&A Assistant")?;
        writeln!(self.output, "{RULE}\n")?;
        writeln!(self.output, "1. Summarize the data")?;
        writeln!(self.output, "2. Questions & answers over local context.txt")?;
        writeln!(self.output, "0. Exit")?;
        writeln!(self.output, "{RULE}")?;
        Ok(())
    }

    fn dispatch(&mut self, choice: &str) -> Result<Turn> {
        match choice {
            "0" => return Ok(Turn::Exit),
            "1" => self.summarize_turn()?,
            "2" => self.question_turn()?,
            _ => writeln!(self.output, "Invalid choice. Please enter 1, 2, or 0.")?,
        }
        Ok(Turn::Continue)
    }

    fn summarize_turn(&mut self) -> Result<()> {
        writeln!(self.output, "You have selected Summarization option.")?;
        writeln!(
            self.output,
            "Please enter the text you want to summarize. End with a blank line:"
        )?;
        self.output.flush()?;

        let mut lines = Vec::new();
        while let Some(line) = self.read_line()? {
            if is_blank(&line) {
                break;
            }
            lines.push(line);
        }
        let text = lines.join("\n");
        let text = text.trim();
        if text.is_empty() {
            writeln!(self.output, "{NO_TEXT_MESSAGE}")?;
            return Ok(());
        }

        writeln!(self.output, "\nGenerating summary...\n")?;
        self.output.flush()?;
        let reply = self.assistant.summarize(text);
        self.print_reply(reply)
    }

    fn question_turn(&mut self) -> Result<()> {
        let loaded = match load_context(&self.context_path) {
            Ok(loaded) => loaded,
            Err(e) => {
                error!("Failed to read {}: {}", self.context_path.display(), e);
                writeln!(self.output, "Could not read {}: {}", self.context_path.display(), e)?;
                return Ok(());
            }
        };
        let context = match usable_context(&loaded, &self.context_path, self.strict_context) {
            Ok(context) => context,
            Err(message) => {
                writeln!(self.output, "{message}")?;
                return Ok(());
            }
        };

        let Some(question) = self.prompt_line("Enter your question: ")? else {
            writeln!(self.output)?;
            return Ok(());
        };
        let question = question.trim();
        if question.is_empty() {
            writeln!(self.output, "{NO_QUESTION_MESSAGE}")?;
            return Ok(());
        }

        writeln!(self.output, "\nGenerating answer...\n")?;
        self.output.flush()?;
        let reply = self.assistant.answer_from_context(question, context);
        self.print_reply(reply)
    }

    fn print_reply(&mut self, reply: Result<String>) -> Result<()> {
        match reply {
            Ok(text) => writeln!(self.output, "{text}")?,
            Err(e) => {
                error!("Generation failed: {}", e);
                writeln!(self.output, "Generation failed: {e}")?;
            }
        }
        Ok(())
    }

    fn prompt_line(&mut self, prompt: &str) -> Result<Option<String>> {
        write!(self.output, "{prompt}")?;
        self.output.flush()?;
        self.read_line()
    }

    /// `None` at end of input. Line terminators are stripped.
    fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let trimmed_len = line.trim_end_matches(['\n', '\r']).len();
        line.truncate(trimmed_len);
        Ok(Some(line))
    }
}
