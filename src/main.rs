use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::io;
use std::path::PathBuf;

mod assistant;
mod config;
mod context;
mod error;
mod model;
mod prompt;
mod repl;

use assistant::Assistant;
use config::AssistantConfig;
use context::{load_context, usable_context};
use model::{label_matches_checkpoint, T5Engine};
use repl::Repl;

#[derive(Parser, Debug)]
#[command(version, about = "Summarize text or answer questions from a local context file with FLAN-T5")]
struct Args {
    /// JSON config file; individual flags override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding config.json, tokenizer.json and model.safetensors
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// Context file used for questions
    #[arg(long, global = true)]
    context: Option<PathBuf>,

    /// Fix the sampling seed for reproducible output
    #[arg(long, global = true)]
    seed: Option<u64>,

    #[arg(long, global = true)]
    temperature: Option<f64>,

    #[arg(long, global = true)]
    top_p: Option<f64>,

    /// Refuse to answer when the context file is missing
    #[arg(long, global = true)]
    strict_context: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Interactive menu (default)
    Repl,
    /// Summarize a file, or stdin when no file is given
    Summarize {
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
    /// Answer one question from the context file
    Ask { question: String },
}

impl Args {
    fn resolve_config(&self) -> Result<AssistantConfig> {
        let mut config = match &self.config {
            Some(path) => AssistantConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => AssistantConfig::default(),
        };
        if let Some(dir) = &self.model_dir {
            config.model_dir = dir.clone();
        }
        if let Some(path) = &self.context {
            config.context_path = path.clone();
        }
        if let Some(seed) = self.seed {
            config.sampling.seed = Some(seed);
        }
        if let Some(temperature) = self.temperature {
            config.sampling.temperature = temperature;
        }
        if let Some(top_p) = self.top_p {
            config.sampling.top_p = top_p;
        }
        config.strict_context |= self.strict_context;
        config.validate()?;
        Ok(config)
    }
}

fn loading_banner(model_name: &str) -> String {
    format!("FLAN-T5 Summarizer_Q&A_assistant {model_name} loading...")
}

fn main() -> Result<()> {
    env_logger::init();
    // Generation is single-threaded end to end.
    tokenizers::utils::parallelism::set_parallelism(false);

    let args = Args::parse();
    let config = args.resolve_config()?;

    println!("{}", loading_banner(&config.model_name));
    let engine = T5Engine::load(
        &config.model_dir,
        config.max_input_tokens,
        config.sampling.clone(),
    )
    .with_context(|| {
        format!(
            "Failed to load {} from {}",
            config.model_name,
            config.model_dir.display()
        )
    })?;
    if let Some(checkpoint) = engine.checkpoint_name() {
        if !label_matches_checkpoint(&config.model_name, checkpoint) {
            warn!(
                "Model label {} does not match the checkpoint in {} ({})",
                config.model_name,
                config.model_dir.display(),
                checkpoint
            );
        }
    }
    let assistant = Assistant::new(&engine)
        .with_budgets(config.summary_max_new_tokens, config.answer_max_new_tokens);

    match args.command.unwrap_or(Command::Repl) {
        Command::Repl => {
            info!("Starting interactive session");
            let stdin = io::stdin();
            let mut repl = Repl::new(
                assistant,
                config.context_path.clone(),
                config.strict_context,
                stdin.lock(),
                io::stdout(),
            );
            repl.run()?;
        }
        Command::Summarize { input } => {
            let text = match input {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                None => io::read_to_string(io::stdin()).context("Failed to read stdin")?,
            };
            println!("{}", assistant.summarize(&text)?);
        }
        Command::Ask { question } => {
            let loaded = load_context(&config.context_path).with_context(|| {
                format!("Failed to read {}", config.context_path.display())
            })?;
            match usable_context(&loaded, &config.context_path, config.strict_context) {
                Ok(context) => println!("{}", assistant.answer_from_context(&question, context)?),
                Err(message) => println!("{message}"),
            }
        }
    }

    Ok(())
}
