use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::t5;
use log::{debug, info, warn};
use std::fs;
use std::path::Path;
use tokenizers::{Tokenizer, TruncationParams};

use crate::config::SamplingConfig;
use crate::error::{AssistantError, Result};

/// One inference call. The prompt is never empty and the budget is never zero.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    prompt: String,
    max_new_tokens: usize,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, max_new_tokens: usize) -> Result<Self> {
        let prompt = prompt.into();
        if prompt.is_empty() {
            return Err(AssistantError::EmptyPrompt);
        }
        if max_new_tokens == 0 {
            return Err(AssistantError::ZeroTokenBudget);
        }
        Ok(Self { prompt, max_new_tokens })
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn max_new_tokens(&self) -> usize {
        self.max_new_tokens
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub raw_text: String,
}

/// Anything that can continue a prompt. `max_new_tokens` is an upper bound;
/// shorter output is not an error.
pub trait TextGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult>;

    fn complete(&self, prompt: &str, max_new_tokens: usize) -> Result<String> {
        let request = GenerationRequest::new(prompt, max_new_tokens)?;
        Ok(self.generate(&request)?.raw_text)
    }
}

/// Encoder-decoder forward passes needed by the sampling loop.
pub trait Seq2SeqModel {
    fn encode(&mut self, input_ids: &Tensor) -> candle_core::Result<Tensor>;

    /// Returns next-token logits shaped `[1, vocab]`.
    fn decode(&mut self, decoder_ids: &Tensor, encoder_output: &Tensor) -> candle_core::Result<Tensor>;
}

impl Seq2SeqModel for t5::T5ForConditionalGeneration {
    fn encode(&mut self, input_ids: &Tensor) -> candle_core::Result<Tensor> {
        t5::T5ForConditionalGeneration::encode(self, input_ids)
    }

    fn decode(&mut self, decoder_ids: &Tensor, encoder_output: &Tensor) -> candle_core::Result<Tensor> {
        t5::T5ForConditionalGeneration::decode(self, decoder_ids, encoder_output)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeTokens {
    pub start: u32,
    pub eos: u32,
    pub use_cache: bool,
}

/// Samples up to `max_new_tokens` decoder tokens. The start token and the
/// terminating EOS are not part of the returned ids.
pub fn sample_continuation<M: Seq2SeqModel>(
    model: &mut M,
    input_ids: &[u32],
    tokens: DecodeTokens,
    max_new_tokens: usize,
    sampler: &mut LogitsProcessor,
    device: &Device,
) -> Result<Vec<u32>> {
    if input_ids.is_empty() {
        return Err(AssistantError::EmptyPrompt);
    }
    let input = Tensor::new(input_ids, device)?.unsqueeze(0)?;
    let encoder_output = model.encode(&input)?;

    let mut output_ids = vec![tokens.start];
    for step in 0..max_new_tokens {
        // With the KV cache warm only the newest token has to be fed.
        let decoder_input = if step == 0 || !tokens.use_cache {
            Tensor::new(output_ids.as_slice(), device)?.unsqueeze(0)?
        } else {
            let last = output_ids[output_ids.len() - 1];
            Tensor::new(&[last], device)?.unsqueeze(0)?
        };
        let logits = model.decode(&decoder_input, &encoder_output)?.squeeze(0)?;
        let next = sampler.sample(&logits)?;
        if next == tokens.eos {
            break;
        }
        output_ids.push(next);
    }

    Ok(output_ids.split_off(1))
}

/// FLAN-T5 loaded once at startup and shared read-only afterwards.
pub struct T5Engine {
    model: t5::T5ForConditionalGeneration,
    tokenizer: Tokenizer,
    tokens: DecodeTokens,
    sampling: SamplingConfig,
    device: Device,
    checkpoint_name: Option<String>,
}

impl T5Engine {
    /// Loads `config.json`, `tokenizer.json` and `model.safetensors` from
    /// `model_dir`. Prompts longer than `max_input_tokens` are truncated.
    pub fn load(model_dir: &Path, max_input_tokens: usize, sampling: SamplingConfig) -> Result<Self> {
        sampling.validate()?;
        let load_err = |reason: String| AssistantError::ModelLoad {
            path: model_dir.to_path_buf(),
            reason,
        };

        let config_path = model_dir.join("config.json");
        let tokenizer_path = model_dir.join("tokenizer.json");
        let weights_path = model_dir.join("model.safetensors");
        for path in [&config_path, &tokenizer_path, &weights_path] {
            if !path.exists() {
                return Err(load_err(format!("missing {}", path.display())));
            }
        }

        let config_json = fs::read_to_string(&config_path)?;
        let config: t5::Config = serde_json::from_str(&config_json)
            .map_err(|e| load_err(format!("bad config.json: {}", e)))?;
        let checkpoint_name = checkpoint_name(&config_json);

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| load_err(format!("bad tokenizer.json: {}", e)))?;
        let tokenizer = prepare_tokenizer(tokenizer, max_input_tokens)?;

        let device = Device::Cpu;
        let weights = fs::read(&weights_path)?;
        let vb = VarBuilder::from_buffered_safetensors(weights, DType::F32, &device)?;
        let model = t5::T5ForConditionalGeneration::load(vb, &config)
            .map_err(|e| load_err(format!("failed to build T5 weights: {}", e)))?;

        let tokens = DecodeTokens {
            start: config.decoder_start_token_id.unwrap_or(config.pad_token_id) as u32,
            eos: config.eos_token_id as u32,
            use_cache: config.use_cache,
        };
        info!(
            "Loaded T5 model from {} (vocab {}, input window {} tokens)",
            model_dir.display(),
            config.vocab_size,
            max_input_tokens
        );

        Ok(Self {
            model,
            tokenizer,
            tokens,
            sampling,
            device,
            checkpoint_name,
        })
    }

    /// `_name_or_path` from the loaded `config.json`, when present.
    pub fn checkpoint_name(&self) -> Option<&str> {
        self.checkpoint_name.as_deref()
    }
}

impl TextGenerator for T5Engine {
    fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let input_ids = encode_prompt(&self.tokenizer, request.prompt())?;
        let seed = resolve_seed(&self.sampling);
        debug!(
            "Sampling {} prompt tokens, max_new_tokens={}, top_p={}, temperature={}, seed={}",
            input_ids.len(),
            request.max_new_tokens(),
            self.sampling.top_p,
            self.sampling.temperature,
            seed
        );
        let mut sampler = sampler_for(&self.sampling, seed);

        // Weights are shared by the clone; the KV cache is private to this call.
        let mut model = self.model.clone();
        let output_ids = sample_continuation(
            &mut model,
            &input_ids,
            self.tokens,
            request.max_new_tokens(),
            &mut sampler,
            &self.device,
        )?;

        let raw_text = decode_output(&self.tokenizer, &output_ids)?;
        Ok(GenerationResult { raw_text })
    }
}

pub fn checkpoint_name(config_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(config_json).ok()?;
    value.get("_name_or_path")?.as_str().map(str::to_string)
}

/// Compares the last path segment of a display label such as
/// `google/flan-t5-small` with the checkpoint's recorded name or path.
pub fn label_matches_checkpoint(model_name: &str, checkpoint: &str) -> bool {
    let label = model_name.trim_end_matches('/').rsplit('/').next().unwrap_or(model_name);
    let checkpoint = checkpoint.trim_end_matches(['/', '\\']);
    checkpoint.rsplit(['/', '\\']).next() == Some(label)
}

/// Enables right-side truncation at `max_input_tokens`.
pub fn prepare_tokenizer(mut tokenizer: Tokenizer, max_input_tokens: usize) -> Result<Tokenizer> {
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length: max_input_tokens,
            ..Default::default()
        }))
        .map_err(|e| AssistantError::Tokenizer(e.to_string()))?;
    Ok(tokenizer)
}

/// Prompt ids, cut to the tokenizer's truncation window. Truncation is
/// logged, not reported as an error.
pub fn encode_prompt(tokenizer: &Tokenizer, prompt: &str) -> Result<Vec<u32>> {
    let encoding = tokenizer
        .encode(prompt, true)
        .map_err(|e| AssistantError::Tokenizer(e.to_string()))?;
    if !encoding.get_overflowing().is_empty() {
        warn!(
            "Prompt exceeds the model input window; truncated to {} tokens",
            encoding.get_ids().len()
        );
    }
    Ok(encoding.get_ids().to_vec())
}

pub fn decode_output(tokenizer: &Tokenizer, ids: &[u32]) -> Result<String> {
    tokenizer
        .decode(ids, true)
        .map_err(|e| AssistantError::Tokenizer(e.to_string()))
}

/// The configured seed, or a fresh one per call when unset.
pub fn resolve_seed(sampling: &SamplingConfig) -> u64 {
    sampling.seed.unwrap_or_else(rand::random)
}

pub fn sampler_for(sampling: &SamplingConfig, seed: u64) -> LogitsProcessor {
    LogitsProcessor::new(seed, Some(sampling.temperature), Some(sampling.top_p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    /// Emits a peaked distribution over `vocab` for each scripted token.
    struct ScriptedModel {
        vocab: usize,
        script: Vec<u32>,
        step: usize,
        decoder_input_lens: Vec<usize>,
    }

    impl ScriptedModel {
        /// An empty script yields flat logits on every step.
        fn new(vocab: usize, script: Vec<u32>) -> Self {
            Self {
                vocab,
                script,
                step: 0,
                decoder_input_lens: Vec::new(),
            }
        }
    }

    impl Seq2SeqModel for ScriptedModel {
        fn encode(&mut self, input_ids: &Tensor) -> candle_core::Result<Tensor> {
            Ok(input_ids.clone())
        }

        fn decode(&mut self, decoder_ids: &Tensor, _encoder_output: &Tensor) -> candle_core::Result<Tensor> {
            self.decoder_input_lens.push(decoder_ids.dim(1)?);
            let mut logits = vec![0f32; self.vocab];
            if !self.script.is_empty() {
                let favored = self.script[self.step.min(self.script.len() - 1)] as usize;
                logits[favored] = 40.0;
            }
            self.step += 1;
            Tensor::new(logits.as_slice(), &Device::Cpu)?.unsqueeze(0)
        }
    }

    fn flan_sampler(seed: u64) -> LogitsProcessor {
        LogitsProcessor::new(seed, Some(0.7), Some(0.9))
    }

    const TOKENS: DecodeTokens = DecodeTokens { start: 0, eos: 1, use_cache: true };

    #[test]
    fn request_rejects_empty_prompt() {
        assert!(matches!(
            GenerationRequest::new("", 10),
            Err(AssistantError::EmptyPrompt)
        ));
    }

    #[test]
    fn request_rejects_zero_budget() {
        assert!(matches!(
            GenerationRequest::new("summarize: x", 0),
            Err(AssistantError::ZeroTokenBudget)
        ));
    }

    #[test]
    fn request_keeps_prompt_verbatim() {
        let request = GenerationRequest::new("  spaced  ", 5).unwrap();
        assert_eq!(request.prompt(), "  spaced  ");
        assert_eq!(request.max_new_tokens(), 5);
    }

    #[test]
    fn sampling_stops_at_eos_without_emitting_it() {
        let mut model = ScriptedModel::new(8, vec![4, 5, 1, 6]);
        let ids = sample_continuation(
            &mut model,
            &[3, 2, 1],
            TOKENS,
            10,
            &mut flan_sampler(7),
            &Device::Cpu,
        )
        .unwrap();
        assert_eq!(ids, vec![4, 5]);
    }

    #[test]
    fn sampling_respects_max_new_tokens() {
        let mut model = ScriptedModel::new(8, vec![5]);
        let ids = sample_continuation(
            &mut model,
            &[3],
            TOKENS,
            3,
            &mut flan_sampler(7),
            &Device::Cpu,
        )
        .unwrap();
        assert_eq!(ids, vec![5, 5, 5]);
    }

    #[test]
    fn cached_decoding_feeds_one_token_per_step() {
        let mut model = ScriptedModel::new(8, vec![5, 6, 7]);
        sample_continuation(&mut model, &[3], TOKENS, 3, &mut flan_sampler(1), &Device::Cpu).unwrap();
        assert_eq!(model.decoder_input_lens, vec![1, 1, 1]);

        let uncached = DecodeTokens { use_cache: false, ..TOKENS };
        let mut model = ScriptedModel::new(8, vec![5, 6, 7]);
        sample_continuation(&mut model, &[3], uncached, 3, &mut flan_sampler(1), &Device::Cpu).unwrap();
        assert_eq!(model.decoder_input_lens, vec![1, 2, 3]);
    }

    #[test]
    fn empty_input_ids_are_rejected() {
        let mut model = ScriptedModel::new(8, vec![5]);
        let err = sample_continuation(&mut model, &[], TOKENS, 3, &mut flan_sampler(1), &Device::Cpu)
            .unwrap_err();
        assert!(matches!(err, AssistantError::EmptyPrompt));
    }

    const WORD_TOKENIZER: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [
            { "id": 0, "content": "</s>", "single_word": false, "lstrip": false,
              "rstrip": false, "normalized": false, "special": true }
        ],
        "normalizer": null,
        "pre_tokenizer": { "type": "Whitespace" },
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": { "</s>": 0, "<unk>": 1, "the": 2, "fox": 3, "jumps": 4, "dog": 5 },
            "unk_token": "<unk>"
        }
    }"#;

    fn word_tokenizer(max_input_tokens: usize) -> Tokenizer {
        let tokenizer = Tokenizer::from_str(WORD_TOKENIZER).unwrap();
        prepare_tokenizer(tokenizer, max_input_tokens).unwrap()
    }

    #[test]
    fn long_prompt_is_truncated_to_the_window() {
        let tokenizer = word_tokenizer(4);
        let ids = encode_prompt(&tokenizer, "the fox jumps the dog the fox").unwrap();
        assert_eq!(ids, vec![2, 3, 4, 2]);
    }

    #[test]
    fn short_prompt_is_encoded_whole() {
        let tokenizer = word_tokenizer(512);
        let ids = encode_prompt(&tokenizer, "the fox jumps").unwrap();
        assert_eq!(ids, vec![2, 3, 4]);
    }

    #[test]
    fn decoding_skips_special_tokens() {
        let tokenizer = word_tokenizer(512);
        let text = decode_output(&tokenizer, &[2, 3, 0]).unwrap();
        assert_eq!(text, "the fox");
    }

    #[test]
    fn configured_seed_reproduces_the_same_continuation() {
        let sampling = SamplingConfig { seed: Some(42), ..Default::default() };
        // Flat logits and an unreachable EOS: the seed alone picks the ids.
        let tokens = DecodeTokens { start: 0, eos: 99, use_cache: true };
        let run = || {
            let seed = resolve_seed(&sampling);
            assert_eq!(seed, 42);
            let mut model = ScriptedModel::new(8, Vec::new());
            let mut sampler = sampler_for(&sampling, seed);
            sample_continuation(&mut model, &[3, 4], tokens, 24, &mut sampler, &Device::Cpu).unwrap()
        };
        let first = run();
        assert_eq!(first.len(), 24);
        assert_eq!(first, run());
    }

    #[test]
    fn unseeded_calls_draw_fresh_seeds() {
        let sampling = SamplingConfig::default();
        let seeds: Vec<u64> = (0..4).map(|_| resolve_seed(&sampling)).collect();
        assert!(seeds.windows(2).any(|pair| pair[0] != pair[1]));
    }

    #[test]
    fn checkpoint_name_is_read_from_config_json() {
        let json = r#"{ "_name_or_path": "google/flan-t5-small", "d_model": 512 }"#;
        assert_eq!(checkpoint_name(json).as_deref(), Some("google/flan-t5-small"));
        assert_eq!(checkpoint_name(r#"{ "d_model": 512 }"#), None);
        assert_eq!(checkpoint_name("not json"), None);
    }

    #[test]
    fn label_is_compared_with_checkpoint_tail() {
        assert!(label_matches_checkpoint("google/flan-t5-small", "google/flan-t5-small"));
        assert!(label_matches_checkpoint("google/flan-t5-small", "/srv/models/flan-t5-small/"));
        assert!(!label_matches_checkpoint("google/flan-t5-small", "google/flan-t5-base"));
        assert!(!label_matches_checkpoint("google/flan-t5-small", "/srv/models/my-flan-t5-small"));
    }

    #[test]
    fn load_fails_for_missing_model_dir() {
        let dir = tempfile::tempdir().unwrap();
        let result = T5Engine::load(dir.path(), 512, SamplingConfig::default());
        match result {
            Err(AssistantError::ModelLoad { reason, .. }) => assert!(reason.contains("config.json")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("load should fail without model files"),
        }
    }
}
