use anyhow::{Error as E, Result};
use candle_core::{DType, Tensor};
use candle_transformers::generation::LogitsProcessor;
use tracing::{debug, info};

use crate::prompting::should_stop_on_text;

use super::tokenizer::{decode_reply, prompt_token_ids};
use super::ChatEngine;

impl ChatEngine {
    /// One single-turn exchange. The returned text is decoded from the
    /// newly generated span only, special tokens stripped; it is empty when
    /// the prompt already fills the token budget.
    pub fn respond(&mut self, message: &str) -> Result<String> {
        let mut tokens =
            prompt_token_ids(&self.tokenizer, self.family, self.special.eos, message)
                .map_err(E::msg)?;
        anyhow::ensure!(!tokens.is_empty(), "prompt encoded to zero tokens");

        let prompt_len = tokens.len();
        let limit = self.generation.max_total_tokens;
        debug!(prompt_tokens = prompt_len, limit, "prompt encoded");

        let temperature =
            (self.generation.temperature > 0.0).then_some(self.generation.temperature);
        let mut logits_processor = LogitsProcessor::new(
            self.generation.seed,
            temperature,
            Some(self.generation.top_p),
        );

        let start = std::time::Instant::now();
        let mut index_pos = 0;

        while tokens.len() < limit {
            let context_size = if index_pos == 0 { tokens.len() } else { 1 };
            let start_pos = tokens.len().saturating_sub(context_size);

            let input = Tensor::new(&tokens[start_pos..], &self.device)?.unsqueeze(0)?;
            let logits = self.model.forward(&input, index_pos)?;
            let logits = logits.squeeze(0)?.squeeze(0)?.to_dtype(DType::F32)?;
            index_pos += context_size;

            let logits = if self.generation.repeat_penalty == 1.0 {
                logits
            } else {
                let start_at = tokens.len().saturating_sub(self.generation.repeat_last_n);
                candle_transformers::utils::apply_repeat_penalty(
                    &logits,
                    self.generation.repeat_penalty,
                    &tokens[start_at..],
                )?
            };

            let next = logits_processor.sample(&logits)?;
            if next == self.special.eos || next == self.special.eot {
                break;
            }

            // Some GGUF tokenizers carry the end-of-turn string as plain
            // vocab; catch it at text level before it enters the sequence.
            if let Ok(piece) = self.tokenizer.decode(&[next], false) {
                if should_stop_on_text(self.family, &piece) {
                    break;
                }
            }

            tokens.push(next);
        }

        let generated = tokens.len() - prompt_len;
        let elapsed = start.elapsed();
        info!(
            generated,
            total = tokens.len(),
            tokens_per_s = generated as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
            "generation finished"
        );

        decode_reply(&self.tokenizer, &tokens, prompt_len).map_err(E::msg)
    }
}
