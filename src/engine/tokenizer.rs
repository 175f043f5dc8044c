use tokenizers::Tokenizer;

use crate::prompting::{format_user_turn, ChatFamily};

#[derive(Debug, Clone, Copy)]
pub struct SpecialTokens {
    /// End-of-sequence id.
    pub eos: u32,
    /// End-of-turn id; same as `eos` for families without a separate one.
    pub eot: u32,
}

/// Fail-fast check that the tokenizer actually carries the ids the family
/// template relies on.
pub(super) fn resolve_special_tokens(
    tokenizer: &Tokenizer,
    family: ChatFamily,
) -> Result<SpecialTokens, String> {
    match family {
        ChatFamily::Llama => {
            let eos = tokenizer
                .token_to_id("<|end_of_text|>")
                .or_else(|| tokenizer.token_to_id("</s>"))
                .ok_or_else(|| {
                    "tokenizer/model mismatch: llama needs <|end_of_text|> or </s>".to_string()
                })?;

            let eot = tokenizer.token_to_id("<|eot_id|>").ok_or_else(|| {
                "tokenizer/model mismatch: llama chat template needs <|eot_id|>".to_string()
            })?;

            let has_headers = tokenizer.token_to_id("<|start_header_id|>").is_some()
                && tokenizer.token_to_id("<|end_header_id|>").is_some();
            if !has_headers {
                return Err(
                    "tokenizer/model mismatch: llama chat template needs <|start_header_id|>/<|end_header_id|>"
                        .to_string(),
                );
            }

            Ok(SpecialTokens { eos, eot })
        }
        ChatFamily::Qwen => {
            let eos = tokenizer
                .token_to_id("<|endoftext|>")
                .or_else(|| tokenizer.token_to_id("</s>"))
                .ok_or_else(|| {
                    "tokenizer/model mismatch: qwen needs <|endoftext|> or </s>".to_string()
                })?;

            let eot = tokenizer.token_to_id("<|im_end|>").ok_or_else(|| {
                "tokenizer/model mismatch: qwen chat template needs <|im_end|>".to_string()
            })?;

            if tokenizer.token_to_id("<|im_start|>").is_none() {
                return Err(
                    "tokenizer/model mismatch: qwen chat template needs <|im_start|>".to_string(),
                );
            }

            Ok(SpecialTokens { eos, eot })
        }
        ChatFamily::Mistral => {
            let eos = tokenizer
                .token_to_id("</s>")
                .or_else(|| tokenizer.token_to_id("<|end_of_text|>"))
                .ok_or_else(|| {
                    "tokenizer/model mismatch: mistral needs </s> or <|end_of_text|>".to_string()
                })?;
            Ok(SpecialTokens { eos, eot: eos })
        }
        ChatFamily::Plain => {
            let eos = tokenizer
                .token_to_id("<|endoftext|>")
                .or_else(|| tokenizer.token_to_id("</s>"))
                .or_else(|| tokenizer.token_to_id("<|end_of_text|>"))
                .ok_or_else(|| {
                    "tokenizer has no end-of-sequence token; cannot close the user turn"
                        .to_string()
                })?;
            Ok(SpecialTokens { eos, eot: eos })
        }
    }
}

/// Encodes the formatted user turn. Template-less checkpoints get the EOS
/// id appended so the model sees a closed utterance.
pub(super) fn prompt_token_ids(
    tokenizer: &Tokenizer,
    family: ChatFamily,
    eos: u32,
    message: &str,
) -> Result<Vec<u32>, String> {
    let prompt = format_user_turn(family, message);
    let mut ids = tokenizer
        .encode(prompt.as_str(), true)
        .map_err(|e| e.to_string())?
        .get_ids()
        .to_vec();

    if family == ChatFamily::Plain {
        ids.push(eos);
    }

    Ok(ids)
}

/// Decodes only the span after the prompt, skipping special tokens.
pub(super) fn decode_reply(
    tokenizer: &Tokenizer,
    tokens: &[u32],
    prompt_len: usize,
) -> Result<String, String> {
    if tokens.len() <= prompt_len {
        return Ok(String::new());
    }

    let text = tokenizer
        .decode(&tokens[prompt_len..], true)
        .map_err(|e| e.to_string())?;
    Ok(text.trim().to_string())
}
