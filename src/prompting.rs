use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatFamily {
    Llama,
    Qwen,
    Mistral,
    /// Template-less conversational checkpoints: the user message is encoded
    /// as-is and the EOS id is appended after encoding.
    Plain,
}

#[derive(Debug, Clone, Copy)]
pub struct GenerationConfig {
    pub temperature: f64,
    pub top_p: f64,
    pub seed: u64,
    /// Hard bound on the total sequence length (prompt + generated).
    pub max_total_tokens: usize,
    pub repeat_penalty: f32,
    pub repeat_last_n: usize,
}

impl GenerationConfig {
    pub fn defaults_for(family: ChatFamily) -> Self {
        match family {
            ChatFamily::Mistral => Self {
                temperature: 0.7,
                top_p: 0.92,
                seed: 299_792_458,
                max_total_tokens: 1000,
                repeat_penalty: 1.1,
                repeat_last_n: 64,
            },
            ChatFamily::Llama | ChatFamily::Qwen | ChatFamily::Plain => Self {
                temperature: 0.7,
                top_p: 0.9,
                seed: 299_792_458,
                max_total_tokens: 1000,
                repeat_penalty: 1.1,
                repeat_last_n: 64,
            },
        }
    }
}

/// Wraps one user message into a single closed user turn plus an opened
/// assistant turn. `Plain` passes the message through untouched; the engine
/// closes the turn by appending the EOS id after encoding.
pub fn format_user_turn(family: ChatFamily, message: &str) -> String {
    match family {
        ChatFamily::Llama => format!(
            "<|begin_of_text|><|start_header_id|>user<|end_header_id|>\n\n{}<|eot_id|><|start_header_id|>assistant<|end_header_id|>\n\n",
            message
        ),
        ChatFamily::Qwen => format!(
            "<|im_start|>user\n{}<|im_end|>\n<|im_start|>assistant\n",
            message
        ),
        ChatFamily::Mistral => format!("[INST] {} [/INST]", message),
        ChatFamily::Plain => message.to_string(),
    }
}

/// Text-level stop check for tokenizers that don't flag their end-of-turn
/// strings as special tokens in the vocab.
pub fn should_stop_on_text(family: ChatFamily, piece: &str) -> bool {
    let markers: &[&str] = match family {
        ChatFamily::Llama => &["<|eot_id|>", "<|end_of_text|>"],
        ChatFamily::Qwen => &["<|im_end|>", "<|endoftext|>"],
        ChatFamily::Mistral => &["</s>"],
        ChatFamily::Plain => &["<|endoftext|>", "</s>"],
    };

    markers.iter().any(|marker| piece.contains(marker))
}
