mod generate;
mod tokenizer;

pub use tokenizer::SpecialTokens;

use anyhow::{Error as E, Result};
use candle_core::Device;
use tokenizers::Tokenizer;
use tracing::info;

use crate::backend::RuntimeModel;
use crate::hub::ModelArtifacts;
use crate::prompting::{ChatFamily, GenerationConfig};

use self::tokenizer::resolve_special_tokens;

pub struct ChatEngine {
    model: RuntimeModel,
    tokenizer: Tokenizer,
    device: Device,
    family: ChatFamily,
    generation: GenerationConfig,
    special: SpecialTokens,
}

impl ChatEngine {
    pub fn load(artifacts: &ModelArtifacts, generation: GenerationConfig) -> Result<Self> {
        let device = Device::Cpu;
        let start = std::time::Instant::now();

        info!(weights = %artifacts.weights.display(), "loading weights");
        let model = RuntimeModel::load_from_gguf(&artifacts.weights, artifacts.family, &device)?;

        let tokenizer = Tokenizer::from_file(&artifacts.tokenizer).map_err(E::msg)?;
        let special = resolve_special_tokens(&tokenizer, artifacts.family).map_err(E::msg)?;

        info!(
            elapsed = ?start.elapsed(),
            eos = special.eos,
            eot = special.eot,
            family = ?artifacts.family,
            "engine ready"
        );

        Ok(Self {
            model,
            tokenizer,
            device,
            family: artifacts.family,
            generation,
            special,
        })
    }

    pub fn family(&self) -> ChatFamily {
        self.family
    }

    pub fn generation(&self) -> GenerationConfig {
        self.generation
    }
}
