use std::path::Path;

use anyhow::{Error as E, Result};
use candle_core::quantized::gguf_file;
use candle_core::{Device, Tensor};
use candle_transformers::models::quantized_llama;
use candle_transformers::models::quantized_qwen2;

use crate::prompting::ChatFamily;

pub enum RuntimeModel {
    Llama(quantized_llama::ModelWeights),
    Qwen2(quantized_qwen2::ModelWeights),
}

impl RuntimeModel {
    pub fn load_from_gguf(path: &Path, family: ChatFamily, device: &Device) -> Result<Self> {
        let mut file = std::fs::File::open(path)
            .map_err(|e| E::msg(format!("failed to open weights file {}: {}", path.display(), e)))?;
        let content = gguf_file::Content::read(&mut file)?;

        match family {
            // Mistral GGUF exports use the llama compute graph.
            ChatFamily::Llama | ChatFamily::Mistral => {
                let model = quantized_llama::ModelWeights::from_gguf(content, &mut file, device)?;
                Ok(Self::Llama(model))
            }
            ChatFamily::Qwen => {
                match quantized_qwen2::ModelWeights::from_gguf(content, &mut file, device) {
                    Ok(model) => Ok(Self::Qwen2(model)),
                    Err(e) => {
                        let msg = format!("{}", e);
                        if msg.contains("output_norm.weight") {
                            // Split-shard exports miss the tail tensors.
                            Err(E::msg(format!(
                                "qwen weights look like an incomplete split GGUF ({}); use a merged single-file export",
                                msg
                            )))
                        } else {
                            Err(E::msg(msg))
                        }
                    }
                }
            }
            ChatFamily::Plain => Err(E::msg(
                "no runtime graph for this checkpoint; set model.family to llama, qwen or mistral",
            )),
        }
    }

    pub fn forward(&mut self, input: &Tensor, position: usize) -> Result<Tensor> {
        match self {
            Self::Llama(model) => Ok(model.forward(input, position)?),
            Self::Qwen2(model) => Ok(model.forward(input, position)?),
        }
    }
}
