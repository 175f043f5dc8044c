use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use hf_hub::api::sync::ApiBuilder;
use hf_hub::{Repo, RepoType};
use tracing::info;

use crate::config::ModelConfig;
use crate::prompting::ChatFamily;

/// Everything the engine needs on disk, plus the chat family resolved for
/// the checkpoint.
#[derive(Debug, Clone)]
pub struct ModelArtifacts {
    pub weights: PathBuf,
    pub tokenizer: PathBuf,
    pub family: ChatFamily,
}

/// Resolves weights and tokenizer to local files. Local path overrides win;
/// otherwise both are fetched once from the hub (cached across runs by
/// hf-hub itself).
pub fn resolve_artifacts(model: &ModelConfig) -> Result<ModelArtifacts> {
    let (weights, config_json) = match &model.weights_path {
        Some(path) => {
            anyhow::ensure!(
                path.exists(),
                "configured weights_path not found: {}",
                path.display()
            );
            let sibling = path.parent().map(|dir| dir.join("config.json"));
            (path.clone(), sibling.filter(|p| p.exists()))
        }
        None => fetch_weights(model)?,
    };

    let tokenizer = match &model.tokenizer_path {
        Some(path) => {
            anyhow::ensure!(
                path.exists(),
                "configured tokenizer_path not found: {}",
                path.display()
            );
            path.clone()
        }
        None => fetch_tokenizer(model)?,
    };

    let family = resolve_family(model, &weights, config_json.as_deref());
    info!(family = ?family, weights = %weights.display(), "model artifacts resolved");

    Ok(ModelArtifacts {
        weights,
        tokenizer,
        family,
    })
}

fn hub_repo(model: &ModelConfig, repo_id: &str) -> Result<hf_hub::api::sync::ApiRepo> {
    let mut builder = ApiBuilder::new().with_progress(true);
    if let Some(dir) = &model.cache_dir {
        builder = builder.with_cache_dir(dir.clone());
    }
    let api = builder.build()?;

    let repo = match &model.revision {
        Some(rev) => Repo::with_revision(repo_id.to_string(), RepoType::Model, rev.clone()),
        None => Repo::model(repo_id.to_string()),
    };
    Ok(api.repo(repo))
}

fn fetch_weights(model: &ModelConfig) -> Result<(PathBuf, Option<PathBuf>)> {
    info!(repo = %model.repo_id, file = %model.weights_file, "fetching weights from hub");
    let repo = hub_repo(model, &model.repo_id)?;
    let weights = repo
        .get(&model.weights_file)
        .with_context(|| format!("fetching {} from {}", model.weights_file, model.repo_id))?;

    // The architecture descriptor is optional; GGUF repos usually don't
    // carry one.
    let config_json = repo.get("config.json").ok();
    Ok((weights, config_json))
}

fn fetch_tokenizer(model: &ModelConfig) -> Result<PathBuf> {
    let repo_id = model.tokenizer_repo.as_deref().unwrap_or(&model.repo_id);
    info!(repo = %repo_id, "fetching tokenizer.json from hub");
    let repo = hub_repo(model, repo_id)?;
    repo.get("tokenizer.json")
        .with_context(|| format!("fetching tokenizer.json from {}", repo_id))
}

fn resolve_family(
    model: &ModelConfig,
    weights: &Path,
    config_json: Option<&Path>,
) -> ChatFamily {
    if let Some(family) = model.family {
        return family;
    }

    if let Some(path) = config_json {
        if let Some(family) = family_from_config_json(path) {
            return family;
        }
    }

    let stem = weights
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let from_name = infer_family_from_filename(stem);
    if from_name != ChatFamily::Plain {
        return from_name;
    }

    infer_family_from_filename(&model.repo_id)
}

pub fn infer_family_from_filename(name: &str) -> ChatFamily {
    let lowered = name.to_lowercase();
    if lowered.contains("llama") {
        ChatFamily::Llama
    } else if lowered.contains("qwen") {
        ChatFamily::Qwen
    } else if lowered.contains("mistral") || lowered.contains("mixtral") {
        ChatFamily::Mistral
    } else {
        ChatFamily::Plain
    }
}

/// Reads the `model_type` field of a transformers `config.json`.
pub fn family_from_config_json(path: &Path) -> Option<ChatFamily> {
    let bytes = std::fs::read(path).ok()?;
    let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let model_type = value.get("model_type")?.as_str()?;

    match model_type {
        "llama" => Some(ChatFamily::Llama),
        "qwen2" | "qwen2_moe" => Some(ChatFamily::Qwen),
        "mistral" | "mixtral" => Some(ChatFamily::Mistral),
        _ => None,
    }
}
