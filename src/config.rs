use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::prompting::{ChatFamily, GenerationConfig};

pub const DEFAULT_CONFIG_FILE: &str = "converse.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid generation setting: {0}")]
    InvalidGeneration(String),
    #[error("invalid server setting: {0}")]
    InvalidServer(String),
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub model: ModelConfig,
    pub generation: GenerationSettings,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    pub repo_id: String,
    pub weights_file: String,
    /// Repo holding `tokenizer.json`; GGUF repos usually don't, so this
    /// defaults to the matching base checkpoint.
    pub tokenizer_repo: Option<String>,
    pub revision: Option<String>,
    pub family: Option<ChatFamily>,
    pub weights_path: Option<PathBuf>,
    pub tokenizer_path: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            repo_id: "Qwen/Qwen2.5-0.5B-Instruct-GGUF".to_string(),
            weights_file: "qwen2.5-0.5b-instruct-q4_k_m.gguf".to_string(),
            tokenizer_repo: Some("Qwen/Qwen2.5-0.5B-Instruct".to_string()),
            revision: None,
            family: None,
            weights_path: None,
            tokenizer_path: None,
            cache_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationSettings {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub seed: Option<u64>,
    pub max_total_tokens: Option<usize>,
    pub repeat_penalty: Option<f32>,
    pub repeat_last_n: Option<usize>,
}

impl GenerationSettings {
    /// Family defaults overlaid with whatever the file pins down. A missing
    /// seed means a fresh one per run.
    pub fn resolve(&self, family: ChatFamily) -> Result<GenerationConfig, ConfigError> {
        let mut cfg = GenerationConfig::defaults_for(family);

        if let Some(t) = self.temperature {
            cfg.temperature = t;
        }
        if let Some(p) = self.top_p {
            cfg.top_p = p;
        }
        if let Some(n) = self.max_total_tokens {
            cfg.max_total_tokens = n;
        }
        if let Some(r) = self.repeat_penalty {
            cfg.repeat_penalty = r;
        }
        if let Some(n) = self.repeat_last_n {
            cfg.repeat_last_n = n;
        }
        cfg.seed = self.seed.unwrap_or_else(random_seed);

        validate_generation(&cfg)?;
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:7070".to_string(),
        }
    }
}

impl AppConfig {
    /// Loads the explicit path, or the default file when present, or plain
    /// defaults. An explicit path that can't be read is an error; an absent
    /// default file is not.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => {
                let p = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !p.exists() {
                    return Ok(Self::default());
                }
                p
            }
        };

        let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let cfg: AppConfig =
            toml::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })?;

        cfg.server.listen.parse::<SocketAddr>().map_err(|_| {
            ConfigError::InvalidServer(format!("listen address '{}'", cfg.server.listen))
        })?;

        Ok(cfg)
    }
}

fn validate_generation(cfg: &GenerationConfig) -> Result<(), ConfigError> {
    if !(0.0..=2.0).contains(&cfg.temperature) {
        return Err(ConfigError::InvalidGeneration(
            "temperature must be in [0.0, 2.0]".to_string(),
        ));
    }
    if cfg.top_p <= 0.0 || cfg.top_p > 1.0 {
        return Err(ConfigError::InvalidGeneration(
            "top_p must be in (0.0, 1.0]".to_string(),
        ));
    }
    if cfg.max_total_tokens == 0 {
        return Err(ConfigError::InvalidGeneration(
            "max_total_tokens must be > 0".to_string(),
        ));
    }
    if cfg.repeat_penalty <= 0.0 {
        return Err(ConfigError::InvalidGeneration(
            "repeat_penalty must be > 0".to_string(),
        ));
    }
    Ok(())
}

/// `--gen key=value[,key=value]` overrides, applied over the resolved
/// config. Pairs split on ',' or ';'.
pub fn parse_generation_overrides(
    spec: &str,
    base: GenerationConfig,
) -> Result<GenerationConfig, ConfigError> {
    if spec.trim().is_empty() {
        return Err(ConfigError::InvalidGeneration(
            "empty override spec; use key=value pairs".to_string(),
        ));
    }

    let mut cfg = base;

    for pair in spec.split([',', ';']) {
        let item = pair.trim();
        if item.is_empty() {
            continue;
        }

        let mut it = item.splitn(2, '=');
        let key = it.next().unwrap_or("").trim().to_lowercase();
        let value = it
            .next()
            .ok_or_else(|| {
                ConfigError::InvalidGeneration(format!("'{}' is not key=value", item))
            })?
            .trim();

        match key.as_str() {
            "temperature" | "temp" => {
                cfg.temperature = value.parse().map_err(|_| {
                    ConfigError::InvalidGeneration(format!("temperature '{}'", value))
                })?;
            }
            "top_p" | "topp" => {
                cfg.top_p = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidGeneration(format!("top_p '{}'", value)))?;
            }
            "seed" => {
                cfg.seed = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidGeneration(format!("seed '{}'", value)))?;
            }
            "max_total_tokens" | "max_tokens" => {
                cfg.max_total_tokens = value.parse().map_err(|_| {
                    ConfigError::InvalidGeneration(format!("max_total_tokens '{}'", value))
                })?;
            }
            "repeat_penalty" => {
                cfg.repeat_penalty = value.parse().map_err(|_| {
                    ConfigError::InvalidGeneration(format!("repeat_penalty '{}'", value))
                })?;
            }
            "repeat_last_n" => {
                cfg.repeat_last_n = value.parse().map_err(|_| {
                    ConfigError::InvalidGeneration(format!("repeat_last_n '{}'", value))
                })?;
            }
            _ => {
                return Err(ConfigError::InvalidGeneration(format!(
                    "unknown key '{}'",
                    key
                )))
            }
        }
    }

    validate_generation(&cfg)?;
    Ok(cfg)
}

pub fn random_seed() -> u64 {
    let mut buf = [0u8; 8];
    if getrandom::getrandom(&mut buf).is_ok() {
        u64::from_le_bytes(buf)
    } else {
        // Same fixed fallback the defaults carry.
        299_792_458
    }
}
