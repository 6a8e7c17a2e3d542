//! Configuration management for rfpbuddy
//!
//! Provides TOML-based configuration with defaults and validation.
//! Location: ~/.rfpbuddy/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{Result, RfpError};
use crate::types::ProviderKind;

/// Complete configuration for rfpbuddy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub providers: ProvidersConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub batch: BatchConfig,
    pub synthesis: SynthesisConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
}

/// Per-provider connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub openai: ProviderConfig,
    pub anthropic: ProviderConfig,
    pub deepseek: ProviderConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    #[serde(rename = "openai")]
    OpenAi,
    Hashing,
}

/// Embedding collaborator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    pub dimension: usize,
}

/// Similarity retrieval settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub min_score: f32,
    pub same_category_only: bool,
    pub exclude_self: bool,
}

/// Bulk orchestration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub default_concurrency: usize,
    pub max_concurrency: usize,
    /// How long the terminal snapshot stays visible before reset
    pub grace_period_ms: u64,
}

/// Mixture-of-agents synthesis settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub synthesizer: ProviderKind,
    /// Provider whose answer wins when synthesis fails, highest first
    pub fallback_order: Vec<ProviderKind>,
    pub timeout_secs: u64,
}

/// Provider call retry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl ProviderConfig {
    fn openai() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.2,
            max_tokens: 4000,
            timeout_secs: 60,
        }
    }

    fn anthropic() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.anthropic.com/v1".to_string(),
            model: "claude-3-7-sonnet-20250219".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            temperature: 0.2,
            max_tokens: 4000,
            timeout_secs: 60,
        }
    }

    fn deepseek() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.deepseek.com/v1".to_string(),
            model: "deepseek-chat".to_string(),
            api_key_env: "DEEPSEEK_API_KEY".to_string(),
            temperature: 0.2,
            max_tokens: 4000,
            timeout_secs: 60,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            openai: ProviderConfig::openai(),
            anthropic: ProviderConfig::anthropic(),
            deepseek: ProviderConfig::deepseek(),
        }
    }
}

impl ProvidersConfig {
    pub fn get(&self, kind: ProviderKind) -> &ProviderConfig {
        match kind {
            ProviderKind::OpenAi => &self.openai,
            ProviderKind::Anthropic => &self.anthropic,
            ProviderKind::DeepSeek => &self.deepseek,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::OpenAi,
            base_url: "https://api.openai.com/v1".to_string(),
            model: crate::embedding::openai::DEFAULT_EMBEDDING_MODEL.to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            dimension: crate::embedding::openai::DEFAULT_EMBEDDING_DIMENSION,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: crate::index::DEFAULT_TOP_K,
            min_score: 0.0,
            same_category_only: false,
            exclude_self: true,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            default_concurrency: 3,
            max_concurrency: 16,
            grace_period_ms: 1500,
        }
    }
}

impl BatchConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            synthesizer: ProviderKind::OpenAi,
            fallback_order: ProviderKind::ALL.to_vec(),
            timeout_secs: 90,
        }
    }
}

impl SynthesisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms: 500,
            max_delay_ms: 4000,
            jitter: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Load configuration from file or use defaults
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            Self::load_from_file(&config_path)
        } else {
            Self::load_default()
        }
    }

    /// Load configuration from specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RfpError::Config(format!("Failed to read config: {}", e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| RfpError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load default configuration from standard location or use built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Some(config_path) = Self::default_path() {
            if config_path.exists() {
                return Self::load_from_file(&config_path);
            }
        }

        Ok(Config::default())
    }

    /// `~/.rfpbuddy/config.toml`, when a home directory exists
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".rfpbuddy").join("config.toml"))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.batch.default_concurrency == 0 || self.batch.max_concurrency == 0 {
            return Err(RfpError::Config(
                "concurrency limits must be greater than 0".to_string(),
            ));
        }

        if self.batch.default_concurrency > self.batch.max_concurrency {
            return Err(RfpError::Config(format!(
                "default_concurrency ({}) exceeds max_concurrency ({})",
                self.batch.default_concurrency, self.batch.max_concurrency
            )));
        }

        if self.retrieval.top_k == 0 {
            return Err(RfpError::Config(
                "top_k must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.retrieval.min_score) {
            return Err(RfpError::Config(
                "min_score must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.synthesis.fallback_order.is_empty() {
            return Err(RfpError::Config(
                "fallback_order must name at least one provider".to_string(),
            ));
        }

        if self.synthesis.timeout_secs == 0 {
            return Err(RfpError::Config(
                "synthesis timeout_secs must be greater than 0".to_string(),
            ));
        }

        for kind in ProviderKind::ALL {
            let provider = self.providers.get(kind);
            if provider.timeout_secs == 0 {
                return Err(RfpError::Config(format!(
                    "{} timeout_secs must be greater than 0",
                    kind
                )));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(RfpError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        if self.embedding.dimension == 0 {
            return Err(RfpError::Config(
                "embedding dimension must be greater than 0".to_string(),
            ));
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(RfpError::Config(format!(
                    "Invalid log level: {}",
                    self.logging.level
                )))
            }
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| RfpError::Config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RfpError::Config(format!("Failed to create config dir: {}", e)))?;
        }

        std::fs::write(path, contents)
            .map_err(|e| RfpError::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Providers enabled in config, in default priority order
    pub fn enabled_providers(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|kind| self.providers.get(*kind).enabled)
            .collect()
    }
}
