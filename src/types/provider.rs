//! Provider identities and generation modes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of supported model providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(alias = "claude")]
    Anthropic,
    DeepSeek,
}

impl ProviderKind {
    /// All providers in their default priority order
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::OpenAi,
        ProviderKind::DeepSeek,
        ProviderKind::Anthropic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::DeepSeek => "deepseek",
        }
    }

    /// Human-readable name used in prompts and terminal output
    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OpenAI",
            ProviderKind::Anthropic => "Anthropic",
            ProviderKind::DeepSeek => "DeepSeek",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            "deepseek" => Ok(ProviderKind::DeepSeek),
            other => Err(format!("Unsupported provider: {}", other)),
        }
    }
}

/// Which providers a generation request fans out to
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ProviderMode {
    /// Every enabled provider, then a synthesis pass
    #[default]
    Moa,
    /// Exactly one provider, answer used verbatim
    Single(ProviderKind),
}

impl ProviderMode {
    /// Providers to invoke for this mode, given what is available
    pub fn providers(&self, available: &[ProviderKind]) -> Vec<ProviderKind> {
        match self {
            ProviderMode::Moa => available.to_vec(),
            ProviderMode::Single(kind) => available
                .iter()
                .copied()
                .filter(|k| k == kind)
                .collect(),
        }
    }

    pub fn is_moa(&self) -> bool {
        matches!(self, ProviderMode::Moa)
    }
}

impl fmt::Display for ProviderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderMode::Moa => f.write_str("moa"),
            ProviderMode::Single(kind) => write!(f, "{}", kind),
        }
    }
}

impl FromStr for ProviderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("moa") {
            return Ok(ProviderMode::Moa);
        }
        s.parse::<ProviderKind>()
            .map(ProviderMode::Single)
            .map_err(|_| format!("Unsupported model: {}", s.trim()))
    }
}

impl From<ProviderMode> for String {
    fn from(mode: ProviderMode) -> Self {
        mode.to_string()
    }
}

impl TryFrom<String> for ProviderMode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
