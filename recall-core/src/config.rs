/// Settings shared by the parser, the file data cache and the review queue.
/// Reads settings.json from ~/.config/recall/settings.json (or platform equivalent).
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Boundary class at which a document is split into cards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardLevel {
    /// Any header starts a card.
    #[default]
    Header,
    /// Any header or first-level `-` bullet starts a card.
    Bullet,
    /// Any header or first-level `*` bullet starts a card.
    Asterisk,
}

impl FromStr for CardLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "header" => Ok(CardLevel::Header),
            "bullet" => Ok(CardLevel::Bullet),
            "asterisk" => Ok(CardLevel::Asterisk),
            other => Err(format!("unknown card level: {}", other)),
        }
    }
}

impl fmt::Display for CardLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CardLevel::Header => "header",
            CardLevel::Bullet => "bullet",
            CardLevel::Asterisk => "asterisk",
        })
    }
}

/// Per-document parse configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseConfig {
    #[serde(default)]
    pub level: CardLevel,
    /// Generate a mirrored card for every bullet/asterisk card.
    #[serde(default)]
    pub reverse: bool,
    #[serde(default = "default_line_divider")]
    pub line_divider: String,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            level: CardLevel::default(),
            reverse: false,
            line_divider: default_line_divider(),
        }
    }
}

/// Workspace-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallConfig {
    #[serde(default = "default_include")]
    pub include: Vec<String>,
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub default_level: CardLevel,
    #[serde(default)]
    pub reverse_generation: bool,
    #[serde(default = "default_line_divider")]
    pub line_divider: String,
    /// Maximum number of new cards per review session; unlimited when absent.
    #[serde(default)]
    pub new_card_limit: Option<usize>,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            include: default_include(),
            exclude: default_exclude(),
            default_level: CardLevel::default(),
            reverse_generation: false,
            line_divider: default_line_divider(),
            new_card_limit: None,
        }
    }
}

impl RecallConfig {
    pub fn parse_config(&self) -> ParseConfig {
        ParseConfig {
            level: self.default_level,
            reverse: self.reverse_generation,
            line_divider: self.line_divider.clone(),
        }
    }
}

fn default_line_divider() -> String {
    ":".to_string()
}

fn default_include() -> Vec<String> {
    vec!["**/*.md".to_string()]
}

fn default_exclude() -> Vec<String> {
    vec![
        "**/node_modules/**".to_string(),
        "**/.git/**".to_string(),
        "**/.recall/**".to_string(),
    ]
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid settings: {0}")]
    Json(#[from] serde_json::Error),
}

/// Default config path: ~/.config/recall/settings.json
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("recall")
        .join("settings.json")
}

/// Load config from path, surfacing IO and parse errors.
pub fn load_config_strict(path: &Path) -> Result<RecallConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Load config from path. Returns defaults if the file is missing or malformed.
pub fn load_config(path: &Path) -> RecallConfig {
    match load_config_strict(path) {
        Ok(config) => config,
        Err(ConfigError::Io(_)) => {
            log::info!("[recall.config] No config at {}, using defaults", path.display());
            RecallConfig::default()
        }
        Err(e) => {
            log::warn!("[recall.config] Failed to parse config {}: {}", path.display(), e);
            RecallConfig::default()
        }
    }
}
