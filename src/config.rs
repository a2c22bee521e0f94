use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{DigestError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Base URL of the Confluence instance (e.g. "https://acme.atlassian.net")
    pub base_url: String,

    /// Account used for basic auth
    pub username: String,

    /// API token paired with `username`
    pub api_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Whether to call the text generation service at all
    pub enabled: bool,

    /// LLM provider (azure-openai, openai)
    pub provider: String,

    /// Model name (e.g., "gpt-4o")
    pub model: String,

    /// API key (for external providers)
    pub api_key: Option<String>,

    /// Endpoint for Azure deployments or OpenAI-compatible gateways
    pub base_url: Option<String>,

    /// Azure deployment name
    pub deployment: Option<String>,

    /// Azure API version
    pub api_version: String,

    /// Maximum tokens for LLM responses
    pub max_tokens: Option<u32>,

    /// Temperature for LLM responses (0.0 to 1.0)
    pub temperature: Option<f32>,

    /// Upper bound for a single generation call
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Directory holding previously exported summaries
    pub export_dir: PathBuf,

    /// Ask the LLM to describe each changed section
    pub annotate_changes: bool,

    /// Context lines around each hunk in the exported diff
    pub diff_context_lines: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Content source connection settings
    pub source: SourceConfig,

    /// Text generation settings
    pub llm: LlmConfig,

    /// Export and comparison settings
    pub export: ExportConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: SourceConfig {
                base_url: "https://example.atlassian.net".to_string(),
                username: String::new(),
                api_token: None,
            },
            llm: LlmConfig {
                enabled: true,
                provider: "azure-openai".to_string(),
                model: "gpt-4o".to_string(),
                api_key: None,
                base_url: None,
                deployment: None,
                api_version: "2024-02-15-preview".to_string(),
                max_tokens: Some(2000),
                temperature: Some(0.7),
                timeout_secs: 120,
            },
            export: ExportConfig {
                export_dir: PathBuf::from("summaries"),
                annotate_changes: true,
                diff_context_lines: 3,
            },
        }
    }
}

/// Environment variables that may override file settings.
const OVERRIDE_KEYS: &[&str] = &[
    "CONFLUENCE_URL",
    "CONFLUENCE_USERNAME",
    "CONFLUENCE_API_TOKEN",
    "AZURE_OPENAI_API_KEY",
    "AZURE_OPENAI_ENDPOINT",
    "AZURE_OPENAI_DEPLOYMENT_NAME",
    "AZURE_OPENAI_API_VERSION",
    "EXPORT_DIR",
];

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| DigestError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Load configuration with fallback to default
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(p) => {
                if p.as_ref().exists() {
                    Self::load(p)
                } else {
                    Ok(Self::default())
                }
            }
            None => {
                let candidates = ["wikidigest.toml", ".wikidigest.toml"];

                for candidate in &candidates {
                    if Path::new(candidate).exists() {
                        return Self::load(candidate);
                    }
                }

                Ok(Self::default())
            }
        }
    }

    /// Collect overrides from a `secrets` file and the process environment.
    ///
    /// Environment values win over the secrets file. Nothing is written back
    /// to the environment.
    pub fn collect_overrides(secrets_path: &Path) -> Result<HashMap<String, String>> {
        let mut overrides = HashMap::new();

        if secrets_path.is_file() {
            let content = std::fs::read_to_string(secrets_path)?;
            overrides.extend(parse_secrets(&content));
        }

        for key in OVERRIDE_KEYS {
            if let Ok(value) = std::env::var(key) {
                if !value.is_empty() {
                    overrides.insert(key.to_string(), value);
                }
            }
        }

        Ok(overrides)
    }

    /// Apply explicit key/value overrides on top of the loaded configuration
    pub fn with_overrides(mut self, overrides: &HashMap<String, String>) -> Self {
        for (key, value) in overrides {
            match key.as_str() {
                "CONFLUENCE_URL" => self.source.base_url = value.clone(),
                "CONFLUENCE_USERNAME" => self.source.username = value.clone(),
                "CONFLUENCE_API_TOKEN" => self.source.api_token = Some(value.clone()),
                "AZURE_OPENAI_API_KEY" => self.llm.api_key = Some(value.clone()),
                "AZURE_OPENAI_ENDPOINT" => self.llm.base_url = Some(value.clone()),
                "AZURE_OPENAI_DEPLOYMENT_NAME" => self.llm.deployment = Some(value.clone()),
                "AZURE_OPENAI_API_VERSION" => self.llm.api_version = value.clone(),
                "EXPORT_DIR" => self.export.export_dir = PathBuf::from(value),
                _ => {}
            }
        }
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !is_http_url(&self.source.base_url) {
            return Err(DigestError::Config(
                "Confluence URL must start with http:// or https://".to_string(),
            ));
        }

        if let Some(endpoint) = &self.llm.base_url {
            if !is_http_url(endpoint) {
                return Err(DigestError::Config(
                    "LLM endpoint must start with http:// or https://".to_string(),
                ));
            }
        }

        if self.llm.timeout_secs == 0 {
            return Err(DigestError::Config(
                "llm.timeout_secs must be greater than zero".to_string(),
            ));
        }

        let export_dir = &self.export.export_dir;
        if export_dir.exists() && !export_dir.is_dir() {
            return Err(DigestError::Config(format!(
                "Export directory {} exists but is not a directory",
                export_dir.display()
            )));
        }

        Ok(())
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Parse `KEY=VALUE` lines, skipping blanks and `#` comments.
fn parse_secrets(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_secrets_skips_comments() {
        let parsed = parse_secrets("# comment\nCONFLUENCE_URL = https://wiki.local\n\nBROKEN\nEXPORT_DIR=out=1\n");
        assert_eq!(parsed.get("CONFLUENCE_URL").map(String::as_str), Some("https://wiki.local"));
        assert_eq!(parsed.get("EXPORT_DIR").map(String::as_str), Some("out=1"));
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn test_overrides_are_applied_to_value() {
        let mut overrides = HashMap::new();
        overrides.insert("CONFLUENCE_USERNAME".to_string(), "bot".to_string());
        overrides.insert("AZURE_OPENAI_DEPLOYMENT_NAME".to_string(), "summaries".to_string());
        overrides.insert("EXPORT_DIR".to_string(), "out".to_string());

        let config = Config::default().with_overrides(&overrides);
        assert_eq!(config.source.username, "bot");
        assert_eq!(config.llm.deployment.as_deref(), Some("summaries"));
        assert_eq!(config.export.export_dir, PathBuf::from("out"));
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut config = Config::default();
        config.source.base_url = "wiki.local".to_string();
        assert!(matches!(config.validate(), Err(DigestError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = Config::default();
        config.llm.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_written_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wikidigest.toml");
        let mut config = Config::default();
        config.export.diff_context_lines = 5;
        std::fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = Config::load_or_default(Some(&path)).unwrap();
        assert_eq!(loaded.export.diff_context_lines, 5);
        assert_eq!(loaded.llm.provider, "azure-openai");
    }
}
