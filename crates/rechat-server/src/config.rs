//! Server configuration.
//!
//! Loaded from a TOML file (`rechat.toml` or `$RECHAT_CONFIG`) with
//! environment variable overrides, so deployments can keep secrets out
//! of the file.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant. \
Format your responses using markdown for better readability:
- Use headings (h1-h3) to organize content
- Use bullet points and numbered lists where appropriate
- Add occasional emojis to make responses more engaging
- Keep responses clear and well-structured";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: String,
    pub workers: usize,
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub system_prompt: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            db_path: "rechat.db".to_string(),
            workers: 4,
            llm: LlmConfig::default(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "openai/gpt-4o-mini".to_string(),
            base_url: "https://openrouter.ai/api/v1".to_string(),
            system_prompt: Some(DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }
}

impl ServerConfig {
    /// Load configuration: file first, then environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var("RECHAT_CONFIG").unwrap_or_else(|_| "rechat.toml".to_string());

        let mut config = if Path::new(&path).exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {path}"))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {path}"))?
        } else {
            Self::default()
        };

        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("RECHAT_HOST") {
            self.host = host;
        }
        if let Ok(port) = std::env::var("RECHAT_PORT")
            && let Ok(port) = port.parse()
        {
            self.port = port;
        }
        if let Ok(db_path) = std::env::var("RECHAT_DB_PATH") {
            self.db_path = db_path;
        }
        if let Ok(api_key) = std::env::var("RECHAT_API_KEY") {
            self.llm.api_key = api_key;
        }
        if let Ok(model) = std::env::var("RECHAT_MODEL") {
            self.llm.model = model;
        }
        if let Ok(base_url) = std::env::var("RECHAT_BASE_URL") {
            self.llm.base_url = base_url;
        }
        if let Ok(prompt) = std::env::var("RECHAT_SYSTEM_PROMPT") {
            self.llm.system_prompt = Some(prompt);
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:3000");
        assert_eq!(config.llm.base_url, "https://openrouter.ai/api/v1");
        assert!(
            config
                .llm
                .system_prompt
                .is_some_and(|p| p.contains("markdown"))
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            port = 8080

            [llm]
            model = "anthropic/claude-sonnet-4"
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.llm.model, "anthropic/claude-sonnet-4");
        assert_eq!(config.llm.base_url, "https://openrouter.ai/api/v1");
    }
}
