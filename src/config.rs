use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::OrchestratorConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    OpenAI,
}

impl std::str::FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Ok(ProviderKind::Anthropic),
            "openai" => Ok(ProviderKind::OpenAI),
            other => anyhow::bail!("unknown provider '{}'", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub provider: ProviderKind,
    pub model: Option<String>,
    pub sessions_dir: PathBuf,
    pub max_turns: usize,
    pub pause_poll_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            anthropic_api_key: None,
            provider: ProviderKind::Anthropic,
            model: None,
            sessions_dir: PathBuf::from(".ctfpilot/sessions"),
            max_turns: 20,
            pause_poll_ms: 250,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Reads a TOML file, then lets environment variables override it.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut config: Config = toml::from_str(&raw)
            .with_context(|| format!("invalid config {}", path.display()))?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.openai_api_key = Some(key);
        }
        if let Some(key) = lookup("ANTHROPIC_API_KEY") {
            self.anthropic_api_key = Some(key);
        }
        if let Some(provider) = lookup("CTFPILOT_PROVIDER") {
            match provider.parse() {
                Ok(provider) => self.provider = provider,
                Err(e) => log::warn!("ignoring CTFPILOT_PROVIDER: {}", e),
            }
        }
        if let Some(model) = lookup("CTFPILOT_MODEL") {
            self.model = Some(model);
        }
        if let Some(dir) = lookup("CTFPILOT_SESSIONS_DIR") {
            self.sessions_dir = PathBuf::from(dir);
        }
        if let Some(turns) = lookup("CTFPILOT_MAX_TURNS") {
            match turns.parse() {
                Ok(turns) => self.max_turns = turns,
                Err(e) => log::warn!("ignoring CTFPILOT_MAX_TURNS={}: {}", turns, e),
            }
        }
    }

    pub fn api_key(&self) -> Option<&str> {
        match self.provider {
            ProviderKind::Anthropic => self.anthropic_api_key.as_deref(),
            ProviderKind::OpenAI => self.openai_api_key.as_deref(),
        }
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            pause_poll_interval: Duration::from_millis(self.pause_poll_ms.max(1)),
            ..OrchestratorConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.provider, ProviderKind::Anthropic);
        assert_eq!(config.max_turns, 20);
        assert!(config.api_key().is_none());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("CTFPILOT_PROVIDER", "OpenAI"),
            ("CTFPILOT_SESSIONS_DIR", "/tmp/sessions"),
            ("CTFPILOT_MAX_TURNS", "not-a-number"),
        ]));

        assert_eq!(config.provider, ProviderKind::OpenAI);
        assert_eq!(config.api_key(), Some("sk-test"));
        assert_eq!(config.sessions_dir, PathBuf::from("/tmp/sessions"));
        assert_eq!(config.max_turns, 20);
    }

    #[test]
    fn test_toml_with_partial_fields() {
        let config: Config = toml::from_str(
            r#"
            provider = "openai"
            model = "gpt-4o-mini"
            pause_poll_ms = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.provider, ProviderKind::OpenAI);
        assert_eq!(config.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(config.sessions_dir, Config::default().sessions_dir);
        assert_eq!(
            config.orchestrator().pause_poll_interval,
            Duration::from_millis(50)
        );
    }

    #[test]
    fn test_from_file_reports_missing_file() {
        let err = Config::from_file(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read config"));
    }
}
