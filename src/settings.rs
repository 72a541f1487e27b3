//! LLM provider configuration, resolved from environment variables.

use std::env;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Which LLM provider to use for planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LlmProvider {
    Anthropic,
    OpenAiCompatible,
}

impl LlmProvider {
    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Ok(LlmProvider::Anthropic),
            "openai" | "openai-compatible" | "openai_compatible" => {
                Ok(LlmProvider::OpenAiCompatible)
            }
            other => Err(AppError::Configuration {
                message: format!(
                    "Unknown provider '{other}'. Supported: 'anthropic', 'openai-compatible'"
                ),
            }),
        }
    }
}

/// Full configuration for the chosen LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<String>,
    /// Base URL for OpenAI-compatible providers (ignored for Anthropic).
    pub base_url: Option<String>,
    /// Model override. None = use provider default.
    pub model: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Anthropic,
            api_key: None,
            base_url: None,
            model: None,
        }
    }
}

fn non_empty(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl LlmConfig {
    /// Resolve the configuration from `TABULA_*` environment variables:
    /// `TABULA_PROVIDER`, `TABULA_API_KEY`, `TABULA_BASE_URL`, `TABULA_MODEL`.
    pub fn from_env() -> Result<Self, AppError> {
        let provider = match non_empty("TABULA_PROVIDER") {
            Some(raw) => LlmProvider::parse(&raw)?,
            None => LlmProvider::Anthropic,
        };
        Ok(Self {
            provider,
            api_key: non_empty("TABULA_API_KEY"),
            base_url: non_empty("TABULA_BASE_URL"),
            model: non_empty("TABULA_MODEL"),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parse() {
        assert_eq!(
            LlmProvider::parse("Anthropic").unwrap(),
            LlmProvider::Anthropic
        );
        assert_eq!(
            LlmProvider::parse("openai-compatible").unwrap(),
            LlmProvider::OpenAiCompatible
        );
        let err = LlmProvider::parse("groq!").unwrap_err();
        assert!(matches!(err, AppError::Configuration { .. }));
    }

    #[test]
    fn test_default_config_has_no_key() {
        let config = LlmConfig::default();
        assert_eq!(config.provider, LlmProvider::Anthropic);
        assert!(config.api_key.is_none());
    }
}
