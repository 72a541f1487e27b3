//! LLM planner — builds HTTP requests and normalizes responses for both
//! Anthropic and OpenAI-compatible APIs into one ordered call list.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;
use crate::registry::catalog::{self, OpRegistryEntry};
use crate::settings::{LlmConfig, LlmProvider};

/// One planned operation invocation, as proposed by the model. Untyped until
/// validated against the operation's descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRequest {
    pub name: String,
    pub arguments: Value,
}

/// The planning collaborator: given a prompt and the operation catalog,
/// returns the ordered call plan for one query. Called exactly once per
/// query — there is no multi-turn planning loop.
pub trait Planner {
    fn propose(
        &self,
        prompt: &str,
        catalog: &[OpRegistryEntry],
    ) -> Result<Vec<CallRequest>, AppError>;
}

// ── Provider resolution ─────────────────────────────────────────

/// Resolved provider details ready for making an API call.
#[derive(Debug)]
pub struct ResolvedProvider {
    pub url: String,
    pub api_key: String,
    pub model: String,
    pub provider: LlmProvider,
}

impl ResolvedProvider {
    /// Resolve a provider config into concrete URL / key / model values.
    pub fn from_config(config: &LlmConfig) -> Result<Self, AppError> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::Configuration {
                message: "No API key configured. Set TABULA_API_KEY".to_string(),
            })?
            .to_string();

        match config.provider {
            LlmProvider::Anthropic => Ok(Self {
                url: "https://api.anthropic.com/v1/messages".to_string(),
                api_key,
                model: config
                    .model
                    .clone()
                    .unwrap_or_else(|| "claude-sonnet-4-20250514".to_string()),
                provider: LlmProvider::Anthropic,
            }),
            LlmProvider::OpenAiCompatible => {
                let base = config
                    .base_url
                    .as_deref()
                    .unwrap_or("https://api.openai.com/v1");
                let base = base.trim_end_matches('/');
                Ok(Self {
                    url: format!("{base}/chat/completions"),
                    api_key,
                    model: config.model.clone().unwrap_or_else(|| "gpt-4o".to_string()),
                    provider: LlmProvider::OpenAiCompatible,
                })
            }
        }
    }
}

// ── Request construction ────────────────────────────────────────

/// Build the HTTP request for the resolved provider. The prompt goes in as
/// the single user message; the catalog as the provider's tools array.
pub fn build_request(
    client: &reqwest::blocking::Client,
    provider: &ResolvedProvider,
    prompt: &str,
    tools: &Value,
) -> reqwest::blocking::RequestBuilder {
    match provider.provider {
        LlmProvider::Anthropic => {
            let body = serde_json::json!({
                "model": provider.model,
                "max_tokens": 4096,
                "tools": tools,
                "messages": [{ "role": "user", "content": prompt }],
            });
            client
                .post(&provider.url)
                .header("x-api-key", &provider.api_key)
                .header("anthropic-version", "2023-06-01")
                .header("content-type", "application/json")
                .json(&body)
        }
        LlmProvider::OpenAiCompatible => {
            let oai_tools: Vec<Value> = tools
                .as_array()
                .map(|arr| {
                    arr.iter()
                        .map(|tool| {
                            serde_json::json!({
                                "type": "function",
                                "function": {
                                    "name": tool.get("name").and_then(Value::as_str).unwrap_or(""),
                                    "description": tool.get("description").and_then(Value::as_str).unwrap_or(""),
                                    "parameters": tool.get("input_schema").unwrap_or(&Value::Null),
                                }
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            let body = serde_json::json!({
                "model": provider.model,
                "max_tokens": 4096,
                "tools": oai_tools,
                "tool_choice": "auto",
                "temperature": 0.0,
                "messages": [{ "role": "user", "content": prompt }],
            });
            client
                .post(&provider.url)
                .header("Authorization", format!("Bearer {}", provider.api_key))
                .header("content-type", "application/json")
                .json(&body)
        }
    }
}

// ── Response normalization ──────────────────────────────────────

/// Parse the provider's response JSON into the ordered call list, preserving
/// the order the model emitted.
pub fn parse_response(provider: LlmProvider, json: &Value) -> Result<Vec<CallRequest>, AppError> {
    match provider {
        LlmProvider::Anthropic => Ok(parse_anthropic_calls(json)),
        LlmProvider::OpenAiCompatible => parse_openai_calls(json),
    }
}

fn parse_anthropic_calls(json: &Value) -> Vec<CallRequest> {
    json.get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("tool_use"))
                .map(|b| CallRequest {
                    name: b
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    arguments: b.get("input").cloned().unwrap_or(Value::Null),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_openai_calls(json: &Value) -> Result<Vec<CallRequest>, AppError> {
    let message = json
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
        .and_then(|c| c.get("message"))
        .ok_or_else(|| AppError::Planning {
            message: "No choices in model response".to_string(),
        })?;

    let Some(tool_calls) = message.get("tool_calls").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    let mut calls = Vec::with_capacity(tool_calls.len());
    for tc in tool_calls {
        let func = tc.get("function").cloned().unwrap_or(Value::Null);
        let name = func
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let raw_args = func
            .get("arguments")
            .and_then(Value::as_str)
            .unwrap_or("{}");
        let arguments: Value =
            serde_json::from_str(raw_args).map_err(|e| AppError::Planning {
                message: format!("Arguments for '{name}' are not parseable: {e}"),
            })?;
        calls.push(CallRequest { name, arguments });
    }
    Ok(calls)
}

// ── The live planner ────────────────────────────────────────────

/// HTTP-backed planner. One blocking request per query; latency bounds and
/// retries are the provider's problem, not ours.
pub struct LlmPlanner {
    provider: ResolvedProvider,
    client: reqwest::blocking::Client,
}

impl LlmPlanner {
    pub fn new(config: &LlmConfig) -> Result<Self, AppError> {
        Ok(Self {
            provider: ResolvedProvider::from_config(config)?,
            client: reqwest::blocking::Client::new(),
        })
    }
}

impl Planner for LlmPlanner {
    fn propose(
        &self,
        prompt: &str,
        entries: &[OpRegistryEntry],
    ) -> Result<Vec<CallRequest>, AppError> {
        let tools = catalog::to_llm_tools(entries);
        let response = build_request(&self.client, &self.provider, prompt, &tools)
            .send()
            .map_err(|e| AppError::Planning {
                message: format!("Model request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(AppError::Planning {
                message: format!("Model API error {status}: {text}"),
            });
        }

        let json: Value = response.json().map_err(|e| AppError::Planning {
            message: format!("Failed to parse model response: {e}"),
        })?;
        parse_response(self.provider.provider, &json)
    }
}
