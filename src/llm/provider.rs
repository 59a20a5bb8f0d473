use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{LlmConfig, LlmProviderType};

const MAX_TOKENS: u32 = 400;

/// Trait for LLM providers that can complete a text prompt
pub trait LlmProvider {
    fn complete(&self, prompt: &str) -> Result<String>;

    /// Get the provider name for display
    fn provider_name(&self) -> &'static str;
}

fn agent(timeout_secs: u64) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
}

// ============================================================================
// OpenAI-compatible provider (works with LM Studio, OpenAI, and compatible APIs)
// ============================================================================

pub struct OpenAICompatibleProvider {
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIChatResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
}

impl OpenAICompatibleProvider {
    pub fn new(endpoint: &str, model: &str, api_key: Option<&str>) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.map(|s| s.to_string()),
        }
    }
}

impl LlmProvider for OpenAICompatibleProvider {
    fn complete(&self, prompt: &str) -> Result<String> {
        let request = OpenAIChatRequest {
            model: self.model.clone(),
            messages: vec![OpenAIMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: MAX_TOKENS,
            temperature: 0.3,
        };

        let url = format!("{}/chat/completions", self.endpoint);
        let mut req = agent(120)
            .post(&url)
            .set("Content-Type", "application/json");

        if let Some(ref api_key) = self.api_key {
            req = req.set("Authorization", &format!("Bearer {}", api_key));
        }

        let response = req
            .send_json(&request)
            .map_err(|e| anyhow!("LLM request failed: {}", e))?;

        let chat_response: OpenAIChatResponse = response
            .into_json()
            .map_err(|e| anyhow!("Failed to parse LLM response: {}", e))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("No response from LLM"))
    }

    fn provider_name(&self) -> &'static str {
        "OpenAI-compatible"
    }
}

// ============================================================================
// Anthropic Claude provider
// ============================================================================

pub struct AnthropicProvider {
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicResponseContent>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponseContent {
    text: Option<String>,
}

impl AnthropicProvider {
    pub fn new(api_key: &str, model: Option<&str>) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.unwrap_or("claude-sonnet-4-20250514").to_string(),
        }
    }
}

impl LlmProvider for AnthropicProvider {
    fn complete(&self, prompt: &str) -> Result<String> {
        let request = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: MAX_TOKENS,
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let response = agent(120)
            .post("https://api.anthropic.com/v1/messages")
            .set("Content-Type", "application/json")
            .set("x-api-key", &self.api_key)
            .set("anthropic-version", "2023-06-01")
            .send_json(&request)
            .map_err(|e| anyhow!("Anthropic request failed: {}", e))?;

        let anthropic_response: AnthropicResponse = response
            .into_json()
            .map_err(|e| anyhow!("Failed to parse Anthropic response: {}", e))?;

        anthropic_response
            .content
            .into_iter()
            .find_map(|c| c.text)
            .ok_or_else(|| anyhow!("No response from Anthropic"))
    }

    fn provider_name(&self) -> &'static str {
        "Anthropic Claude"
    }
}

// ============================================================================
// Ollama provider
// ============================================================================

pub struct OllamaProvider {
    endpoint: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaProvider {
    pub fn new(endpoint: Option<&str>, model: &str) -> Self {
        Self {
            endpoint: endpoint
                .unwrap_or("http://localhost:11434")
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
        }
    }
}

impl LlmProvider for OllamaProvider {
    fn complete(&self, prompt: &str) -> Result<String> {
        let request = OllamaRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
        };

        let url = format!("{}/api/generate", self.endpoint);

        let response = agent(180)
            .post(&url)
            .set("Content-Type", "application/json")
            .send_json(&request)
            .map_err(|e| anyhow!("Ollama request failed: {}", e))?;

        let ollama_response: OllamaResponse = response
            .into_json()
            .map_err(|e| anyhow!("Failed to parse Ollama response: {}", e))?;

        Ok(ollama_response.response)
    }

    fn provider_name(&self) -> &'static str {
        "Ollama"
    }
}

/// Create a provider based on configuration
pub fn create_provider(config: &LlmConfig) -> Box<dyn LlmProvider> {
    match config.provider {
        LlmProviderType::LmStudio => Box::new(OpenAICompatibleProvider::new(
            &config.endpoint,
            &config.model,
            config.api_key.as_deref(),
        )),
        LlmProviderType::OpenAI => Box::new(OpenAICompatibleProvider::new(
            "https://api.openai.com/v1",
            &config.model,
            config.api_key.as_deref(),
        )),
        LlmProviderType::Anthropic => {
            let api_key = config.api_key.as_deref().unwrap_or("");
            Box::new(AnthropicProvider::new(api_key, Some(&config.model)))
        }
        LlmProviderType::Ollama => Box::new(OllamaProvider::new(
            Some(&config.endpoint),
            &config.model,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_picks_provider() {
        let mut config = LlmConfig::default();
        assert_eq!(create_provider(&config).provider_name(), "OpenAI-compatible");

        config.provider = LlmProviderType::Anthropic;
        config.api_key = Some("key".to_string());
        assert_eq!(create_provider(&config).provider_name(), "Anthropic Claude");

        config.provider = LlmProviderType::Ollama;
        assert_eq!(create_provider(&config).provider_name(), "Ollama");
    }

    #[test]
    fn test_openai_response_shape() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"- Hero changed"}}]}"#;
        let parsed: OpenAIChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("- Hero changed")
        );
    }

    #[test]
    fn test_anthropic_response_skips_non_text_blocks() {
        let body = r#"{"content":[{"type":"thinking"},{"type":"text","text":"- CTA moved"}]}"#;
        let parsed: AnthropicResponse = serde_json::from_str(body).unwrap();
        let text = parsed.content.into_iter().find_map(|c| c.text);
        assert_eq!(text.as_deref(), Some("- CTA moved"));
    }

    #[test]
    fn test_endpoint_trailing_slash_trimmed() {
        let provider = OpenAICompatibleProvider::new("http://127.0.0.1:1234/v1/", "m", None);
        assert_eq!(provider.endpoint, "http://127.0.0.1:1234/v1");
    }
}
