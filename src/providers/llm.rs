use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

impl Pricing {
    pub const FREE: Pricing = Pricing {
        input_per_mtok: 0.0,
        output_per_mtok: 0.0,
    };
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Completion {
    pub fn cost_usd(&self, pricing: Pricing) -> f64 {
        (self.input_tokens as f64 * pricing.input_per_mtok
            + self.output_tokens as f64 * pricing.output_per_mtok)
            / 1_000_000.0
    }
}

#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn complete(&self, messages: Vec<Message>) -> Result<Completion>;

    fn model(&self) -> &str;

    fn pricing(&self) -> Pricing {
        Pricing::FREE
    }
}

#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    api_key: String,
    model: String,
    max_tokens: u32,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

impl AnthropicProvider {
    pub const DEFAULT_MODEL: &'static str = "claude-sonnet-4-5";

    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: Self::DEFAULT_MODEL.to_string(),
            max_tokens: 4096,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    async fn complete(&self, messages: Vec<Message>) -> Result<Completion> {
        let system_msg = messages
            .iter()
            .find(|m| m.role == "system")
            .map(|m| m.content.clone());

        let api_messages: Vec<AnthropicMessage> = messages
            .into_iter()
            .filter(|m| m.role != "system")
            .map(|m| AnthropicMessage {
                role: m.role,
                content: m.content,
            })
            .collect();

        let request = AnthropicRequest {
            model: self.model.clone(),
            messages: api_messages,
            max_tokens: self.max_tokens,
            system: system_msg,
        };

        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await?;
            anyhow::bail!("Anthropic API error {}: {}", status, body);
        }

        let result: AnthropicResponse = response.json().await?;
        let text: Vec<String> = result.content.into_iter().map(|c| c.text).collect();
        if text.is_empty() {
            anyhow::bail!("No content in response");
        }

        Ok(Completion {
            text: text.join("\n"),
            input_tokens: result.usage.input_tokens,
            output_tokens: result.usage.output_tokens,
        })
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn pricing(&self) -> Pricing {
        Pricing {
            input_per_mtok: 3.0,
            output_per_mtok: 15.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAIProvider {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: OpenAIUsage,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAIUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl OpenAIProvider {
    pub const DEFAULT_MODEL: &'static str = "gpt-4o";

    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: Self::DEFAULT_MODEL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    async fn complete(&self, messages: Vec<Message>) -> Result<Completion> {
        let api_messages: Vec<OpenAIMessage> = messages
            .into_iter()
            .map(|m| OpenAIMessage {
                role: m.role,
                content: m.content,
            })
            .collect();

        let request = OpenAIRequest {
            model: self.model.clone(),
            messages: api_messages,
            max_tokens: Some(4096),
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await?;
            anyhow::bail!("OpenAI API error {}: {}", status, body);
        }

        let result: OpenAIResponse = response.json().await?;
        let text = result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("No choices in response"))?;

        Ok(Completion {
            text,
            input_tokens: result.usage.prompt_tokens,
            output_tokens: result.usage.completion_tokens,
        })
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn pricing(&self) -> Pricing {
        Pricing {
            input_per_mtok: 2.5,
            output_per_mtok: 10.0,
        }
    }
}

/// Replays canned replies in order, then repeats the last one.
pub struct MockLLMProvider {
    replies: Mutex<VecDeque<Result<String, String>>>,
    last: Mutex<String>,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl MockLLMProvider {
    pub fn new() -> Self {
        Self::with_replies(vec!["TASK COMPLETE".to_string()])
    }

    pub fn with_replies(replies: Vec<String>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(Ok).collect()),
            last: Mutex::new(String::new()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Queues a failing completion.
    pub fn then_fail(self, error: impl Into<String>) -> Self {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(Err(error.into()));
        }
        self
    }

    /// Conversations passed to `complete`, in call order.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Default for MockLLMProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LLMProvider for MockLLMProvider {
    async fn complete(&self, messages: Vec<Message>) -> Result<Completion> {
        let input_tokens: u64 = messages.iter().map(|m| m.content.len() as u64).sum();
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(messages);
        }

        let next = self
            .replies
            .lock()
            .map_err(|_| anyhow::anyhow!("mock replies poisoned"))?
            .pop_front();
        let mut last = self
            .last
            .lock()
            .map_err(|_| anyhow::anyhow!("mock replies poisoned"))?;

        let text = match next {
            Some(Ok(text)) => {
                *last = text.clone();
                text
            }
            Some(Err(error)) => anyhow::bail!(error),
            None => last.clone(),
        };

        Ok(Completion {
            output_tokens: text.len() as u64,
            text,
            input_tokens,
        })
    }

    fn model(&self) -> &str {
        "mock"
    }

    fn pricing(&self) -> Pricing {
        Pricing {
            input_per_mtok: 1.0,
            output_per_mtok: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let sys = Message::system("test");
        assert_eq!(sys.role, "system");
        assert_eq!(sys.content, "test");

        let user = Message::user("hello");
        assert_eq!(user.role, "user");

        let assistant = Message::assistant("hi");
        assert_eq!(assistant.role, "assistant");
    }

    #[test]
    fn test_provider_creation() {
        let anthropic = AnthropicProvider::new("test-key".to_string());
        assert_eq!(anthropic.model(), AnthropicProvider::DEFAULT_MODEL);

        let openai = OpenAIProvider::new("test-key".to_string()).with_model("gpt-4o-mini".into());
        assert_eq!(openai.model(), "gpt-4o-mini");
    }

    #[test]
    fn test_completion_cost() {
        let completion = Completion {
            text: String::new(),
            input_tokens: 1_000_000,
            output_tokens: 500_000,
        };
        let pricing = Pricing {
            input_per_mtok: 3.0,
            output_per_mtok: 15.0,
        };
        assert!((completion.cost_usd(pricing) - 10.5).abs() < 1e-9);
        assert_eq!(completion.cost_usd(Pricing::FREE), 0.0);
    }

    #[tokio::test]
    async fn test_mock_provider_replays_then_repeats() {
        let provider =
            MockLLMProvider::with_replies(vec!["one".to_string(), "two".to_string()]);

        let mut texts = Vec::new();
        for _ in 0..3 {
            texts.push(provider.complete(vec![Message::user("x")]).await.unwrap().text);
        }
        assert_eq!(texts, vec!["one", "two", "two"]);
        assert_eq!(provider.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_mock_provider_failure() {
        let provider = MockLLMProvider::with_replies(vec![]).then_fail("overloaded");
        let err = provider.complete(vec![]).await.unwrap_err();
        assert!(err.to_string().contains("overloaded"));
    }
}
