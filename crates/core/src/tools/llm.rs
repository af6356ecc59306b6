// Text generation tool and the client it delegates to

use super::{non_empty, ParameterSpec, Tool, ToolContext, ToolOutput, ToolSchema};
use crate::error::ToolError;
use crate::types::{Parameters, RunState};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const GENERATE_TEXT: &str = "generate_text";

/// External text-generation capability
#[async_trait::async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, api_key: &str, prompt: &str, timeout: Duration) -> Result<String>;
}

/// Settings for an OpenAI-compatible chat completions endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
        }
    }
}

/// Chat completions client. The API key comes from each request.
pub struct OpenAiGenerator {
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl OpenAiGenerator {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("toolgraph/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait::async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn generate(&self, api_key: &str, prompt: &str, timeout: Duration) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response: ChatResponse = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .context("Chat completion request failed")?
            .error_for_status()
            .context("Chat completion returned an error status")?
            .json()
            .await
            .context("Failed to decode chat completion")?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .context("Chat completion contained no message")
    }
}

/// Generates text from a prompt, optionally grounded on `auxiliary_context`
pub struct GenerateTextTool {
    generator: Arc<dyn TextGenerator>,
}

impl GenerateTextTool {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }
}

/// Prefix the prompt with the grounding block when there is context
fn compose_prompt(prompt: &str, context: &str) -> String {
    if context.trim().is_empty() {
        prompt.to_string()
    } else {
        format!("Context: {}\n\nQuestion: {}", context, prompt)
    }
}

#[async_trait::async_trait]
impl Tool for GenerateTextTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: GENERATE_TEXT.to_string(),
            description: "Generate text using an LLM based on a prompt.".to_string(),
            parameters: vec![
                ParameterSpec::text("prompt", "Prompt"),
                ParameterSpec::text("apiKey", "API Key"),
            ],
        }
    }

    async fn invoke(
        &self,
        mut state: RunState,
        parameters: &Parameters,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let api_key = non_empty(parameters, "apiKey")
            .or_else(|| non_empty(parameters, "api_key"))
            .or_else(|| Some(state.api_key.as_str()).filter(|k| !k.trim().is_empty()))
            .ok_or_else(|| ToolError::MissingParameter("apiKey".into()))?
            .to_string();

        let prompt = non_empty(parameters, "prompt").unwrap_or(state.primary.as_str());
        let prompt = compose_prompt(prompt, &state.auxiliary_context);

        tracing::debug!("node {} generating text ({} prompt chars)", ctx.node_id, prompt.len());

        let text = self
            .generator
            .generate(&api_key, &prompt, ctx.timeout)
            .await
            .map_err(|e| ToolError::Failed(format!("text generation failed: {:#}", e)))?;

        state.api_key = api_key;
        Ok(ToolOutput::new(state, text))
    }
}
