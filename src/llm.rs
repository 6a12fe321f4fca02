use crate::config::AppConfig;
use anyhow::{anyhow, Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Sampling temperature for answers; kept low so answers stick to the context
pub const ANSWER_TEMPERATURE: f32 = 0.1;

const APP_REFERER: &str = "https://github.com/syllabus-ai";
const APP_TITLE: &str = "Syllabus AI Assistant";

/// A remote model that turns a prompt into text
pub trait LanguageModel {
    /// Send a single system prompt and return the model's reply
    fn complete(&self, system_prompt: &str) -> impl Future<Output = Result<String>> + Send;
}

/// Configuration for the OpenRouter API
#[derive(Clone)]
pub struct OpenRouterConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl OpenRouterConfig {
    pub fn from_app_config(config: &AppConfig) -> Result<Self> {
        let api_key = config
            .openrouter_api_key
            .clone()
            .context("OPENROUTER_API_KEY must be set when using OpenRouter LLM")?;

        Ok(OpenRouterConfig {
            api_key,
            base_url: config.openrouter_base_url.clone(),
            model: config.llm_model.clone(),
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// Client for the OpenRouter chat completions endpoint
#[derive(Clone)]
pub struct OpenRouterClient {
    config: OpenRouterConfig,
    client: reqwest::Client,
}

impl OpenRouterClient {
    /// Create a new OpenRouter client
    pub fn new(config: OpenRouterConfig) -> Self {
        let client = reqwest::Client::new();
        OpenRouterClient { config, client }
    }

    /// Generate text from a list of chat messages
    pub async fn generate_text(
        &self,
        messages: Vec<Message<'_>>,
        temperature: f32,
    ) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages,
            temperature,
        };

        let url = self.config.completions_url();
        debug!("Requesting completion from {} ({})", url, self.config.model);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .header("HTTP-Referer", APP_REFERER)
            .header("X-Title", APP_TITLE)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!("API request failed: {} {}", status, error_text));
        }

        let response_data: ChatResponse = response
            .json()
            .await
            .context("Failed to decode completion response")?;

        // Extract the generated text from the response
        response_data
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("No response generated"))
    }
}

impl LanguageModel for OpenRouterClient {
    async fn complete(&self, system_prompt: &str) -> Result<String> {
        self.generate_text(
            vec![Message::new("system", system_prompt)],
            ANSWER_TEMPERATURE,
        )
        .await
    }
}

#[derive(Serialize, Debug)]
pub struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> Message<'a> {
    pub fn new(role: &'static str, content: &'a str) -> Self {
        Message { role, content }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    content: Option<String>,
}
