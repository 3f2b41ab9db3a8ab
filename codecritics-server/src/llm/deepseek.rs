//! DeepSeek provider (OpenAI-compatible chat completions API).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{
    error_from_status, parse_retry_after, CompletionRequest, LlmError, ProviderClient, Role,
};

const DEEPSEEK_API_BASE: &str = "https://api.deepseek.com";
const DEFAULT_MODEL: &str = "deepseek-chat";

pub struct DeepseekClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl DeepseekClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEEPSEEK_API_BASE.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<ApiMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionsResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

fn to_api_messages(request: &CompletionRequest) -> Vec<ApiMessage> {
    let mut messages = vec![ApiMessage {
        role: "system",
        content: request.system.clone(),
    }];
    messages.extend(request.messages.iter().map(|m| ApiMessage {
        role: match m.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        },
        content: m.content.clone(),
    }));
    messages
}

#[async_trait]
impl ProviderClient for DeepseekClient {
    fn name(&self) -> &'static str {
        "deepseek"
    }

    async fn chat_complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = ChatCompletionsRequest {
            model: self.model.clone(),
            messages: to_api_messages(request),
            max_tokens: request.max_output_tokens,
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(error_from_status(status, body, retry_after));
        }

        let parsed: ChatCompletionsResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.is_empty())
            .ok_or_else(|| {
                LlmError::InvalidResponse("DeepSeek returned no completion text".to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatMessage;

    #[test]
    fn test_system_prompt_becomes_first_message() {
        let request = CompletionRequest::new(
            "review carefully",
            vec![ChatMessage::user("the diff"), ChatMessage::assistant("ack")],
        );
        let messages = to_api_messages(&request);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[0].content, "review carefully");
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[2].role, "assistant");
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{
            "choices": [ { "message": { "role": "assistant", "content": "looks fine" } } ]
        }"#;
        let parsed: ChatCompletionsResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("looks fine")
        );
    }
}
