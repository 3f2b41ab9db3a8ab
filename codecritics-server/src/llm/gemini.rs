//! Google Gemini provider.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{
    error_from_status, parse_retry_after, ChatMessage, CompletionRequest, LlmError,
    ProviderClient, Role,
};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";

pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model: DEFAULT_MODEL.to_string(),
            base_url: GEMINI_API_BASE.to_string(),
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
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    system_instruction: SystemInstruction,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

/// Gemini uses "model" where the chat convention says "assistant".
fn gemini_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "model",
    }
}

fn to_contents(messages: &[ChatMessage]) -> Vec<Content> {
    messages
        .iter()
        .map(|m| Content {
            role: gemini_role(m.role).to_string(),
            parts: vec![Part {
                text: m.content.clone(),
            }],
        })
        .collect()
}

#[async_trait]
impl ProviderClient for GeminiClient {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn chat_complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        let body = GenerateRequest {
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: request.system.clone(),
                }],
            },
            contents: to_contents(&request.messages),
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens,
            },
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(error_from_status(status, body, retry_after));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let text: String = parsed
            .candidates
            .unwrap_or_default()
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .map(|p| p.text)
            .collect();

        if text.is_empty() {
            return Err(LlmError::InvalidResponse(
                "Gemini returned no candidate text".to_string(),
            ));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_map_to_gemini_names() {
        assert_eq!(gemini_role(Role::User), "user");
        assert_eq!(gemini_role(Role::Assistant), "model");
    }

    #[test]
    fn test_request_serialization_shape() {
        let req = GenerateRequest {
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: "be terse".to_string(),
                }],
            },
            contents: to_contents(&[ChatMessage::user("hello")]),
            generation_config: GenerationConfig {
                temperature: 0.1,
                max_output_tokens: 100,
            },
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "be terse");
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 100);
    }

    #[test]
    fn test_response_text_extraction() {
        let raw = r#"{
            "candidates": [
                { "content": { "role": "model", "parts": [ {"text": "part one "}, {"text": "part two"} ] } }
            ]
        }"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        let text: String = parsed
            .candidates
            .unwrap()
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .map(|p| p.text)
            .collect();
        assert_eq!(text, "part one part two");
    }
}
