//! AI provider trait and common types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{TriageError, TriageResult};

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AIRole {
    System,
    User,
    Assistant,
}

/// A message in a conversation with an AI model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AIMessage {
    pub role: AIRole,
    pub content: String,
}

impl AIMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: AIRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: AIRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: AIRole::Assistant,
            content: content.into(),
        }
    }
}

/// Token usage information from an AI response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

/// Response from an AI model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AIResponse {
    pub text: String,
    pub usage: TokenUsage,
    pub model: String,
    pub provider: String,
}

/// Options for text generation.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Temperature for sampling (0.0 to 1.0)
    pub temperature: Option<f32>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Stop sequences
    pub stop_sequences: Option<Vec<String>>,
}

/// Trait for AI providers.
#[async_trait]
pub trait AIProvider: Send + Sync {
    /// Provider name (e.g., "anthropic").
    fn name(&self) -> &'static str;

    /// Environment variable holding the API key.
    fn api_key_env_var(&self) -> &'static str;

    /// Whether the provider has credentials.
    fn is_configured(&self) -> bool;

    /// Generate text from messages.
    async fn generate_text(
        &self,
        model: &str,
        messages: &[AIMessage],
        options: &GenerateOptions,
    ) -> TriageResult<AIResponse>;
}

/// Parse a structured object out of an AI response.
///
/// Standalone function rather than a trait method because generic methods
/// are not dyn-compatible. Strips markdown code fences the model sometimes
/// wraps JSON in.
pub fn parse_ai_response<T: for<'de> Deserialize<'de>>(response: &AIResponse) -> TriageResult<T> {
    let text = response.text.trim();
    serde_json::from_str(strip_json_fences(text)).map_err(|e| TriageError::AiResponseParse {
        reason: format!("Failed to parse AI response as JSON: {e}. Response: {text}"),
    })
}

/// Remove a surrounding ```json / ``` fence, if present.
#[must_use]
pub fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if text.starts_with("```json") {
        text.strip_prefix("```json")
            .and_then(|s| s.strip_suffix("```"))
            .unwrap_or(text)
            .trim()
    } else if text.starts_with("```") {
        text.strip_prefix("```")
            .and_then(|s| s.strip_suffix("```"))
            .unwrap_or(text)
            .trim()
    } else {
        text
    }
}

/// Builder for constructing AI messages.
#[derive(Debug, Default)]
pub struct MessageBuilder {
    messages: Vec<AIMessage>,
}

impl MessageBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn system(mut self, content: impl Into<String>) -> Self {
        self.messages.push(AIMessage::system(content));
        self
    }

    #[must_use]
    pub fn user(mut self, content: impl Into<String>) -> Self {
        self.messages.push(AIMessage::user(content));
        self
    }

    #[must_use]
    pub fn assistant(mut self, content: impl Into<String>) -> Self {
        self.messages.push(AIMessage::assistant(content));
        self
    }

    #[must_use]
    pub fn build(self) -> Vec<AIMessage> {
        self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn response(text: &str) -> AIResponse {
        AIResponse {
            text: text.to_string(),
            usage: TokenUsage::default(),
            model: "test".to_string(),
            provider: "test".to_string(),
        }
    }

    #[test]
    fn parses_bare_json() {
        let parsed: Value = parse_ai_response(&response(r#"{"tool": "k8s_logs"}"#)).unwrap();
        assert_eq!(parsed["tool"], "k8s_logs");
    }

    #[test]
    fn strips_json_code_fences() {
        let parsed: Value =
            parse_ai_response(&response("```json\n{\"tool\": \"k8s_logs\"}\n```")).unwrap();
        assert_eq!(parsed["tool"], "k8s_logs");

        let parsed: Value =
            parse_ai_response(&response("```\n{\"tool\": \"k8s_logs\"}\n```")).unwrap();
        assert_eq!(parsed["tool"], "k8s_logs");
    }

    #[test]
    fn non_json_is_a_parse_error() {
        let result: TriageResult<Value> = parse_ai_response(&response("I think we are done."));
        assert!(matches!(
            result,
            Err(TriageError::AiResponseParse { .. })
        ));
    }

    #[test]
    fn builder_preserves_order() {
        let messages = MessageBuilder::new()
            .system("sys")
            .user("hi")
            .assistant("hello")
            .build();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, AIRole::System);
        assert_eq!(messages[2].role, AIRole::Assistant);
    }
}
