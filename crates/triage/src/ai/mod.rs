//! AI provider abstraction and the Anthropic implementation.

pub mod anthropic;
pub mod provider;

pub use anthropic::AnthropicProvider;
pub use provider::{
    parse_ai_response, AIMessage, AIProvider, AIResponse, AIRole, GenerateOptions, MessageBuilder,
    TokenUsage,
};
