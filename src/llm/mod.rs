//! LLM integration module.
//!
//! Provides an OpenAI-compatible client for LLM API calls, the
//! [`ChatBackend`] seam the grader talks through, and the grading prompts.

mod client;
mod prompts;

pub use client::{
    ChatBackend, ChatRequest, JsonSchemaFormat, LlmClient, LlmResponse, Message, ResponseFormat,
    Role, TokenUsage,
};
pub use prompts::Prompts;
