// Chat-completion relay and the prompt templates sent through it.

pub mod client;
pub mod prompt;

pub use client::{ChatCompletion, ChatRequest, LlmClient, LlmError, OpenAiClient};
