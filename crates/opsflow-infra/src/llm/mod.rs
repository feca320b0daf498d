//! LLM client implementations for `llm` steps.

pub mod openai_compat;

pub use openai_compat::{ChatCompletionsClient, ChatClientError};
