//! LLM client port used by `llm` steps.
//!
//! Prompt logic is owned by the embedding application; the engine only needs
//! to hand a resolved prompt to a client and store the response.

pub mod client;

pub use client::{LlmClient, LlmError, LlmRequest, UnconfiguredLlm};
