//! OpenAI-compatible chat-completions backend.

pub mod provider;
pub mod types;

pub use provider::{OpenAiCompatConfig, OpenAiCompatModel};
