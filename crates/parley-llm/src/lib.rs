//! # parley-llm
//!
//! The model abstraction layer: a [`Model`] trait for streaming chat
//! generation and structured one-shot completions, a [`ModelRegistry`]
//! resolving agent model references, and an OpenAI-compatible HTTP client.
//!
//! Streamed chunks carry **cumulative** content: each chunk's `content` is
//! the full text produced so far, not a delta. The HTTP client accumulates
//! provider deltas before emitting.
//!
//! ## Crate Position
//!
//! Depends on: parley-core. Depended on by: parley-runtime.

#![deny(unsafe_code)]

pub mod errors;
pub mod model;
pub mod openai;
pub mod registry;
pub mod testutil;

pub use errors::{ModelError, ModelResult};
pub use model::{Model, ModelEventStream};
pub use openai::{OpenAiCompatConfig, OpenAiCompatModel};
pub use registry::ModelRegistry;
