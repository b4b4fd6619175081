//! # parley-core
//!
//! Foundation types and shared vocabulary for the Parley conversation core.
//!
//! - **IDs**: [`ids`] — prefixed UUIDv7 string identifiers (`chat_…`, `msg_…`)
//! - **Roles / statuses**: [`types::MessageRole`], [`types::MessageStatus`],
//!   [`types::ToolCallStatus`]
//! - **Prompt messages**: [`prompt::PromptMessage`] — role-tagged text sent
//!   to a model
//! - **Stream events**: [`events::ModelEvent`] — cumulative content chunks
//!   and tool-call requests emitted during generation
//! - **Tool definitions**: [`tools::ToolDefinition`] — the roster shape a
//!   model receives
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other parley crates.

#![deny(unsafe_code)]

pub mod events;
pub mod ids;
pub mod prompt;
pub mod tools;
pub mod types;
