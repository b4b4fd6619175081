//! Conversation runtime: agent routing, turn orchestration, and the
//! session cache.
//!
//! [`TurnOrchestrator`] is the entry point. It drives one streaming turn
//! per chat at a time: routes the prompt to an agent (mentions first,
//! then optional model-based classification), streams the reply, folds
//! it into the ledger, and runs or parks requested tool calls. Partial
//! replies survive cancellation and mid-stream errors.

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod orchestrator;
pub mod prompt;
pub mod routing;
pub mod session_cache;
pub mod toolset;

pub use errors::{Result, RuntimeError};
pub use events::{EventEmitter, RuntimeEvent};
pub use orchestrator::{
    ToolConfirmation, ToolOutcome, ToolRunner, TurnEvent, TurnMetadata, TurnOrchestrator,
    TurnRequest,
};
pub use prompt::LongTextDocument;
pub use routing::{Mention, RoutingContext, parse_mentions, select_agent};
pub use session_cache::SessionCache;
