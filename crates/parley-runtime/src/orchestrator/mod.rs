//! Turn orchestration: streaming state machine, tool confirmation flow,
//! and detached title generation.

pub mod confirmation;
pub mod title;
pub mod turn;

pub use confirmation::{ToolConfirmation, ToolOutcome, ToolRunner};
pub use turn::{TurnEvent, TurnMetadata, TurnOrchestrator, TurnRequest};
