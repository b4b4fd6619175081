//! Runtime error types.
//!
//! Routing fallback and tool execution failures are deliberately absent:
//! the former recovers silently to the main agent, the latter is recorded
//! on the tool-call row and the turn continues.

use parley_ledger::LedgerError;
use parley_llm::ModelError;
use thiserror::Error;

/// Errors surfaced by the turn orchestrator.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Ledger failure, including `BrokenFlow` ordering violations.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The model stream failed mid-turn. Partial content has already been
    /// persisted as a successful message when this is surfaced.
    #[error("generation failed: {0}")]
    Generation(#[from] ModelError),

    /// A second turn was requested on a chat that is already generating.
    #[error("chat {0} already has an active turn")]
    TurnActive(String),

    /// The requested chat does not exist.
    #[error("chat not found: {0}")]
    ChatNotFound(String),

    /// Roster or registry misconfiguration (no main agent, no model).
    #[error("runtime configuration error: {0}")]
    Configuration(String),
}

/// Convenience result alias for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
