//! Role and status enums shared across the ledger and runtime.

use serde::{Deserialize, Serialize};

/// Who authored a ledger message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// End-user input.
    User,
    /// Model output (including synthesized tool-call hosts).
    Assistant,
}

impl MessageRole {
    /// Stable string form used in SQL columns.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Parse from the SQL column form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// Lifecycle state of a ledger message.
///
/// At most one `Pending` assistant message exists per chat — the "open"
/// turn. `Error` rows are skipped when checking the append invariant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Open assistant placeholder (thought received, answer not yet final).
    Pending,
    /// Completed turn content.
    Success,
    /// Turn that failed irrecoverably.
    Error,
}

impl MessageStatus {
    /// Stable string form used in SQL columns.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    /// Parse from the SQL column form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Lifecycle state of a tool call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    /// Waiting for the user to approve or decline.
    PendingConfirmation,
    /// Approved implicitly (confirmation bypass) — will run without asking.
    ReadyToBeExecuted,
    /// Ran to completion; `function_return` holds the result.
    Executed,
    /// User declined.
    Rejected,
    /// Execution failed; `function_return` holds the failure payload.
    Error,
}

impl ToolCallStatus {
    /// Stable string form used in SQL columns.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PendingConfirmation => "pending_confirmation",
            Self::ReadyToBeExecuted => "ready_to_be_executed",
            Self::Executed => "executed",
            Self::Rejected => "rejected",
            Self::Error => "error",
        }
    }

    /// Parse from the SQL column form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending_confirmation" => Some(Self::PendingConfirmation),
            "ready_to_be_executed" => Some(Self::ReadyToBeExecuted),
            "executed" => Some(Self::Executed),
            "rejected" => Some(Self::Rejected),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Whether the call is still awaiting resolution.
    pub fn is_unresolved(self) -> bool {
        matches!(self, Self::PendingConfirmation | Self::ReadyToBeExecuted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips() {
        for role in [MessageRole::User, MessageRole::Assistant] {
            assert_eq!(MessageRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(MessageRole::parse("system"), None);
    }

    #[test]
    fn status_round_trips() {
        for status in [
            MessageStatus::Pending,
            MessageStatus::Success,
            MessageStatus::Error,
        ] {
            assert_eq!(MessageStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn tool_call_status_round_trips() {
        for status in [
            ToolCallStatus::PendingConfirmation,
            ToolCallStatus::ReadyToBeExecuted,
            ToolCallStatus::Executed,
            ToolCallStatus::Rejected,
            ToolCallStatus::Error,
        ] {
            assert_eq!(ToolCallStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn unresolved_statuses() {
        assert!(ToolCallStatus::PendingConfirmation.is_unresolved());
        assert!(ToolCallStatus::ReadyToBeExecuted.is_unresolved());
        assert!(!ToolCallStatus::Executed.is_unresolved());
        assert!(!ToolCallStatus::Rejected.is_unresolved());
        assert!(!ToolCallStatus::Error.is_unresolved());
    }
}
