//! Role-tagged prompt messages sent to a model.

use serde::{Deserialize, Serialize};

/// Role of a prompt message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptRole {
    /// Instruction / configuration preamble.
    System,
    /// User turn.
    User,
    /// Prior assistant turn.
    Assistant,
}

/// One role-tagged text block in a model prompt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    /// Role tag.
    pub role: PromptRole,
    /// Plain text content.
    pub content: String,
}

impl PromptMessage {
    /// Build a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::System,
            content: content.into(),
        }
    }

    /// Build a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::User,
            content: content.into(),
        }
    }

    /// Build an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::Assistant,
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_role() {
        assert_eq!(PromptMessage::system("a").role, PromptRole::System);
        assert_eq!(PromptMessage::user("b").role, PromptRole::User);
        assert_eq!(PromptMessage::assistant("c").role, PromptRole::Assistant);
    }

    #[test]
    fn serializes_snake_case_role() {
        let json = serde_json::to_value(PromptMessage::user("hi")).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "hi");
    }
}
