use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Chat message in OpenAI format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

pub const JSON_MIME_TYPE: &str = "application/json";

/// One text-generation call.
///
/// `history` holds earlier turns and is sent before `messages`. Unset
/// sampling fields fall back to the backend's configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub top_k: Option<u32>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub response_mime_type: Option<String>,
}

impl LlmRequest {
    /// Single user turn.
    pub fn prompt(text: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::user(text)],
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = Some(max_output_tokens);
        self
    }

    /// Ask the backend for a JSON object reply.
    pub fn json(mut self) -> Self {
        self.response_mime_type = Some(JSON_MIME_TYPE.to_string());
        self
    }

    pub fn wants_json(&self) -> bool {
        self.response_mime_type.as_deref() == Some(JSON_MIME_TYPE)
    }

    /// System prompt, history, then the current messages.
    pub fn conversation(&self) -> Vec<ChatMessage> {
        let mut out = Vec::with_capacity(self.history.len() + self.messages.len() + 1);
        if let Some(system) = &self.system_prompt {
            out.push(ChatMessage::system(system.clone()));
        }
        out.extend(self.history.iter().cloned());
        out.extend(self.messages.iter().cloned());
        out
    }

    /// Text of the last user message, for logs and test assertions.
    pub fn last_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_conversation_order() {
        let req = LlmRequest::prompt("now")
            .with_system("be brief")
            .with_history(vec![ChatMessage::user("before"), ChatMessage::assistant("ok")]);

        let roles: Vec<Role> = req.conversation().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
        assert_eq!(req.last_user_text(), Some("now"));
    }

    #[test]
    fn test_json_flag() {
        assert!(!LlmRequest::prompt("x").wants_json());
        assert!(LlmRequest::prompt("x").json().wants_json());
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_value(ChatMessage::system("s")).unwrap();
        assert_eq!(json["role"], "system");
    }
}
