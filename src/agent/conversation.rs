//! Conversation state
//!
//! [`Conversation`] is the working message list of a single turn: append-only,
//! with tool results checked against the assistant request they answer.
//! [`History`] keeps messages across turns for the interactive shell.

use std::collections::VecDeque;

use crate::core::{Message, RelayError, Result, Role};

/// Working messages of one turn
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing message list, taken as is
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// Append a message.
    ///
    /// A `tool` message must answer a request of the latest assistant message,
    /// with only other tool results in between.
    pub fn push(&mut self, message: Message) -> Result<()> {
        if message.role == Role::Tool {
            self.check_tool_result(&message)?;
        }
        self.messages.push(message);
        Ok(())
    }

    fn check_tool_result(&self, message: &Message) -> Result<()> {
        let id = message
            .tool_call_id
            .as_deref()
            .ok_or_else(|| RelayError::validation("tool message without tool_call_id"))?;

        let assistant = self
            .messages
            .iter()
            .rev()
            .find(|m| m.role != Role::Tool)
            .filter(|m| m.role == Role::Assistant)
            .ok_or_else(|| {
                RelayError::validation(format!(
                    "tool result '{}' does not follow an assistant message",
                    id
                ))
            })?;

        if assistant.requests().iter().any(|call| call.id == id) {
            Ok(())
        } else {
            Err(RelayError::validation(format!(
                "tool result '{}' answers no request of the preceding assistant message",
                id
            )))
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

/// Message history kept between turns, with a size limit
#[derive(Debug, Clone)]
pub struct History {
    messages: VecDeque<Message>,
    max_length: usize,
}

impl History {
    pub fn new(max_length: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            max_length: max_length.max(1),
        }
    }

    /// Add a user message
    pub fn add_user(&mut self, content: impl Into<String>) {
        self.messages.push_back(Message::user(content));
        self.trim();
    }

    /// Replace the history with the messages a turn produced
    pub fn replace(&mut self, messages: Vec<Message>) {
        self.messages = messages
            .into_iter()
            .filter(|m| m.role != Role::System)
            .collect();
        self.trim();
    }

    /// Drop the oldest messages over the limit. Trimming restarts at a user
    /// message so no tool result loses its request.
    fn trim(&mut self) {
        while self.messages.len() > self.max_length {
            self.messages.pop_front();
            while self
                .messages
                .front()
                .is_some_and(|m| m.role != Role::User)
            {
                self.messages.pop_front();
            }
        }
    }

    /// Messages to send, with an optional system prompt first
    pub fn get_messages(&self, system_prompt: Option<&str>) -> Vec<Message> {
        let mut result = Vec::with_capacity(self.messages.len() + 1);
        if let Some(prompt) = system_prompt.filter(|p| !p.trim().is_empty()) {
            result.push(Message::system(prompt));
        }
        result.extend(self.messages.iter().cloned());
        result
    }

    /// Clear all history
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(200)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ToolCallRequest;

    fn assistant_calling(ids: &[&str]) -> Message {
        Message::assistant_with_tools(
            "",
            ids.iter()
                .map(|id| ToolCallRequest::new(*id, "list_files", "{}"))
                .collect(),
        )
    }

    #[test]
    fn test_tool_results_follow_their_request() {
        let mut conv = Conversation::from_messages(vec![Message::user("list")]);
        conv.push(assistant_calling(&["call_1", "call_2"])).unwrap();
        conv.push(Message::tool_result("call_1", "list_files", "a")).unwrap();
        conv.push(Message::tool_result("call_2", "list_files", "b")).unwrap();
        assert_eq!(conv.len(), 4);
    }

    #[test]
    fn test_unknown_tool_call_id_rejected() {
        let mut conv = Conversation::new();
        conv.push(assistant_calling(&["call_1"])).unwrap();
        let err = conv
            .push(Message::tool_result("call_9", "list_files", "a"))
            .unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
        assert_eq!(conv.len(), 1);
    }

    #[test]
    fn test_tool_result_after_user_rejected() {
        let mut conv = Conversation::new();
        conv.push(assistant_calling(&["call_1"])).unwrap();
        conv.push(Message::user("wait")).unwrap();
        assert!(conv
            .push(Message::tool_result("call_1", "list_files", "a"))
            .is_err());
    }

    #[test]
    fn test_history_trims_to_user_boundary() {
        let mut history = History::new(3);
        history.replace(vec![
            Message::system("sys"),
            Message::user("one"),
            assistant_calling(&["c"]),
            Message::tool_result("c", "list_files", "x"),
            Message::assistant("done"),
            Message::user("two"),
        ]);
        let messages = history.get_messages(None);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "two");
    }

    #[test]
    fn test_history_system_prompt_first() {
        let mut history = History::default();
        history.add_user("hi");
        let messages = history.get_messages(Some("be brief"));
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages.len(), 2);
    }
}
