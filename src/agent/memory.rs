//! Conversation memory
//!
//! Append-only message log owned by one agent, with an optional cap on how
//! many messages are retained.

use std::collections::VecDeque;

use crate::core::{Message, Role};

/// Ordered message history of a single agent
#[derive(Debug, Clone, Default)]
pub struct Memory {
    /// Messages in conversation order
    messages: VecDeque<Message>,
    /// Maximum retained messages, `None` for unbounded
    max_messages: Option<usize>,
}

impl Memory {
    /// Unbounded memory
    pub fn new() -> Self {
        Self::default()
    }

    /// Memory that keeps at most `max_messages` (0 means unbounded)
    pub fn with_capacity_limit(max_messages: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            max_messages: (max_messages > 0).then_some(max_messages),
        }
    }

    /// Append a message, trimming the oldest entries when over the cap
    ///
    /// The latest assistant turn and everything after it are never trimmed,
    /// so memory can briefly exceed the cap while tool results come in.
    pub fn push(&mut self, message: Message) {
        self.messages.push_back(message);
        self.trim();
    }

    fn trim(&mut self) {
        let Some(limit) = self.max_messages else {
            return;
        };
        let mut keep_from = self
            .messages
            .iter()
            .rposition(|m| m.role == Role::Assistant)
            .unwrap_or(self.messages.len().saturating_sub(1));
        while self.messages.len() > limit && keep_from > 0 {
            self.messages.pop_front();
            keep_from -= 1;
        }
        // A tool result must never lead: its assistant turn is gone
        while keep_from > 0 && self.messages.front().is_some_and(|m| m.role == Role::Tool) {
            self.messages.pop_front();
            keep_from -= 1;
        }
    }

    /// All messages in order
    pub fn messages(&self) -> Vec<Message> {
        self.messages.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.back()
    }

    /// Most recent message with the given role
    pub fn last_with_role(&self, role: Role) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == role)
    }

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ToolCall;

    #[test]
    fn test_memory_basic() {
        let mut memory = Memory::new();
        memory.push(Message::user("Hello"));
        memory.push(Message::assistant("Hi there!"));

        assert_eq!(memory.len(), 2);
        assert_eq!(memory.last_with_role(Role::User).unwrap().text(), "Hello");
        assert_eq!(memory.last().unwrap().role, Role::Assistant);
    }

    #[test]
    fn test_memory_limit() {
        let mut memory = Memory::with_capacity_limit(3);
        memory.push(Message::user("1"));
        memory.push(Message::assistant("2"));
        memory.push(Message::user("3"));
        memory.push(Message::assistant("4"));

        assert_eq!(memory.len(), 3);
        assert_eq!(memory.messages()[0].text(), "2");
    }

    #[test]
    fn test_trim_keeps_the_turn_in_flight() {
        let mut memory = Memory::with_capacity_limit(2);
        memory.push(Message::user("go"));
        memory.push(Message::from_tool_calls(
            None,
            vec![
                ToolCall::new("call_1", "a", "{}"),
                ToolCall::new("call_2", "b", "{}"),
            ],
        ));
        memory.push(Message::tool("one", "call_1", "a"));
        memory.push(Message::tool("two", "call_2", "b"));

        // Over the cap, but the assistant turn and its results all stay
        let roles: Vec<Role> = memory.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::Assistant, Role::Tool, Role::Tool]);

        // The next assistant turn lets the old one go, results included
        memory.push(Message::assistant("done"));
        assert_eq!(memory.len(), 1);
        assert_eq!(memory.last().unwrap().text(), "done");
    }

    #[test]
    fn test_trim_drops_orphaned_tool_results() {
        let mut memory = Memory::with_capacity_limit(3);
        memory.push(Message::from_tool_calls(
            None,
            vec![ToolCall::new("call_1", "a", "{}")],
        ));
        memory.push(Message::tool("one", "call_1", "a"));
        memory.push(Message::user("next"));
        memory.push(Message::assistant("reply"));

        // Trimming the call would leave its result leading
        let texts: Vec<&str> = memory.iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["next", "reply"]);
    }

    #[test]
    fn test_zero_limit_is_unbounded() {
        let mut memory = Memory::with_capacity_limit(0);
        for i in 0..100 {
            memory.push(Message::user(i.to_string()));
        }
        assert_eq!(memory.len(), 100);

        memory.clear();
        assert!(memory.is_empty());
    }
}
