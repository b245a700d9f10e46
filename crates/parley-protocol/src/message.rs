//! The directed chat message.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A chat message addressed from one user to another.
///
/// Messages are immutable once built: routing only ever moves them, it never
/// rewrites a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Message {
    source: String,
    destination: String,
    text: String,
}

impl Message {
    /// Create a new message.
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        destination: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            text: text.into(),
        }
    }

    /// Name of the sending user.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Name of the receiving user.
    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Message body.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether the message is addressed back to its sender.
    #[must_use]
    pub fn is_echo(&self) -> bool {
        self.source == self.destination
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}: {}", self.source, self.destination, self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_accessors() {
        let msg = Message::new("alice", "bob", "hello");
        assert_eq!(msg.source(), "alice");
        assert_eq!(msg.destination(), "bob");
        assert_eq!(msg.text(), "hello");
        assert!(!msg.is_echo());
    }

    #[test]
    fn test_message_echo() {
        assert!(Message::new("alice", "alice", "note to self").is_echo());
    }

    #[test]
    fn test_message_display() {
        let msg = Message::new("bob", "alice", "hi back");
        assert_eq!(msg.to_string(), "bob -> alice: hi back");
    }
}
