//! Chat transcript with in-place assembly of streamed replies.

use std::collections::HashMap;

use super::models::{Conversation, Message, Role, StreamEvent};

/// The running conversation as shown to the user.
///
/// Streamed deltas are appended to the assistant message created for their
/// response id, so a reply grows in place while later frames arrive.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    reply_index: HashMap<String, usize>,
}

impl Transcript {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing conversation, e.g. one restored by the caller.
    #[must_use]
    pub fn from_conversation(conversation: Conversation) -> Self {
        Self {
            messages: conversation,
            reply_index: HashMap::new(),
        }
    }

    pub fn append(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(Message::new(role, content));
    }

    /// Applies one batch from the streaming client.
    ///
    /// Returns the deltas in the order they were applied, paired with their
    /// response id, so a caller can echo them.
    pub fn apply_batch<'a>(&mut self, events: &'a [StreamEvent]) -> Vec<(&'a str, &'a str)> {
        let mut applied = Vec::with_capacity(events.len());
        for event in events {
            let delta = event.delta_content();
            let idx = match self.reply_index.get(&event.id) {
                Some(&idx) => idx,
                None => {
                    self.messages.push(Message::assistant(String::new()));
                    let idx = self.messages.len() - 1;
                    self.reply_index.insert(event.id.clone(), idx);
                    idx
                }
            };
            self.messages[idx].content.push_str(delta);
            applied.push((event.id.as_str(), delta));
        }
        applied
    }

    /// Assembled text of the reply with the given response id.
    #[must_use]
    pub fn reply_for(&self, id: &str) -> Option<&str> {
        self.reply_index
            .get(id)
            .map(|&idx| self.messages[idx].content.as_str())
    }

    /// Conversation to send with the next request, trimmed the way it is
    /// displayed.
    #[must_use]
    pub fn collect_messages(&self) -> Conversation {
        self.messages
            .iter()
            .map(|m| Message::new(m.role, m.content.trim()))
            .collect()
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.reply_index.clear();
    }
}
