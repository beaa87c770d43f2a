//! Incremental aggregator: folds streamed fragments into the trailing
//! assistant message of a conversation.
//!
//! Message lists are published as immutable snapshots. Every change swaps in a
//! new `Arc<[Message]>` and bumps the revision, so a renderer can tell what
//! changed by pointer or revision comparison.

use std::collections::HashMap;
use std::sync::Arc;

use crate::detector;
use crate::error::Rejected;
use crate::state::{ChatId, CodeBlock, Message, Role, TurnId};

/// Shown in place of the reply when a turn fails
pub const ERROR_MESSAGE: &str =
    "Sorry, there was an error generating the response. Please try again.";

/// Ephemeral state of the reply being streamed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamState {
    turn: TurnId,
    buffer: String,
    fragments: usize,
    code_block: Option<CodeBlock>,
    // Block shown before this turn started
    shown_before: Option<CodeBlock>,
}

impl StreamState {
    fn new(turn: TurnId, shown_before: Option<CodeBlock>) -> Self {
        Self {
            turn,
            buffer: String::new(),
            fragments: 0,
            code_block: None,
            shown_before,
        }
    }

    pub fn turn(&self) -> TurnId {
        self.turn
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn into_buffer(self) -> String {
        self.buffer
    }

    pub fn fragments(&self) -> usize {
        self.fragments
    }

    pub fn has_code_block(&self) -> bool {
        self.code_block.is_some()
    }
}

#[derive(Debug)]
struct Conversation {
    messages: Arc<[Message]>,
    revision: u64,
    stream: Option<StreamState>,
    code_block: Option<CodeBlock>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self {
            messages: Arc::from(Vec::new()),
            revision: 0,
            stream: None,
            code_block: None,
        }
    }
}

impl Conversation {
    fn publish(&mut self, edit: impl FnOnce(&mut Vec<Message>)) {
        let mut next = self.messages.to_vec();
        edit(&mut next);
        self.messages = next.into();
        self.revision += 1;
    }

    fn set_trailing(&mut self, content: &str) {
        self.publish(|messages| {
            if let Some(last) = messages.last_mut().filter(|m| m.role == Role::Assistant) {
                last.content = content.to_string();
            }
        });
    }

    fn stream_for(&mut self, turn: TurnId) -> Option<&mut StreamState> {
        self.stream.as_mut().filter(|s| s.turn == turn)
    }
}

#[derive(Debug, Default)]
pub struct Aggregator {
    conversations: HashMap<ChatId, Conversation>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install previously committed messages, e.g. loaded from the store
    pub fn restore(&mut self, chat: ChatId, messages: Vec<Message>) {
        let conversation = self.conversations.entry(chat).or_default();
        conversation.messages = messages.into();
        conversation.revision += 1;
    }

    pub fn messages(&self, chat: ChatId) -> Arc<[Message]> {
        self.conversations
            .get(&chat)
            .map(|c| Arc::clone(&c.messages))
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    pub fn revision(&self, chat: ChatId) -> u64 {
        self.conversations.get(&chat).map_or(0, |c| c.revision)
    }

    pub fn code_block(&self, chat: ChatId) -> Option<&CodeBlock> {
        self.conversations.get(&chat)?.code_block.as_ref()
    }

    pub fn in_flight(&self, chat: ChatId) -> Option<TurnId> {
        self.conversations.get(&chat)?.stream.as_ref().map(|s| s.turn)
    }

    /// Append the user message and an empty assistant message for `turn`
    pub fn begin(&mut self, chat: ChatId, turn: TurnId, user_text: &str) -> Result<(), Rejected> {
        let conversation = self.conversations.entry(chat).or_default();
        if conversation.stream.is_some() {
            return Err(Rejected::Busy);
        }

        conversation.publish(|messages| {
            messages.push(Message::user(user_text));
            messages.push(Message::assistant(""));
        });
        conversation.stream = Some(StreamState::new(turn, conversation.code_block.clone()));
        Ok(())
    }

    /// Returns false when `turn` is not the conversation's live turn
    pub fn on_fragment(&mut self, chat: ChatId, turn: TurnId, text: &str) -> bool {
        let Some(conversation) = self.conversations.get_mut(&chat) else {
            return false;
        };
        let Some(state) = conversation.stream_for(turn) else {
            return false;
        };

        state.buffer.push_str(text);
        state.fragments += 1;
        let found = detector::detect(&state.buffer);
        if found.is_some() {
            state.code_block = found.clone();
        }
        let content = state.buffer.clone();

        conversation.set_trailing(&content);
        // No block keeps whatever was shown before
        if found.is_some() {
            conversation.code_block = found;
        }
        true
    }

    /// Commit the streamed reply. Returns the finished stream state.
    pub fn on_complete(&mut self, chat: ChatId, turn: TurnId) -> Option<StreamState> {
        let conversation = self.conversations.get_mut(&chat)?;
        conversation.stream_for(turn)?;
        let state = conversation.stream.take()?;
        // The trailing message already holds the full buffer
        Some(state)
    }

    /// Replace the reply with the apology text. A block found in the failed
    /// reply is withdrawn.
    pub fn on_error(&mut self, chat: ChatId, turn: TurnId) -> Option<StreamState> {
        let conversation = self.conversations.get_mut(&chat)?;
        conversation.stream_for(turn)?;
        let state = conversation.stream.take()?;
        conversation.set_trailing(ERROR_MESSAGE);
        if state.code_block.is_some() {
            conversation.code_block = state.shown_before.clone();
        }
        Some(state)
    }

    /// Stop tracking the live turn, keeping whatever text arrived. A reply
    /// that never received text is dropped.
    pub fn abandon(&mut self, chat: ChatId) -> Option<StreamState> {
        let conversation = self.conversations.get_mut(&chat)?;
        let state = conversation.stream.take()?;
        if state.buffer.is_empty() {
            conversation.publish(|messages| {
                if messages.last().is_some_and(|m| m.role == Role::Assistant) {
                    messages.pop();
                }
            });
        }
        Some(state)
    }

    pub fn clear(&mut self, chat: ChatId) {
        if let Some(conversation) = self.conversations.get_mut(&chat) {
            conversation.stream = None;
            conversation.code_block = None;
            conversation.publish(Vec::clear);
        }
    }

    pub fn remove(&mut self, chat: ChatId) {
        self.conversations.remove(&chat);
    }
}
