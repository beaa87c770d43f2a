//! The application session: folders, chats, and the turns streaming into them.
//!
//! All state lives in one [`ChatSession`] owned by the front-end's task. A turn
//! runs on a spawned pump task that only forwards [`TurnEvent`]s over a channel;
//! every change to session state happens in [`ChatSession::apply`], on the
//! owner's task, so nothing here is shared or locked.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::aggregator::Aggregator;
use crate::ai::{CompletionClient, CompletionRequest};
use crate::cache::ResponseCache;
use crate::config::Config;
use crate::error::{Rejected, StoreError, StreamError};
use crate::prompts::{count_instruction, requested_count};
use crate::state::{Chat, ChatId, CodeBlock, Group, GroupId, Message, TurnId};
use crate::store::Store;
use crate::stream::{StreamEvent, TurnStream};

/// One stream event, tagged with the turn that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnEvent {
    pub chat: ChatId,
    pub turn: TurnId,
    pub event: StreamEvent,
}

/// What changed after applying an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    Fragment { chat: ChatId, text: String },
    Completed { chat: ChatId },
    Failed { chat: ChatId, error: StreamError },
}

impl Update {
    pub fn chat(&self) -> ChatId {
        match self {
            Update::Fragment { chat, .. } | Update::Completed { chat } | Update::Failed { chat, .. } => {
                *chat
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub model: String,
    pub idle_timeout: Option<Duration>,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
}

impl SessionOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            idle_timeout: Some(Duration::from_secs(60)),
            cache_ttl: Duration::from_secs(3600),
            cache_capacity: 128,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.model(),
            idle_timeout: config.idle_timeout(),
            cache_ttl: config.cache_ttl(),
            cache_capacity: config.cache_capacity,
        }
    }
}

struct InFlight {
    turn: TurnId,
    task: Option<JoinHandle<()>>,
    // Set for network turns only; a replayed cache hit is not stored again
    cache_key: Option<String>,
}

pub struct ChatSession {
    client: Arc<dyn CompletionClient>,
    options: SessionOptions,
    groups: Vec<Group>,
    aggregator: Aggregator,
    cache: ResponseCache,
    store: Option<Store>,
    in_flight: HashMap<ChatId, InFlight>,
    next_turn: TurnId,
    events_tx: UnboundedSender<TurnEvent>,
    events_rx: UnboundedReceiver<TurnEvent>,
}

impl ChatSession {
    pub fn new(client: Arc<dyn CompletionClient>, options: SessionOptions) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            client,
            cache: ResponseCache::new(options.cache_capacity, options.cache_ttl),
            options,
            groups: Vec::new(),
            aggregator: Aggregator::new(),
            store: None,
            in_flight: HashMap::new(),
            next_turn: 1,
            events_tx,
            events_rx,
        }
    }

    /// A session backed by `store`, with its folders and transcripts loaded
    pub fn with_store(
        client: Arc<dyn CompletionClient>,
        options: SessionOptions,
        store: Store,
    ) -> Result<Self, StoreError> {
        let mut session = Self::new(client, options);
        session.groups = store.load_groups()?;
        for chat in session.groups.iter().flat_map(|g| &g.chats) {
            let messages = store.load_messages(chat.id)?;
            session.aggregator.restore(chat.id, messages);
        }
        tracing::debug!(groups = session.groups.len(), "session restored from store");
        session.store = Some(store);
        Ok(session)
    }

    pub fn model(&self) -> &str {
        &self.options.model
    }

    // ---- folders and chats ----

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.iter().find(|g| g.id == id)
    }

    pub fn find_chat(&self, chat: ChatId) -> Option<(&Group, &Chat)> {
        self.groups
            .iter()
            .find_map(|g| g.chat(chat).map(|c| (g, c)))
    }

    /// A blank name gets the next "Folder N"
    pub fn create_group(&mut self, name: &str) -> GroupId {
        let name = match name.trim() {
            "" => format!("Folder {}", self.groups.len() + 1),
            name => name.to_string(),
        };
        let group = Group::new(name);
        let id = group.id;
        self.write("save group", |store| store.save_group(&group));
        self.groups.push(group);
        id
    }

    pub fn rename_group(&mut self, id: GroupId, name: &str) -> bool {
        let name = name.trim();
        let Some(group) = self.groups.iter_mut().find(|g| g.id == id) else {
            return false;
        };
        if name.is_empty() {
            return false;
        }
        group.name = name.to_string();
        let group = group.clone();
        self.write("rename group", |store| store.save_group(&group));
        true
    }

    pub fn delete_group(&mut self, id: GroupId) -> bool {
        let Some(index) = self.groups.iter().position(|g| g.id == id) else {
            return false;
        };
        let group = self.groups.remove(index);
        for chat in &group.chats {
            self.forget(chat.id);
        }
        self.write("delete group", |store| store.delete_group(id));
        true
    }

    /// A blank name gets the next "Chat N" within the group
    pub fn create_chat(&mut self, group: GroupId, name: &str) -> Option<ChatId> {
        let target = self.groups.iter_mut().find(|g| g.id == group)?;
        let name = match name.trim() {
            "" => format!("Chat {}", target.chats.len() + 1),
            name => name.to_string(),
        };
        let chat = Chat::new(name);
        let id = chat.id;
        target.chats.push(chat.clone());
        self.write("save chat", |store| store.save_chat(group, &chat));
        Some(id)
    }

    pub fn rename_chat(&mut self, id: ChatId, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        let Some((group, chat)) = self.groups.iter_mut().find_map(|g| {
            let group = g.id;
            g.chats.iter_mut().find(|c| c.id == id).map(|c| (group, c))
        }) else {
            return false;
        };
        chat.name = name.to_string();
        let chat = chat.clone();
        self.write("rename chat", |store| store.save_chat(group, &chat));
        true
    }

    pub fn delete_chat(&mut self, id: ChatId) -> bool {
        let mut removed = false;
        for group in &mut self.groups {
            let before = group.chats.len();
            group.chats.retain(|c| c.id != id);
            removed |= group.chats.len() != before;
        }
        if removed {
            self.forget(id);
            self.write("delete chat", |store| store.delete_chat(id));
        }
        removed
    }

    /// Drop the transcript and code block, keeping the chat itself
    pub fn clear_chat(&mut self, id: ChatId) -> bool {
        if self.find_chat(id).is_none() {
            return false;
        }
        self.stop(id);
        self.aggregator.clear(id);
        self.persist(id);
        true
    }

    pub fn delete_all_chats_in_group(&mut self, group: GroupId) -> bool {
        let Some(target) = self.groups.iter_mut().find(|g| g.id == group) else {
            return false;
        };
        let chats: Vec<ChatId> = target.chats.drain(..).map(|c| c.id).collect();
        for chat in chats {
            self.forget(chat);
            self.write("delete chat", |store| store.delete_chat(chat));
        }
        true
    }

    pub fn delete_all(&mut self) {
        let ids: Vec<GroupId> = self.groups.iter().map(|g| g.id).collect();
        for id in ids {
            self.delete_group(id);
        }
    }

    // ---- turns ----

    /// Start a turn in `chat`. Must be called from within a tokio runtime.
    ///
    /// Rejections happen before any request is made.
    pub fn send_turn(&mut self, chat: ChatId, text: &str) -> Result<TurnId, Rejected> {
        if text.trim().is_empty() {
            return Err(Rejected::EmptyInput);
        }
        if self.find_chat(chat).is_none() {
            return Err(Rejected::UnknownConversation);
        }
        if self.in_flight.contains_key(&chat) {
            return Err(Rejected::Busy);
        }

        let turn = self.next_turn;
        let mut history = self.aggregator.messages(chat).to_vec();
        self.aggregator.begin(chat, turn, text)?;
        self.next_turn += 1;

        if let Some(cached) = self.cache.get(text) {
            tracing::info!(conversation = %chat, turn, "answered from cache");
            self.in_flight.insert(
                chat,
                InFlight {
                    turn,
                    task: None,
                    cache_key: None,
                },
            );
            for event in [StreamEvent::Fragment(cached), StreamEvent::Complete] {
                // The receiver lives in `self`, so this cannot fail
                let _ = self.events_tx.send(TurnEvent { chat, turn, event });
            }
            return Ok(turn);
        }

        history.push(Message::user(text));
        if let Some(count) = requested_count(text) {
            tracing::debug!(conversation = %chat, count, "asking for an exact item count");
            history.push(Message::system(count_instruction(count)));
        }

        let request = CompletionRequest::new(&self.options.model, &history);
        let stream = TurnStream::new(self.client.stream_completion(request))
            .with_idle_timeout(self.options.idle_timeout);
        let task = tokio::spawn(pump(chat, turn, stream, self.events_tx.clone()));

        tracing::info!(
            conversation = %chat,
            turn,
            model = %self.options.model,
            messages = history.len(),
            "turn started"
        );
        self.in_flight.insert(
            chat,
            InFlight {
                turn,
                task: Some(task),
                cache_key: Some(text.to_string()),
            },
        );
        Ok(turn)
    }

    /// Fold one event into session state. Events for a turn that is no longer
    /// live (cancelled, cleared, deleted) are ignored.
    pub fn apply(&mut self, event: TurnEvent) -> Option<Update> {
        let TurnEvent { chat, turn, event } = event;
        if self.in_flight.get(&chat).map(|f| f.turn) != Some(turn) {
            tracing::trace!(conversation = %chat, turn, "dropping stale event");
            return None;
        }

        match event {
            StreamEvent::Fragment(text) => {
                self.aggregator.on_fragment(chat, turn, &text);
                Some(Update::Fragment { chat, text })
            }
            StreamEvent::Complete => {
                let flight = self.in_flight.remove(&chat)?;
                let state = self.aggregator.on_complete(chat, turn)?;
                tracing::info!(
                    conversation = %chat,
                    turn,
                    fragments = state.fragments(),
                    bytes = state.buffer().len(),
                    code_block = state.has_code_block(),
                    "turn completed"
                );
                if let Some(key) = flight.cache_key {
                    if !state.buffer().is_empty() {
                        self.cache.insert(key, state.into_buffer());
                    }
                }
                self.persist(chat);
                Some(Update::Completed { chat })
            }
            StreamEvent::Error(error) => {
                self.in_flight.remove(&chat);
                self.aggregator.on_error(chat, turn);
                tracing::warn!(conversation = %chat, turn, error = %error, "turn failed");
                self.persist(chat);
                Some(Update::Failed { chat, error })
            }
        }
    }

    /// Wait for the next change from any in-flight turn.
    ///
    /// Returns `None` once nothing is in flight.
    pub async fn next_update(&mut self) -> Option<Update> {
        while !self.in_flight.is_empty() {
            let event = self.events_rx.recv().await?;
            if let Some(update) = self.apply(event) {
                return Some(update);
            }
        }
        None
    }

    /// Abort the live turn of `chat`. Text received so far is kept.
    pub fn cancel(&mut self, chat: ChatId) -> bool {
        if !self.stop(chat) {
            return false;
        }
        tracing::info!(conversation = %chat, "turn cancelled");
        self.persist(chat);
        true
    }

    // ---- accessors ----

    pub fn get_messages(&self, chat: ChatId) -> Arc<[Message]> {
        self.aggregator.messages(chat)
    }

    pub fn get_detected_code_block(&self, chat: ChatId) -> Option<CodeBlock> {
        self.aggregator.code_block(chat).cloned()
    }

    pub fn is_streaming(&self, chat: ChatId) -> bool {
        self.in_flight.contains_key(&chat)
    }

    /// Bumped on every change to the transcript of `chat`
    pub fn revision(&self, chat: ChatId) -> u64 {
        self.aggregator.revision(chat)
    }

    // ---- internals ----

    fn stop(&mut self, chat: ChatId) -> bool {
        let Some(flight) = self.in_flight.remove(&chat) else {
            return false;
        };
        if let Some(task) = flight.task {
            task.abort();
        }
        self.aggregator.abandon(chat);
        true
    }

    fn forget(&mut self, chat: ChatId) {
        self.stop(chat);
        self.aggregator.remove(chat);
    }

    fn persist(&mut self, chat: ChatId) {
        let messages = self.aggregator.messages(chat);
        self.write("save messages", |store| store.replace_messages(chat, &messages));
    }

    // Store failures never abort the caller
    fn write<F>(&mut self, what: &str, op: F)
    where
        F: FnOnce(&mut Store) -> Result<(), StoreError>,
    {
        if let Some(store) = self.store.as_mut() {
            if let Err(e) = op(store) {
                tracing::warn!(error = %e, "failed to {}", what);
            }
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        for flight in self.in_flight.values() {
            if let Some(task) = &flight.task {
                task.abort();
            }
        }
    }
}

async fn pump(chat: ChatId, turn: TurnId, mut stream: TurnStream, tx: UnboundedSender<TurnEvent>) {
    while let Some(event) = stream.next_event().await {
        if tx.send(TurnEvent { chat, turn, event }).is_err() {
            break;
        }
    }
}
