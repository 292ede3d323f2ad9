//! Conversation Store - owns every conversation and its turns
//!
//! Handles:
//! - Conversation creation with strictly increasing creation times
//! - Turn append, patch and delete
//! - Change notification to subscribers
//!
//! Operations on a conversation or turn that no longer exists are no-ops
//! that return `false`; a deleted conversation can still be the target of an
//! in-flight response.

use chrono::{DateTime, Duration, Utc};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;

use super::types::{derive_title, Conversation, Turn, PLACEHOLDER_TITLE};
use crate::llm::GroundingReference;

/// Change notification sent to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    ConversationCreated {
        conversation_id: String,
    },
    TurnAppended {
        conversation_id: String,
        turn_id: String,
    },
    TurnPatched {
        conversation_id: String,
        turn_id: String,
    },
    TurnDeleted {
        conversation_id: String,
        turn_id: String,
    },
    ConversationDeleted {
        conversation_id: String,
    },
    /// The whole list was replaced, typically by a load from disk
    ConversationsReplaced,
    ResponseStateChanged {
        conversation_id: String,
        in_flight: bool,
    },
}

impl StoreEvent {
    /// Whether the event changed persisted conversation data
    pub fn mutates_conversations(&self) -> bool {
        !matches!(
            self,
            StoreEvent::ResponseStateChanged { .. } | StoreEvent::ConversationsReplaced
        )
    }
}

#[derive(Debug, Default)]
struct StoreState {
    conversations: Vec<Conversation>,
    last_created_at: Option<DateTime<Utc>>,
    subscribers: Vec<mpsc::UnboundedSender<StoreEvent>>,
}

impl StoreState {
    fn conversation_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == id)
    }

    /// Send to every live subscriber, dropping closed ones
    fn emit(&mut self, event: StoreEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    fn next_created_at(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let created_at = match self.last_created_at {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_created_at = Some(created_at);
        created_at
    }
}

/// Shared conversation list
///
/// Critical sections are short and never span an `.await`.
#[derive(Debug, Default)]
pub struct ConversationStore {
    state: RwLock<StoreState>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receive every change made after this call
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StoreEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.write().subscribers.push(tx);
        rx
    }

    pub fn create_conversation(&self, initial_title: impl Into<String>) -> Conversation {
        let mut state = self.write();
        let created_at = state.next_created_at();
        let conversation = Conversation::new(initial_title, created_at);
        state.conversations.push(conversation.clone());
        state.emit(StoreEvent::ConversationCreated {
            conversation_id: conversation.id.clone(),
        });
        conversation
    }

    /// Append a turn; the first non-empty turn retitles a placeholder-titled
    /// conversation
    pub fn append_turn(&self, conversation_id: &str, turn: Turn) -> bool {
        let mut state = self.write();
        let Some(conversation) = state.conversation_mut(conversation_id) else {
            tracing::warn!(
                "Dropping turn for missing conversation {}",
                conversation_id
            );
            return false;
        };

        if conversation.turns.is_empty()
            && conversation.title == PLACEHOLDER_TITLE
            && !turn.text.trim().is_empty()
        {
            conversation.title = derive_title(&turn.text);
        }

        let turn_id = turn.id.clone();
        conversation.turns.push(turn);
        state.emit(StoreEvent::TurnAppended {
            conversation_id: conversation_id.to_string(),
            turn_id,
        });
        true
    }

    /// Replace a model turn's text, and its references when given
    pub fn patch_latest_model_turn(
        &self,
        conversation_id: &str,
        turn_id: &str,
        full_text: &str,
        grounding: Option<Vec<GroundingReference>>,
    ) -> bool {
        let mut state = self.write();
        let Some(turn) = state
            .conversation_mut(conversation_id)
            .and_then(|c| c.turns.iter_mut().find(|t| t.id == turn_id))
            .filter(|t| t.is_model())
        else {
            tracing::debug!(
                "Ignoring patch for missing turn {} in {}",
                turn_id,
                conversation_id
            );
            return false;
        };

        turn.text = full_text.to_string();
        if grounding.is_some() {
            turn.grounding = grounding;
        }
        state.emit(StoreEvent::TurnPatched {
            conversation_id: conversation_id.to_string(),
            turn_id: turn_id.to_string(),
        });
        true
    }

    pub fn delete_turn(&self, conversation_id: &str, turn_id: &str) -> bool {
        let mut state = self.write();
        let Some(conversation) = state.conversation_mut(conversation_id) else {
            return false;
        };
        let before = conversation.turns.len();
        conversation.turns.retain(|t| t.id != turn_id);
        if conversation.turns.len() == before {
            return false;
        }
        state.emit(StoreEvent::TurnDeleted {
            conversation_id: conversation_id.to_string(),
            turn_id: turn_id.to_string(),
        });
        true
    }

    pub fn delete_conversation(&self, conversation_id: &str) -> bool {
        let mut state = self.write();
        let before = state.conversations.len();
        state.conversations.retain(|c| c.id != conversation_id);
        if state.conversations.len() == before {
            return false;
        }
        state.emit(StoreEvent::ConversationDeleted {
            conversation_id: conversation_id.to_string(),
        });
        true
    }

    pub fn get(&self, conversation_id: &str) -> Option<Conversation> {
        self.read()
            .conversations
            .iter()
            .find(|c| c.id == conversation_id)
            .cloned()
    }

    pub fn turn(&self, conversation_id: &str, turn_id: &str) -> Option<Turn> {
        self.read()
            .conversations
            .iter()
            .find(|c| c.id == conversation_id)
            .and_then(|c| c.turn(turn_id))
            .cloned()
    }

    pub fn contains(&self, conversation_id: &str) -> bool {
        self.read()
            .conversations
            .iter()
            .any(|c| c.id == conversation_id)
    }

    /// Conversations, most recently created first
    pub fn list(&self) -> Vec<Conversation> {
        let mut conversations = self.snapshot();
        conversations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        conversations
    }

    /// Conversations in storage order
    pub fn snapshot(&self) -> Vec<Conversation> {
        self.read().conversations.clone()
    }

    pub fn replace_all(&self, conversations: Vec<Conversation>) {
        let mut state = self.write();
        let newest = conversations.iter().map(|c| c.created_at).max();
        state.last_created_at = state.last_created_at.max(newest);
        state.conversations = conversations;
        state.emit(StoreEvent::ConversationsReplaced);
    }

    /// Announce that a conversation's response started or finished
    pub fn notify_response_state(&self, conversation_id: &str, in_flight: bool) {
        self.write().emit(StoreEvent::ResponseStateChanged {
            conversation_id: conversation_id.to_string(),
            in_flight,
        });
    }

    pub fn len(&self) -> usize {
        self.read().conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().conversations.is_empty()
    }
}
