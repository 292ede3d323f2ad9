//! Session Controller - coordinates sends end to end
//!
//! Handles:
//! - Active conversation selection and synthesis
//! - One response in flight per conversation
//! - Turning recoverable send failures into an apology turn
//! - Settings and load/save through `ChatPersistence`

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use super::attachments::Attachment;
use super::autosave::{Autosave, SaveGate};
use super::conversation_store::ConversationStore;
use super::dispatcher::{DispatchPlan, Dispatcher};
use super::errors::CoreError;
use super::request_builder::{build, validate_send};
use super::traits::ChatPersistence;
use super::types::{derive_title, Conversation, ResponseMode, Settings, Turn, APOLOGY_TEXT};
use crate::llm::GenerativeBackend;

/// How a send ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The backend produced the model turn `turn_id`
    Completed {
        conversation_id: String,
        turn_id: String,
    },
    /// The send failed; `turn_id` is the apology turn appended in its place
    Recovered {
        conversation_id: String,
        turn_id: String,
        error: String,
    },
}

impl SendOutcome {
    pub fn conversation_id(&self) -> &str {
        match self {
            SendOutcome::Completed {
                conversation_id, ..
            }
            | SendOutcome::Recovered {
                conversation_id, ..
            } => conversation_id,
        }
    }

    pub fn turn_id(&self) -> &str {
        match self {
            SendOutcome::Completed { turn_id, .. } | SendOutcome::Recovered { turn_id, .. } => {
                turn_id
            }
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, SendOutcome::Completed { .. })
    }
}

/// Marks a conversation as having a response in flight until dropped
struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
    store: Arc<ConversationStore>,
    conversation_id: String,
}

impl InFlightGuard {
    fn acquire(
        in_flight: &Arc<Mutex<HashSet<String>>>,
        store: &Arc<ConversationStore>,
        conversation_id: &str,
    ) -> Result<Self, CoreError> {
        let inserted = in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(conversation_id.to_string());
        if !inserted {
            return Err(CoreError::SendInProgress(conversation_id.to_string()));
        }
        store.notify_response_state(conversation_id, true);
        Ok(Self {
            in_flight: in_flight.clone(),
            store: store.clone(),
            conversation_id: conversation_id.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.conversation_id);
        self.store
            .notify_response_state(&self.conversation_id, false);
    }
}

/// Coordinates sends against the store, the backend and persistence
pub struct SessionController {
    store: Arc<ConversationStore>,
    dispatcher: Dispatcher,
    persistence: Arc<dyn ChatPersistence>,
    settings: RwLock<Settings>,
    active: RwLock<Option<String>>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    save_gate: SaveGate,
    autosave: Option<Autosave>,
}

impl SessionController {
    /// Create a controller and load saved settings and conversations
    ///
    /// Load failures are logged; the controller then starts empty.
    pub fn new(backend: Arc<dyn GenerativeBackend>, persistence: Arc<dyn ChatPersistence>) -> Self {
        let settings = match persistence.load_settings() {
            Ok(settings) => settings.unwrap_or_default(),
            Err(err) => {
                tracing::warn!("Failed to load settings: {:#}", err);
                Settings::default()
            }
        };

        let store = Arc::new(ConversationStore::new());
        match persistence.load_conversations() {
            Ok(conversations) => {
                tracing::info!("Loaded {} conversations", conversations.len());
                store.replace_all(conversations);
            }
            Err(err) => tracing::warn!("Failed to load conversations: {:#}", err),
        }

        Self {
            dispatcher: Dispatcher::new(backend, store.clone()),
            store,
            persistence,
            settings: RwLock::new(settings),
            active: RwLock::new(None),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            save_gate: SaveGate::default(),
            autosave: None,
        }
    }

    /// Save the conversation list in the background after every change
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_autosave(mut self, debounce: Duration) -> Self {
        self.autosave = Some(Autosave::spawn(
            &self.store,
            self.persistence.clone(),
            self.save_gate.clone(),
            debounce,
        ));
        self
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn backend_name(&self) -> &str {
        self.dispatcher.backend().name()
    }

    /// Send a message and produce the response for the given mode
    ///
    /// Only precondition violations and `SendInProgress` are returned as
    /// errors; backend and attachment failures become an apology turn.
    pub async fn send_message(
        &self,
        text: &str,
        attachments: Vec<Attachment>,
        mode: ResponseMode,
    ) -> Result<SendOutcome, CoreError> {
        validate_send(text, &attachments, mode)?;

        let conversation_id = self.resolve_target(text);
        let _guard = InFlightGuard::acquire(&self.in_flight, &self.store, &conversation_id)?;

        let history = self
            .store
            .get(&conversation_id)
            .map(|c| c.turns)
            .unwrap_or_default();
        self.store.append_turn(
            &conversation_id,
            Turn::user(text, attachments.clone()),
        );
        tracing::info!(
            "Sending to {} (mode {}, {} attachments)",
            conversation_id,
            mode,
            attachments.len()
        );

        let result = match self.plan(&history, text, attachments, mode) {
            Ok(plan) => self.dispatcher.run(plan, &conversation_id).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(turn_id) => Ok(SendOutcome::Completed {
                conversation_id,
                turn_id,
            }),
            Err(err) if err.is_recoverable() => {
                tracing::error!("Send to {} failed: {}", conversation_id, err);
                let apology = Turn::model(APOLOGY_TEXT);
                let turn_id = apology.id.clone();
                self.store.append_turn(&conversation_id, apology);
                Ok(SendOutcome::Recovered {
                    conversation_id,
                    turn_id,
                    error: err.to_string(),
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Edit an image with a prompt; the source is attached to the user turn
    pub async fn edit_image(
        &self,
        prompt: &str,
        source: Attachment,
    ) -> Result<SendOutcome, CoreError> {
        self.send_message(prompt, vec![source], ResponseMode::Image)
            .await
    }

    /// Edit an image already present in the active conversation
    pub async fn edit_turn_image(
        &self,
        turn_id: &str,
        attachment_id: Option<&str>,
        prompt: &str,
    ) -> Result<SendOutcome, CoreError> {
        let conversation = self
            .active_conversation()
            .ok_or_else(|| CoreError::ConversationNotFound("no active conversation".to_string()))?;
        let turn = conversation
            .turn(turn_id)
            .ok_or_else(|| CoreError::InvalidRequest(format!("no turn {}", turn_id)))?;
        let source = turn
            .attachments
            .iter()
            .filter(|a| a.is_image())
            .find(|a| attachment_id.map_or(true, |id| a.id == id))
            .cloned()
            .ok_or_else(|| {
                CoreError::InvalidRequest(format!("turn {} has no matching image", turn_id))
            })?;
        self.edit_image(prompt, source).await
    }

    fn plan(
        &self,
        history: &[Turn],
        text: &str,
        attachments: Vec<Attachment>,
        mode: ResponseMode,
    ) -> Result<DispatchPlan, CoreError> {
        match mode.text_mode() {
            Some(text_mode) => {
                let settings = self.settings();
                build(history, text, &attachments, &settings, text_mode)
                    .map(DispatchPlan::StreamText)
            }
            None => Ok(match attachments.into_iter().next() {
                Some(source) => DispatchPlan::EditImage {
                    prompt: text.to_string(),
                    source,
                },
                None => DispatchPlan::GenerateImage {
                    prompt: text.to_string(),
                },
            }),
        }
    }

    /// Active conversation id, creating a conversation when there is none
    fn resolve_target(&self, text: &str) -> String {
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = active.as_ref().filter(|id| self.store.contains(id)) {
            return id.clone();
        }
        let conversation = self.store.create_conversation(derive_title(text));
        tracing::info!("Started conversation {}", conversation.id);
        *active = Some(conversation.id.clone());
        conversation.id
    }

    /// Delete a turn of the active conversation
    pub fn delete_turn(&self, turn_id: &str) -> bool {
        match self.active_conversation_id() {
            Some(id) => self.store.delete_turn(&id, turn_id),
            None => false,
        }
    }

    /// Clear the active conversation; the next send starts a new one
    pub fn new_conversation(&self) {
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn select_conversation(&self, conversation_id: &str) -> Result<(), CoreError> {
        if !self.store.contains(conversation_id) {
            return Err(CoreError::ConversationNotFound(conversation_id.to_string()));
        }
        *self.active.write().unwrap_or_else(PoisonError::into_inner) =
            Some(conversation_id.to_string());
        Ok(())
    }

    /// Delete a conversation; an in-flight response to it keeps running
    pub fn delete_conversation(&self, conversation_id: &str) -> bool {
        let deleted = self.store.delete_conversation(conversation_id);
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        if active.as_deref() == Some(conversation_id) {
            *active = None;
        }
        deleted
    }

    pub fn is_response_in_flight(&self, conversation_id: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(conversation_id)
    }

    pub fn settings(&self) -> Settings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Change settings and persist them
    pub fn update_settings(&self, f: impl FnOnce(&mut Settings)) -> Settings {
        let updated = {
            let mut settings = self.settings.write().unwrap_or_else(PoisonError::into_inner);
            f(&mut settings);
            settings.clone()
        };
        if let Err(err) = self.persistence.save_settings(&updated) {
            tracing::warn!("Failed to save settings: {:#}", err);
        }
        updated
    }

    /// Conversations, most recent first
    pub fn conversations(&self) -> Vec<Conversation> {
        self.store.list()
    }

    pub fn active_conversation_id(&self) -> Option<String> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn active_conversation(&self) -> Option<Conversation> {
        self.active_conversation_id()
            .and_then(|id| self.store.get(&id))
    }

    /// Save settings and conversations now, without waiting for the debounce
    ///
    /// Waits for an autosave already in progress, so an older snapshot can
    /// never land after this one.
    pub async fn persist_now(&self) -> anyhow::Result<()> {
        let _gate = self.save_gate.lock().await;
        let persistence = self.persistence.clone();
        let settings = self.settings();
        let conversations = self.store.snapshot();
        tokio::task::spawn_blocking(move || {
            persistence.save_settings(&settings)?;
            persistence.save_conversations(&conversations)
        })
        .await?
    }
}
