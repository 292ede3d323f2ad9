//! Core traits for the domain layer
//!
//! These traits define the interfaces that domain components depend on,
//! allowing infrastructure to be injected and tests to use mocks.

use super::types::{Conversation, Settings};
use anyhow::Result;

/// Persistence of the two chat documents: settings and the conversation list
///
/// Calls are blocking; async callers run them on a blocking thread.
pub trait ChatPersistence: Send + Sync {
    /// `None` when nothing has been saved yet
    fn load_settings(&self) -> Result<Option<Settings>>;

    fn save_settings(&self, settings: &Settings) -> Result<()>;

    /// Empty when nothing has been saved yet
    fn load_conversations(&self) -> Result<Vec<Conversation>>;

    /// Replace the stored conversation list
    fn save_conversations(&self, conversations: &[Conversation]) -> Result<()>;
}
