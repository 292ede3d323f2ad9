//! In-memory persistence
//!
//! Useful for tests and for runs that should leave nothing on disk. Clones
//! share the same documents.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::core::traits::ChatPersistence;
use crate::core::types::{Conversation, Settings};

#[derive(Debug, Default)]
struct Documents {
    settings: Option<Settings>,
    conversations: Vec<Conversation>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryPersistence {
    documents: Arc<Mutex<Documents>>,
    conversation_saves: Arc<AtomicUsize>,
    fail_saves: Arc<AtomicBool>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful conversation saves so far
    pub fn conversation_saves(&self) -> usize {
        self.conversation_saves.load(Ordering::SeqCst)
    }

    /// Make every following save fail
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn saved_conversations(&self) -> Vec<Conversation> {
        self.lock()
            .map(|docs| docs.conversations.clone())
            .unwrap_or_default()
    }

    pub fn saved_settings(&self) -> Option<Settings> {
        self.lock().ok().and_then(|docs| docs.settings.clone())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Documents>> {
        self.documents
            .lock()
            .map_err(|e| anyhow::anyhow!("Failed to lock documents: {}", e))
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            anyhow::bail!("in-memory persistence is set to fail");
        }
        Ok(())
    }
}

impl ChatPersistence for InMemoryPersistence {
    fn load_settings(&self) -> Result<Option<Settings>> {
        Ok(self.lock()?.settings.clone())
    }

    fn save_settings(&self, settings: &Settings) -> Result<()> {
        self.check_writable()?;
        self.lock()?.settings = Some(settings.clone());
        Ok(())
    }

    fn load_conversations(&self) -> Result<Vec<Conversation>> {
        Ok(self.lock()?.conversations.clone())
    }

    fn save_conversations(&self, conversations: &[Conversation]) -> Result<()> {
        self.check_writable()?;
        self.lock()?.conversations = conversations.to_vec();
        self.conversation_saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_clones_share_documents() {
        let persistence = InMemoryPersistence::new();
        let clone = persistence.clone();
        clone
            .save_conversations(&[Conversation::new("A", Utc::now())])
            .unwrap();
        assert_eq!(persistence.load_conversations().unwrap().len(), 1);
        assert_eq!(persistence.conversation_saves(), 1);
    }

    #[test]
    fn test_failing_saves() {
        let persistence = InMemoryPersistence::new();
        persistence.set_fail_saves(true);
        assert!(persistence.save_settings(&Settings::default()).is_err());
        assert!(persistence.saved_settings().is_none());
        assert_eq!(persistence.conversation_saves(), 0);
    }
}
