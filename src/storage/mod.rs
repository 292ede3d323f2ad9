//! Persistent storage for parley
//!
//! Layout of the data directory:
//!
//! <data_dir>/
//! ├── settings.json          # Settings document
//! └── conversations.json     # Array of conversations
//!
//! Documents are written to a uniquely named temporary file in the same
//! directory and renamed into place, so a crash mid-write leaves the previous
//! version intact. Writes through one `ChatStorage` (and its clones) are
//! serialized.

pub mod memory;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tempfile::NamedTempFile;

use crate::core::traits::ChatPersistence;
use crate::core::types::{Conversation, Settings};

pub use memory::InMemoryPersistence;

const SETTINGS_FILE: &str = "settings.json";
const CONVERSATIONS_FILE: &str = "conversations.json";

/// JSON file storage for settings and conversations
#[derive(Debug, Clone)]
pub struct ChatStorage {
    root: PathBuf,
    /// Shared by clones
    write_lock: Arc<Mutex<()>>,
}

impl ChatStorage {
    /// Open (and create if needed) a data directory
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create data directory {}", root.display()))?;
        Ok(Self {
            root,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings_path(&self) -> PathBuf {
        self.root.join(SETTINGS_FILE)
    }

    pub fn conversations_path(&self) -> PathBuf {
        self.root.join(CONVERSATIONS_FILE)
    }

    fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(value))
    }

    fn write_json<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<()> {
        let content = serde_json::to_string_pretty(value)?;

        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut tmp = NamedTempFile::new_in(&self.root).with_context(|| {
            format!("Failed to create temp file in {}", self.root.display())
        })?;
        tmp.write_all(content.as_bytes())
            .with_context(|| format!("Failed to write {}", tmp.path().display()))?;
        tmp.persist(path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }
}

impl ChatPersistence for ChatStorage {
    fn load_settings(&self) -> Result<Option<Settings>> {
        Self::read_json(&self.settings_path())
    }

    fn save_settings(&self, settings: &Settings) -> Result<()> {
        self.write_json(&self.settings_path(), settings)
    }

    fn load_conversations(&self) -> Result<Vec<Conversation>> {
        Ok(Self::read_json(&self.conversations_path())?.unwrap_or_default())
    }

    fn save_conversations(&self, conversations: &[Conversation]) -> Result<()> {
        self.write_json(&self.conversations_path(), conversations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Turn;
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn test_storage_init() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("nested").join("data");
        let storage = ChatStorage::new(&root).unwrap();
        assert!(storage.root().exists());
        assert!(!storage.settings_path().exists());
    }

    #[test]
    fn test_empty_storage_loads_defaults() {
        let temp = TempDir::new().unwrap();
        let storage = ChatStorage::new(temp.path()).unwrap();
        assert!(storage.load_settings().unwrap().is_none());
        assert!(storage.load_conversations().unwrap().is_empty());
    }

    #[test]
    fn test_settings_roundtrip() {
        let temp = TempDir::new().unwrap();
        let storage = ChatStorage::new(temp.path()).unwrap();
        let settings = Settings {
            system_prompt: "Be brief".to_string(),
            use_search: true,
            ..Settings::default()
        };
        storage.save_settings(&settings).unwrap();
        assert_eq!(storage.load_settings().unwrap(), Some(settings));

        let raw = std::fs::read_to_string(storage.settings_path()).unwrap();
        assert!(raw.contains("\"systemPrompt\""));
    }

    #[test]
    fn test_conversations_roundtrip_leaves_no_temp_file() {
        let temp = TempDir::new().unwrap();
        let storage = ChatStorage::new(temp.path()).unwrap();
        let mut conversation = Conversation::new("Hello", Utc::now());
        conversation.turns.push(Turn::user("Hello", vec![]));
        conversation.turns.push(Turn::model("Hi there"));

        storage.save_conversations(&[conversation.clone()]).unwrap();
        assert_eq!(storage.load_conversations().unwrap(), vec![conversation]);
        let leftovers: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .filter(|name| name != "conversations.json")
            .collect();
        assert!(leftovers.is_empty(), "unexpected files: {:?}", leftovers);
    }

    #[test]
    fn test_concurrent_saves_all_succeed() {
        let temp = TempDir::new().unwrap();
        let storage = ChatStorage::new(temp.path()).unwrap();

        for round in 0..30 {
            let writers: Vec<_> = (0..2)
                .map(|writer| {
                    let storage = storage.clone();
                    std::thread::spawn(move || {
                        let title = format!("round {} writer {}", round, writer);
                        storage.save_conversations(&[Conversation::new(title, Utc::now())])
                    })
                })
                .collect();
            for writer in writers {
                writer.join().unwrap().unwrap();
            }

            let saved = storage.load_conversations().unwrap();
            assert_eq!(saved.len(), 1);
            assert!(saved[0].title.starts_with(&format!("round {} ", round)));
        }
    }

    #[test]
    fn test_corrupt_document_is_an_error() {
        let temp = TempDir::new().unwrap();
        let storage = ChatStorage::new(temp.path()).unwrap();
        std::fs::write(storage.conversations_path(), "{not json").unwrap();
        let err = storage.load_conversations().unwrap_err();
        assert!(format!("{:#}", err).contains("conversations.json"));
    }
}
