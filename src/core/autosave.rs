//! Background persistence of the conversation list
//!
//! Drains store events, waits out a short quiet period so a burst of stream
//! patches becomes one write, then saves a snapshot on a blocking thread.
//! Save failures are logged and otherwise ignored.
//!
//! Every save holds the shared `SaveGate` from snapshot to completion, so saves
//! land in the order their snapshots were taken.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::conversation_store::{ConversationStore, StoreEvent};
use super::traits::ChatPersistence;

/// Quiet period before a save
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Serializes snapshot-and-save sequences between writers
pub type SaveGate = Arc<Mutex<()>>;

/// Running autosave task; aborted on drop
#[derive(Debug)]
pub struct Autosave {
    handle: JoinHandle<()>,
}

impl Autosave {
    /// Start saving `store` into `persistence` whenever it changes
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        store: &Arc<ConversationStore>,
        persistence: Arc<dyn ChatPersistence>,
        gate: SaveGate,
        debounce: Duration,
    ) -> Self {
        let events = store.subscribe();
        let store = Arc::downgrade(store);
        let handle = tokio::spawn(run(events, store, persistence, gate, debounce));
        Self { handle }
    }
}

impl Drop for Autosave {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn run(
    mut events: mpsc::UnboundedReceiver<StoreEvent>,
    store: Weak<ConversationStore>,
    persistence: Arc<dyn ChatPersistence>,
    gate: SaveGate,
    debounce: Duration,
) {
    while let Some(event) = events.recv().await {
        if !event.mutates_conversations() {
            continue;
        }

        tokio::time::sleep(debounce).await;
        let mut coalesced = 1usize;
        while events.try_recv().is_ok() {
            coalesced += 1;
        }

        let _gate = gate.lock().await;
        let Some(store) = store.upgrade() else {
            break;
        };
        let snapshot = store.snapshot();
        drop(store);

        tracing::debug!(
            "Autosaving {} conversations ({} events coalesced)",
            snapshot.len(),
            coalesced
        );
        let persistence = persistence.clone();
        let result =
            tokio::task::spawn_blocking(move || persistence.save_conversations(&snapshot)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Failed to save conversations: {:#}", e),
            Err(e) => tracing::warn!("Autosave task failed: {}", e),
        }
    }
    tracing::debug!("Autosave stopped");
}
