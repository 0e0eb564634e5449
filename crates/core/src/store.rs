//! Persistence of conversation histories.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::conversation::Message;

/// Errors returned by a [`ConversationStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The underlying storage failed.
    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),
    /// The stored data could not be encoded or decoded.
    #[error("invalid conversation data: {0}")]
    Data(#[from] serde_json::Error),
    /// The conversation id can't be used as a storage key.
    #[error("invalid conversation id: {0:?}")]
    InvalidId(String),
}

/// A place where conversation histories are kept between turns.
#[async_trait]
pub trait ConversationStore: Send + Sync + 'static {
    /// Loads the history of a conversation, `None` if it was never saved.
    async fn load(&self, id: &str) -> Result<Option<Vec<Message>>, StoreError>;

    /// Replaces the stored history of a conversation.
    async fn save(
        &self,
        id: &str,
        messages: &[Message],
    ) -> Result<(), StoreError>;

    /// Removes a conversation. Removing a missing conversation succeeds.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

/// A store that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    conversations: Mutex<HashMap<String, Vec<Message>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Message>>> {
        // The map is always left consistent, so a poisoned lock is usable.
        self.conversations
            .lock()
            .unwrap_or_else(|err| err.into_inner())
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn load(&self, id: &str) -> Result<Option<Vec<Message>>, StoreError> {
        Ok(self.lock().get(id).cloned())
    }

    async fn save(
        &self,
        id: &str,
        messages: &[Message],
    ) -> Result<(), StoreError> {
        self.lock().insert(id.to_owned(), messages.to_vec());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.lock().remove(id);
        Ok(())
    }
}
