//! A conversation store that keeps one JSON file per conversation.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use copilot_core::conversation::Message;
use copilot_core::store::{ConversationStore, StoreError};
use tokio::fs;

/// Returns `true` if `id` can name a conversation.
///
/// Ids are used as file names and URL segments, so they are limited to
/// ASCII letters, digits, `-` and `_`.
pub fn is_valid_conversation_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Stores each conversation as `<dir>/<id>.json`.
///
/// Writes go to a temporary file that is then renamed over the old one, so
/// a crash never leaves a half-written history behind.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Creates a store in `dir`. The directory is created on first save.
    #[inline]
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    fn path_of(&self, id: &str) -> Result<PathBuf, StoreError> {
        if !is_valid_conversation_id(id) {
            return Err(StoreError::InvalidId(id.to_owned()));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }
}

#[async_trait]
impl ConversationStore for FileStore {
    async fn load(&self, id: &str) -> Result<Option<Vec<Message>>, StoreError> {
        let path = self.path_of(id)?;
        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_slice(&content)?))
    }

    async fn save(
        &self,
        id: &str,
        messages: &[Message],
    ) -> Result<(), StoreError> {
        let path = self.path_of(id)?;
        fs::create_dir_all(&self.dir).await?;
        let tmp_path = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(messages)?;
        fs::write(&tmp_path, &content).await?;
        fs::rename(&tmp_path, &path).await?;
        trace!("saved {} messages to {}", messages.len(), path.display());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let path = self.path_of(id)?;
        match fs::remove_file(&path).await {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_ids() {
        assert!(is_valid_conversation_id("default"));
        assert!(is_valid_conversation_id("user-42_labs"));
        assert!(!is_valid_conversation_id(""));
        assert!(!is_valid_conversation_id("../etc/passwd"));
        assert!(!is_valid_conversation_id("a b"));
        assert!(!is_valid_conversation_id(&"x".repeat(129)));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("conversations"));
        assert!(store.load("alice").await.unwrap().is_none());

        let messages = vec![
            Message::user("My LDL is 131, is that bad?"),
            Message::assistant("It is above the 100 mg/dL target."),
        ];
        store.save("alice", &messages).await.unwrap();
        assert_eq!(store.load("alice").await.unwrap(), Some(messages));
        assert!(store.load("bob").await.unwrap().is_none());

        store.delete("alice").await.unwrap();
        store.delete("alice").await.unwrap();
        assert!(store.load("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_is_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        store.save("alice", &[Message::user("first")]).await.unwrap();
        store.save("alice", &[Message::user("second")]).await.unwrap();

        assert!(dir.path().join("alice.json").exists());
        assert!(!dir.path().join("alice.json.tmp").exists());
        let loaded = store.load("alice").await.unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].text(), "second");
    }

    #[tokio::test]
    async fn test_invalid_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(matches!(
            store.save("../escape", &[]).await,
            Err(StoreError::InvalidId(_))
        ));
        assert!(matches!(
            store.load("").await,
            Err(StoreError::InvalidId(_))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("alice.json"), b"{not json").unwrap();
        let store = FileStore::new(dir.path());
        assert!(matches!(
            store.load("alice").await,
            Err(StoreError::Data(_))
        ));
    }
}
