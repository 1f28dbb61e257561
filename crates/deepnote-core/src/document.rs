//! Document store trait — versioned file storage behind the note archive.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::error::{DeepNoteError, Result};

/// A stored document together with its optimistic-concurrency token.
#[derive(Debug, Clone)]
pub struct Document {
    pub content: Vec<u8>,
    /// Token that must accompany the next update (a blob SHA on GitHub).
    pub version: String,
    /// Durable reference to the document.
    pub url: String,
}

impl Document {
    /// Content decoded as UTF-8 (lossy).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }
}

/// Document store trait — implement for each versioned backend.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document. `Ok(None)` means it does not exist.
    async fn get(&self, path: &str) -> Result<Option<Document>>;

    /// Create a new document, returning its durable reference.
    async fn create(&self, path: &str, content: &[u8], message: &str) -> Result<String>;

    /// Replace a document. `version` must be the token from the latest `get`.
    async fn update(
        &self,
        path: &str,
        content: &[u8],
        version: &str,
        message: &str,
    ) -> Result<String>;
}

/// In-memory store for testing and local runs.
pub struct InMemoryDocumentStore {
    files: Mutex<HashMap<String, (Vec<u8>, u64)>>,
    commits: Mutex<Vec<String>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            commits: Mutex::new(Vec::new()),
        }
    }

    /// Current text of a document, if present.
    pub fn read(&self, path: &str) -> Option<String> {
        let files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        files
            .get(path)
            .map(|(c, _)| String::from_utf8_lossy(c).into_owned())
    }

    /// Commit messages in the order they were written.
    pub fn commits(&self) -> Vec<String> {
        self.commits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn paths(&self) -> Vec<String> {
        let files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        let mut paths: Vec<String> = files.keys().cloned().collect();
        paths.sort();
        paths
    }

    fn url(path: &str) -> String {
        format!("memory://{}", path)
    }

    fn log(&self, message: &str) {
        self.commits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.to_string());
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, path: &str) -> Result<Option<Document>> {
        let files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(files.get(path).map(|(content, version)| Document {
            content: content.clone(),
            version: version.to_string(),
            url: Self::url(path),
        }))
    }

    async fn create(&self, path: &str, content: &[u8], message: &str) -> Result<String> {
        {
            let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
            if files.contains_key(path) {
                return Err(DeepNoteError::Archive(format!("{} already exists", path)));
            }
            files.insert(path.to_string(), (content.to_vec(), 1));
        }
        self.log(message);
        Ok(Self::url(path))
    }

    async fn update(
        &self,
        path: &str,
        content: &[u8],
        version: &str,
        message: &str,
    ) -> Result<String> {
        {
            let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
            let entry = files
                .get_mut(path)
                .ok_or_else(|| DeepNoteError::Archive(format!("{} not found", path)))?;
            if entry.1.to_string() != version {
                return Err(DeepNoteError::Archive(format!(
                    "{} changed since it was read",
                    path
                )));
            }
            *entry = (content.to_vec(), entry.1 + 1);
        }
        self.log(message);
        Ok(Self::url(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stale_version_is_rejected() {
        let store = InMemoryDocumentStore::new();
        store.create("a.md", b"one", "Add a").await.unwrap();
        let doc = store.get("a.md").await.unwrap().unwrap();

        store
            .update("a.md", b"two", &doc.version, "Update a")
            .await
            .unwrap();
        let err = store
            .update("a.md", b"three", &doc.version, "Update a")
            .await
            .unwrap_err();
        assert!(matches!(err, DeepNoteError::Archive(_)));
        assert_eq!(store.read("a.md").as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_missing_document() {
        let store = InMemoryDocumentStore::new();
        assert!(store.get("nope.md").await.unwrap().is_none());
        assert!(store.update("nope.md", b"x", "1", "m").await.is_err());
    }
}
