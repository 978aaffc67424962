//! Process-lifetime document store.
//!
//! A `RwLock<HashMap>` keyed by document id, holding `Arc<Document>`
//! snapshots. Documents are immutable after insert, so readers clone the
//! `Arc` and drop the lock immediately; inserts take the write lock and
//! regenerate the id on collision. No update or delete operations exist:
//! state lives until process restart.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use uuid::Uuid;

use crate::models::{Document, DocumentSummary};

/// In-memory id → document map shared across requests.
pub struct DocumentStore {
    inner: RwLock<HashMap<String, Arc<Document>>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Inserts a document, generating a UUIDv4 id when the document carries
    /// none. Returns the id under which the document was stored; a supplied
    /// id that collides with an existing entry is replaced by a fresh one
    /// rather than overwriting.
    pub fn put(&self, mut doc: Document) -> String {
        let mut map = self.inner.write().unwrap();
        let mut id = if doc.id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            doc.id.clone()
        };
        while map.contains_key(&id) {
            id = Uuid::new_v4().to_string();
        }
        doc.id = id.clone();
        map.insert(id.clone(), Arc::new(doc));
        id
    }

    pub fn get(&self, id: &str) -> Option<Arc<Document>> {
        self.inner.read().unwrap().get(id).cloned()
    }

    /// All stored documents, ordered by upload time (id as tie-break).
    pub fn all(&self) -> Vec<Arc<Document>> {
        let map = self.inner.read().unwrap();
        let mut docs: Vec<Arc<Document>> = map.values().cloned().collect();
        docs.sort_by(|a, b| {
            a.uploaded_at
                .cmp(&b.uploaded_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        docs
    }

    pub fn list(&self) -> Vec<DocumentSummary> {
        self.all()
            .iter()
            .map(|doc| DocumentSummary {
                doc_id: doc.id.clone(),
                filename: doc.filename.clone(),
                file_type: doc.file_type,
                chunks_count: doc.chunks.len(),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().is_empty()
    }
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}
