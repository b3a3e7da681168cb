//! Top-level documents visible to sessions.

use std::sync::{PoisonError, RwLock};
use tether_core::document::Document;
use tracing::debug;

/// Enumerates documents and resolves them by identifier.
#[derive(Debug, Default)]
pub struct DocumentDirectory {
    documents: RwLock<Vec<Document>>,
}

impl DocumentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents(documents: Vec<Document>) -> Self {
        Self {
            documents: RwLock::new(documents),
        }
    }

    /// Add a document; a document with the same id is replaced.
    pub fn add_document(&self, document: Document) {
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        documents.retain(|d| d.id() != document.id());
        debug!("Registered document {}", document.id());
        documents.push(document);
    }

    pub fn remove_document(&self, id: &str) -> Option<Document> {
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        let index = documents.iter().position(|d| d.id() == id)?;
        Some(documents.remove(index))
    }

    /// All documents, in registration order.
    pub fn documents(&self) -> Vec<Document> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn document_ids(&self) -> Vec<String> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|d| d.id().to_string())
            .collect()
    }

    /// Document by id. An empty id selects the first document.
    pub fn document(&self, id: &str) -> Option<Document> {
        let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        if id.is_empty() {
            return documents.first().cloned();
        }
        documents.iter().find(|d| d.id() == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.documents.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::object::ObjectHandle;

    fn document(id: &str) -> Document {
        Document::new(id, ObjectHandle::builder("DemoDocument").build())
    }

    #[test]
    fn test_lookup_by_id() {
        let directory = DocumentDirectory::with_documents(vec![document("a"), document("b")]);
        assert_eq!(directory.document("b").unwrap().id(), "b");
        assert!(directory.document("c").is_none());
        assert_eq!(directory.document_ids(), vec!["a", "b"]);
    }

    #[test]
    fn test_empty_id_selects_first() {
        let directory = DocumentDirectory::new();
        assert!(directory.document("").is_none());
        directory.add_document(document("first"));
        directory.add_document(document("second"));
        assert_eq!(directory.document("").unwrap().id(), "first");
    }

    #[test]
    fn test_replace_and_remove() {
        let directory = DocumentDirectory::new();
        directory.add_document(document("a"));
        directory.add_document(document("a"));
        assert_eq!(directory.len(), 1);
        assert!(directory.remove_document("a").is_some());
        assert!(directory.is_empty());
    }
}
