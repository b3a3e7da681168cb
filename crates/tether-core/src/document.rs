//! Top-level documents.

use crate::object::ObjectHandle;

/// A named root of an object tree.
#[derive(Debug, Clone)]
pub struct Document {
    id: String,
    root: ObjectHandle,
}

impl Document {
    pub fn new(id: impl Into<String>, root: ObjectHandle) -> Self {
        Self { id: id.into(), root }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root(&self) -> &ObjectHandle {
        &self.root
    }

    /// Objects in the document (root included) whose class or ancestor
    /// class is `class_keyword`.
    pub fn objects_of_class(&self, class_keyword: &str) -> Vec<ObjectHandle> {
        self.root
            .descendants_and_self()
            .into_iter()
            .filter(|o| o.matches_class(class_keyword))
            .collect()
    }
}
