//! Construction of objects by class keyword.

use crate::error::{CoreError, FieldError, Result};
use crate::object::{ObjectBuilder, ObjectHandle};
use crate::snapshot::ObjectSnapshot;
use std::collections::HashMap;
use std::sync::Arc;

type Constructor = dyn Fn() -> ObjectBuilder + Send + Sync;

/// Registry of object constructors.
#[derive(Default, Clone)]
pub struct ObjectFactory {
    constructors: HashMap<String, Arc<Constructor>>,
}

impl ObjectFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor returning a builder preloaded with the
    /// class's default fields.
    pub fn register<F>(&mut self, class_keyword: impl Into<String>, constructor: F)
    where
        F: Fn() -> ObjectBuilder + Send + Sync + 'static,
    {
        self.constructors
            .insert(class_keyword.into(), Arc::new(constructor));
    }

    pub fn contains(&self, class_keyword: &str) -> bool {
        self.constructors.contains_key(class_keyword)
    }

    /// Default-valued object with a fresh identity.
    pub fn create(&self, class_keyword: &str) -> Result<ObjectHandle> {
        Ok(self.builder(class_keyword)?.build())
    }

    /// Rebuild an object tree from its snapshot, keeping the snapshot's
    /// identities when present.
    ///
    /// # Errors
    ///
    /// `ObjectError::UnknownClass` if the snapshot or any descendant names a
    /// class with no registered constructor.
    pub fn from_snapshot(&self, snapshot: &ObjectSnapshot) -> Result<ObjectHandle> {
        let mut builder = self.builder(&snapshot.keyword)?;
        if !snapshot.uuid.is_empty() {
            builder = builder.uuid(snapshot.uuid.clone());
        }
        let object = builder.build();
        object.apply_values(&snapshot.fields)?;

        for (name, children) in &snapshot.children {
            let children = children
                .iter()
                .map(|child| self.from_snapshot(child))
                .collect::<Result<Vec<_>>>()?;
            let mut data = object.write();
            let field = data
                .child_fields
                .iter_mut()
                .find(|f| f.scripting.as_ref().is_some_and(|s| &s.script_name == name))
                .ok_or_else(|| CoreError::field_not_found(&snapshot.keyword, name))?;
            if !field.array && children.len() > 1 {
                return Err(CoreError::Field(FieldError::WrongFieldKind(name.clone())));
            }
            field.children = children;
        }
        Ok(object)
    }

    fn builder(&self, class_keyword: &str) -> Result<ObjectBuilder> {
        let constructor = self
            .constructors
            .get(class_keyword)
            .ok_or_else(|| CoreError::unknown_class(class_keyword))?;
        Ok(constructor())
    }
}
