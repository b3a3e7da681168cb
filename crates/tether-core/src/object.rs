//! Reflectable objects.
//!
//! An object has an immutable class keyword, inheritance stack and identity
//! (uuid), plus lock-protected field storage. Objects are shared through
//! [`ObjectHandle`], a cheap reference-counted pointer; the tree is formed by
//! child fields holding handles to their children.

use crate::error::{CoreError, FieldError, Result};
use crate::field::{ChildField, FieldInfo, ValueField};
use crate::value::FieldValue;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use uuid::Uuid;

/// Receives one notification per applied field change.
pub trait FieldObserver: Send + Sync {
    fn field_changed(
        &self,
        owner: &ObjectHandle,
        keyword: &str,
        before: &FieldValue,
        after: &FieldValue,
    );
}

/// Field storage of an object.
#[derive(Debug, Default)]
pub struct ObjectData {
    pub fields: Vec<ValueField>,
    pub child_fields: Vec<ChildField>,
}

/// A live server- or client-side object.
pub struct Object {
    class_keyword: String,
    /// Most derived first; always starts with `class_keyword`.
    inheritance: Vec<String>,
    uuid: String,
    data: RwLock<ObjectData>,
    observers: RwLock<Vec<Arc<dyn FieldObserver>>>,
}

/// Shared pointer to an [`Object`].
#[derive(Clone)]
pub struct ObjectHandle(Arc<Object>);

/// Non-owning pointer to an [`Object`].
#[derive(Clone)]
pub struct WeakObjectHandle(Weak<Object>);

impl WeakObjectHandle {
    pub fn upgrade(&self) -> Option<ObjectHandle> {
        self.0.upgrade().map(ObjectHandle)
    }
}

impl fmt::Debug for WeakObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(object) => write!(f, "WeakObjectHandle({} {})", object.class_keyword(), object.uuid()),
            None => f.write_str("WeakObjectHandle(dropped)"),
        }
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectHandle({} {})", self.0.class_keyword, self.0.uuid)
    }
}

impl ObjectHandle {
    pub fn builder(class_keyword: impl Into<String>) -> ObjectBuilder {
        ObjectBuilder::new(class_keyword)
    }

    pub fn class_keyword(&self) -> &str {
        &self.0.class_keyword
    }

    pub fn uuid(&self) -> &str {
        &self.0.uuid
    }

    pub fn inheritance(&self) -> &[String] {
        &self.0.inheritance
    }

    /// True if `keyword` names this object's class or one of its ancestors.
    pub fn matches_class(&self, keyword: &str) -> bool {
        self.0.inheritance.iter().any(|k| k == keyword)
    }

    pub fn downgrade(&self) -> WeakObjectHandle {
        WeakObjectHandle(Arc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &ObjectHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn read(&self) -> RwLockReadGuard<'_, ObjectData> {
        self.0.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, ObjectData> {
        self.0.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_observer(&self, observer: Arc<dyn FieldObserver>) {
        self.0
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// All scriptable fields, value fields first.
    pub fn fields_info(&self) -> Vec<FieldInfo> {
        let data = self.read();
        data.fields
            .iter()
            .filter_map(ValueField::info)
            .chain(data.child_fields.iter().filter_map(ChildField::info))
            .collect()
    }

    /// Scriptable field by script name.
    pub fn field_info(&self, script_name: &str) -> Option<FieldInfo> {
        self.fields_info()
            .into_iter()
            .find(|info| info.script_name == script_name)
    }

    /// Read a scriptable value field.
    pub fn get(&self, script_name: &str) -> Result<FieldValue> {
        let data = self.read();
        let field = self.scriptable_value(&data, script_name)?;
        if !field.scripting.as_ref().is_some_and(|s| s.readable) {
            return Err(CoreError::Field(FieldError::NotReadable(script_name.to_string())));
        }
        Ok(field.value.clone())
    }

    /// Replace a scriptable value field as a single change.
    pub fn set(&self, script_name: &str, value: FieldValue) -> Result<()> {
        self.replace(script_name, true, |current| {
            if !current.same_kind(&value) {
                return Err(CoreError::type_mismatch(
                    script_name,
                    current.type_name(),
                    value.type_name(),
                ));
            }
            Ok(value)
        })
    }

    /// Read one element of a scriptable array field.
    pub fn get_element(&self, script_name: &str, index: usize) -> Result<Value> {
        self.get(script_name)?.element_to_json(script_name, index)
    }

    /// Replace one element of a scriptable array field.
    pub fn set_element(&self, script_name: &str, index: usize, json: Value) -> Result<()> {
        self.replace(script_name, true, |current| {
            let mut next = current.clone();
            next.set_element_from_json(script_name, index, json)?;
            Ok(next)
        })
    }

    /// Replace a scriptable value field from JSON, typed after the current
    /// value.
    pub fn set_json(&self, script_name: &str, json: Value) -> Result<()> {
        self.replace(script_name, true, |current| current.parse_like(script_name, json))
    }

    /// Read a value field by keyword, ignoring scriptability.
    pub fn field(&self, keyword: &str) -> Option<FieldValue> {
        self.read()
            .fields
            .iter()
            .find(|f| f.keyword == keyword)
            .map(|f| f.value.clone())
    }

    /// Write a value field by keyword, ignoring scriptability.
    pub fn set_field(&self, keyword: &str, value: FieldValue) -> Result<()> {
        let before = {
            let mut data = self.write();
            let field = data
                .fields
                .iter_mut()
                .find(|f| f.keyword == keyword)
                .ok_or_else(|| CoreError::field_not_found(self.class_keyword(), keyword))?;
            if !field.value.same_kind(&value) {
                return Err(CoreError::type_mismatch(
                    keyword,
                    field.value.type_name(),
                    value.type_name(),
                ));
            }
            std::mem::replace(&mut field.value, value.clone())
        };
        self.notify(keyword, &before, &value);
        Ok(())
    }

    /// Children of a scriptable child field.
    pub fn children(&self, script_name: &str) -> Result<Vec<ObjectHandle>> {
        let data = self.read();
        let field = self.scriptable_child(&data, script_name)?;
        Ok(field.children.clone())
    }

    /// Direct children across every child field, scriptable or not.
    pub fn child_objects(&self) -> Vec<ObjectHandle> {
        self.read()
            .child_fields
            .iter()
            .flat_map(|f| f.children.iter().cloned())
            .collect()
    }

    /// This object followed by all of its descendants, depth first.
    pub fn descendants_and_self(&self) -> Vec<ObjectHandle> {
        let mut out = Vec::new();
        let mut stack = vec![self.clone()];
        while let Some(object) = stack.pop() {
            // Lock is released before descending into children.
            let children = object.child_objects();
            out.push(object);
            stack.extend(children.into_iter().rev());
        }
        out
    }

    /// Remove every child of a scriptable child field.
    pub fn clear_children(&self, script_name: &str) -> Result<Vec<ObjectHandle>> {
        let mut data = self.write();
        let field = self.scriptable_child_mut(&mut data, script_name)?;
        Ok(std::mem::take(&mut field.children))
    }

    /// Remove the child at `index` of a scriptable child array field.
    pub fn remove_child(&self, script_name: &str, index: usize) -> Result<ObjectHandle> {
        let mut data = self.write();
        let field = self.scriptable_child_mut(&mut data, script_name)?;
        if !field.array {
            return Err(CoreError::Field(FieldError::WrongFieldKind(script_name.to_string())));
        }
        if index >= field.children.len() {
            return Err(CoreError::Field(FieldError::IndexOutOfRange {
                keyword: script_name.to_string(),
                index,
                len: field.children.len(),
            }));
        }
        Ok(field.children.remove(index))
    }

    /// Insert `child` at `index`; an index past the end appends.
    pub fn insert_child(&self, script_name: &str, index: usize, child: ObjectHandle) -> Result<()> {
        let mut data = self.write();
        let field = self.scriptable_child_mut(&mut data, script_name)?;
        if !field.array {
            return Err(CoreError::Field(FieldError::WrongFieldKind(script_name.to_string())));
        }
        let index = index.min(field.children.len());
        field.children.insert(index, child);
        Ok(())
    }

    pub(crate) fn replace<F>(&self, script_name: &str, check_writable: bool, next: F) -> Result<()>
    where
        F: FnOnce(&FieldValue) -> Result<FieldValue>,
    {
        let (keyword, before, after) = {
            let mut data = self.write();
            let owner = self.class_keyword();
            let field = data
                .fields
                .iter_mut()
                .find(|f| f.scripting.as_ref().is_some_and(|s| s.script_name == script_name))
                .ok_or_else(|| CoreError::field_not_found(owner, script_name))?;
            if check_writable && !field.scripting.as_ref().is_some_and(|s| s.writable) {
                return Err(CoreError::Field(FieldError::NotWritable(script_name.to_string())));
            }
            let after = next(&field.value)?;
            let before = std::mem::replace(&mut field.value, after.clone());
            (field.keyword.clone(), before, after)
        };
        self.notify(&keyword, &before, &after);
        Ok(())
    }

    fn notify(&self, keyword: &str, before: &FieldValue, after: &FieldValue) {
        let observers = self
            .0
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in observers {
            observer.field_changed(self, keyword, before, after);
        }
    }

    fn scriptable_value<'a>(&self, data: &'a ObjectData, script_name: &str) -> Result<&'a ValueField> {
        data.fields
            .iter()
            .find(|f| f.scripting.as_ref().is_some_and(|s| s.script_name == script_name))
            .ok_or_else(|| self.missing(data, script_name))
    }

    fn scriptable_child<'a>(&self, data: &'a ObjectData, script_name: &str) -> Result<&'a ChildField> {
        data.child_fields
            .iter()
            .find(|f| f.scripting.as_ref().is_some_and(|s| s.script_name == script_name))
            .ok_or_else(|| self.missing(data, script_name))
    }

    fn scriptable_child_mut<'a>(
        &self,
        data: &'a mut ObjectData,
        script_name: &str,
    ) -> Result<&'a mut ChildField> {
        let err = self.missing(data, script_name);
        data.child_fields
            .iter_mut()
            .find(|f| f.scripting.as_ref().is_some_and(|s| s.script_name == script_name))
            .ok_or(err)
    }

    /// Not-found or wrong-kind, depending on whether the name exists at all.
    fn missing(&self, data: &ObjectData, script_name: &str) -> CoreError {
        let scriptable = |s: &Option<crate::field::Scriptability>| {
            s.as_ref().is_some_and(|s| s.script_name == script_name)
        };
        let exists = data.fields.iter().any(|f| scriptable(&f.scripting))
            || data.child_fields.iter().any(|f| scriptable(&f.scripting));
        if exists {
            CoreError::Field(FieldError::WrongFieldKind(script_name.to_string()))
        } else {
            CoreError::field_not_found(self.class_keyword(), script_name)
        }
    }
}

/// Builder for [`ObjectHandle`].
///
/// # Example
///
/// ```rust
/// use tether_core::prelude::*;
///
/// let object = ObjectHandle::builder("DemoObject")
///     .inherits("Object")
///     .field(ValueField::scriptable("intVector", FieldValue::Int32Array(vec![42])))
///     .build();
/// assert!(object.matches_class("Object"));
/// ```
pub struct ObjectBuilder {
    class_keyword: String,
    parents: Vec<String>,
    uuid: Option<String>,
    data: ObjectData,
}

impl ObjectBuilder {
    pub fn new(class_keyword: impl Into<String>) -> Self {
        Self {
            class_keyword: class_keyword.into(),
            parents: Vec::new(),
            uuid: None,
            data: ObjectData::default(),
        }
    }

    /// Append an ancestor class keyword (closest ancestor first).
    pub fn inherits(mut self, keyword: impl Into<String>) -> Self {
        self.parents.push(keyword.into());
        self
    }

    /// Use a fixed identity instead of a freshly generated one.
    pub fn uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    pub fn field(mut self, field: ValueField) -> Self {
        self.data.fields.push(field);
        self
    }

    pub fn child(mut self, field: ChildField) -> Self {
        self.data.child_fields.push(field);
        self
    }

    pub fn build(self) -> ObjectHandle {
        let mut inheritance = Vec::with_capacity(self.parents.len() + 1);
        inheritance.push(self.class_keyword.clone());
        inheritance.extend(self.parents);
        ObjectHandle(Arc::new(Object {
            class_keyword: self.class_keyword,
            inheritance,
            uuid: self.uuid.unwrap_or_else(|| Uuid::new_v4().to_string()),
            data: RwLock::new(self.data),
            observers: RwLock::new(Vec::new()),
        }))
    }
}
