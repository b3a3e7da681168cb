//! Invokable object methods.
//!
//! Methods are registered per class keyword and found by walking the target
//! object's inheritance stack, most derived class first.

use crate::error::{CoreError, MethodError, Result};
use crate::object::ObjectHandle;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// Whether a method may mutate the object tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MethodAccess {
    ReadOnly,
    ReadWrite,
}

impl MethodAccess {
    pub fn is_mutating(&self) -> bool {
        matches!(self, MethodAccess::ReadWrite)
    }
}

/// A method that can be executed on an object.
pub trait ObjectMethod: Send + Sync {
    fn keyword(&self) -> &str;

    fn access(&self) -> MethodAccess;

    /// Parameter holder with every parameter at its default.
    fn default_params(&self) -> Value;

    /// Result shape with every value at its default.
    fn default_result(&self) -> Value;

    /// Run the method against `owner`.
    ///
    /// # Errors
    ///
    /// `MethodError::InvalidParameters` if `params` does not fit the
    /// parameter holder, `MethodError::Failed` for failures raised while
    /// running.
    fn execute(&self, owner: &ObjectHandle, params: Value) -> Result<Value>;
}

type MethodBody<P, R> = dyn Fn(&ObjectHandle, P) -> Result<R> + Send + Sync;

/// Adapter turning a typed closure into an [`ObjectMethod`].
///
/// `P` is deserialized from the JSON parameters (a `null` payload yields
/// `P::default()`), `R` is serialized into the JSON result.
///
/// # Example
///
/// ```rust
/// use serde::{Deserialize, Serialize};
/// use tether_core::prelude::*;
///
/// #[derive(Default, Serialize, Deserialize)]
/// struct Resize { size: usize }
///
/// let method = TypedMethod::read_write("resize", |owner: &ObjectHandle, p: Resize| {
///     owner.set("intVector", FieldValue::Int32Array(vec![0; p.size]))
/// });
/// assert_eq!(method.keyword(), "resize");
/// ```
pub struct TypedMethod<P, R> {
    keyword: String,
    access: MethodAccess,
    body: Box<MethodBody<P, R>>,
    _marker: PhantomData<fn() -> (P, R)>,
}

impl<P, R> TypedMethod<P, R>
where
    P: DeserializeOwned + Serialize + Default + 'static,
    R: Serialize + Default + 'static,
{
    pub fn new<F>(keyword: impl Into<String>, access: MethodAccess, body: F) -> Self
    where
        F: Fn(&ObjectHandle, P) -> Result<R> + Send + Sync + 'static,
    {
        Self {
            keyword: keyword.into(),
            access,
            body: Box::new(body),
            _marker: PhantomData,
        }
    }

    pub fn read_only<F>(keyword: impl Into<String>, body: F) -> Self
    where
        F: Fn(&ObjectHandle, P) -> Result<R> + Send + Sync + 'static,
    {
        Self::new(keyword, MethodAccess::ReadOnly, body)
    }

    pub fn read_write<F>(keyword: impl Into<String>, body: F) -> Self
    where
        F: Fn(&ObjectHandle, P) -> Result<R> + Send + Sync + 'static,
    {
        Self::new(keyword, MethodAccess::ReadWrite, body)
    }
}

impl<P, R> ObjectMethod for TypedMethod<P, R>
where
    P: DeserializeOwned + Serialize + Default + 'static,
    R: Serialize + Default + 'static,
{
    fn keyword(&self) -> &str {
        &self.keyword
    }

    fn access(&self) -> MethodAccess {
        self.access
    }

    fn default_params(&self) -> Value {
        serde_json::to_value(P::default()).unwrap_or(Value::Null)
    }

    fn default_result(&self) -> Value {
        serde_json::to_value(R::default()).unwrap_or(Value::Null)
    }

    fn execute(&self, owner: &ObjectHandle, params: Value) -> Result<Value> {
        let params = if params.is_null() {
            P::default()
        } else {
            serde_json::from_value(params)
                .map_err(|e| CoreError::Method(MethodError::InvalidParameters(e.to_string())))?
        };
        let result = (self.body)(owner, params)?;
        Ok(serde_json::to_value(result)?)
    }
}

/// Discovery record for one method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub keyword: String,
    pub access: MethodAccess,
    pub params: Value,
    pub result: Value,
}

impl MethodDescriptor {
    pub fn of(method: &dyn ObjectMethod) -> Self {
        Self {
            keyword: method.keyword().to_string(),
            access: method.access(),
            params: method.default_params(),
            result: method.default_result(),
        }
    }
}

/// Methods registered per class keyword.
#[derive(Default, Clone)]
pub struct MethodRegistry {
    by_class: HashMap<String, Vec<Arc<dyn ObjectMethod>>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `method` for objects of `class_keyword` and its subclasses.
    pub fn register(&mut self, class_keyword: impl Into<String>, method: impl ObjectMethod + 'static) {
        self.by_class
            .entry(class_keyword.into())
            .or_default()
            .push(Arc::new(method));
    }

    /// Find a method by name, searching the most derived class first.
    pub fn find(&self, object: &ObjectHandle, keyword: &str) -> Option<Arc<dyn ObjectMethod>> {
        object
            .inheritance()
            .iter()
            .filter_map(|class| self.by_class.get(class))
            .flat_map(|methods| methods.iter())
            .find(|m| m.keyword() == keyword)
            .cloned()
    }

    /// Every method available on `object`. A derived class method hides a
    /// base class method of the same name.
    pub fn methods_for(&self, object: &ObjectHandle) -> Vec<Arc<dyn ObjectMethod>> {
        let mut out: Vec<Arc<dyn ObjectMethod>> = Vec::new();
        for class in object.inheritance() {
            for method in self.by_class.get(class).into_iter().flatten() {
                if !out.iter().any(|m| m.keyword() == method.keyword()) {
                    out.push(method.clone());
                }
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.by_class.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
