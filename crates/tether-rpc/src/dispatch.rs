//! Remote method invocation.

use crate::resolver::ObjectResolver;
use crate::types::{RpcResult, SessionType, Status};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tether_core::error::{CoreError, MethodError};
use tether_core::method::{MethodDescriptor, MethodRegistry};
use tether_core::snapshot::ObjectReference;
use tracing::{debug, warn};
use uuid::Uuid;

/// Serialized outcome of one method execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodResult {
    /// Keyword of the executed method.
    pub keyword: String,
    /// Identity of this result object.
    pub uuid: String,
    /// JSON text of the result.
    pub json: String,
}

/// Resolves, authorizes and executes methods on live objects.
pub struct MethodDispatcher {
    resolver: Arc<ObjectResolver>,
    registry: Arc<MethodRegistry>,
}

impl MethodDispatcher {
    pub fn new(resolver: Arc<ObjectResolver>, registry: Arc<MethodRegistry>) -> Self {
        Self { resolver, registry }
    }

    /// Execute `method` on the object named by `owner`.
    ///
    /// # Arguments
    ///
    /// * `owner` - Reference to the target object
    /// * `method` - Method keyword
    /// * `params` - JSON text of the parameters; empty means defaults
    /// * `session_type` - Tier of the calling session
    ///
    /// # Errors
    ///
    /// `NotFound` for an unresolved owner or unknown method,
    /// `Unauthenticated` for a mutating method called from an observing
    /// session, `InvalidArgument` for unreadable parameters and
    /// `FailedPrecondition` carrying the message of a failed execution.
    pub fn invoke(
        &self,
        owner: &ObjectReference,
        method: &str,
        params: &str,
        session_type: SessionType,
    ) -> RpcResult<MethodResult> {
        let object = self.resolver.resolve_or_not_found(owner)?;
        let handler = self.registry.find(&object, method).ok_or_else(|| {
            Status::not_found(format!(
                "Could not find method {} on {}",
                method,
                object.class_keyword()
            ))
        })?;

        if handler.access().is_mutating() && session_type == SessionType::Observing {
            return Err(Status::unauthenticated(format!(
                "Observing sessions may not execute {} which modifies data",
                method
            )));
        }

        let params: Value = if params.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(params)?
        };

        debug!("Executing {} on {:?}", method, object);
        let outcome = catch_unwind(AssertUnwindSafe(|| handler.execute(&object, params)));
        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(CoreError::Method(MethodError::InvalidParameters(msg)))) => {
                return Err(Status::invalid_argument(format!(
                    "Invalid parameters for {}: {}",
                    method, msg
                )));
            }
            Ok(Err(CoreError::Method(MethodError::Failed(msg)))) => {
                return Err(Status::failed_precondition(msg));
            }
            Ok(Err(err)) => return Err(Status::failed_precondition(err.to_string())),
            Err(payload) => {
                let detail = panic_message(payload.as_ref());
                warn!("Method {} panicked: {}", method, detail);
                return Err(Status::failed_precondition(format!(
                    "Method {} failed: {}",
                    method, detail
                )));
            }
        };

        Ok(MethodResult {
            keyword: method.to_string(),
            uuid: Uuid::new_v4().to_string(),
            json: result.to_string(),
        })
    }

    /// Every method available on the object named by `owner`.
    ///
    /// # Errors
    ///
    /// `NotFound` if the owner cannot be resolved.
    pub fn list_methods(&self, owner: &ObjectReference) -> RpcResult<Vec<MethodDescriptor>> {
        let object = self.resolver.resolve_or_not_found(owner)?;
        Ok(self
            .registry
            .methods_for(&object)
            .iter()
            .map(|m| MethodDescriptor::of(m.as_ref()))
            .collect())
    }
}

/// Text of a panic payload raised with a message.
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::DocumentDirectory;
    use crate::types::StatusCode;
    use serde_json::json;
    use tether_core::prelude::*;

    #[derive(Debug, Default, Serialize, Deserialize)]
    #[serde(default)]
    struct Increment {
        by: i32,
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Counter {
        value: i32,
    }

    fn setup() -> (MethodDispatcher, ObjectHandle) {
        let counter = ObjectHandle::builder("Counter")
            .field(ValueField::scriptable("value", FieldValue::Int32(0)))
            .build();
        let document = Document::new("doc", counter.clone());
        let directory = Arc::new(DocumentDirectory::with_documents(vec![document]));
        let resolver = Arc::new(ObjectResolver::new(directory));

        let mut registry = MethodRegistry::new();
        registry.register(
            "Counter",
            TypedMethod::read_write("increment", |owner: &ObjectHandle, p: Increment| {
                if p.by < 0 {
                    return Err(CoreError::method_failed("Counter cannot go backwards"));
                }
                let FieldValue::Int32(current) = owner.get("value")? else {
                    return Err(CoreError::method_failed("value is not an int32"));
                };
                owner.set("value", FieldValue::Int32(current + p.by))?;
                Ok(Counter { value: current + p.by })
            }),
        );
        registry.register(
            "Counter",
            TypedMethod::read_only("explode", |_: &ObjectHandle, _: Increment| -> tether_core::error::Result<Counter> {
                panic!("boom detail")
            }),
        );
        registry.register(
            "Counter",
            TypedMethod::read_only("touch", |owner: &ObjectHandle, _: Increment| {
                owner.get("nope")?;
                Ok(Counter::default())
            }),
        );
        (MethodDispatcher::new(resolver, Arc::new(registry)), counter)
    }

    #[test]
    fn test_regular_session_mutates() {
        let (dispatcher, counter) = setup();
        let result = dispatcher
            .invoke(&counter.reference(), "increment", r#"{"by": 3}"#, SessionType::Regular)
            .unwrap();
        assert_eq!(result.keyword, "increment");
        assert_eq!(serde_json::from_str::<Value>(&result.json).unwrap(), json!({"value": 3}));
        assert_eq!(counter.get("value").unwrap(), FieldValue::Int32(3));
    }

    #[test]
    fn test_observing_session_is_refused() {
        let (dispatcher, counter) = setup();
        let err = dispatcher
            .invoke(&counter.reference(), "increment", "", SessionType::Observing)
            .unwrap_err();
        assert_eq!(err.code, StatusCode::Unauthenticated);
        assert_eq!(counter.get("value").unwrap(), FieldValue::Int32(0));
    }

    #[test]
    fn test_failure_becomes_failed_precondition() {
        let (dispatcher, counter) = setup();
        let err = dispatcher
            .invoke(&counter.reference(), "increment", r#"{"by": -1}"#, SessionType::Regular)
            .unwrap_err();
        assert_eq!(err, Status::failed_precondition("Counter cannot go backwards"));

        let err = dispatcher
            .invoke(&counter.reference(), "explode", "", SessionType::Regular)
            .unwrap_err();
        assert_eq!(err.code, StatusCode::FailedPrecondition);
        assert!(err.message.contains("boom detail"), "{}", err.message);

        let err = dispatcher
            .invoke(&counter.reference(), "touch", "", SessionType::Regular)
            .unwrap_err();
        assert_eq!(err.code, StatusCode::FailedPrecondition);
        assert!(err.message.contains("nope"), "{}", err.message);
    }

    #[test]
    fn test_lookup_errors() {
        let (dispatcher, counter) = setup();
        let err = dispatcher
            .invoke(&counter.reference(), "missing", "", SessionType::Regular)
            .unwrap_err();
        assert_eq!(err.code, StatusCode::NotFound);

        let stranger = ObjectReference::new("Counter", "no-such-uuid");
        let err = dispatcher.list_methods(&stranger).unwrap_err();
        assert_eq!(err.code, StatusCode::NotFound);

        let err = dispatcher
            .invoke(&counter.reference(), "increment", "{not json", SessionType::Regular)
            .unwrap_err();
        assert_eq!(err.code, StatusCode::InvalidArgument);
    }

    #[test]
    fn test_list_methods_defaults() {
        let (dispatcher, counter) = setup();
        let methods = dispatcher.list_methods(&counter.reference()).unwrap();
        assert_eq!(methods.len(), 3);
        assert_eq!(methods[0].keyword, "increment");
        assert_eq!(methods[0].params, json!({"by": 0}));
        assert_eq!(methods[0].result, json!({"value": 0}));
    }
}
