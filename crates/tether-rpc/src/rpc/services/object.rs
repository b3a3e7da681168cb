//! Documents and method invocation.

use super::{expect_request, ServiceContext};
use crate::dispatch::MethodResult;
use crate::rpc::callback::CallbackInstance;
use crate::rpc::messages::{DocumentRequest, MethodRequest, ObjectRequest};
use crate::rpc::protocol::{CallRequest, RpcMethod, UnaryReply};
use crate::types::{RpcResult, Status};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Serves documents, method execution and method discovery.
pub struct ObjectService {
    context: Arc<ServiceContext>,
}

impl ObjectService {
    pub fn new(context: Arc<ServiceContext>) -> Self {
        Self { context }
    }

    /// JSON snapshot of a document's root object.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` without a live session, `NotFound` for an unknown
    /// document id.
    #[instrument(skip(self, request), fields(document = %request.document_id))]
    pub fn get_document(&self, request: DocumentRequest) -> RpcResult<String> {
        let _session = self.context.session(&request.session)?;
        let document = self
            .context
            .directory
            .document(&request.document_id)
            .ok_or_else(|| {
                Status::not_found(format!("Could not find document '{}'", request.document_id))
            })?;
        debug!("Serving document {}", document.id());
        Ok(document.root().snapshot().to_json_string()?)
    }

    pub fn list_documents(&self, request: DocumentRequest) -> RpcResult<Vec<String>> {
        let _session = self.context.session(&request.session)?;
        Ok(self.context.directory.document_ids())
    }

    #[instrument(skip(self, request), fields(method = %request.method, object = %request.object.uuid))]
    pub fn execute_method(&self, request: MethodRequest) -> RpcResult<MethodResult> {
        let session = self.context.session(&request.session)?;
        self.context.dispatcher.invoke(
            &request.object,
            &request.method,
            &request.params,
            session.session_type(),
        )
    }

    /// JSON descriptors of every method on the object.
    pub fn list_methods(&self, request: ObjectRequest) -> RpcResult<Vec<String>> {
        let _session = self.context.session(&request.session)?;
        self.context
            .dispatcher
            .list_methods(&request.object)?
            .iter()
            .map(|descriptor| serde_json::to_string(descriptor).map_err(Status::from))
            .collect()
    }

    /// Bind every call of this service.
    pub fn create_callbacks(self: &Arc<Self>) -> Vec<CallbackInstance> {
        let this = self.clone();
        let document = CallbackInstance::unary(RpcMethod::GetDocument, move |request| {
            let request = expect_request!(request, CallRequest::GetDocument);
            this.get_document(request).map(UnaryReply::Object)
        });
        let this = self.clone();
        let documents = CallbackInstance::unary(RpcMethod::ListDocuments, move |request| {
            let request = expect_request!(request, CallRequest::ListDocuments);
            this.list_documents(request).map(UnaryReply::DocumentIds)
        });
        let this = self.clone();
        let execute = CallbackInstance::unary(RpcMethod::ExecuteMethod, move |request| {
            let request = expect_request!(request, CallRequest::ExecuteMethod);
            this.execute_method(request).map(UnaryReply::MethodResult)
        });
        let this = self.clone();
        let methods = CallbackInstance::unary(RpcMethod::ListMethods, move |request| {
            let request = expect_request!(request, CallRequest::ListMethods);
            this.list_methods(request).map(UnaryReply::Methods)
        });
        vec![document, documents, execute, methods]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::services::ServerApp;
    use crate::types::{ServerConfig, SessionType, StatusCode};
    use tether_core::document::Document;
    use tether_core::field::ValueField;
    use tether_core::method::{MethodRegistry, TypedMethod};
    use tether_core::object::ObjectHandle;
    use tether_core::snapshot::ObjectSnapshot;
    use tether_core::value::FieldValue;

    fn service() -> (Arc<ObjectService>, ObjectHandle) {
        let root = ObjectHandle::builder("Root")
            .field(ValueField::scriptable("count", FieldValue::Int32(1)))
            .build();
        let mut methods = MethodRegistry::new();
        methods.register(
            "Root",
            TypedMethod::read_write("bump", |owner: &ObjectHandle, _: ()| {
                owner.set("count", FieldValue::Int32(2))
            }),
        );
        let app = ServerApp {
            documents: vec![Document::new("main", root.clone())],
            methods,
            ..Default::default()
        };
        let context = ServiceContext::new(ServerConfig::default(), app);
        (Arc::new(ObjectService::new(context)), root)
    }

    fn session(service: &ObjectService, session_type: SessionType) -> String {
        service
            .context
            .sessions
            .create_session(session_type)
            .unwrap()
            .uuid
    }

    #[test]
    fn test_get_document_requires_session() {
        let (service, root) = service();
        let request = DocumentRequest {
            session: String::new(),
            document_id: String::new(),
        };
        let err = service.get_document(request.clone()).unwrap_err();
        assert_eq!(err.code, StatusCode::Unauthenticated);

        let request = DocumentRequest {
            session: session(&service, SessionType::Observing),
            ..request
        };
        let text = service.get_document(request.clone()).unwrap();
        let snapshot = ObjectSnapshot::from_json_str(&text).unwrap();
        assert_eq!(snapshot.uuid, root.uuid());
        assert_eq!(service.list_documents(request).unwrap(), vec!["main"]);
    }

    #[test]
    fn test_unknown_document() {
        let (service, _) = service();
        let request = DocumentRequest {
            session: session(&service, SessionType::Regular),
            document_id: "other".into(),
        };
        let err = service.get_document(request).unwrap_err();
        assert_eq!(err.code, StatusCode::NotFound);
    }

    #[test]
    fn test_execute_and_list_methods() {
        let (service, root) = service();
        let session = session(&service, SessionType::Regular);
        let result = service
            .execute_method(MethodRequest {
                session: session.clone(),
                object: root.reference(),
                method: "bump".into(),
                params: String::new(),
            })
            .unwrap();
        assert_eq!(result.keyword, "bump");
        assert_eq!(root.get("count").unwrap(), FieldValue::Int32(2));

        let methods = service
            .list_methods(ObjectRequest {
                session,
                object: root.reference(),
            })
            .unwrap();
        assert_eq!(methods.len(), 1);
        assert!(methods[0].contains("\"bump\""));
    }
}
