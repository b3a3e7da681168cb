//! Field values, child objects and array transfers.

use super::{expect_request, require_regular, ServiceContext};
use crate::rpc::callback::{CallbackInstance, ClientStreamingHandler, ServerStreamingHandler};
use crate::rpc::messages::{
    FieldRequest, InsertChildRequest, RemoveChildRequest, SetValueRequest, SetterHeader,
    SetterReply,
};
use crate::rpc::protocol::{CallRequest, RpcMethod, ServerBody, UnaryReply};
use crate::session::SessionGuard;
use crate::transfer::{ArrayValues, Download, Upload};
use crate::types::{RpcResult, Status};
use serde_json::Value;
use std::sync::Arc;
use tether_core::field::{FieldInfo, FieldKind};
use tether_core::object::ObjectHandle;
use tether_core::snapshot::ObjectSnapshot;
use tracing::{debug, instrument};

/// Serves field access on resolved objects.
pub struct FieldService {
    context: Arc<ServiceContext>,
}

impl FieldService {
    pub fn new(context: Arc<ServiceContext>) -> Self {
        Self { context }
    }

    /// JSON text of a field value.
    ///
    /// With an offset only that element is returned. Child fields yield
    /// references, or full snapshots when `copy_object_values` is set.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown owner or field, `FailedPrecondition` if
    /// the field is not readable, `OutOfRange` for a bad offset.
    #[instrument(skip(self, request), fields(field = %request.field))]
    pub fn get_value(&self, request: FieldRequest) -> RpcResult<String> {
        let _session = self.context.session(&request.session)?;
        let (owner, info) = self.lookup(&request)?;
        if !info.readable {
            return Err(Status::failed_precondition(format!(
                "Field {} found, but it isn't readable",
                request.field
            )));
        }

        let json = match (info.kind, request.offset) {
            (FieldKind::Value { .. }, None) => owner.get(&request.field)?.to_json(),
            (FieldKind::Value { .. }, Some(offset)) => {
                owner.get_element(&request.field, offset as usize)?
            }
            (FieldKind::Child { array }, offset) => {
                let children = owner.children(&request.field)?;
                let describe = |child: &ObjectHandle| {
                    if request.copy_object_values {
                        child.snapshot()
                    } else {
                        ObjectSnapshot::reference(child.class_keyword(), child.uuid())
                    }
                };
                match offset {
                    Some(offset) => {
                        let child = children.get(offset as usize).ok_or_else(|| {
                            Status::out_of_range(format!(
                                "Index {} out of range for {} ({} children)",
                                offset,
                                request.field,
                                children.len()
                            ))
                        })?;
                        serde_json::to_value(describe(child))?
                    }
                    None if array => {
                        serde_json::to_value(children.iter().map(describe).collect::<Vec<_>>())?
                    }
                    None => serde_json::to_value(children.first().map(describe))?,
                }
            }
        };
        Ok(json.to_string())
    }

    /// Write a JSON value into a field, or into one element with an offset.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` for observing sessions, `FailedPrecondition` if
    /// the field is not writable, `InvalidArgument` for a value of the
    /// wrong shape.
    #[instrument(skip(self, request), fields(field = %request.field.field))]
    pub fn set_value(&self, request: SetValueRequest) -> RpcResult<()> {
        let field = &request.field;
        let session = self.context.session(&field.session)?;
        require_regular(&session, "set values")?;
        let (owner, info) = self.lookup(field)?;
        if !matches!(info.kind, FieldKind::Value { .. }) {
            return Err(Status::invalid_argument(format!(
                "Field {} holds child objects; use the child object calls",
                field.field
            )));
        }
        let json: Value = serde_json::from_str(&request.value)?;
        match field.offset {
            Some(offset) => owner.set_element(&field.field, offset as usize, json)?,
            None => owner.set_json(&field.field, json)?,
        }
        debug!("Set {} on {}", field.field, owner.uuid());
        Ok(())
    }

    #[instrument(skip(self, request), fields(field = %request.field))]
    pub fn clear_child_objects(&self, request: FieldRequest) -> RpcResult<()> {
        let session = self.context.session(&request.session)?;
        require_regular(&session, "clear child objects")?;
        let owner = self.child_owner(&request)?;
        let removed = owner.clear_children(&request.field)?;
        self.forget(&removed);
        debug!("Cleared {} children from {}", removed.len(), request.field);
        Ok(())
    }

    #[instrument(skip(self, request), fields(field = %request.field.field, index = request.index))]
    pub fn remove_child_object(&self, request: RemoveChildRequest) -> RpcResult<()> {
        let session = self.context.session(&request.field.session)?;
        require_regular(&session, "remove child objects")?;
        let owner = self.child_owner(&request.field)?;
        let removed = owner.remove_child(&request.field.field, request.index as usize)?;
        self.forget(&[removed]);
        Ok(())
    }

    /// Build an object from its JSON snapshot and insert it into a child
    /// array field.
    #[instrument(skip(self, request), fields(field = %request.field.field, index = request.index))]
    pub fn insert_child_object(&self, request: InsertChildRequest) -> RpcResult<()> {
        let session = self.context.session(&request.field.session)?;
        require_regular(&session, "insert child objects")?;
        let owner = self.child_owner(&request.field)?;
        let snapshot = ObjectSnapshot::from_json_str(&request.object)?;
        let child = self.context.factory.from_snapshot(&snapshot)?;
        owner.insert_child(&request.field.field, request.index as usize, child)?;
        self.context.resolver.objects_inserted();
        Ok(())
    }

    /// Start streaming an array field.
    pub fn get_array_value(&self, request: FieldRequest) -> RpcResult<ArrayDownload> {
        let session = self.context.session(&request.session)?;
        let owner = self.context.resolver.resolve_or_not_found(&request.owner)?;
        let download = Download::init(
            &owner,
            &request.field,
            self.context.config.package_byte_size(),
        )?;
        debug!(
            "Streaming {} elements of {} in chunks of {}",
            download.total(),
            request.field,
            download.chunk_size()
        );
        Ok(ArrayDownload {
            download,
            _session: session,
        })
    }

    /// Start receiving an array field.
    pub fn set_array_value(&self, header: SetterHeader) -> RpcResult<ArrayUpload> {
        let session = self.context.session(&header.field.session)?;
        require_regular(&session, "set values")?;
        let owner = self.context.resolver.resolve_or_not_found(&header.field.owner)?;
        let upload = Upload::init(
            owner,
            &header.field.field,
            header.element_type,
            header.total,
            self.context.config.max_array_elements,
        )?;
        Ok(ArrayUpload {
            upload,
            _session: session,
        })
    }

    /// Bind every call of this service.
    pub fn create_callbacks(self: &Arc<Self>) -> Vec<CallbackInstance> {
        let this = self.clone();
        let get = CallbackInstance::unary(RpcMethod::GetValue, move |request| {
            let request = expect_request!(request, CallRequest::GetValue);
            this.get_value(request).map(UnaryReply::Value)
        });
        let this = self.clone();
        let set = CallbackInstance::unary(RpcMethod::SetValue, move |request| {
            let request = expect_request!(request, CallRequest::SetValue);
            this.set_value(request).map(|_| UnaryReply::Empty)
        });
        let this = self.clone();
        let clear = CallbackInstance::unary(RpcMethod::ClearChildObjects, move |request| {
            let request = expect_request!(request, CallRequest::ClearChildObjects);
            this.clear_child_objects(request).map(|_| UnaryReply::Empty)
        });
        let this = self.clone();
        let remove = CallbackInstance::unary(RpcMethod::RemoveChildObject, move |request| {
            let request = expect_request!(request, CallRequest::RemoveChildObject);
            this.remove_child_object(request).map(|_| UnaryReply::Empty)
        });
        let this = self.clone();
        let insert = CallbackInstance::unary(RpcMethod::InsertChildObject, move |request| {
            let request = expect_request!(request, CallRequest::InsertChildObject);
            this.insert_child_object(request).map(|_| UnaryReply::Empty)
        });
        let this = self.clone();
        let download = CallbackInstance::server_streaming(RpcMethod::GetArrayValue, move |request| {
            let request = expect_request!(request, CallRequest::GetArrayValue);
            let handler: Box<dyn ServerStreamingHandler> = Box::new(this.get_array_value(request)?);
            Ok(handler)
        });
        let this = self.clone();
        let upload = CallbackInstance::client_streaming(RpcMethod::SetArrayValue, move |request| {
            let request = expect_request!(request, CallRequest::SetArrayValue);
            let handler: Box<dyn ClientStreamingHandler> = Box::new(this.set_array_value(request)?);
            Ok(handler)
        });
        vec![get, set, clear, remove, insert, download, upload]
    }

    fn lookup(&self, request: &FieldRequest) -> RpcResult<(ObjectHandle, FieldInfo)> {
        let owner = self.context.resolver.resolve_or_not_found(&request.owner)?;
        let info = self.context.fields.lookup(&owner, &request.field)?;
        Ok((owner, info))
    }

    fn child_owner(&self, request: &FieldRequest) -> RpcResult<ObjectHandle> {
        let (owner, info) = self.lookup(request)?;
        if !matches!(info.kind, FieldKind::Child { .. }) {
            return Err(Status::invalid_argument(format!(
                "Field {} does not hold child objects",
                request.field
            )));
        }
        if !info.writable {
            return Err(Status::failed_precondition(format!(
                "Field {} is not writable",
                request.field
            )));
        }
        Ok(owner)
    }

    fn forget(&self, removed: &[ObjectHandle]) {
        self.context.resolver.objects_removed(removed);
        for object in removed {
            self.context.fields.forget_subtree(object);
        }
    }
}

/// Download of one array field, holding the caller's session.
pub struct ArrayDownload {
    download: Download,
    _session: SessionGuard,
}

impl ServerStreamingHandler for ArrayDownload {
    fn process(&mut self) -> RpcResult<Option<ServerBody>> {
        Ok(self.download.next_chunk().map(ServerBody::Chunk))
    }

    fn finish(&mut self) -> ServerBody {
        ServerBody::EndOfStream {
            element_type: self.download.element_type(),
            total: self.download.total() as u64,
        }
    }
}

/// Upload into one array field, holding the caller's session.
pub struct ArrayUpload {
    upload: Upload,
    _session: SessionGuard,
}

impl ClientStreamingHandler for ArrayUpload {
    fn receive(&mut self, chunk: ArrayValues) -> RpcResult<()> {
        self.upload.receive(chunk).map(|_| ())
    }

    fn finish(&mut self) -> RpcResult<ServerBody> {
        let applied = self.upload.apply()?;
        Ok(ServerBody::Uploaded(SetterReply {
            field: self.upload.field().to_string(),
            applied: applied as u64,
        }))
    }

    fn abort(&mut self) {
        debug!(
            "Discarding upload of {} after {} of {} elements",
            self.upload.field(),
            self.upload.received(),
            self.upload.total()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::services::ServerApp;
    use crate::types::{ServerConfig, SessionType, StatusCode};
    use tether_core::document::Document;
    use tether_core::factory::ObjectFactory;
    use tether_core::field::{ChildField, ValueField};
    use tether_core::value::{ElementType, FieldValue};

    struct Fixture {
        service: Arc<FieldService>,
        root: ObjectHandle,
        regular: String,
        observing: String,
    }

    fn fixture() -> Fixture {
        let item = ObjectHandle::builder("Item")
            .field(ValueField::scriptable("name", FieldValue::String("first".into())))
            .build();
        let root = ObjectHandle::builder("Root")
            .field(ValueField::scriptable("ints", FieldValue::Int32Array(vec![1, 2, 3])))
            .field(ValueField::scriptable("label", FieldValue::String("a".into())))
            .field(ValueField::scriptable("fixed", FieldValue::Int32(7)).read_only())
            .child(ChildField::array("items", vec![item]))
            .build();
        let mut factory = ObjectFactory::new();
        factory.register("Item", || {
            ObjectHandle::builder("Item")
                .field(ValueField::scriptable("name", FieldValue::String(String::new())))
        });
        let app = ServerApp {
            documents: vec![Document::new("main", root.clone())],
            factory,
            ..Default::default()
        };
        let context = ServiceContext::new(ServerConfig::default(), app);
        let regular = context.sessions.create_session(SessionType::Regular).unwrap().uuid;
        let observing = context.sessions.create_session(SessionType::Observing).unwrap().uuid;
        Fixture {
            service: Arc::new(FieldService::new(context)),
            root,
            regular,
            observing,
        }
    }

    impl Fixture {
        fn request(&self, session: &str, field: &str) -> FieldRequest {
            FieldRequest::new(session, self.root.reference(), field)
        }
    }

    #[test]
    fn test_get_value_and_element() {
        let f = fixture();
        let value = f.service.get_value(f.request(&f.observing, "ints")).unwrap();
        assert_eq!(value, "[1,2,3]");

        let element = f
            .service
            .get_value(f.request(&f.observing, "ints").with_offset(1))
            .unwrap();
        assert_eq!(element, "2");

        let err = f
            .service
            .get_value(f.request(&f.observing, "missing"))
            .unwrap_err();
        assert_eq!(err.code, StatusCode::NotFound);
    }

    #[test]
    fn test_child_references_and_copies() {
        let f = fixture();
        let refs: Vec<ObjectSnapshot> = serde_json::from_str(
            &f.service.get_value(f.request(&f.regular, "items")).unwrap(),
        )
        .unwrap();
        assert_eq!(refs[0].keyword, "Item");
        assert!(refs[0].fields.is_empty());

        let copies: Vec<ObjectSnapshot> = serde_json::from_str(
            &f.service
                .get_value(f.request(&f.regular, "items").with_object_values())
                .unwrap(),
        )
        .unwrap();
        assert_eq!(copies[0].fields["name"], "first");
    }

    #[test]
    fn test_set_value_tiers() {
        let f = fixture();
        let set = |session: &str, field: &str, value: &str| {
            f.service.set_value(SetValueRequest {
                field: f.request(session, field),
                value: value.into(),
            })
        };

        let err = set(&f.observing, "label", "\"b\"").unwrap_err();
        assert_eq!(err.code, StatusCode::Unauthenticated);

        set(&f.regular, "label", "\"b\"").unwrap();
        assert_eq!(f.root.get("label").unwrap(), FieldValue::String("b".into()));

        let err = set(&f.regular, "fixed", "8").unwrap_err();
        assert_eq!(err.code, StatusCode::FailedPrecondition);

        let err = set(&f.regular, "label", "not json").unwrap_err();
        assert_eq!(err.code, StatusCode::InvalidArgument);
    }

    #[test]
    fn test_child_object_lifecycle() {
        let f = fixture();
        let item = ObjectSnapshot::reference("Item", "item-2");
        f.service
            .insert_child_object(InsertChildRequest {
                field: f.request(&f.regular, "items"),
                index: 99,
                object: item.to_json_string().unwrap(),
            })
            .unwrap();
        let children = f.root.children("items").unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[1].uuid(), "item-2");

        f.service
            .remove_child_object(RemoveChildRequest {
                field: f.request(&f.regular, "items"),
                index: 0,
            })
            .unwrap();
        let err = f
            .service
            .remove_child_object(RemoveChildRequest {
                field: f.request(&f.regular, "items"),
                index: 5,
            })
            .unwrap_err();
        assert_eq!(err.code, StatusCode::OutOfRange);

        let err = f
            .service
            .clear_child_objects(f.request(&f.observing, "items"))
            .unwrap_err();
        assert_eq!(err.code, StatusCode::Unauthenticated);
        f.service
            .clear_child_objects(f.request(&f.regular, "items"))
            .unwrap();
        assert!(f.root.children("items").unwrap().is_empty());
    }

    #[test]
    fn test_array_transfer_handlers() {
        let f = fixture();
        let mut upload = f
            .service
            .set_array_value(SetterHeader {
                field: f.request(&f.regular, "ints"),
                element_type: ElementType::Int32,
                total: 2,
            })
            .unwrap();
        upload.receive(ArrayValues::Int32(vec![8, 9])).unwrap();
        upload.finish().unwrap();

        let mut download = f.service.get_array_value(f.request(&f.observing, "ints")).unwrap();
        let mut values = Vec::new();
        while let Some(ServerBody::Chunk(ArrayValues::Int32(chunk))) = download.process().unwrap() {
            values.extend(chunk);
        }
        assert_eq!(values, vec![8, 9]);
        assert_eq!(
            download.finish(),
            ServerBody::EndOfStream {
                element_type: ElementType::Int32,
                total: 2
            }
        );

        let err = f
            .service
            .set_array_value(SetterHeader {
                field: f.request(&f.observing, "ints"),
                element_type: ElementType::Int32,
                total: 2,
            })
            .err()
            .unwrap();
        assert_eq!(err.code, StatusCode::Unauthenticated);
    }

    #[test]
    fn test_oversized_upload_is_refused() {
        let f = fixture();
        let limit = f.service.context.config.max_array_elements;
        for total in [limit + 1, u64::MAX] {
            let err = f
                .service
                .set_array_value(SetterHeader {
                    field: f.request(&f.regular, "ints"),
                    element_type: ElementType::Int32,
                    total,
                })
                .err()
                .unwrap();
            assert_eq!(err.code, StatusCode::OutOfRange);
        }
        assert_eq!(
            f.service.get_value(f.request(&f.observing, "ints")).unwrap(),
            "[1,2,3]"
        );
    }
}
