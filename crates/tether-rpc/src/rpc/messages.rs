//! Request and reply payloads.
//!
//! JSON travels as text so every message stays encodable by the binary
//! frame codec.

use crate::types::SessionType;
use serde::{Deserialize, Serialize};
use tether_core::snapshot::ObjectReference;
use tether_core::value::ElementType;

/// Identity of the serving application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    pub name: String,
    pub app_type: String,
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl AppInfo {
    pub fn new(name: impl Into<String>, app_type: impl Into<String>, version: (u32, u32, u32)) -> Self {
        Self {
            name: name.into(),
            app_type: app_type.into(),
            major: version.0,
            minor: version.1,
            patch: version.2,
        }
    }

    pub fn version(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Session handle as exchanged with clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub uuid: String,
    pub session_type: SessionType,
}

/// Asks for a session of the given tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub session_type: SessionType,
}

/// Names a top-level document. An empty id selects the first document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRequest {
    pub session: String,
    pub document_id: String,
}

/// Targets one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRequest {
    pub session: String,
    pub object: ObjectReference,
}

/// Executes a method on an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodRequest {
    pub session: String,
    pub object: ObjectReference,
    pub method: String,
    /// JSON text of the parameters; empty for defaults.
    pub params: String,
}

/// Identifies one field on one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRequest {
    pub session: String,
    pub owner: ObjectReference,
    /// Script name of the field.
    pub field: String,
    /// Element offset for single-element access to array fields.
    pub offset: Option<u64>,
    /// For child fields: return full object values instead of references.
    pub copy_object_values: bool,
}

impl FieldRequest {
    pub fn new(session: impl Into<String>, owner: ObjectReference, field: impl Into<String>) -> Self {
        Self {
            session: session.into(),
            owner,
            field: field.into(),
            offset: None,
            copy_object_values: false,
        }
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_object_values(mut self) -> Self {
        self.copy_object_values = true;
        self
    }
}

/// Writes a single value (or a single element when `offset` is set).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetValueRequest {
    pub field: FieldRequest,
    /// JSON text of the value.
    pub value: String,
}

/// Removes the child at `index` from a child array field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveChildRequest {
    pub field: FieldRequest,
    pub index: u64,
}

/// Inserts an object into a child array field; an index past the end
/// appends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertChildRequest {
    pub field: FieldRequest,
    pub index: u64,
    /// JSON text of the object snapshot.
    pub object: String,
}

/// First frame of an array upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetterHeader {
    pub field: FieldRequest,
    pub element_type: ElementType,
    /// Number of elements that will follow.
    pub total: u64,
}

/// Reply to a completed array upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetterReply {
    pub field: String,
    pub applied: u64,
}
