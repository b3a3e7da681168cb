//! Wire protocol.
//!
//! A connection carries frames multiplexed by a client-chosen call id, so
//! any number of unary and streaming calls can be in flight at once. Frames
//! are encoded with bincode over tarpc's length-delimited TCP transport.
//!
//! | Shape            | Client sends                          | Server sends                       |
//! |------------------|---------------------------------------|------------------------------------|
//! | Unary            | `Start`                               | `Reply` or `Error`                 |
//! | Server-streaming | `Start`                               | `Chunk`*, then `EndOfStream`/`Error` |
//! | Client-streaming | `Start(header)`, `Chunk`*, `WritesDone` | `Uploaded` or `Error`            |

use crate::dispatch::MethodResult;
use crate::rpc::messages::*;
use crate::transfer::ArrayValues;
use crate::types::Status;
use serde::{Deserialize, Serialize};
use tarpc::serde_transport::Transport;
use tether_core::value::ElementType;
use tokio::net::TcpStream;
use tokio_serde::formats::Bincode;

/// Identifies one call within a connection.
pub type CallId = u64;

/// Interaction pattern of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallShape {
    Unary,
    ServerStreaming,
    ClientStreaming,
}

/// Every remotely callable operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RpcMethod {
    GetAppInfo,
    Ping,
    Quit,
    ReadyForSession,
    CreateSession,
    CheckSession,
    KeepSessionAlive,
    ChangeSession,
    DestroySession,
    GetDocument,
    ListDocuments,
    ExecuteMethod,
    ListMethods,
    GetValue,
    SetValue,
    ClearChildObjects,
    RemoveChildObject,
    InsertChildObject,
    GetArrayValue,
    SetArrayValue,
}

impl RpcMethod {
    pub fn shape(&self) -> CallShape {
        match self {
            RpcMethod::GetArrayValue => CallShape::ServerStreaming,
            RpcMethod::SetArrayValue => CallShape::ClientStreaming,
            _ => CallShape::Unary,
        }
    }
}

/// Opening frame payload of a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CallRequest {
    GetAppInfo,
    Ping,
    Quit,
    ReadyForSession(SessionRequest),
    CreateSession(SessionRequest),
    CheckSession(SessionMessage),
    KeepSessionAlive(SessionMessage),
    ChangeSession(SessionMessage),
    DestroySession(SessionMessage),
    GetDocument(DocumentRequest),
    ListDocuments(DocumentRequest),
    ExecuteMethod(MethodRequest),
    ListMethods(ObjectRequest),
    GetValue(FieldRequest),
    SetValue(SetValueRequest),
    ClearChildObjects(FieldRequest),
    RemoveChildObject(RemoveChildRequest),
    InsertChildObject(InsertChildRequest),
    GetArrayValue(FieldRequest),
    SetArrayValue(SetterHeader),
}

impl CallRequest {
    pub fn method(&self) -> RpcMethod {
        match self {
            CallRequest::GetAppInfo => RpcMethod::GetAppInfo,
            CallRequest::Ping => RpcMethod::Ping,
            CallRequest::Quit => RpcMethod::Quit,
            CallRequest::ReadyForSession(_) => RpcMethod::ReadyForSession,
            CallRequest::CreateSession(_) => RpcMethod::CreateSession,
            CallRequest::CheckSession(_) => RpcMethod::CheckSession,
            CallRequest::KeepSessionAlive(_) => RpcMethod::KeepSessionAlive,
            CallRequest::ChangeSession(_) => RpcMethod::ChangeSession,
            CallRequest::DestroySession(_) => RpcMethod::DestroySession,
            CallRequest::GetDocument(_) => RpcMethod::GetDocument,
            CallRequest::ListDocuments(_) => RpcMethod::ListDocuments,
            CallRequest::ExecuteMethod(_) => RpcMethod::ExecuteMethod,
            CallRequest::ListMethods(_) => RpcMethod::ListMethods,
            CallRequest::GetValue(_) => RpcMethod::GetValue,
            CallRequest::SetValue(_) => RpcMethod::SetValue,
            CallRequest::ClearChildObjects(_) => RpcMethod::ClearChildObjects,
            CallRequest::RemoveChildObject(_) => RpcMethod::RemoveChildObject,
            CallRequest::InsertChildObject(_) => RpcMethod::InsertChildObject,
            CallRequest::GetArrayValue(_) => RpcMethod::GetArrayValue,
            CallRequest::SetArrayValue(_) => RpcMethod::SetArrayValue,
        }
    }
}

/// Single reply of a unary call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UnaryReply {
    Empty,
    AppInfo(AppInfo),
    Ready(bool),
    Session(SessionMessage),
    /// JSON text of an object snapshot.
    Object(String),
    DocumentIds(Vec<String>),
    MethodResult(MethodResult),
    /// JSON text of each method descriptor.
    Methods(Vec<String>),
    /// JSON text of a value.
    Value(String),
}

/// Frame sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientFrame {
    pub call_id: CallId,
    pub body: ClientBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientBody {
    Start(CallRequest),
    Chunk(ArrayValues),
    /// No more chunks follow.
    WritesDone,
    /// Abandon the call.
    Cancel,
}

/// Frame sent by a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerFrame {
    pub call_id: CallId,
    pub body: ServerBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerBody {
    Reply(UnaryReply),
    Chunk(ArrayValues),
    /// Normal end of a download.
    EndOfStream {
        element_type: ElementType,
        total: u64,
    },
    Uploaded(SetterReply),
    Error(Status),
}

impl ServerBody {
    /// True if no further frames follow for the call.
    pub fn is_final(&self) -> bool {
        !matches!(self, ServerBody::Chunk(_))
    }
}

/// Server end of a connection.
pub type ServerTransport =
    Transport<TcpStream, ClientFrame, ServerFrame, Bincode<ClientFrame, ServerFrame>>;

/// Client end of a connection.
pub type ClientTransport =
    Transport<TcpStream, ServerFrame, ClientFrame, Bincode<ServerFrame, ClientFrame>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shapes() {
        assert_eq!(RpcMethod::GetArrayValue.shape(), CallShape::ServerStreaming);
        assert_eq!(RpcMethod::SetArrayValue.shape(), CallShape::ClientStreaming);
        assert_eq!(RpcMethod::ExecuteMethod.shape(), CallShape::Unary);
    }

    #[test]
    fn test_final_frames() {
        assert!(!ServerBody::Chunk(ArrayValues::Int32(vec![1])).is_final());
        assert!(ServerBody::EndOfStream {
            element_type: ElementType::Int32,
            total: 1
        }
        .is_final());
        assert!(ServerBody::Error(Status::internal("x")).is_final());
    }
}
