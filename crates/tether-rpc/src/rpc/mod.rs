//! Wire layer: protocol, call state machine, services, server and client.
//!
//! # Architecture
//!
//! - **Protocol**: Frames multiplexed by call id over a bincode TCP transport
//! - **Callback**: One state machine per call, whatever its shape
//! - **Services**: App, object and field operations bound into a registry
//! - **Server**: Accept loop and per-connection frame routing
//! - **Client**: Typed calls with automatic session handling
//!
//! # Example: Serving and connecting
//!
//! ```rust,ignore
//! use tether_rpc::prelude::*;
//!
//! let handle = Server::new(ServerConfig::default(), demo::app()).start().await?;
//!
//! let client = Client::connect(handle.local_addr()).await?;
//! client.create_session(SessionType::Regular).await?;
//! let root = client.document("").await?;
//! ```

pub mod callback;
pub mod client;
pub mod messages;
pub mod protocol;
pub mod server;
pub mod services;

// Protocol exports
pub use protocol::{CallRequest, RpcMethod, ServerBody, UnaryReply};

// Message exports
pub use messages::{
    AppInfo, DocumentRequest, FieldRequest, InsertChildRequest, MethodRequest, ObjectRequest,
    RemoveChildRequest, SessionMessage, SessionRequest, SetValueRequest, SetterHeader,
    SetterReply,
};

// Client exports
pub use client::{Client, ClientConfig, UploadStream};

// Server exports
pub use callback::{CallRegistry, CallState, CallbackInstance};
pub use server::{Server, ServerHandle};
pub use services::{ServerApp, ServiceContext};
