//! # Tether RPC
//!
//! Session-scoped remote access to tether object trees over TCP:
//! sessions with an exclusive read-write tier, identity resolution of
//! object references, chunked array transfer, method dispatch and a
//! per-call state machine multiplexed over one connection.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tether_rpc::prelude::*;
//!
//! let config = ServerConfig { port: 0, ..Default::default() };
//! let handle = Server::new(config, demo::app()).start().await?;
//!
//! let client = Client::connect(handle.local_addr()).await?;
//! client.create_session(SessionType::Regular).await?;
//! let root = client.document("").await?;
//! ```

pub mod demo;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod resolver;
pub mod rpc;
pub mod session;
pub mod transfer;
pub mod types;

pub use directory::DocumentDirectory;
pub use dispatch::{MethodDispatcher, MethodResult};
pub use error::{ClientError, ServerError};
pub use resolver::{IdentityCache, IdentityCacheStats, LocalObjects, ObjectResolver};
pub use session::{Session, SessionGuard, SessionManager};
pub use transfer::{ArrayElement, ArrayValues};
pub use types::*;

pub mod prelude {
    //! Common imports for servers and clients.

    pub use crate::demo;
    pub use crate::error::{ClientError, ServerError};
    pub use crate::rpc::{Client, ClientConfig, Server, ServerApp, ServerHandle};
    pub use crate::transfer::{ArrayElement, ArrayValues};
    pub use crate::types::{ServerConfig, SessionType, Status, StatusCode};
    pub use tether_core::prelude::*;
}
