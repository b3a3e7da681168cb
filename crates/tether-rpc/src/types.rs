//! Shared types for the tether protocol layer.
//!
//! `Status` is the serializable error carried across the wire; every
//! failure inside a handler is turned into one before it reaches the
//! transport.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tether_core::error::{CoreError, FieldError, MethodError, ObjectError};

/// Result type for RPC operations that needs to be serializable.
pub type RpcResult<T> = Result<T, Status>;

/// Category of an RPC failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    /// Missing, unknown or expired session, or insufficient session tier.
    Unauthenticated,
    /// Unresolved object, unknown field, method or document.
    NotFound,
    /// The field's element type has no array codec.
    Unimplemented,
    /// A genuine bounds violation.
    OutOfRange,
    /// The operation was refused in the current state.
    FailedPrecondition,
    /// The request could not be interpreted.
    InvalidArgument,
    /// The server is not reachable or shutting down.
    Unavailable,
    /// Unexpected server side failure.
    Internal,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCode::Unauthenticated => "UNAUTHENTICATED",
            StatusCode::NotFound => "NOT_FOUND",
            StatusCode::Unimplemented => "UNIMPLEMENTED",
            StatusCode::OutOfRange => "OUT_OF_RANGE",
            StatusCode::FailedPrecondition => "FAILED_PRECONDITION",
            StatusCode::InvalidArgument => "INVALID_ARGUMENT",
            StatusCode::Unavailable => "UNAVAILABLE",
            StatusCode::Internal => "INTERNAL",
        };
        f.write_str(name)
    }
}

/// Serializable error type for RPC calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: StatusCode,
    pub message: String,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for Status {}

// Convenience constructors
impl Status {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unauthenticated, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NotFound, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unimplemented, message)
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::new(StatusCode::OutOfRange, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FailedPrecondition, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InvalidArgument, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Internal, message)
    }
}

impl From<CoreError> for Status {
    fn from(err: CoreError) -> Self {
        let code = match &err {
            CoreError::Field(FieldError::NotFound { .. }) => StatusCode::NotFound,
            CoreError::Field(FieldError::NotReadable(_))
            | CoreError::Field(FieldError::NotWritable(_)) => StatusCode::FailedPrecondition,
            CoreError::Field(FieldError::IndexOutOfRange { .. }) => StatusCode::OutOfRange,
            CoreError::Field(_) => StatusCode::InvalidArgument,
            CoreError::Object(ObjectError::UnknownClass(_)) => StatusCode::NotFound,
            CoreError::Object(ObjectError::InvalidSnapshot(_)) => StatusCode::InvalidArgument,
            CoreError::Method(MethodError::InvalidParameters(_)) => StatusCode::InvalidArgument,
            CoreError::Method(MethodError::Failed(_)) => StatusCode::FailedPrecondition,
            CoreError::Serialization(_) => StatusCode::InvalidArgument,
        };
        let message = match err {
            CoreError::Method(MethodError::Failed(msg)) => msg,
            other => other.to_string(),
        };
        Status::new(code, message)
    }
}

impl From<serde_json::Error> for Status {
    fn from(err: serde_json::Error) -> Self {
        Status::invalid_argument(format!("Malformed JSON: {}", err))
    }
}

/// Access tier of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionType {
    Invalid,
    /// Full read-write access. One live regular session at a time.
    Regular,
    /// Read-only access. Any number may be live.
    Observing,
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionType::Invalid => "INVALID",
            SessionType::Regular => "REGULAR",
            SessionType::Observing => "OBSERVING",
        };
        f.write_str(name)
    }
}

/// Default listening host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default listening port.
pub const DEFAULT_PORT: u16 = 50000;

/// Default chunk budget in bytes for array transfers.
pub const DEFAULT_PACKAGE_BYTE_SIZE: usize = 65536;

/// Default keep-alive timeout of a regular session in milliseconds.
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 30_000;

/// Default keep-alive timeout of an observing session in milliseconds.
pub const DEFAULT_OBSERVING_SESSION_TIMEOUT_MS: u64 = 1_000;

/// Default limit on simultaneously served connections.
pub const DEFAULT_MAX_CONCURRENT_CONNECTIONS: usize = 64;

/// Default limit on the element count an upload may announce.
pub const DEFAULT_MAX_ARRAY_ELEMENTS: u64 = 16 * 1024 * 1024;

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host or address to bind to.
    pub host: String,
    /// Port to bind to; 0 lets the OS choose.
    pub port: u16,
    /// Chunk budget in bytes for array transfers.
    pub package_byte_size: usize,
    /// Keep-alive timeout of a regular session.
    pub session_timeout_ms: u64,
    /// Keep-alive timeout of an observing session.
    pub observing_session_timeout_ms: u64,
    /// Connections served concurrently; further connections wait.
    pub max_concurrent_connections: usize,
    /// Largest element count an upload may announce.
    pub max_array_elements: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            package_byte_size: DEFAULT_PACKAGE_BYTE_SIZE,
            session_timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
            observing_session_timeout_ms: DEFAULT_OBSERVING_SESSION_TIMEOUT_MS,
            max_concurrent_connections: DEFAULT_MAX_CONCURRENT_CONNECTIONS,
            max_array_elements: DEFAULT_MAX_ARRAY_ELEMENTS,
        }
    }
}

impl ServerConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn observing_session_timeout(&self) -> Duration {
        Duration::from_millis(self.observing_session_timeout_ms)
    }

    /// Chunk budget, never below one byte.
    pub fn package_byte_size(&self) -> usize {
        self.package_byte_size.max(1)
    }

    /// Socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}
