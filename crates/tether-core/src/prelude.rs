//! Tether Core Prelude: convenient imports for common usage.
//!
//! ```rust
//! use tether_core::prelude::*;
//! ```

// Re-export the object model
pub use crate::document::Document;
pub use crate::factory::ObjectFactory;
pub use crate::field::{ChildField, FieldInfo, FieldKind, Scriptability, ValueField};
pub use crate::object::{FieldObserver, ObjectBuilder, ObjectHandle, WeakObjectHandle};
pub use crate::snapshot::{ObjectReference, ObjectSnapshot};
pub use crate::value::{ElementType, FieldValue};

// Re-export methods
pub use crate::method::{MethodAccess, MethodDescriptor, MethodRegistry, ObjectMethod, TypedMethod};

// Re-export error types
pub use crate::error::{CoreError, Result};
