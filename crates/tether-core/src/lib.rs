//! # Tether Core
//!
//! The reflectable object model served by tether:
//!
//! - **Values**: scalars and homogeneous arrays of six element types
//! - **Fields**: scriptable value fields and child fields
//! - **Objects**: class keyword, inheritance stack and a stable identity
//! - **Documents**: named roots of object trees
//! - **Methods**: named, typed operations registered per class
//!
//! ## Quick Start
//!
//! ```rust
//! use tether_core::prelude::*;
//!
//! let demo = ObjectHandle::builder("DemoObject")
//!     .field(ValueField::scriptable("intVector", FieldValue::Int32Array(vec![42])))
//!     .build();
//! let root = ObjectHandle::builder("DemoDocument")
//!     .child(ChildField::single("demoObject", Some(demo)))
//!     .build();
//! let document = Document::new("testDocument", root);
//! assert_eq!(document.objects_of_class("DemoObject").len(), 1);
//! ```

pub mod document;
pub mod error;
pub mod factory;
pub mod field;
pub mod method;
pub mod object;
pub mod prelude;
pub mod snapshot;
pub mod value;
