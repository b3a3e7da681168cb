//! Error types for tether object model operations.
//!
//! Provides structured error handling instead of panics.

use crate::value::ElementType;
use std::error::Error;
use std::fmt;

/// Result type for object model operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while reading or mutating objects.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Field-related errors.
    Field(FieldError),
    /// Object-related errors.
    Object(ObjectError),
    /// Method-related errors.
    Method(MethodError),
    /// Serialization errors.
    Serialization(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Field(e) => write!(f, "Field error: {}", e),
            CoreError::Object(e) => write!(f, "Object error: {}", e),
            CoreError::Method(e) => write!(f, "Method error: {}", e),
            CoreError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl Error for CoreError {}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}

/// Field-related errors.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldError {
    /// No scriptable field with this name on the owner.
    NotFound { owner: String, keyword: String },
    /// Field exists but is not script readable.
    NotReadable(String),
    /// Field exists but is not script writable.
    NotWritable(String),
    /// The supplied value does not match the field's type.
    TypeMismatch {
        keyword: String,
        expected: String,
        found: String,
    },
    /// Element index outside the array.
    IndexOutOfRange {
        keyword: String,
        index: usize,
        len: usize,
    },
    /// Element access on a scalar field.
    NotAnArray(String),
    /// Child operation on a value field, or value operation on a child field.
    WrongFieldKind(String),
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldError::NotFound { owner, keyword } => {
                write!(f, "Field {} not found in {}", keyword, owner)
            }
            FieldError::NotReadable(kw) => write!(f, "Field {} found, but it isn't readable", kw),
            FieldError::NotWritable(kw) => write!(f, "Field {} is not writable", kw),
            FieldError::TypeMismatch {
                keyword,
                expected,
                found,
            } => write!(
                f,
                "Field {} expects {} but received {}",
                keyword, expected, found
            ),
            FieldError::IndexOutOfRange {
                keyword,
                index,
                len,
            } => write!(
                f,
                "Index {} is out of range for field {} with {} elements",
                index, keyword, len
            ),
            FieldError::NotAnArray(kw) => write!(f, "Field {} is not an array field", kw),
            FieldError::WrongFieldKind(kw) => {
                write!(f, "Field {} does not support this operation", kw)
            }
        }
    }
}

/// Object-related errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectError {
    /// No constructor registered for this class keyword.
    UnknownClass(String),
    /// Snapshot could not be interpreted as an object.
    InvalidSnapshot(String),
}

impl fmt::Display for ObjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectError::UnknownClass(kw) => write!(f, "No object class registered as {}", kw),
            ObjectError::InvalidSnapshot(msg) => write!(f, "Invalid object snapshot: {}", msg),
        }
    }
}

/// Method-related errors.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodError {
    /// Parameters could not be read into the method's parameter holder.
    InvalidParameters(String),
    /// The method ran and reported a failure.
    Failed(String),
}

impl fmt::Display for MethodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodError::InvalidParameters(msg) => write!(f, "Invalid parameters: {}", msg),
            MethodError::Failed(msg) => write!(f, "{}", msg),
        }
    }
}

// Convenience constructors
impl CoreError {
    pub fn field_not_found(owner: impl Into<String>, keyword: impl Into<String>) -> Self {
        CoreError::Field(FieldError::NotFound {
            owner: owner.into(),
            keyword: keyword.into(),
        })
    }

    pub fn type_mismatch(
        keyword: impl Into<String>,
        expected: impl fmt::Display,
        found: impl fmt::Display,
    ) -> Self {
        CoreError::Field(FieldError::TypeMismatch {
            keyword: keyword.into(),
            expected: expected.to_string(),
            found: found.to_string(),
        })
    }

    pub fn element_mismatch(keyword: impl Into<String>, expected: ElementType, found: ElementType) -> Self {
        Self::type_mismatch(keyword, expected, found)
    }

    pub fn method_failed(msg: impl Into<String>) -> Self {
        CoreError::Method(MethodError::Failed(msg.into()))
    }

    pub fn unknown_class(keyword: impl Into<String>) -> Self {
        CoreError::Object(ObjectError::UnknownClass(keyword.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_not_found_message() {
        let err = CoreError::field_not_found("DemoObject", "missing");
        assert_eq!(
            err.to_string(),
            "Field error: Field missing not found in DemoObject"
        );
    }

    #[test]
    fn test_method_failure_keeps_message() {
        let err = CoreError::method_failed("division by zero");
        assert_eq!(err.to_string(), "Method error: division by zero");
    }
}
