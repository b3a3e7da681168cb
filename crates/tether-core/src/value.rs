//! Typed field values.
//!
//! A field holds either a single scalar or a homogeneous array of one of the
//! six supported element types. Values cross the RPC boundary as JSON text
//! (single values) or as typed chunks (arrays).

use crate::error::{CoreError, FieldError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Scalar element type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    Int32,
    UInt64,
    Float64,
    Float32,
    String,
    Bool,
}

impl ElementType {
    /// In-memory size of one element, or `None` for variable-length strings.
    pub fn byte_size(&self) -> Option<usize> {
        match self {
            ElementType::Int32 => Some(std::mem::size_of::<i32>()),
            ElementType::UInt64 => Some(std::mem::size_of::<u64>()),
            ElementType::Float64 => Some(std::mem::size_of::<f64>()),
            ElementType::Float32 => Some(std::mem::size_of::<f32>()),
            ElementType::String => None,
            ElementType::Bool => Some(std::mem::size_of::<bool>()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ElementType::Int32 => "int32",
            ElementType::UInt64 => "uint64",
            ElementType::Float64 => "float64",
            ElementType::Float32 => "float32",
            ElementType::String => "string",
            ElementType::Bool => "bool",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The value stored in a value field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int32(i32),
    UInt64(u64),
    Float64(f64),
    Float32(f32),
    String(String),
    Bool(bool),
    Int32Array(Vec<i32>),
    UInt64Array(Vec<u64>),
    Float64Array(Vec<f64>),
    Float32Array(Vec<f32>),
    StringArray(Vec<String>),
    BoolArray(Vec<bool>),
}

impl FieldValue {
    pub fn element_type(&self) -> ElementType {
        match self {
            FieldValue::Int32(_) | FieldValue::Int32Array(_) => ElementType::Int32,
            FieldValue::UInt64(_) | FieldValue::UInt64Array(_) => ElementType::UInt64,
            FieldValue::Float64(_) | FieldValue::Float64Array(_) => ElementType::Float64,
            FieldValue::Float32(_) | FieldValue::Float32Array(_) => ElementType::Float32,
            FieldValue::String(_) | FieldValue::StringArray(_) => ElementType::String,
            FieldValue::Bool(_) | FieldValue::BoolArray(_) => ElementType::Bool,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(
            self,
            FieldValue::Int32Array(_)
                | FieldValue::UInt64Array(_)
                | FieldValue::Float64Array(_)
                | FieldValue::Float32Array(_)
                | FieldValue::StringArray(_)
                | FieldValue::BoolArray(_)
        )
    }

    /// Number of elements for array values, `None` for scalars.
    pub fn len(&self) -> Option<usize> {
        match self {
            FieldValue::Int32Array(v) => Some(v.len()),
            FieldValue::UInt64Array(v) => Some(v.len()),
            FieldValue::Float64Array(v) => Some(v.len()),
            FieldValue::Float32Array(v) => Some(v.len()),
            FieldValue::StringArray(v) => Some(v.len()),
            FieldValue::BoolArray(v) => Some(v.len()),
            _ => None,
        }
    }

    /// Human readable type name, e.g. `int32` or `float64[]`.
    pub fn type_name(&self) -> String {
        if self.is_array() {
            format!("{}[]", self.element_type())
        } else {
            self.element_type().to_string()
        }
    }

    /// Same-typed replacement check used before every write.
    pub fn same_kind(&self, other: &FieldValue) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Int32(v) => Value::from(*v),
            FieldValue::UInt64(v) => Value::from(*v),
            FieldValue::Float64(v) => Value::from(*v),
            FieldValue::Float32(v) => Value::from(*v),
            FieldValue::String(v) => Value::from(v.as_str()),
            FieldValue::Bool(v) => Value::from(*v),
            FieldValue::Int32Array(v) => Value::from(v.clone()),
            FieldValue::UInt64Array(v) => Value::from(v.clone()),
            FieldValue::Float64Array(v) => Value::from(v.clone()),
            FieldValue::Float32Array(v) => Value::from(v.clone()),
            FieldValue::StringArray(v) => Value::from(v.clone()),
            FieldValue::BoolArray(v) => Value::from(v.clone()),
        }
    }

    /// Parse `json` into a value of the same kind as `self`.
    ///
    /// `self` acts as the type template; its contents are ignored.
    pub fn parse_like(&self, keyword: &str, json: Value) -> Result<FieldValue> {
        let parsed = match self {
            FieldValue::Int32(_) => serde_json::from_value(json).map(FieldValue::Int32),
            FieldValue::UInt64(_) => serde_json::from_value(json).map(FieldValue::UInt64),
            FieldValue::Float64(_) => serde_json::from_value(json).map(FieldValue::Float64),
            FieldValue::Float32(_) => serde_json::from_value(json).map(FieldValue::Float32),
            FieldValue::String(_) => serde_json::from_value(json).map(FieldValue::String),
            FieldValue::Bool(_) => serde_json::from_value(json).map(FieldValue::Bool),
            FieldValue::Int32Array(_) => serde_json::from_value(json).map(FieldValue::Int32Array),
            FieldValue::UInt64Array(_) => serde_json::from_value(json).map(FieldValue::UInt64Array),
            FieldValue::Float64Array(_) => {
                serde_json::from_value(json).map(FieldValue::Float64Array)
            }
            FieldValue::Float32Array(_) => {
                serde_json::from_value(json).map(FieldValue::Float32Array)
            }
            FieldValue::StringArray(_) => serde_json::from_value(json).map(FieldValue::StringArray),
            FieldValue::BoolArray(_) => serde_json::from_value(json).map(FieldValue::BoolArray),
        };
        parsed.map_err(|e| CoreError::type_mismatch(keyword, self.type_name(), e))
    }

    /// JSON form of a single array element.
    pub fn element_to_json(&self, keyword: &str, index: usize) -> Result<Value> {
        let len = self
            .len()
            .ok_or_else(|| CoreError::Field(FieldError::NotAnArray(keyword.to_string())))?;
        if index >= len {
            return Err(CoreError::Field(FieldError::IndexOutOfRange {
                keyword: keyword.to_string(),
                index,
                len,
            }));
        }
        let value = match self {
            FieldValue::Int32Array(v) => Value::from(v[index]),
            FieldValue::UInt64Array(v) => Value::from(v[index]),
            FieldValue::Float64Array(v) => Value::from(v[index]),
            FieldValue::Float32Array(v) => Value::from(v[index]),
            FieldValue::StringArray(v) => Value::from(v[index].as_str()),
            FieldValue::BoolArray(v) => Value::from(v[index]),
            _ => unreachable!("len() is only Some for arrays"),
        };
        Ok(value)
    }

    /// Replace a single array element with the parsed `json`.
    pub fn set_element_from_json(&mut self, keyword: &str, index: usize, json: Value) -> Result<()> {
        let len = self
            .len()
            .ok_or_else(|| CoreError::Field(FieldError::NotAnArray(keyword.to_string())))?;
        if index >= len {
            return Err(CoreError::Field(FieldError::IndexOutOfRange {
                keyword: keyword.to_string(),
                index,
                len,
            }));
        }
        let element_type = self.element_type();
        let mismatch = |e: serde_json::Error| CoreError::type_mismatch(keyword, element_type, e);
        match self {
            FieldValue::Int32Array(v) => v[index] = serde_json::from_value(json).map_err(mismatch)?,
            FieldValue::UInt64Array(v) => v[index] = serde_json::from_value(json).map_err(mismatch)?,
            FieldValue::Float64Array(v) => {
                v[index] = serde_json::from_value(json).map_err(mismatch)?
            }
            FieldValue::Float32Array(v) => {
                v[index] = serde_json::from_value(json).map_err(mismatch)?
            }
            FieldValue::StringArray(v) => {
                v[index] = serde_json::from_value(json).map_err(mismatch)?
            }
            FieldValue::BoolArray(v) => v[index] = serde_json::from_value(json).map_err(mismatch)?,
            _ => unreachable!("len() is only Some for arrays"),
        }
        Ok(())
    }
}
