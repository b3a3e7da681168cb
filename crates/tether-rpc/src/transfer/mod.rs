//! Chunked transfer of homogeneous arrays.
//!
//! Arrays move in chunks of `package_byte_size / size_of::<T>()` elements;
//! strings, being variable length, move one element per chunk. The element
//! type is resolved once when a transfer starts and a typed codec is held
//! for the rest of the call.

mod codec;
mod download;
mod upload;

pub use codec::{
    codec_for_upload, codec_for_value, ArrayCodec, ArrayElement, ReceiveBuffer, TypedBuffer,
};
pub use download::{Download, DownloadState};
pub use upload::{Upload, UploadState};

use serde::{Deserialize, Serialize};
use tether_core::value::{ElementType, FieldValue};

/// One chunk (or a whole array) of elements of a single type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrayValues {
    Int32(Vec<i32>),
    UInt64(Vec<u64>),
    Float64(Vec<f64>),
    Float32(Vec<f32>),
    String(Vec<String>),
    Bool(Vec<bool>),
}

impl ArrayValues {
    pub fn empty(element_type: ElementType) -> Self {
        match element_type {
            ElementType::Int32 => ArrayValues::Int32(Vec::new()),
            ElementType::UInt64 => ArrayValues::UInt64(Vec::new()),
            ElementType::Float64 => ArrayValues::Float64(Vec::new()),
            ElementType::Float32 => ArrayValues::Float32(Vec::new()),
            ElementType::String => ArrayValues::String(Vec::new()),
            ElementType::Bool => ArrayValues::Bool(Vec::new()),
        }
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            ArrayValues::Int32(_) => ElementType::Int32,
            ArrayValues::UInt64(_) => ElementType::UInt64,
            ArrayValues::Float64(_) => ElementType::Float64,
            ArrayValues::Float32(_) => ElementType::Float32,
            ArrayValues::String(_) => ElementType::String,
            ArrayValues::Bool(_) => ElementType::Bool,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ArrayValues::Int32(v) => v.len(),
            ArrayValues::UInt64(v) => v.len(),
            ArrayValues::Float64(v) => v.len(),
            ArrayValues::Float32(v) => v.len(),
            ArrayValues::String(v) => v.len(),
            ArrayValues::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append another chunk of the same element type.
    ///
    /// Returns `false` (and leaves `self` untouched) on a type mismatch.
    pub fn extend(&mut self, other: ArrayValues) -> bool {
        match (self, other) {
            (ArrayValues::Int32(a), ArrayValues::Int32(b)) => a.extend(b),
            (ArrayValues::UInt64(a), ArrayValues::UInt64(b)) => a.extend(b),
            (ArrayValues::Float64(a), ArrayValues::Float64(b)) => a.extend(b),
            (ArrayValues::Float32(a), ArrayValues::Float32(b)) => a.extend(b),
            (ArrayValues::String(a), ArrayValues::String(b)) => a.extend(b),
            (ArrayValues::Bool(a), ArrayValues::Bool(b)) => a.extend(b),
            _ => return false,
        }
        true
    }

    /// The array held by an array field value; `None` for scalars.
    pub fn from_field_value(value: FieldValue) -> Option<Self> {
        match value {
            FieldValue::Int32Array(v) => Some(ArrayValues::Int32(v)),
            FieldValue::UInt64Array(v) => Some(ArrayValues::UInt64(v)),
            FieldValue::Float64Array(v) => Some(ArrayValues::Float64(v)),
            FieldValue::Float32Array(v) => Some(ArrayValues::Float32(v)),
            FieldValue::StringArray(v) => Some(ArrayValues::String(v)),
            FieldValue::BoolArray(v) => Some(ArrayValues::Bool(v)),
            _ => None,
        }
    }

    /// Split into chunks of at most `chunk_size` elements. Empty arrays
    /// yield no chunks.
    pub fn into_chunks(self, chunk_size: usize) -> Vec<ArrayValues> {
        fn split<T>(values: Vec<T>, size: usize, wrap: fn(Vec<T>) -> ArrayValues) -> Vec<ArrayValues> {
            let mut chunks = Vec::with_capacity(values.len().div_ceil(size));
            let mut rest = values.into_iter().peekable();
            while rest.peek().is_some() {
                chunks.push(wrap(rest.by_ref().take(size).collect()));
            }
            chunks
        }
        let size = chunk_size.max(1);
        match self {
            ArrayValues::Int32(v) => split(v, size, ArrayValues::Int32),
            ArrayValues::UInt64(v) => split(v, size, ArrayValues::UInt64),
            ArrayValues::Float64(v) => split(v, size, ArrayValues::Float64),
            ArrayValues::Float32(v) => split(v, size, ArrayValues::Float32),
            ArrayValues::String(v) => split(v, size, ArrayValues::String),
            ArrayValues::Bool(v) => split(v, size, ArrayValues::Bool),
        }
    }

    pub fn into_field_value(self) -> FieldValue {
        match self {
            ArrayValues::Int32(v) => FieldValue::Int32Array(v),
            ArrayValues::UInt64(v) => FieldValue::UInt64Array(v),
            ArrayValues::Float64(v) => FieldValue::Float64Array(v),
            ArrayValues::Float32(v) => FieldValue::Float32Array(v),
            ArrayValues::String(v) => FieldValue::StringArray(v),
            ArrayValues::Bool(v) => FieldValue::BoolArray(v),
        }
    }
}

/// Elements per chunk for `element_type` under a byte budget. Never zero.
pub fn chunk_size(package_byte_size: usize, element_type: ElementType) -> usize {
    match element_type.byte_size() {
        Some(size) => (package_byte_size / size).max(1),
        None => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_size() {
        assert_eq!(chunk_size(65536, ElementType::Float64), 8192);
        assert_eq!(chunk_size(65536, ElementType::Int32), 16384);
        assert_eq!(chunk_size(65536, ElementType::String), 1);
        assert_eq!(chunk_size(2, ElementType::UInt64), 1);
    }

    #[test]
    fn test_into_chunks() {
        let chunks = ArrayValues::Int32(vec![1, 2, 3, 4, 5]).into_chunks(2);
        assert_eq!(
            chunks,
            vec![
                ArrayValues::Int32(vec![1, 2]),
                ArrayValues::Int32(vec![3, 4]),
                ArrayValues::Int32(vec![5]),
            ]
        );
        assert!(ArrayValues::empty(ElementType::Bool).into_chunks(4).is_empty());
    }

    #[test]
    fn test_extend_checks_type() {
        let mut values = ArrayValues::Int32(vec![1]);
        assert!(values.extend(ArrayValues::Int32(vec![2, 3])));
        assert!(!values.extend(ArrayValues::Bool(vec![true])));
        assert_eq!(values, ArrayValues::Int32(vec![1, 2, 3]));
    }

    #[test]
    fn test_scalar_has_no_array() {
        assert!(ArrayValues::from_field_value(FieldValue::Int32(1)).is_none());
        let values = ArrayValues::from_field_value(FieldValue::BoolArray(vec![true])).unwrap();
        assert_eq!(values.into_field_value(), FieldValue::BoolArray(vec![true]));
    }
}
