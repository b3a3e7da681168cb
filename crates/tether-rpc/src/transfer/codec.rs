//! Per-element-type array codecs.

use super::ArrayValues;
use crate::types::{RpcResult, Status};
use tether_core::value::{ElementType, FieldValue};

/// A scalar type that can be transferred in arrays.
pub trait ArrayElement: Clone + Default + Send + Sync + 'static {
    const ELEMENT_TYPE: ElementType;

    fn into_values(values: Vec<Self>) -> ArrayValues;

    fn from_values(values: ArrayValues) -> Option<Vec<Self>>;

    fn into_field_value(values: Vec<Self>) -> FieldValue;

    fn from_field_value(value: FieldValue) -> Option<Vec<Self>>;

    /// Bytes this element occupies in a transfer.
    fn byte_size(&self) -> usize {
        std::mem::size_of::<Self>()
    }
}

macro_rules! impl_array_element {
    ($ty:ty, $kind:ident, $array:ident) => {
        impl ArrayElement for $ty {
            const ELEMENT_TYPE: ElementType = ElementType::$kind;

            fn into_values(values: Vec<Self>) -> ArrayValues {
                ArrayValues::$kind(values)
            }

            fn from_values(values: ArrayValues) -> Option<Vec<Self>> {
                match values {
                    ArrayValues::$kind(v) => Some(v),
                    _ => None,
                }
            }

            fn into_field_value(values: Vec<Self>) -> FieldValue {
                FieldValue::$array(values)
            }

            fn from_field_value(value: FieldValue) -> Option<Vec<Self>> {
                match value {
                    FieldValue::$array(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

impl_array_element!(i32, Int32, Int32Array);
impl_array_element!(u64, UInt64, UInt64Array);
impl_array_element!(f64, Float64, Float64Array);
impl_array_element!(f32, Float32, Float32Array);
impl_array_element!(bool, Bool, BoolArray);

impl ArrayElement for String {
    const ELEMENT_TYPE: ElementType = ElementType::String;

    fn into_values(values: Vec<Self>) -> ArrayValues {
        ArrayValues::String(values)
    }

    fn from_values(values: ArrayValues) -> Option<Vec<Self>> {
        match values {
            ArrayValues::String(v) => Some(v),
            _ => None,
        }
    }

    fn into_field_value(values: Vec<Self>) -> FieldValue {
        FieldValue::StringArray(values)
    }

    fn from_field_value(value: FieldValue) -> Option<Vec<Self>> {
        match value {
            FieldValue::StringArray(v) => Some(v),
            _ => None,
        }
    }

    fn byte_size(&self) -> usize {
        self.len()
    }
}

/// Type-erased access to the array buffer of one transfer.
pub trait ArrayCodec: Send {
    fn element_type(&self) -> ElementType;

    /// Number of elements in the buffer.
    fn count(&self) -> usize;

    /// Payload size of the buffer in bytes.
    fn byte_size(&self) -> usize;

    /// Copy up to `max` elements starting at `offset`.
    fn append_chunk(&self, offset: usize, max: usize) -> ArrayValues;

    /// Write `chunk` into the buffer starting at `offset`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the chunk holds another element type,
    /// `OutOfRange` if it would write past the end of the buffer.
    fn receive_chunk(&mut self, offset: usize, chunk: ArrayValues) -> RpcResult<usize>;

    /// Move the buffer out as a field value, leaving it empty.
    fn take_field_value(&mut self) -> FieldValue;
}

/// Contiguous typed storage backing an [`ArrayCodec`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypedBuffer<T> {
    values: Vec<T>,
}

impl<T: ArrayElement> TypedBuffer<T> {
    pub fn new(values: Vec<T>) -> Self {
        Self { values }
    }

    pub fn as_slice(&self) -> &[T] {
        &self.values
    }
}

impl<T: ArrayElement> ArrayCodec for TypedBuffer<T> {
    fn element_type(&self) -> ElementType {
        T::ELEMENT_TYPE
    }

    fn count(&self) -> usize {
        self.values.len()
    }

    fn byte_size(&self) -> usize {
        self.values.iter().map(ArrayElement::byte_size).sum()
    }

    fn append_chunk(&self, offset: usize, max: usize) -> ArrayValues {
        let start = offset.min(self.values.len());
        let end = offset.saturating_add(max).min(self.values.len());
        T::into_values(self.values[start..end].to_vec())
    }

    fn receive_chunk(&mut self, offset: usize, chunk: ArrayValues) -> RpcResult<usize> {
        let received = chunk.element_type();
        let values = T::from_values(chunk).ok_or_else(|| {
            Status::invalid_argument(format!(
                "Expected {} elements, received {}",
                T::ELEMENT_TYPE,
                received
            ))
        })?;
        let end = offset.saturating_add(values.len());
        if end > self.values.len() {
            return Err(Status::out_of_range(format!(
                "Received {} elements at offset {} but only {} were announced",
                values.len(),
                offset,
                self.values.len()
            )));
        }
        let count = values.len();
        for (slot, value) in self.values[offset..end].iter_mut().zip(values) {
            *slot = value;
        }
        Ok(count)
    }

    fn take_field_value(&mut self) -> FieldValue {
        T::into_field_value(std::mem::take(&mut self.values))
    }
}

/// Codec over the current value of an array field; `None` for scalars.
pub fn codec_for_value(value: FieldValue) -> Option<Box<dyn ArrayCodec>> {
    let codec: Box<dyn ArrayCodec> = match value {
        FieldValue::Int32Array(v) => Box::new(TypedBuffer::new(v)),
        FieldValue::UInt64Array(v) => Box::new(TypedBuffer::new(v)),
        FieldValue::Float64Array(v) => Box::new(TypedBuffer::new(v)),
        FieldValue::Float32Array(v) => Box::new(TypedBuffer::new(v)),
        FieldValue::StringArray(v) => Box::new(TypedBuffer::new(v)),
        FieldValue::BoolArray(v) => Box::new(TypedBuffer::new(v)),
        _ => return None,
    };
    Some(codec)
}

/// Receive buffer for an announced `count` of elements.
///
/// Storage grows as chunks arrive, so the announced count costs nothing up
/// front.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReceiveBuffer<T> {
    values: Vec<T>,
    expected: usize,
}

impl<T: ArrayElement> ReceiveBuffer<T> {
    pub fn new(expected: usize) -> Self {
        Self {
            values: Vec::new(),
            expected,
        }
    }

    pub fn received(&self) -> usize {
        self.values.len()
    }
}

impl<T: ArrayElement> ArrayCodec for ReceiveBuffer<T> {
    fn element_type(&self) -> ElementType {
        T::ELEMENT_TYPE
    }

    fn count(&self) -> usize {
        self.expected
    }

    fn byte_size(&self) -> usize {
        self.values.iter().map(ArrayElement::byte_size).sum()
    }

    fn append_chunk(&self, offset: usize, max: usize) -> ArrayValues {
        let start = offset.min(self.values.len());
        let end = offset.saturating_add(max).min(self.values.len());
        T::into_values(self.values[start..end].to_vec())
    }

    fn receive_chunk(&mut self, offset: usize, chunk: ArrayValues) -> RpcResult<usize> {
        let received = chunk.element_type();
        let values = T::from_values(chunk).ok_or_else(|| {
            Status::invalid_argument(format!(
                "Expected {} elements, received {}",
                T::ELEMENT_TYPE,
                received
            ))
        })?;
        if offset != self.values.len() {
            return Err(Status::invalid_argument(format!(
                "Chunk at offset {} does not follow the {} elements received",
                offset,
                self.values.len()
            )));
        }
        let end = offset.saturating_add(values.len());
        if end > self.expected {
            return Err(Status::out_of_range(format!(
                "Received {} elements at offset {} but only {} were announced",
                values.len(),
                offset,
                self.expected
            )));
        }
        let count = values.len();
        self.values.extend(values);
        Ok(count)
    }

    fn take_field_value(&mut self) -> FieldValue {
        T::into_field_value(std::mem::take(&mut self.values))
    }
}

/// Receive buffer for an upload of `count` elements.
pub fn codec_for_upload(element_type: ElementType, count: usize) -> Box<dyn ArrayCodec> {
    match element_type {
        ElementType::Int32 => Box::new(ReceiveBuffer::<i32>::new(count)),
        ElementType::UInt64 => Box::new(ReceiveBuffer::<u64>::new(count)),
        ElementType::Float64 => Box::new(ReceiveBuffer::<f64>::new(count)),
        ElementType::Float32 => Box::new(ReceiveBuffer::<f32>::new(count)),
        ElementType::String => Box::new(ReceiveBuffer::<String>::new(count)),
        ElementType::Bool => Box::new(ReceiveBuffer::<bool>::new(count)),
    }
}
