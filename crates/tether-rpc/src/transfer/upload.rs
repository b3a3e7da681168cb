//! Client to server array transfer.

use super::codec::{codec_for_upload, ArrayCodec};
use super::ArrayValues;
use crate::types::{RpcResult, Status};
use tether_core::field::FieldKind;
use tether_core::object::ObjectHandle;
use tether_core::value::ElementType;
use tracing::{debug, trace};

/// Progress of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Init,
    Receiving,
    Applied,
}

/// Accumulates chunks for an array field and installs the result as one
/// change.
pub struct Upload {
    owner: ObjectHandle,
    field: String,
    codec: Box<dyn ArrayCodec>,
    received: usize,
    state: UploadState,
}

impl Upload {
    /// Prepare to receive `total` elements for `field`.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown field, `Unimplemented` if it is not an
    /// array field, `InvalidArgument` if `element_type` differs from the
    /// field's, `FailedPrecondition` if the field is not writable,
    /// `OutOfRange` if `total` exceeds `max_elements`.
    pub fn init(
        owner: ObjectHandle,
        field: &str,
        element_type: ElementType,
        total: u64,
        max_elements: u64,
    ) -> RpcResult<Self> {
        let info = owner.field_info(field).ok_or_else(|| {
            Status::not_found(format!(
                "Could not find field {} in {}",
                field,
                owner.class_keyword()
            ))
        })?;
        let field_type = match info.kind {
            FieldKind::Value {
                element_type,
                array: true,
            } => element_type,
            _ => {
                return Err(Status::unimplemented(format!(
                    "Field {} has no array codec",
                    field
                )))
            }
        };
        if field_type != element_type {
            return Err(Status::invalid_argument(format!(
                "Field {} holds {} elements, not {}",
                field, field_type, element_type
            )));
        }
        if !info.writable {
            return Err(Status::failed_precondition(format!(
                "Field {} is not writable",
                field
            )));
        }

        let total = usize::try_from(total)
            .ok()
            .filter(|_| total <= max_elements)
            .ok_or_else(|| {
                Status::out_of_range(format!(
                    "Upload of {} announces {} elements, at most {} are accepted",
                    field, total, max_elements
                ))
            })?;

        debug!("Receiving {} {} elements for {}", total, element_type, field);
        Ok(Self {
            owner,
            field: field.to_string(),
            codec: codec_for_upload(element_type, total),
            received: 0,
            state: UploadState::Init,
        })
    }

    /// Store the next chunk after the elements received so far.
    ///
    /// # Errors
    ///
    /// `OutOfRange` if the chunk runs past the announced total,
    /// `InvalidArgument` for a chunk of the wrong element type,
    /// `FailedPrecondition` after the upload has been applied.
    pub fn receive(&mut self, chunk: ArrayValues) -> RpcResult<usize> {
        if self.state == UploadState::Applied {
            return Err(Status::failed_precondition("Upload has already been applied"));
        }
        self.state = UploadState::Receiving;
        let count = self.codec.receive_chunk(self.received, chunk)?;
        self.received += count;
        trace!("Received {}/{} elements", self.received, self.codec.count());
        Ok(count)
    }

    /// Install the received array into the field as a single change.
    ///
    /// # Errors
    ///
    /// `FailedPrecondition` if fewer elements arrived than announced or the
    /// upload was already applied.
    pub fn apply(&mut self) -> RpcResult<usize> {
        if self.state == UploadState::Applied {
            return Err(Status::failed_precondition("Upload has already been applied"));
        }
        if !self.is_complete() {
            return Err(Status::failed_precondition(format!(
                "Upload of {} ended after {} of {} elements",
                self.field,
                self.received,
                self.codec.count()
            )));
        }
        let total = self.codec.count();
        let value = self.codec.take_field_value();
        self.owner.set(&self.field, value)?;
        self.state = UploadState::Applied;
        debug!("Applied {} elements to {}", total, self.field);
        Ok(total)
    }

    pub fn is_complete(&self) -> bool {
        self.received == self.codec.count()
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn received(&self) -> usize {
        self.received
    }

    pub fn total(&self) -> usize {
        self.codec.count()
    }

    pub fn state(&self) -> UploadState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StatusCode;
    use std::sync::{Arc, Mutex};
    use tether_core::field::ValueField;
    use tether_core::object::FieldObserver;
    use tether_core::value::FieldValue;

    const LIMIT: u64 = 1000;

    fn owner() -> ObjectHandle {
        ObjectHandle::builder("DemoObject")
            .field(ValueField::scriptable("ints", FieldValue::Int32Array(vec![42])))
            .field(ValueField::scriptable("fixed", FieldValue::Int32Array(vec![])).read_only())
            .build()
    }

    #[derive(Default)]
    struct Lengths(Mutex<Vec<(Option<usize>, Option<usize>)>>);

    impl FieldObserver for Lengths {
        fn field_changed(&self, _: &ObjectHandle, _: &str, before: &FieldValue, after: &FieldValue) {
            self.0.lock().unwrap().push((before.len(), after.len()));
        }
    }

    #[test]
    fn test_applies_once_at_end() {
        let owner = owner();
        let observer = Arc::new(Lengths::default());
        owner.add_observer(observer.clone());

        let mut upload = Upload::init(owner.clone(), "ints", ElementType::Int32, 5, LIMIT).unwrap();
        upload.receive(ArrayValues::Int32(vec![1, 2])).unwrap();
        upload.receive(ArrayValues::Int32(vec![3, 4])).unwrap();
        assert_eq!(owner.get("ints").unwrap(), FieldValue::Int32Array(vec![42]));
        upload.receive(ArrayValues::Int32(vec![5])).unwrap();

        assert_eq!(upload.apply().unwrap(), 5);
        assert_eq!(upload.state(), UploadState::Applied);
        assert_eq!(owner.get("ints").unwrap(), FieldValue::Int32Array(vec![1, 2, 3, 4, 5]));
        assert_eq!(*observer.0.lock().unwrap(), vec![(Some(1), Some(5))]);
    }

    #[test]
    fn test_overrun_is_out_of_range() {
        let mut upload = Upload::init(owner(), "ints", ElementType::Int32, 2, LIMIT).unwrap();
        upload.receive(ArrayValues::Int32(vec![1])).unwrap();
        let err = upload.receive(ArrayValues::Int32(vec![2, 3])).unwrap_err();
        assert_eq!(err.code, StatusCode::OutOfRange);
    }

    #[test]
    fn test_incomplete_upload_is_not_applied() {
        let owner = owner();
        let mut upload = Upload::init(owner.clone(), "ints", ElementType::Int32, 3, LIMIT).unwrap();
        upload.receive(ArrayValues::Int32(vec![7])).unwrap();
        let err = upload.apply().unwrap_err();
        assert_eq!(err.code, StatusCode::FailedPrecondition);
        assert_eq!(owner.get("ints").unwrap(), FieldValue::Int32Array(vec![42]));
    }

    #[test]
    fn test_empty_upload_clears_field() {
        let owner = owner();
        let mut upload = Upload::init(owner.clone(), "ints", ElementType::Int32, 0, LIMIT).unwrap();
        assert!(upload.is_complete());
        upload.apply().unwrap();
        assert_eq!(owner.get("ints").unwrap(), FieldValue::Int32Array(vec![]));
    }

    #[test]
    fn test_announced_total_is_bounded() {
        let owner = owner();
        for total in [LIMIT + 1, u64::MAX] {
            let err = Upload::init(owner.clone(), "ints", ElementType::Int32, total, LIMIT)
                .err()
                .unwrap();
            assert_eq!(err.code, StatusCode::OutOfRange);
        }
        let upload = Upload::init(owner, "ints", ElementType::Int32, LIMIT, LIMIT).unwrap();
        assert_eq!(upload.total(), LIMIT as usize);
    }

    #[test]
    fn test_init_errors() {
        let owner = owner();
        let code = |field: &str, ty| Upload::init(owner.clone(), field, ty, 1, LIMIT).err().map(|s| s.code);
        assert_eq!(code("missing", ElementType::Int32), Some(StatusCode::NotFound));
        assert_eq!(code("ints", ElementType::Float64), Some(StatusCode::InvalidArgument));
        assert_eq!(code("fixed", ElementType::Int32), Some(StatusCode::FailedPrecondition));
    }
}
