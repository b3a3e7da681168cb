//! Server to client array transfer.

use super::codec::{codec_for_value, ArrayCodec};
use super::{chunk_size, ArrayValues};
use crate::types::{RpcResult, Status};
use tether_core::field::FieldKind;
use tether_core::object::ObjectHandle;
use tether_core::value::ElementType;
use tracing::trace;

/// Progress of a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Init,
    Streaming,
    Done,
}

/// Streams a snapshot of an array field in chunks.
pub struct Download {
    codec: Box<dyn ArrayCodec>,
    chunk_size: usize,
    streamed: usize,
    state: DownloadState,
}

impl Download {
    /// Snapshot the current value of `field` on `owner`.
    ///
    /// # Errors
    ///
    /// `NotFound` if the owner has no scriptable field of that name,
    /// `Unimplemented` if the field is not an array field,
    /// `FailedPrecondition` if it is not readable.
    pub fn init(owner: &ObjectHandle, field: &str, package_byte_size: usize) -> RpcResult<Self> {
        let info = owner.field_info(field).ok_or_else(|| {
            Status::not_found(format!(
                "Could not find field {} in {}",
                field,
                owner.class_keyword()
            ))
        })?;
        if !matches!(info.kind, FieldKind::Value { array: true, .. }) {
            return Err(Status::unimplemented(format!(
                "Field {} has no array codec",
                field
            )));
        }
        if !info.readable {
            return Err(Status::failed_precondition(format!(
                "Field {} found, but it isn't readable",
                field
            )));
        }
        let codec = codec_for_value(owner.get(field)?).ok_or_else(|| {
            Status::unimplemented(format!("Field {} has no array codec", field))
        })?;
        Ok(Self::from_codec(codec, package_byte_size))
    }

    pub fn from_codec(codec: Box<dyn ArrayCodec>, package_byte_size: usize) -> Self {
        Self {
            chunk_size: chunk_size(package_byte_size, codec.element_type()),
            codec,
            streamed: 0,
            state: DownloadState::Init,
        }
    }

    /// Next chunk, or `None` once every element has been streamed.
    pub fn next_chunk(&mut self) -> Option<ArrayValues> {
        if self.state == DownloadState::Done {
            return None;
        }
        self.state = DownloadState::Streaming;

        let remaining = self.codec.count() - self.streamed;
        if remaining == 0 {
            self.state = DownloadState::Done;
            return None;
        }
        let chunk = self
            .codec
            .append_chunk(self.streamed, self.chunk_size.min(remaining));
        self.streamed += chunk.len();
        trace!("Streamed {}/{} elements", self.streamed, self.codec.count());
        Some(chunk)
    }

    pub fn element_type(&self) -> ElementType {
        self.codec.element_type()
    }

    pub fn total(&self) -> usize {
        self.codec.count()
    }

    pub fn streamed(&self) -> usize {
        self.streamed
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn state(&self) -> DownloadState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StatusCode;
    use tether_core::field::ValueField;
    use tether_core::value::FieldValue;

    fn owner() -> ObjectHandle {
        ObjectHandle::builder("DemoObject")
            .field(ValueField::scriptable("ints", FieldValue::Int32Array((0..10).collect())))
            .field(ValueField::scriptable("names", FieldValue::StringArray(vec!["a".into(), "b".into()])))
            .field(ValueField::scriptable("scalar", FieldValue::Int32(1)))
            .field(ValueField::scriptable("hidden", FieldValue::BoolArray(vec![])).write_only())
            .build()
    }

    #[test]
    fn test_chunks_in_order() {
        // 16 bytes per package = 4 int32 per chunk
        let mut download = Download::init(&owner(), "ints", 16).unwrap();
        assert_eq!(download.state(), DownloadState::Init);

        let mut lengths = Vec::new();
        let mut all = ArrayValues::Int32(Vec::new());
        while let Some(chunk) = download.next_chunk() {
            lengths.push(chunk.len());
            all.extend(chunk);
        }
        assert_eq!(lengths, vec![4, 4, 2]);
        assert_eq!(all, ArrayValues::Int32((0..10).collect()));
        assert_eq!(download.state(), DownloadState::Done);
        assert!(download.next_chunk().is_none());
    }

    #[test]
    fn test_strings_one_per_chunk() {
        let mut download = Download::init(&owner(), "names", 65536).unwrap();
        assert_eq!(download.next_chunk(), Some(ArrayValues::String(vec!["a".into()])));
        assert_eq!(download.next_chunk(), Some(ArrayValues::String(vec!["b".into()])));
        assert_eq!(download.next_chunk(), None);
    }

    #[test]
    fn test_init_errors() {
        let owner = owner();
        let code = |field: &str| Download::init(&owner, field, 64).err().map(|s| s.code);
        assert_eq!(code("missing"), Some(StatusCode::NotFound));
        assert_eq!(code("scalar"), Some(StatusCode::Unimplemented));
        assert_eq!(code("hidden"), Some(StatusCode::FailedPrecondition));
    }

    #[test]
    fn test_snapshot_is_taken_at_init() {
        let owner = owner();
        let mut download = Download::init(&owner, "ints", 1024).unwrap();
        owner.set("ints", FieldValue::Int32Array(vec![])).unwrap();
        assert_eq!(download.total(), 10);
        assert_eq!(download.next_chunk().map(|c| c.len()), Some(10));
    }
}
