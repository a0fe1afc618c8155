//! Upload payload: an ordered set of uniquely named parts.
//!
//! A payload is built once per run and shared read-only by every job.
//! Sources never carry a read cursor of their own: `Bytes` is an immutable
//! buffer each job slices independently, and `File` is reopened by each job.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::multipart::EncodingError;

/// Where the bytes of a part come from.
#[derive(Debug, Clone)]
pub enum PartSource {
    /// Fully materialized content, shared read-only across jobs.
    Bytes(Arc<[u8]>),
    /// File on disk, opened afresh by every job that encodes it.
    File(PathBuf),
}

/// One named part of a `multipart/form-data` body.
#[derive(Debug, Clone)]
pub struct UploadPart {
    pub name: String,
    pub source: PartSource,
    /// Set for file-bearing parts; emitted as the `filename` attribute.
    pub filename: Option<String>,
}

impl UploadPart {
    /// Plain form field (no filename).
    pub fn field(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            source: PartSource::Bytes(Arc::from(value.into())),
            filename: None,
        }
    }

    /// File part read from disk; the filename is the path's base name.
    pub fn file(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let filename = file_name_of(&path);
        Self {
            name: name.into(),
            source: PartSource::File(path),
            filename: Some(filename),
        }
    }

    /// File part whose content is already in memory.
    pub fn file_bytes(
        name: impl Into<String>,
        filename: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            name: name.into(),
            source: PartSource::Bytes(Arc::from(data.into())),
            filename: Some(filename.into()),
        }
    }

    pub fn is_file(&self) -> bool {
        self.filename.is_some()
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Ordered parts with unique names. Part order in the encoded body is the
/// insertion order.
#[derive(Debug, Clone, Default)]
pub struct UploadPayload {
    parts: Vec<UploadPart>,
}

impl UploadPayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a list of parts, rejecting duplicate names.
    pub fn from_parts(parts: impl IntoIterator<Item = UploadPart>) -> Result<Self, EncodingError> {
        let mut payload = Self::new();
        for part in parts {
            payload.push(part)?;
        }
        Ok(payload)
    }

    /// Append a part. Fails if a part with the same name already exists.
    pub fn push(&mut self, part: UploadPart) -> Result<(), EncodingError> {
        if self.parts.iter().any(|p| p.name == part.name) {
            return Err(EncodingError::DuplicateName(part.name));
        }
        self.parts.push(part);
        Ok(())
    }

    pub fn parts(&self) -> &[UploadPart] {
        &self.parts
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}
