//! `multipart/form-data` encoding of an upload payload.
//!
//! Produces the same framing as a standard multipart writer: each part is
//! introduced by `--boundary`, carries a `Content-Disposition` header (with a
//! `filename` attribute for file parts), a blank line and the raw bytes; the
//! body ends with `--boundary--`.

mod boundary;
mod parse;

pub use boundary::BOUNDARY_LEN;
pub use parse::{boundary_from_content_type, parse_form_data, FormPart, ParseError};

use std::borrow::Cow;
use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;

use crate::payload::{PartSource, UploadPart, UploadPayload};

/// Per-job encoding failure.
#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    /// Two parts share a name.
    #[error("duplicate part name {0:?}")]
    DuplicateName(String),
    /// A part's source could not be read to the end.
    #[error("read part {name:?} from {}", path.display())]
    Source {
        name: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Encoded request body plus the header metadata describing it.
#[derive(Debug, Clone)]
pub struct EncodedBody {
    pub body: Vec<u8>,
    /// `multipart/form-data; boundary=...`
    pub content_type: String,
    pub boundary: String,
}

/// Encode `payload` into one `multipart/form-data` body.
///
/// Every source is read exactly once, here. File sources are opened and
/// closed inside this call, so concurrent callers never share a cursor.
pub fn encode(payload: &UploadPayload) -> Result<EncodedBody, EncodingError> {
    let parts = payload.parts();
    let mut seen = std::collections::HashSet::with_capacity(parts.len());
    for part in parts {
        if !seen.insert(part.name.as_str()) {
            return Err(EncodingError::DuplicateName(part.name.clone()));
        }
    }

    let contents = parts
        .iter()
        .map(read_source)
        .collect::<Result<Vec<_>, _>>()?;
    let slices: Vec<&[u8]> = contents.iter().map(|c| c.as_ref()).collect();

    let boundary = boundary::choose(parts, &slices);
    let body = write_body(parts, &slices, &boundary);
    Ok(EncodedBody {
        content_type: format!("multipart/form-data; boundary={}", boundary),
        body,
        boundary,
    })
}

fn read_source(part: &UploadPart) -> Result<Cow<'_, [u8]>, EncodingError> {
    match &part.source {
        PartSource::Bytes(data) => Ok(Cow::Borrowed(&data[..])),
        PartSource::File(path) => {
            let err = |source| EncodingError::Source {
                name: part.name.clone(),
                path: path.clone(),
                source,
            };
            let mut file = File::open(path).map_err(err)?;
            let mut buf = Vec::new();
            file.read_to_end(&mut buf).map_err(err)?;
            Ok(Cow::Owned(buf))
        }
    }
}

fn write_body(parts: &[UploadPart], contents: &[&[u8]], boundary: &str) -> Vec<u8> {
    let framing: usize = parts
        .iter()
        .map(|p| 160 + p.name.len() + p.filename.as_ref().map_or(0, |f| f.len()))
        .sum();
    let data: usize = contents.iter().map(|c| c.len()).sum();
    let mut body = Vec::with_capacity(framing + data + boundary.len() + 8);

    for (i, (part, data)) in parts.iter().zip(contents).enumerate() {
        if i > 0 {
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(b"--");
        body.extend_from_slice(boundary.as_bytes());
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(part_headers(part).as_bytes());
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(data);
    }
    if !parts.is_empty() {
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(b"--");
    body.extend_from_slice(boundary.as_bytes());
    body.extend_from_slice(b"--\r\n");
    body
}

fn part_headers(part: &UploadPart) -> String {
    match &part.filename {
        Some(filename) => format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
             Content-Type: application/octet-stream\r\n",
            escape_quotes(&part.name),
            escape_quotes(filename)
        ),
        None => format!(
            "Content-Disposition: form-data; name=\"{}\"\r\n",
            escape_quotes(&part.name)
        ),
    }
}

fn escape_quotes(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
