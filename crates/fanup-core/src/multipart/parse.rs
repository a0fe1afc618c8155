//! Strict reader for `multipart/form-data` bodies.

/// One decoded part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormPart {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("opening boundary not found")]
    MissingBoundary,
    #[error("body ends before the closing boundary")]
    Truncated,
    #[error("malformed part header {0:?}")]
    MalformedHeader(String),
    #[error("part has no form-data Content-Disposition")]
    MissingDisposition,
}

/// Extract the boundary parameter from a `multipart/form-data` content type.
pub fn boundary_from_content_type(value: &str) -> Option<String> {
    let (mime, params) = value.split_once(';')?;
    if !mime.trim().eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params.split(';').find_map(|param| {
        let (key, val) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let val = val.trim().trim_matches('"');
        (!val.is_empty()).then(|| val.to_string())
    })
}

/// Split `body` into its parts. Preamble before the first boundary is
/// skipped; anything after the closing boundary is ignored.
pub fn parse_form_data(body: &[u8], boundary: &str) -> Result<Vec<FormPart>, ParseError> {
    let delim = format!("--{}", boundary).into_bytes();
    let inner_delim = format!("\r\n--{}", boundary).into_bytes();

    let mut pos = if body.starts_with(&delim) {
        delim.len()
    } else {
        find(body, &inner_delim, 0).ok_or(ParseError::MissingBoundary)? + inner_delim.len()
    };

    let mut parts = Vec::new();
    loop {
        let rest = &body[pos..];
        if rest.starts_with(b"--") {
            return Ok(parts);
        }
        if !rest.starts_with(b"\r\n") {
            return Err(ParseError::Truncated);
        }
        pos += 2;

        let header_end = find(body, b"\r\n\r\n", pos).ok_or(ParseError::Truncated)?;
        let (name, filename, content_type) = parse_headers(&body[pos..header_end])?;
        let data_start = header_end + 4;
        let data_end = find(body, &inner_delim, data_start).ok_or(ParseError::Truncated)?;
        parts.push(FormPart {
            name,
            filename,
            content_type,
            data: body[data_start..data_end].to_vec(),
        });
        pos = data_end + inner_delim.len();
    }
}

type PartHeaders = (String, Option<String>, Option<String>);

fn parse_headers(block: &[u8]) -> Result<PartHeaders, ParseError> {
    let text = std::str::from_utf8(block)
        .map_err(|_| ParseError::MalformedHeader(String::from_utf8_lossy(block).into_owned()))?;
    let mut disposition = None;
    let mut content_type = None;
    for line in text.split("\r\n").filter(|l| !l.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ParseError::MalformedHeader(line.to_string()))?;
        let value = value.trim();
        if name.trim().eq_ignore_ascii_case("content-disposition") {
            disposition = Some(parse_disposition(value).ok_or(ParseError::MissingDisposition)?);
        } else if name.trim().eq_ignore_ascii_case("content-type") {
            content_type = Some(value.to_string());
        }
    }
    let (name, filename) = disposition.ok_or(ParseError::MissingDisposition)?;
    Ok((name, filename, content_type))
}

/// Parse `form-data; name="x"; filename="y"` with backslash-escaped quotes.
fn parse_disposition(value: &str) -> Option<(String, Option<String>)> {
    let (kind, mut rest) = value.split_once(';')?;
    if !kind.trim().eq_ignore_ascii_case("form-data") {
        return None;
    }
    let mut name = None;
    let mut filename = None;
    loop {
        rest = rest.trim_start_matches([' ', '\t', ';']);
        if rest.is_empty() {
            break;
        }
        let (key, after_key) = rest.split_once('=')?;
        let (val, after_val) = if let Some(quoted) = after_key.strip_prefix('"') {
            unquote(quoted)?
        } else {
            let end = after_key.find(';').unwrap_or(after_key.len());
            (after_key[..end].trim().to_string(), &after_key[end..])
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "name" => name = Some(val),
            "filename" => filename = Some(val),
            _ => {}
        }
        rest = after_val;
    }
    Some((name?, filename))
}

/// Read a quoted string body (opening quote already consumed). Returns the
/// unescaped value and the remainder after the closing quote.
fn unquote(s: &str) -> Option<(String, &str)> {
    let mut out = String::new();
    let mut chars = s.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => out.push(chars.next()?.1),
            '"' => return Some((out, &s[i + 1..])),
            _ => out.push(c),
        }
    }
    None
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() || needle.len() > haystack.len() - from {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}
