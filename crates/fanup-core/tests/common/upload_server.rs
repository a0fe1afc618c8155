//! Minimal HTTP/1.1 server that accepts multipart POSTs for integration tests.
//!
//! Reads the full request (Content-Length bodies only), parses the
//! `multipart/form-data` body and records it. Answers with the status
//! configured for the request path (200 by default) and closes the
//! connection after every response.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use fanup_core::multipart::{boundary_from_content_type, parse_form_data, FormPart};

/// One request as the server saw it.
#[derive(Debug, Clone)]
pub struct Received {
    pub path: String,
    pub content_type: String,
    pub body_len: usize,
    /// `None` when the body did not parse as multipart.
    pub parts: Option<Vec<FormPart>>,
}

pub struct UploadServer {
    /// e.g. "http://127.0.0.1:12345" or "https://127.0.0.1:12345"
    pub base: String,
    received: Arc<Mutex<Vec<Received>>>,
}

impl UploadServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }

    pub fn received_at(&self, path: &str) -> Vec<Received> {
        self.received()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }
}

/// Starts a plain HTTP server in a background thread. `statuses` maps request
/// paths to response codes; unknown paths get 200. Runs until the process exits.
pub fn start(statuses: &[(&str, u16)]) -> UploadServer {
    serve("http", statuses, |mut stream, statuses, recorded| {
        set_timeouts(&stream);
        handle(&mut stream, statuses, recorded);
    })
}

/// Accept loop shared by the plain and TLS servers; `on_conn` runs on its
/// own thread for every accepted connection.
pub fn serve<F>(scheme: &str, statuses: &[(&str, u16)], on_conn: F) -> UploadServer
where
    F: Fn(TcpStream, &HashMap<String, u16>, &Mutex<Vec<Received>>) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let statuses: Arc<HashMap<String, u16>> = Arc::new(
        statuses
            .iter()
            .map(|(p, s)| (p.to_string(), *s))
            .collect(),
    );
    let received = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&received);
    let on_conn = Arc::new(on_conn);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let statuses = Arc::clone(&statuses);
            let recorded = Arc::clone(&recorded);
            let on_conn = Arc::clone(&on_conn);
            thread::spawn(move || on_conn(stream, &statuses, &recorded));
        }
    });
    UploadServer {
        base: format!("{}://127.0.0.1:{}", scheme, port),
        received,
    }
}

pub fn set_timeouts(stream: &TcpStream) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
}

/// Serve one request on `stream`, which may be plain TCP or a TLS session.
pub fn handle<S: Read + Write>(
    stream: &mut S,
    statuses: &HashMap<String, u16>,
    recorded: &Mutex<Vec<Received>>,
) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let header_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos;
        }
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    };
    let head = match std::str::from_utf8(&buf[..header_end]) {
        Ok(s) => s.to_string(),
        Err(_) => return,
    };
    let (method, path, headers) = parse_head(&head);
    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(n) => body.extend_from_slice(&chunk[..n]),
        }
    }

    if !method.eq_ignore_ascii_case("POST") {
        let _ = stream.write_all(
            b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        return;
    }

    let content_type = headers.get("content-type").cloned().unwrap_or_default();
    let parts = boundary_from_content_type(&content_type)
        .and_then(|b| parse_form_data(&body, &b).ok());
    recorded.lock().unwrap().push(Received {
        path: path.clone(),
        content_type,
        body_len: body.len(),
        parts,
    });

    let status = statuses.get(&path).copied().unwrap_or(200);
    let reason = match status {
        200 => "OK",
        201 => "Created",
        400 => "Bad Request",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    };
    let response_body = format!("{{\"status\":{}}}", status);
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        response_body.len(),
        response_body
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

/// Returns (method, path, lowercase header map).
fn parse_head(head: &str) -> (String, String, HashMap<String, String>) {
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or("").split_whitespace();
    let method = request_line.next().unwrap_or("").to_string();
    let path = request_line.next().unwrap_or("/").to_string();
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();
    (method, path, headers)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
