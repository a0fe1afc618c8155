//! TLS flavour of the upload server, using the certificates under
//! `tests/fixtures/tls` (a test CA and a leaf for 127.0.0.1 and localhost).
//!
//! Only `http/1.1` is offered over ALPN, so clients preferring h2 fall back.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ServerConfig, ServerConnection, StreamOwned};

use super::upload_server::{self, UploadServer};

const FIXTURES: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/tls");

/// PEM of the CA that signed the server certificate.
pub fn ca_path() -> PathBuf {
    Path::new(FIXTURES).join("ca.pem")
}

fn server_config() -> Arc<ServerConfig> {
    let dir = Path::new(FIXTURES);
    let certs: Vec<CertificateDer<'static>> = CertificateDer::pem_file_iter(dir.join("server.pem"))
        .expect("open server.pem")
        .collect::<Result<_, _>>()
        .expect("parse server.pem");
    let key = PrivateKeyDer::from_pem_file(dir.join("server.key")).expect("parse server.key");
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .expect("protocol versions")
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .expect("server certificate");
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Arc::new(config)
}

/// Like `upload_server::start`, behind TLS. Base URL is `https://127.0.0.1:<port>`.
pub fn start(statuses: &[(&str, u16)]) -> UploadServer {
    let config = server_config();
    upload_server::serve("https", statuses, move |tcp, statuses, recorded| {
        upload_server::set_timeouts(&tcp);
        let Ok(conn) = ServerConnection::new(Arc::clone(&config)) else {
            return;
        };
        let mut tls = StreamOwned::new(conn, tcp);
        // A rejected handshake surfaces as a read error and ends the request.
        upload_server::handle(&mut tls, statuses, recorded);
        tls.conn.send_close_notify();
        let _ = tls.flush();
    })
}
