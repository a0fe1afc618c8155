pub mod tls_server;
pub mod upload_server;
