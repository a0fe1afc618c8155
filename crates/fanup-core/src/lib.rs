pub mod config;
pub mod logging;

pub mod checksum;
pub mod control;
pub mod dispatcher;
pub mod multipart;
pub mod payload;
pub mod transport;
