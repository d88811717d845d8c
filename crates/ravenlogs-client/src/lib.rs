//! RavenDB admin log client for ravenlogs
//!
//! This crate registers a log watch with the server and relays the resulting
//! event stream as decoded records.

mod client;
mod endpoint;
mod session;
mod stream;

pub use client::RemoteLogClient;
pub use endpoint::{configure_url, events_url};
pub use session::{SESSION_ID_LEN, generate_session_id};
pub use stream::LogStream;

// Re-export types that are used in our public API
pub use ravenlogs_types::{ConnectionState, Error, LogFilter, LogRecord};
