use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the stream client, engine and log store
#[derive(Debug, Error)]
pub enum Error {
    /// Transport failure or non-success status while registering the watch.
    /// Carries the server reason phrase or the transport message.
    #[error("Network error has occurred. {0}")]
    Network(String),

    /// Failure opening or closing the event stream
    #[error("Websocket error has occurred. {0}")]
    WebSocket(String),

    #[error("a log stream is already connected")]
    AlreadyConnected,

    /// Malformed stored file or unparseable frame
    #[error("invalid log data: {0}")]
    Format(String),

    #[error("file system error on {}: {source}", .path.display())]
    FileSystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub fn file_system(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::FileSystem {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_phase_prefix() {
        assert_eq!(
            Error::Network("Not Found".into()).to_string(),
            "Network error has occurred. Not Found"
        );
        assert_eq!(
            Error::WebSocket("reset".into()).to_string(),
            "Websocket error has occurred. reset"
        );
    }
}
