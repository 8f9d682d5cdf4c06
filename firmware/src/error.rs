use std::io;
use std::time::Duration;

use thiserror::Error;

/// Boot-time configuration problems. Always fatal: there is no partially
/// valid ranging mode.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("short address {0} does not fit the 3-bit strap range (0..=7)")]
    ShortAddress(u16),
    #[error("could not read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{len} bytes at offset {offset} exceed store capacity {capacity}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },
    #[error("image {path} holds {actual} bytes, larger than the configured {capacity}")]
    ImageTooLarge {
        path: String,
        actual: usize,
        capacity: usize,
    },
    #[error("storage I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("commit failed after {attempts} attempts: {last}")]
    CommitFailed {
        attempts: u32,
        #[source]
        last: Box<StorageError>,
    },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("link closed by peer")]
    Closed,
    #[error("write did not complete within {0:?}")]
    WriteTimeout(Duration),
    #[error("link I/O error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::WriteZero => Self::Closed,
            _ => Self::Io(e),
        }
    }
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}
