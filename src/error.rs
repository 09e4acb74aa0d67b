//! Error types for the netlog protocol.

use std::io;
use thiserror::Error;

/// Errors raised by the length-prefixed frame codec
#[derive(Debug, Error)]
pub enum FrameError {
    /// The stream ended in the middle of a frame
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// Declared length exceeds the protocol maximum
    #[error("frame length {len} exceeds maximum {max}")]
    TooLarge { len: usize, max: usize },

    /// Declared length cannot even cover the length prefix
    #[error("frame length {len} is smaller than the 4 byte prefix")]
    TooSmall { len: usize },

    /// The peer accepted zero bytes on a non-empty write
    #[error("connection broken")]
    ConnectionBroken,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised while turning a frame body into a record
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("BSON decode error: {0}")]
    Bson(#[from] bson::de::Error),

    /// A `__process__` record matched none of the known layouts
    #[error("unrecognized process record layout (fields: {0})")]
    UnknownProcessLayout(String),

    #[error("process record field '{0}' has the wrong type")]
    BadProcessField(&'static str),

    #[error("data frame references undescribed index {0}")]
    UnknownIndex(i64),

    #[error("argument count mismatch on {api}: got {actual} values for {expected} names")]
    ArgCountMismatch {
        api: String,
        expected: usize,
        actual: usize,
    },

    #[error("buffer checksum mismatch: expected {expected}, computed {computed}")]
    ChecksumMismatch { expected: String, computed: String },
}

impl DecodeError {
    /// Check if this error ends the stream or only drops one record
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::UnknownIndex(_) | Self::ArgCountMismatch { .. } | Self::ChecksumMismatch { .. }
        )
    }
}

/// Errors raised by the emitting side
#[derive(Debug, Error)]
pub enum SendError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("BSON encode error: {0}")]
    Encode(#[from] bson::ser::Error),

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
}

/// Errors raised while loading the result server configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_decode_errors() {
        assert!(!DecodeError::UnknownIndex(7).is_fatal());
        assert!(!DecodeError::ArgCountMismatch {
            api: "open".into(),
            expected: 3,
            actual: 2,
        }
        .is_fatal());
        assert!(DecodeError::UnknownProcessLayout("Foo".into()).is_fatal());
        assert!(DecodeError::Frame(FrameError::ConnectionBroken).is_fatal());
    }
}
