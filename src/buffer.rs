//! Integrity gate and storage for raw memory dumps.

use sha1::{Digest, Sha1};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::DecodeError;

/// Content hash used to address dumped buffers (SHA-1, lowercase hex)
pub fn checksum(payload: &[u8]) -> String {
    hex::encode(Sha1::digest(payload))
}

/// Accept `payload` only if it hashes to exactly `expected` (lowercase hex).
pub fn verify(payload: &[u8], expected: &str) -> Result<String, DecodeError> {
    let computed = checksum(payload);
    if computed == expected {
        Ok(computed)
    } else {
        Err(DecodeError::ChecksumMismatch {
            expected: expected.to_string(),
            computed,
        })
    }
}

/// Store for verified buffers, keyed by their checksum
pub trait BufferSink {
    fn store(&mut self, checksum: &str, payload: &[u8]) -> anyhow::Result<()>;
}

/// Drops every buffer
#[derive(Debug, Default)]
pub struct DiscardBuffers;

impl BufferSink for DiscardBuffers {
    fn store(&mut self, _checksum: &str, _payload: &[u8]) -> anyhow::Result<()> {
        Ok(())
    }
}

impl BufferSink for Vec<(String, Vec<u8>)> {
    fn store(&mut self, checksum: &str, payload: &[u8]) -> anyhow::Result<()> {
        self.push((checksum.to_string(), payload.to_vec()));
        Ok(())
    }
}

/// Writes each buffer to `<root>/buffer/<checksum>`
#[derive(Debug, Clone)]
pub struct DirBufferSink {
    dir: PathBuf,
}

impl DirBufferSink {
    pub fn new(root: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = root.as_ref().join("buffer");
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, checksum: &str) -> PathBuf {
        self.dir.join(checksum)
    }
}

impl BufferSink for DirBufferSink {
    fn store(&mut self, checksum: &str, payload: &[u8]) -> anyhow::Result<()> {
        // Only ever called with a verified hex digest, so it is a safe file name.
        fs::write(self.path_for(checksum), payload)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_sha1_hex() {
        assert_eq!(checksum(b"abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn test_verify() {
        assert_eq!(
            verify(b"abc", "a9993e364706816aba3e25717850c26c9cd0d89d").unwrap(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert!(verify(b"abc", "A9993E364706816ABA3E25717850C26C9CD0D89D").is_err());

        let err = verify(b"abd", "a9993e364706816aba3e25717850c26c9cd0d89d").unwrap_err();
        assert!(matches!(err, DecodeError::ChecksumMismatch { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_dir_sink_writes_by_checksum() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sink = DirBufferSink::new(tmp.path()).unwrap();
        let sum = checksum(b"dump");
        sink.store(&sum, b"dump").unwrap();

        let written = fs::read(tmp.path().join("buffer").join(&sum)).unwrap();
        assert_eq!(written, b"dump");
    }
}
