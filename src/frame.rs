//! Length-prefixed framing over a byte stream.
//!
//! ```text
//! [4B length, native order, counts itself][length - 4 bytes of document body]
//! ```

use byteorder::{ByteOrder, NativeEndian};
use std::io::{self, Read, Write};

use crate::error::FrameError;

/// Maximum frame length including the prefix (20 MiB)
pub const MAX_FRAME_LEN: usize = 20 * 1024 * 1024;

/// Length prefix size
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Unframed marker written by the emitter right after connecting
pub const HANDSHAKE: &[u8] = b"BSON\n";

/// Longest handshake line the receiver is willing to read
const MAX_HANDSHAKE_LEN: usize = 16;

/// Protocol family announced by the handshake line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Protocol {
    Bson,
    Other(String),
}

/// Read one frame body.
///
/// Returns `Ok(None)` on a clean end of stream at a frame boundary.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>, FrameError> {
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    let got = read_fully(reader, &mut prefix)?;
    if got == 0 {
        return Ok(None);
    }
    if got < LENGTH_PREFIX_SIZE {
        return Err(FrameError::Truncated {
            expected: LENGTH_PREFIX_SIZE,
            actual: got,
        });
    }

    let len = NativeEndian::read_u32(&prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    if len < LENGTH_PREFIX_SIZE {
        return Err(FrameError::TooSmall { len });
    }

    let body_len = len - LENGTH_PREFIX_SIZE;
    let mut body = Vec::with_capacity(body_len.min(64 * 1024));
    reader.take(body_len as u64).read_to_end(&mut body)?;
    if body.len() < body_len {
        return Err(FrameError::Truncated {
            expected: body_len,
            actual: body.len(),
        });
    }

    Ok(Some(body))
}

/// Write one frame: the length prefix followed by `body`, as a single send loop.
pub fn write_frame<W: Write>(writer: &mut W, body: &[u8]) -> Result<(), FrameError> {
    let len = body.len() + LENGTH_PREFIX_SIZE;
    let len32 = u32::try_from(len).map_err(|_| FrameError::TooLarge {
        len,
        max: MAX_FRAME_LEN,
    })?;

    let mut buf = vec![0u8; LENGTH_PREFIX_SIZE];
    NativeEndian::write_u32(&mut buf, len32);
    buf.extend_from_slice(body);

    send_all(writer, &buf)
}

/// Push every byte of `buf` through `writer`, retrying short writes.
pub fn send_all<W: Write>(writer: &mut W, buf: &[u8]) -> Result<(), FrameError> {
    let mut total = 0;
    while total < buf.len() {
        match writer.write(&buf[total..]) {
            Ok(0) => return Err(FrameError::ConnectionBroken),
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    writer.flush()?;
    Ok(())
}

/// Read the unframed protocol line that precedes the frames.
pub fn read_handshake<R: Read>(reader: &mut R) -> Result<Protocol, FrameError> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if read_fully(reader, &mut byte)? == 0 {
            return Err(FrameError::Truncated {
                expected: line.len() + 1,
                actual: line.len(),
            });
        }
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
        if line.len() > MAX_HANDSHAKE_LEN {
            return Err(FrameError::TooLarge {
                len: line.len(),
                max: MAX_HANDSHAKE_LEN,
            });
        }
    }

    let line = String::from_utf8_lossy(&line).trim().to_string();
    Ok(if line == "BSON" {
        Protocol::Bson
    } else {
        Protocol::Other(line)
    })
}

/// Fill `buf` as far as the stream allows and return how many bytes arrived.
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
