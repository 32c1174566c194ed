//! Managed socket handles
//!
//! A `SocketHandle` is the host-owned wrapper over one duplex byte
//! stream. It is exclusively owned by whichever invocation currently
//! holds it (enforced by `&mut` in-core) and is poisoned on close so a
//! post-close operation deterministically fails instead of touching a
//! dead resource.
//!
//! Internally errors are a discriminated result; the flat negative
//! sentinel convention exists only at the C boundary (see `ffi`).

use std::io::{Read, Write};
use thiserror::Error;

/// Any blocking duplex byte stream. Blanket-implemented, so production
/// code plugs in `TcpStream` and tests plug in in-memory pipes.
pub trait ByteStream: Read + Write + Send {}

impl<T: Read + Write + Send> ByteStream for T {}

/// Socket I/O failure
#[derive(Debug, Error)]
pub enum SocketError {
    /// The handle was used after `close` (the InvalidHandle condition)
    #[error("socket handle used after close")]
    Closed,

    #[error("socket I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Host-owned handle over a single live duplex connection.
pub struct SocketHandle {
    stream: Option<Box<dyn ByteStream>>,
}

impl SocketHandle {
    pub fn new(stream: impl ByteStream + 'static) -> Self {
        Self {
            stream: Some(Box::new(stream)),
        }
    }

    /// Write from `buf`, returning the number of bytes written.
    ///
    /// A short write is legal per blocking-socket semantics and is not
    /// an error; the caller retries with the remainder.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, SocketError> {
        let stream = self.stream.as_mut().ok_or(SocketError::Closed)?;
        Ok(stream.write(buf)?)
    }

    /// Read into `buf`, returning the number of bytes read.
    ///
    /// `Ok(0)` signals orderly end-of-stream (peer closed), which is
    /// distinct from an error.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, SocketError> {
        let stream = self.stream.as_mut().ok_or(SocketError::Closed)?;
        Ok(stream.read(buf)?)
    }

    /// Release the underlying stream and poison the handle. Idempotent:
    /// closing twice is a no-op, not an error.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("Socket handle closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }
}

impl std::fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketHandle")
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    /// Writer that accepts at most `max_per_write` bytes per call,
    /// forcing short writes.
    struct ChunkedPipe {
        written: Vec<u8>,
        readable: io::Cursor<Vec<u8>>,
        max_per_write: usize,
    }

    impl ChunkedPipe {
        fn new(readable: Vec<u8>, max_per_write: usize) -> Self {
            Self {
                written: Vec::new(),
                readable: io::Cursor::new(readable),
                max_per_write,
            }
        }
    }

    impl Read for ChunkedPipe {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.readable.read(buf)
        }
    }

    impl Write for ChunkedPipe {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.max_per_write);
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Stream whose reads always fail, to distinguish error from EOF.
    struct BrokenStream;

    impl Read for BrokenStream {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
        }
    }

    impl Write for BrokenStream {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_short_write_retry_completes_without_loss() {
        let mut handle = SocketHandle::new(ChunkedPipe::new(Vec::new(), 4));
        let payload = b"ten bytes!";

        let first = handle.write(payload).unwrap();
        assert_eq!(first, 4);

        // Retry with the remainder until the transfer completes
        let mut offset = first;
        while offset < payload.len() {
            offset += handle.write(&payload[offset..]).unwrap();
        }
        assert_eq!(offset, payload.len());
    }

    #[test]
    fn test_eof_is_zero_not_error() {
        let mut handle = SocketHandle::new(ChunkedPipe::new(b"hi".to_vec(), 16));
        let mut buf = [0u8; 8];

        assert_eq!(handle.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"hi");
        // Peer closed: orderly EOF, not a failure
        assert_eq!(handle.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_failed_read_is_an_error_not_eof() {
        let mut handle = SocketHandle::new(BrokenStream);
        let mut buf = [0u8; 8];
        match handle.read(&mut buf) {
            Err(SocketError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("expected I/O error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_closed_handle_is_poisoned() {
        let mut handle = SocketHandle::new(ChunkedPipe::new(Vec::new(), 16));
        handle.close();
        assert!(handle.is_closed());

        assert!(matches!(handle.write(b"x"), Err(SocketError::Closed)));
        let mut buf = [0u8; 1];
        assert!(matches!(handle.read(&mut buf), Err(SocketError::Closed)));

        // Double close is a no-op
        handle.close();
        assert!(handle.is_closed());
    }
}
