//! Buffered forward-seekable byte cursor
//!
//! Thin wrapper over any `Read + Seek` source that tracks the exact absolute
//! byte offset. The frame decoder relies on `position()` to attribute decode
//! errors to frame start offsets and on `seek_to()` for the two-pass scan and
//! for timestamp seeks.

use std::io::{self, Read, Seek, SeekFrom};

/// Byte source with an exact position counter
pub struct LogCursor<R> {
    inner: R,
    pos: u64,
}

impl<R: Read + Seek> LogCursor<R> {
    pub fn new(mut inner: R) -> io::Result<Self> {
        let pos = inner.stream_position()?;
        Ok(Self { inner, pos })
    }

    /// Absolute byte offset of the next read
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Reposition to an absolute byte offset
    pub fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(offset))?;
        self.pos = offset;
        Ok(())
    }

    /// Read exactly `buf.len()` bytes or fail
    pub fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.inner.read_exact(buf)?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    /// Read exactly `buf.len()` bytes, distinguishing a clean end-of-stream
    /// (zero bytes available, returns `Ok(false)`) from a truncated read
    /// (some bytes available, fails with `UnexpectedEof`).
    pub fn read_exact_or_eof(&mut self, buf: &mut [u8]) -> io::Result<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => {
                    self.pos += filled as u64;
                    if filled == 0 {
                        return Ok(false);
                    }
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "stream truncated mid-read",
                    ));
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.pos += filled as u64;
                    return Err(e);
                }
            }
        }
        self.pos += filled as u64;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_position_tracking() {
        let mut cursor = LogCursor::new(Cursor::new(vec![1u8, 2, 3, 4, 5])).unwrap();
        assert_eq!(cursor.position(), 0);

        let mut buf = [0u8; 2];
        cursor.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [1, 2]);
        assert_eq!(cursor.position(), 2);

        cursor.seek_to(4).unwrap();
        assert_eq!(cursor.position(), 4);
        cursor.read_exact(&mut buf[..1]).unwrap();
        assert_eq!(buf[0], 5);
        assert_eq!(cursor.position(), 5);
    }

    #[test]
    fn test_clean_eof_vs_truncation() {
        let mut cursor = LogCursor::new(Cursor::new(vec![9u8])).unwrap();

        let mut one = [0u8; 1];
        assert!(cursor.read_exact_or_eof(&mut one).unwrap());
        assert_eq!(one[0], 9);

        // At the end: zero bytes available is a clean EOF
        assert!(!cursor.read_exact_or_eof(&mut one).unwrap());

        // One byte available when two are needed is a truncation
        cursor.seek_to(0).unwrap();
        let mut two = [0u8; 2];
        let err = cursor.read_exact_or_eof(&mut two).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }
}
