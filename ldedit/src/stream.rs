//! Byte cursor over a seekable stream, shared by both dialect parsers.

use std::io::{self, Read, Seek, SeekFrom};

use crate::error::Result;

/// Single-byte reader with one byte of pushback. `position` accounts for
/// the pushback byte, so callers always see the position of the next byte
/// they will read.
pub struct RecordStream<R> {
    inner: R,
    pushback: Option<u8>,
}

impl<R: Read + Seek> RecordStream<R> {
    pub fn new(inner: R) -> RecordStream<R> {
        RecordStream {
            inner,
            pushback: None,
        }
    }

    /// Next byte, or `None` at end of stream.
    pub fn read_byte(&mut self) -> Result<Option<u8>> {
        if let Some(b) = self.pushback.take() {
            return Ok(Some(b));
        }
        let mut buf = [0u8; 1];
        match self.inner.read(&mut buf)? {
            0 => Ok(None),
            _ => Ok(Some(buf[0])),
        }
    }

    /// Push one byte back; at most one may be outstanding.
    pub fn unread(&mut self, b: u8) {
        debug_assert!(self.pushback.is_none(), "double pushback");
        self.pushback = Some(b);
    }

    pub fn position(&mut self) -> Result<u64> {
        let pos = self.inner.stream_position()?;
        Ok(if self.pushback.is_some() { pos - 1 } else { pos })
    }

    pub fn seek_to(&mut self, pos: u64) -> Result<()> {
        self.pushback = None;
        self.inner.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    /// Raw read, bypassing the pushback machinery (and discarding any
    /// pushback byte).
    pub fn read_raw(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.pushback = None;
        self.inner.read(buf)
    }

    /// Fill `buf` completely or fail with `UnexpectedEof`.
    pub fn fill_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let mut offset = 0;
        if let Some(b) = self.pushback.take() {
            buf[0] = b;
            offset = 1;
        }
        self.inner.read_exact(&mut buf[offset..])
    }

    /// True when no byte remains. Peeks ahead without consuming.
    pub fn at_end(&mut self) -> Result<bool> {
        if self.pushback.is_some() {
            return Ok(false);
        }
        let mut buf = [0u8; 1];
        match self.inner.read(&mut buf)? {
            0 => Ok(true),
            _ => {
                self.pushback = Some(buf[0]);
                Ok(false)
            }
        }
    }
}
