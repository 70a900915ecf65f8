//! Buffered input for decompression and listing: 32-KiB loads with byte,
//! integer, and skip primitives, plus a window/consume interface for feeding
//! the inflate engine directly from the buffer.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

/// Input buffer size; also the inflate output window size.
pub const BUF: usize = 32 * 1024;

/// A readable source that may additionally support seeking. Listing uses
/// `try_seek` to find trailers cheaply and falls back to sliding reads when
/// the source is a pipe.
pub trait InputSource: Read {
    fn try_seek(&mut self, pos: SeekFrom) -> Option<u64> {
        let _ = pos;
        None
    }
}

impl InputSource for File {
    fn try_seek(&mut self, pos: SeekFrom) -> Option<u64> {
        self.seek(pos).ok()
    }
}

impl InputSource for io::Stdin {}

impl InputSource for io::StdinLock<'_> {}

impl<T: AsRef<[u8]>> InputSource for io::Cursor<T> {
    fn try_seek(&mut self, pos: SeekFrom) -> Option<u64> {
        self.seek(pos).ok()
    }
}

impl InputSource for &[u8] {}

impl InputSource for Box<dyn Read> {}

pub struct InputBuffer<R> {
    reader: R,
    buf: Vec<u8>,
    next: usize,
    left: usize,
    eof: bool,
    /// The most recent load did not fill the buffer, so the reader is at
    /// end of file and everything left is already here.
    short: bool,
    total: u64,
}

impl<R: Read> InputBuffer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: vec![0; BUF],
            next: 0,
            left: 0,
            eof: false,
            short: false,
            total: 0,
        }
    }

    /// Refill the buffer, discarding anything unconsumed. Returns the number
    /// of bytes now available; 0 means end of input.
    pub fn load(&mut self) -> io::Result<usize> {
        if self.eof {
            self.left = 0;
            return Ok(0);
        }
        let mut got = 0;
        while got < self.buf.len() {
            let n = self.reader.read(&mut self.buf[got..])?;
            if n == 0 {
                break;
            }
            got += n;
        }
        self.next = 0;
        self.left = got;
        self.total += got as u64;
        self.short = got < self.buf.len();
        if got == 0 {
            self.eof = true;
        }
        Ok(got)
    }

    pub fn get(&mut self) -> io::Result<Option<u8>> {
        if self.left == 0 && self.load()? == 0 {
            return Ok(None);
        }
        let byte = self.buf[self.next];
        self.next += 1;
        self.left -= 1;
        Ok(Some(byte))
    }

    pub fn get2(&mut self) -> io::Result<Option<u32>> {
        let Some(lo) = self.get()? else { return Ok(None) };
        let Some(hi) = self.get()? else { return Ok(None) };
        Ok(Some(u32::from(lo) | u32::from(hi) << 8))
    }

    pub fn get4(&mut self) -> io::Result<Option<u32>> {
        let Some(lo) = self.get2()? else { return Ok(None) };
        let Some(hi) = self.get2()? else { return Ok(None) };
        Ok(Some(lo | hi << 16))
    }

    /// Skip `dist` bytes; false when input ended first.
    pub fn skip(&mut self, mut dist: u64) -> io::Result<bool> {
        while dist > self.left as u64 {
            dist -= self.left as u64;
            self.left = 0;
            if self.load()? == 0 {
                return Ok(false);
            }
        }
        self.next += dist as usize;
        self.left -= dist as usize;
        Ok(true)
    }

    /// The unconsumed bytes currently buffered.
    pub fn window(&self) -> &[u8] {
        &self.buf[self.next..self.next + self.left]
    }

    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.left);
        self.next += n;
        self.left -= n;
    }

    pub fn left(&self) -> usize {
        self.left
    }

    pub fn eof(&self) -> bool {
        self.eof
    }

    /// The most recent load hit end of file before filling the buffer.
    pub fn fully_buffered(&self) -> bool {
        self.short
    }

    /// Total bytes loaded from the underlying reader so far.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Bytes handed out so far: loaded minus still buffered.
    pub fn consumed_total(&self) -> u64 {
        self.total - self.left as u64
    }

    /// Direct access for listing's seek-to-trailer shortcut; the buffer no
    /// longer reflects the reader position afterwards, so pair with
    /// `invalidate`.
    pub fn reader_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn invalidate(&mut self) {
        self.next = 0;
        self.left = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn get_primitives_are_little_endian() {
        let mut input = InputBuffer::new(Cursor::new(vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06]));
        assert_eq!(input.get().expect("read should succeed"), Some(0x01));
        assert_eq!(input.get2().expect("read should succeed"), Some(0x0302));
        assert_eq!(
            input.get4().expect("read should succeed"),
            None,
            "only three bytes remain"
        );
    }

    #[test]
    fn skip_crosses_buffer_boundaries() {
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let mut input = InputBuffer::new(Cursor::new(data.clone()));
        assert!(input.skip(70_000).expect("skip should succeed"));
        assert_eq!(input.get().expect("read should succeed"), Some(data[70_000]));
        assert!(!input.skip(1_000_000).expect("skip should succeed"));
        assert!(input.eof());
    }

    #[test]
    fn short_load_marks_fully_buffered() {
        let mut input = InputBuffer::new(Cursor::new(vec![7u8; 100]));
        assert_eq!(input.load().expect("load should succeed"), 100);
        assert!(input.fully_buffered());
        assert_eq!(input.total(), 100);
        assert_eq!(input.consumed_total(), 0);
    }
}
