//! Cheap content measurement for listing: parse only the header, then find
//! the trailer by seeking when the source allows it, or by sliding through
//! the remaining bytes when it does not.

use std::io::{Read, SeekFrom};

use crate::header::{read_header, Method};
use crate::input::{InputBuffer, InputSource};
use crate::InflateError;
use parz_format::Format;

/// What a listing line is built from. `check` is absent where the stream
/// does not record one usefully (LZW, and zip before its descriptor has
/// been seen). `ulen` is 0 where the format does not store it (zlib, LZW).
#[derive(Debug, Clone)]
pub struct ListEntry {
    pub method: Method,
    pub format: Format,
    pub check: Option<u32>,
    pub stamp: i64,
    pub name: Option<String>,
    pub clen: u64,
    pub ulen: u64,
}

/// Read just enough of the stream at `input` to produce one listing entry.
/// The buffer is left in an undefined position afterwards.
pub fn list_measure<R: InputSource>(
    input: &mut InputBuffer<R>,
) -> Result<ListEntry, InflateError> {
    let (method, format, meta) = read_header(input, true)?;

    // zip: the local header already told us everything
    if format.is_zip() {
        return Ok(ListEntry {
            method,
            format,
            check: if format == Format::ZipDesc {
                None
            } else {
                Some(meta.zip_crc)
            },
            stamp: meta.stamp,
            name: meta.name,
            clen: u64::from(meta.zip_clen),
            ulen: u64::from(meta.zip_ulen),
        });
    }

    // zlib: the trailer is the last 4 bytes, big-endian; the format does
    // not record an uncompressed length
    if format == Format::Zlib {
        let check;
        let total;
        match input.reader_mut().try_seek(SeekFrom::End(0)) {
            Some(size) => {
                total = size;
                let _ = input.reader_mut().try_seek(SeekFrom::End(-4));
                let mut tail = [0u8; 4];
                input.reader_mut().read_exact(&mut tail)?;
                input.invalidate();
                check = u32::from_be_bytes(tail);
            }
            None => {
                // Sliding scan: fold the last bytes of each window until end
                // of input. Only meaningful when the input is a single zlib
                // stream with no trailing bytes, since stream-final bytes
                // cannot be told apart from arbitrary data here.
                let mut acc: u64 = 0;
                loop {
                    let window = input.window();
                    for &byte in window.iter().skip(window.len().saturating_sub(4)) {
                        acc = acc << 8 | u64::from(byte);
                    }
                    let len = window.len();
                    input.consume(len);
                    if input.load()? == 0 {
                        break;
                    }
                }
                total = input.total();
                check = (acc & 0xffff_ffff) as u32;
            }
        }
        return Ok(ListEntry {
            method,
            format,
            check: Some(check),
            stamp: meta.stamp,
            name: meta.name,
            clen: total.saturating_sub(6),
            ulen: 0,
        });
    }

    // lzw: no trailer at all; only the compressed size is knowable
    if method == Method::Lzw {
        let total = match input.reader_mut().try_seek(SeekFrom::End(0)) {
            Some(size) => {
                input.invalidate();
                size
            }
            None => {
                loop {
                    let len = input.left();
                    input.consume(len);
                    if input.load()? == 0 {
                        break;
                    }
                }
                input.total()
            }
        };
        return Ok(ListEntry {
            method,
            format,
            check: None,
            stamp: meta.stamp,
            name: meta.name,
            clen: total.saturating_sub(3),
            ulen: 0,
        });
    }

    // gzip: 8-byte trailer with CRC and length mod 2^32
    let header_size = input.consumed_total();
    let mut tail = [0u8; 8];
    let clen;
    if input.fully_buffered() {
        // the whole rest of the file is already in the buffer
        if input.left() < 8 {
            return Err(InflateError::CorruptTrailer {
                stream: "gzip",
                what: "not a valid gzip file",
            });
        }
        let window = input.window();
        clen = (window.len() - 8) as u64;
        tail.copy_from_slice(&window[window.len() - 8..]);
    } else if let Some(at) = input.reader_mut().try_seek(SeekFrom::End(-8)) {
        clen = at.saturating_sub(header_size);
        input.reader_mut().read_exact(&mut tail)?;
        input.invalidate();
    } else {
        // not seekable: slide to the end keeping the final 8 bytes
        let mut kept;
        loop {
            let window = input.window();
            kept = window.len().min(8);
            tail[..kept].copy_from_slice(&window[window.len() - kept..]);
            let len = window.len();
            input.consume(len);
            let got = input.load()?;
            if got < crate::input::BUF {
                // stitch the final partial window onto what was kept
                let left = input.left();
                if kept + left < 8 {
                    return Err(InflateError::CorruptTrailer {
                        stream: "gzip",
                        what: "not a valid gzip file",
                    });
                }
                if left < 8 {
                    if left > 0 {
                        tail.copy_within(kept - (8 - left)..kept, 0);
                        tail[8 - left..].copy_from_slice(input.window());
                    }
                } else {
                    let window = input.window();
                    tail.copy_from_slice(&window[window.len() - 8..]);
                }
                let len = input.left();
                input.consume(len);
                break;
            }
        }
        clen = input.total().saturating_sub(header_size + 8);
    }
    if clen < 2 {
        return Err(InflateError::CorruptTrailer {
            stream: "gzip",
            what: "not a valid gzip file",
        });
    }

    let check = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
    let ulen = u32::from_le_bytes([tail[4], tail[5], tail[6], tail[7]]);
    Ok(ListEntry {
        method,
        format,
        check: Some(check),
        stamp: meta.stamp,
        name: meta.name,
        clen,
        ulen: u64::from(ulen),
    })
}
