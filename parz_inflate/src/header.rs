//! Stream-type detection and header parsing for gzip, zlib, zip, and the
//! legacy compress (LZW) magic, including the zip extra-field walk that can
//! upgrade lengths to Zip64 values and recover Unix mod times.

use crate::input::InputBuffer;
use crate::InflateError;
use parz_format::{dos2time, Format};
use std::io::Read;

pub const LOW32: u32 = 0xffff_ffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Deflate,
    Lzw,
    Other(u16),
}

/// Everything a header can tell us, for restoration and listing. The zip
/// fields hold whatever the local header promised; lengths are modulo 2^32
/// (a Zip64 extra field only replaces their low words).
#[derive(Debug, Clone, Default)]
pub struct HeaderMeta {
    pub stamp: i64,
    pub name: Option<String>,
    pub zip_crc: u32,
    pub zip_clen: u32,
    pub zip_ulen: u32,
}

fn tolong(val: u32) -> i64 {
    i64::from(val as i32)
}

macro_rules! need {
    ($e:expr) => {
        match $e? {
            Some(v) => v,
            None => return Err(InflateError::TruncatedHeader),
        }
    };
}

/// Process a zip extra field, extracting Zip64 lengths and Unix mod times.
fn read_extra<R: Read>(
    input: &mut InputBuffer<R>,
    mut len: u32,
    save: bool,
    meta: &mut HeaderMeta,
) -> Result<(), InflateError> {
    while len >= 4 {
        let id = need!(input.get2());
        let mut size = need!(input.get2());
        len -= 4;
        if size > len {
            break;
        }
        len -= size;
        if id == 0x0001 {
            // Zip64 extended information
            if meta.zip_ulen == LOW32 && size >= 8 {
                meta.zip_ulen = need!(input.get4());
                input.skip(4)?;
                size -= 8;
            }
            if meta.zip_clen == LOW32 && size >= 8 {
                meta.zip_clen = need!(input.get4());
                input.skip(4)?;
                size -= 8;
            }
        }
        if save {
            if (id == 0x000d || id == 0x5855) && size >= 8 {
                // PKWare Unix or Info-ZIP type 1 Unix block
                input.skip(4)?;
                meta.stamp = tolong(need!(input.get4()));
                size -= 8;
            }
            if id == 0x5455 && size >= 5 {
                // extended timestamp block
                size -= 1;
                if need!(input.get()) & 1 != 0 {
                    meta.stamp = tolong(need!(input.get4()));
                    size -= 4;
                }
            }
        }
        input.skip(u64::from(size))?;
    }
    input.skip(u64::from(len))?;
    Ok(())
}

/// Read a gzip, zlib, zip, or lzw header and extract what it stores.
/// `save` controls whether the name and time stamp are kept (they are not
/// for second and later members of a concatenated stream).
///
/// Errors: `Eof` for a clean end of input before any magic byte,
/// `NotCompressed` for an unrecognized magic, `TruncatedHeader` for end of
/// input inside the header, `InvalidHeaderFlags` for reserved flag bits.
pub fn read_header<R: Read>(
    input: &mut InputBuffer<R>,
    save: bool,
) -> Result<(Method, Format, HeaderMeta), InflateError> {
    let mut meta = HeaderMeta::default();

    let Some(first) = input.get()? else {
        return Err(InflateError::Eof);
    };
    let Some(second) = input.get()? else {
        return Err(InflateError::NotCompressed);
    };
    let magic = u32::from(first) << 8 | u32::from(second);

    if magic % 31 == 0 {
        // zlib: the 16-bit header value is a multiple of 31; the method is
        // the low nibble of CMF
        let method = match first & 0xf {
            8 => Method::Deflate,
            m => Method::Other(u16::from(m)),
        };
        return Ok((method, Format::Zlib, meta));
    }

    if magic == 0x1f9d {
        return Ok((Method::Lzw, Format::Gzip, meta));
    }

    if magic == 0x504b {
        // zip local header
        if need!(input.get()) != 3 || need!(input.get()) != 4 {
            return Err(InflateError::TruncatedHeader);
        }
        input.skip(2)?; // version needed to extract
        let flags = need!(input.get2());
        if flags & 0xfff0 != 0 {
            return Err(InflateError::InvalidHeaderFlags);
        }
        let mut method = need!(input.get2());
        if flags & 1 != 0 {
            method = 255; // encrypted: treat the method as unknown
        }
        let dos = need!(input.get4());
        if save {
            meta.stamp = dos2time(dos);
        }
        meta.zip_crc = need!(input.get4());
        meta.zip_clen = need!(input.get4());
        meta.zip_ulen = need!(input.get4());
        let fname = need!(input.get2());
        let extra = need!(input.get2());
        if save {
            let mut raw = Vec::with_capacity(fname as usize);
            for _ in 0..fname {
                raw.push(need!(input.get()));
            }
            meta.name = Some(String::from_utf8_lossy(&raw).into_owned());
        } else if !input.skip(u64::from(fname))? {
            return Err(InflateError::TruncatedHeader);
        }
        read_extra(input, extra, save, &mut meta)?;
        let format = if flags & 8 != 0 {
            Format::ZipDesc
        } else {
            Format::Zip
        };
        let method = match method {
            8 => Method::Deflate,
            m => Method::Other(m as u16),
        };
        return Ok((method, format, meta));
    }

    if magic != 0x1f8b {
        return Err(InflateError::NotCompressed);
    }

    // gzip
    let method = need!(input.get());
    let flags = need!(input.get());
    if flags & 0xe0 != 0 {
        return Err(InflateError::InvalidHeaderFlags);
    }

    let stamp = need!(input.get4());
    if save {
        meta.stamp = tolong(stamp);
    }
    input.skip(2)?; // extra flags and OS

    if flags & 4 != 0 {
        let extra = need!(input.get2());
        if !input.skip(u64::from(extra))? {
            return Err(InflateError::TruncatedHeader);
        }
    }

    if flags & 8 != 0 {
        if save {
            let mut raw = Vec::with_capacity(128);
            loop {
                match need!(input.get()) {
                    0 => break,
                    byte => raw.push(byte),
                }
            }
            meta.name = Some(String::from_utf8_lossy(&raw).into_owned());
        } else {
            while need!(input.get()) != 0 {}
        }
    }

    if flags & 16 != 0 {
        while need!(input.get()) != 0 {}
    }

    if flags & 2 != 0 {
        input.skip(2)?;
    }

    let method = match method {
        8 => Method::Deflate,
        m => Method::Other(u16::from(m)),
    };
    Ok((method, Format::Gzip, meta))
}
