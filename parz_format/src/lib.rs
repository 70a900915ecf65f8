//! Wire framing for the three DEFLATE containers: gzip (RFC 1952), zlib
//! (RFC 1950), and single-entry PKWare zip. The write side lives here; the
//! read side (header detection and parsing) lives with the decoder, which
//! owns the buffered input it needs.

use std::io::{self, Write};

use chrono::{Datelike, Local, LocalResult, TimeZone, Timelike};
use parz_check::CheckAlgo;

pub const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
pub const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
pub const EOCD_SIG: u32 = 0x0605_4b50;
pub const DESCRIPTOR_SIG: u32 = 0x0807_4b50;

pub const METHOD_DEFLATE: u16 = 8;
pub const DEFAULT_LEVEL: u32 = 6;

/// Extended-timestamp extra field: tag + length + flags + 4-byte mod time.
const UT_EXTRA_LEN: u16 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Gzip,
    Zlib,
    /// Zip entry whose sizes and crc are stated in the local header.
    Zip,
    /// Zip entry followed by a data descriptor; this is the only form the
    /// compressor emits, since sizes are unknown when the header is written.
    ZipDesc,
}

impl Format {
    pub fn check_algo(self) -> CheckAlgo {
        match self {
            Format::Zlib => CheckAlgo::Adler32,
            _ => CheckAlgo::Crc32,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            Format::Gzip => ".gz",
            Format::Zlib => ".zz",
            Format::Zip | Format::ZipDesc => ".zip",
        }
    }

    pub fn is_zip(self) -> bool {
        matches!(self, Format::Zip | Format::ZipDesc)
    }
}

/// Metadata stored in (or restored from) a stream header. Either field may
/// be suppressed by configuration; `mtime == 0` means "no time stamp".
#[derive(Debug, Clone, Default)]
pub struct HeaderInfo {
    pub name: Option<String>,
    pub mtime: i64,
}

fn put2(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put4(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn zip_name(info: &HeaderInfo) -> &[u8] {
    // zip requires a non-empty name; stdin becomes "-"
    match &info.name {
        Some(name) if !name.is_empty() => name.as_bytes(),
        _ => b"-",
    }
}

fn put_ut_extra(out: &mut Vec<u8>, mtime: i64) {
    put2(out, 0x5455);
    put2(out, 5);
    out.push(1); // mod time present
    put4(out, mtime as u32);
}

/// Write the stream header, returning its length in bytes.
pub fn write_header<W: Write>(
    writer: &mut W,
    format: Format,
    level: u32,
    info: &HeaderInfo,
) -> io::Result<u64> {
    let mut head = Vec::with_capacity(64);
    match format {
        Format::Zip | Format::ZipDesc => {
            let name = zip_name(info);
            put4(&mut head, LOCAL_HEADER_SIG);
            put2(&mut head, 20); // version needed to extract (2.0)
            put2(&mut head, 8); // flags: data descriptor follows
            put2(&mut head, METHOD_DEFLATE);
            put4(&mut head, time2dos(info.mtime));
            put4(&mut head, 0); // crc in descriptor
            put4(&mut head, 0); // compressed length in descriptor
            put4(&mut head, 0); // uncompressed length in descriptor
            put2(&mut head, name.len() as u16);
            put2(&mut head, UT_EXTRA_LEN);
            head.extend_from_slice(name);
            put_ut_extra(&mut head, info.mtime);
        }
        Format::Zlib => {
            let cmf = 0x78u8; // deflate, 32K window
            let tier: u8 = match level {
                9 => 3,
                1 => 0,
                n if n >= 6 => 1,
                _ => 2,
            };
            let mut flg = tier << 6;
            flg += 31 - ((u16::from(cmf) << 8 | u16::from(flg)) % 31) as u8;
            head.push(cmf);
            head.push(flg);
        }
        Format::Gzip => {
            head.push(31);
            head.push(139);
            head.push(8); // deflate
            head.push(if info.name.is_some() { 8 } else { 0 });
            put4(&mut head, info.mtime as u32);
            head.push(match level {
                9 => 2,
                1 => 4,
                _ => 0,
            });
            head.push(3); // unix
            if let Some(name) = &info.name {
                head.extend_from_slice(name.as_bytes());
                head.push(0);
            }
        }
    }
    writer.write_all(&head)?;
    Ok(head.len() as u64)
}

/// Write the stream trailer. `head_len` is needed by the zip end-of-central-
/// directory record to state where the central directory starts.
pub fn write_trailer<W: Write>(
    writer: &mut W,
    format: Format,
    ulen: u64,
    clen: u64,
    check: u32,
    head_len: u64,
    info: &HeaderInfo,
) -> io::Result<()> {
    let mut tail = Vec::with_capacity(128);
    match format {
        Format::Zip | Format::ZipDesc => {
            let name = zip_name(info);

            // data descriptor, as promised in the local header
            put4(&mut tail, check);
            put4(&mut tail, clen as u32);
            put4(&mut tail, ulen as u32);

            // central file header
            let central_start = tail.len();
            put4(&mut tail, CENTRAL_HEADER_SIG);
            tail.push(63); // version made by: 6.3 of the zip spec
            tail.push(255); // ignore external attributes
            put2(&mut tail, 20); // version needed to extract (2.0)
            put2(&mut tail, 8); // data descriptor is present
            put2(&mut tail, METHOD_DEFLATE);
            put4(&mut tail, time2dos(info.mtime));
            put4(&mut tail, check);
            put4(&mut tail, clen as u32);
            put4(&mut tail, ulen as u32);
            put2(&mut tail, name.len() as u16);
            put2(&mut tail, UT_EXTRA_LEN);
            put2(&mut tail, 0); // no file comment
            put2(&mut tail, 0); // disk number 0
            put2(&mut tail, 0); // internal file attributes
            put4(&mut tail, 0); // external file attributes
            put4(&mut tail, 0); // offset of local header
            tail.extend_from_slice(name);
            put_ut_extra(&mut tail, info.mtime);
            let central_len = (tail.len() - central_start) as u32;

            // end of central directory
            put4(&mut tail, EOCD_SIG);
            put2(&mut tail, 0); // this disk
            put2(&mut tail, 0); // disk with central directory
            put2(&mut tail, 1); // entries on this disk
            put2(&mut tail, 1); // total entries
            put4(&mut tail, central_len);
            put4(&mut tail, (head_len + clen + 12) as u32); // central offset
            put2(&mut tail, 0); // no zip comment
        }
        Format::Zlib => {
            tail.extend_from_slice(&check.to_be_bytes());
        }
        Format::Gzip => {
            put4(&mut tail, check);
            put4(&mut tail, ulen as u32);
        }
    }
    writer.write_all(&tail)
}

/// Unix time to MS-DOS date and time in the local zone. Years outside
/// [1980, 2107] yield 0, the zip convention for "no time".
pub fn time2dos(t: i64) -> u32 {
    let t = if t == 0 { Local::now().timestamp() } else { t };
    let tm = match Local.timestamp_opt(t, 0) {
        LocalResult::Single(tm) | LocalResult::Ambiguous(tm, _) => tm,
        LocalResult::None => return 0,
    };
    let year = tm.year();
    if !(1980..=2107).contains(&year) {
        return 0;
    }
    ((year - 1980) as u32) << 25
        | tm.month() << 21
        | tm.day() << 16
        | tm.hour() << 11
        | tm.minute() << 5
        | (tm.second() + 1) >> 1 // round to double-seconds
}

/// MS-DOS date and time to Unix time, assuming the local zone. A zero DOS
/// time means "now"; an unrepresentable field combination yields 0.
pub fn dos2time(dos: u32) -> i64 {
    if dos == 0 {
        return Local::now().timestamp();
    }
    let date = chrono::NaiveDate::from_ymd_opt(
        ((dos >> 25) & 0x7f) as i32 + 1980,
        (dos >> 21) & 0xf,
        (dos >> 16) & 0x1f,
    );
    let time = date.and_then(|d| {
        d.and_hms_opt((dos >> 11) & 0x1f, (dos >> 5) & 0x3f, (dos << 1) & 0x3e)
    });
    match time {
        Some(naive) => match Local.from_local_datetime(&naive) {
            LocalResult::Single(tm) | LocalResult::Ambiguous(tm, _) => tm.timestamp(),
            LocalResult::None => 0,
        },
        None => 0,
    }
}

/// Length of a recognized compressed-file suffix at the end of `name`, or 0.
pub fn compressed_suffix(name: &str) -> usize {
    for sfx in [".zip", ".ZIP"] {
        if name.len() > 4 && name.ends_with(sfx) {
            return 4;
        }
    }
    for sfx in [".gz", "-gz", ".zz", "-zz"] {
        if name.len() > 3 && name.ends_with(sfx) {
            return 3;
        }
    }
    for sfx in [".z", "-z", "_z", ".Z"] {
        if name.len() > 2 && name.ends_with(sfx) {
            return 2;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_header_without_name_is_ten_bytes() {
        let mut out = Vec::new();
        let info = HeaderInfo::default();
        let len = write_header(&mut out, Format::Gzip, DEFAULT_LEVEL, &info)
            .expect("header write should succeed");
        assert_eq!(len, 10);
        assert_eq!(
            out,
            [0x1f, 0x8b, 8, 0, 0, 0, 0, 0, 0, 3],
            "magic, deflate, no flags, zero mtime, default xfl, unix os"
        );
    }

    #[test]
    fn gzip_header_stores_name_and_level_hints() {
        let mut out = Vec::new();
        let info = HeaderInfo {
            name: Some("data.bin".to_string()),
            mtime: 0x0102_0304,
        };
        write_header(&mut out, Format::Gzip, 9, &info).expect("header write should succeed");
        assert_eq!(out[3], 8, "FNAME flag");
        assert_eq!(&out[4..8], &[0x04, 0x03, 0x02, 0x01], "little-endian mtime");
        assert_eq!(out[8], 2, "XFL for level 9");
        assert_eq!(&out[10..], b"data.bin\0");

        let mut fast = Vec::new();
        write_header(&mut fast, Format::Gzip, 1, &HeaderInfo::default())
            .expect("header write should succeed");
        assert_eq!(fast[8], 4, "XFL for level 1");
    }

    #[test]
    fn zlib_header_has_mod31_parity() {
        for level in 0..=9 {
            let mut out = Vec::new();
            write_header(&mut out, Format::Zlib, level, &HeaderInfo::default())
                .expect("header write should succeed");
            assert_eq!(out.len(), 2);
            assert_eq!(out[0], 0x78);
            let value = u16::from(out[0]) << 8 | u16::from(out[1]);
            assert_eq!(value % 31, 0, "level {level} parity");
        }
    }

    #[test]
    fn zlib_level_tiers() {
        let flg = |level| {
            let mut out = Vec::new();
            write_header(&mut out, Format::Zlib, level, &HeaderInfo::default())
                .expect("header write should succeed");
            out[1] >> 6
        };
        assert_eq!(flg(9), 3);
        assert_eq!(flg(1), 0);
        assert_eq!(flg(6), 1);
        assert_eq!(flg(7), 1);
        assert_eq!(flg(4), 2);
    }

    #[test]
    fn zip_header_layout() {
        let mut out = Vec::new();
        let info = HeaderInfo {
            name: Some("entry.txt".to_string()),
            mtime: 0,
        };
        let len = write_header(&mut out, Format::ZipDesc, DEFAULT_LEVEL, &info)
            .expect("header write should succeed");
        assert_eq!(len as usize, 30 + 9 + 9);
        assert_eq!(&out[0..4], &LOCAL_HEADER_SIG.to_le_bytes());
        assert_eq!(u16::from_le_bytes([out[6], out[7]]), 8, "descriptor flag");
        assert_eq!(u16::from_le_bytes([out[8], out[9]]), METHOD_DEFLATE);
        assert_eq!(&out[14..26], &[0; 12], "crc and lengths deferred");
        assert_eq!(u16::from_le_bytes([out[26], out[27]]), 9, "name length");
        assert_eq!(u16::from_le_bytes([out[28], out[29]]), 9, "extra length");
        assert_eq!(&out[30..39], b"entry.txt");
        assert_eq!(u16::from_le_bytes([out[39], out[40]]), 0x5455);
    }

    #[test]
    fn zip_header_uses_dash_for_missing_name() {
        let mut out = Vec::new();
        write_header(&mut out, Format::ZipDesc, DEFAULT_LEVEL, &HeaderInfo::default())
            .expect("header write should succeed");
        assert_eq!(out[30], b'-');
    }

    #[test]
    fn gzip_trailer_is_check_then_length() {
        let mut out = Vec::new();
        write_trailer(
            &mut out,
            Format::Gzip,
            0x1_0000_0003, // mod 2^32 applies
            99,
            0xaabb_ccdd,
            10,
            &HeaderInfo::default(),
        )
        .expect("trailer write should succeed");
        assert_eq!(out, [0xdd, 0xcc, 0xbb, 0xaa, 3, 0, 0, 0]);
    }

    #[test]
    fn zlib_trailer_is_big_endian() {
        let mut out = Vec::new();
        write_trailer(&mut out, Format::Zlib, 12, 10, 0x1e72_0467, 2, &HeaderInfo::default())
            .expect("trailer write should succeed");
        assert_eq!(out, [0x1e, 0x72, 0x04, 0x67]);
    }

    #[test]
    fn zip_trailer_descriptor_and_eocd_offsets() {
        let mut out = Vec::new();
        let info = HeaderInfo {
            name: Some("x".to_string()),
            mtime: 0,
        };
        let head_len = 30 + 1 + 9;
        write_trailer(&mut out, Format::ZipDesc, 500, 120, 0x0102_0304, head_len, &info)
            .expect("trailer write should succeed");

        // descriptor
        assert_eq!(&out[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(u32::from_le_bytes(out[4..8].try_into().unwrap()), 120);
        assert_eq!(u32::from_le_bytes(out[8..12].try_into().unwrap()), 500);

        // central header follows immediately
        assert_eq!(&out[12..16], &CENTRAL_HEADER_SIG.to_le_bytes());
        assert_eq!(out[16], 63);
        assert_eq!(out[17], 255);

        // EOCD: one entry, central size 46 + 1 + 9, offset head + clen + 12
        let eocd = out.len() - 22;
        assert_eq!(&out[eocd..eocd + 4], &EOCD_SIG.to_le_bytes());
        assert_eq!(
            u32::from_le_bytes(out[eocd + 12..eocd + 16].try_into().unwrap()),
            46 + 1 + 9
        );
        assert_eq!(
            u32::from_le_bytes(out[eocd + 16..eocd + 20].try_into().unwrap()),
            (head_len + 120 + 12) as u32
        );
    }

    #[test]
    fn dos_time_round_trips_fields() {
        // 2001-02-03 04:05:06 local
        let naive = chrono::NaiveDate::from_ymd_opt(2001, 2, 3)
            .unwrap()
            .and_hms_opt(4, 5, 6)
            .unwrap();
        let unix = match Local.from_local_datetime(&naive) {
            LocalResult::Single(tm) | LocalResult::Ambiguous(tm, _) => tm.timestamp(),
            LocalResult::None => panic!("test date should exist"),
        };
        let dos = time2dos(unix);
        assert_eq!(dos >> 25, 21); // 2001 - 1980
        assert_eq!((dos >> 21) & 0xf, 2);
        assert_eq!((dos >> 16) & 0x1f, 3);
        assert_eq!((dos >> 11) & 0x1f, 4);
        assert_eq!((dos >> 5) & 0x3f, 5);
        assert_eq!((dos << 1) & 0x3e, 6, "double-second rounding");

        let back = dos2time(dos);
        assert_eq!(back, unix);
    }

    #[test]
    fn dos_time_rejects_out_of_range_years() {
        // 1979 is before the DOS epoch
        let naive = chrono::NaiveDate::from_ymd_opt(1979, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        if let LocalResult::Single(tm) = Local.from_local_datetime(&naive) {
            assert_eq!(time2dos(tm.timestamp()), 0);
        }
    }

    #[test]
    fn known_suffixes_are_recognized() {
        assert_eq!(compressed_suffix("a.gz"), 3);
        assert_eq!(compressed_suffix("a-gz"), 3);
        assert_eq!(compressed_suffix("a.zz"), 3);
        assert_eq!(compressed_suffix("a.zip"), 4);
        assert_eq!(compressed_suffix("a.ZIP"), 4);
        assert_eq!(compressed_suffix("a.z"), 2);
        assert_eq!(compressed_suffix("a_z"), 2);
        assert_eq!(compressed_suffix("a.Z"), 2);
        assert_eq!(compressed_suffix("archive.tar"), 0);
        // the suffix must not be the whole name
        assert_eq!(compressed_suffix(".gz"), 0);
    }

    #[test]
    fn format_check_algorithms() {
        use parz_check::CheckAlgo;
        assert_eq!(Format::Gzip.check_algo(), CheckAlgo::Crc32);
        assert_eq!(Format::ZipDesc.check_algo(), CheckAlgo::Crc32);
        assert_eq!(Format::Zlib.check_algo(), CheckAlgo::Adler32);
    }
}
