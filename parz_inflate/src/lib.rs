//! Streaming decompression, testing, and listing of gzip, zlib, zip, and
//! legacy compress (LZW) input. Inflation runs off a buffered input window;
//! the check over the produced bytes can be folded on a second thread while
//! the main thread writes. Concatenated gzip or zlib members are decoded in
//! sequence; zip decoding stops after its single entry.

use std::io::{Read, Write};
use std::thread;

use flate2::{Decompress, FlushDecompress, Status};
use thiserror::Error;
use tracing::{debug, trace};

use parz_check::CheckAlgo;
use parz_format::Format;

mod header;
mod input;
mod list;
mod lzw;

pub use header::{read_header, HeaderMeta, Method, LOW32};
pub use input::{InputBuffer, InputSource, BUF};
pub use list::{list_measure, ListEntry};
pub use lzw::lzw_decode;

#[derive(Debug, Error)]
pub enum InflateError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// Clean end of input before any header byte; ends a member loop.
    #[error("end of input")]
    Eof,
    #[error("not a compressed file")]
    NotCompressed,
    #[error("premature end of header")]
    TruncatedHeader,
    #[error("unknown header flags set")]
    InvalidHeaderFlags,
    #[error("corrupted input -- invalid deflate data")]
    CorruptDeflate,
    #[error("corrupted {stream} stream -- {what}")]
    CorruptTrailer {
        stream: &'static str,
        what: &'static str,
    },
    #[error("invalid lzw data -- {0}")]
    InvalidLzw(&'static str),
    #[error("internal error: {0}")]
    Internal(&'static str),
}

/// Verified totals of one decoded member.
#[derive(Debug, Clone, Copy)]
pub struct MemberStats {
    pub check: u32,
    pub clen: u64,
    pub ulen: u64,
}

#[derive(Debug, Default)]
pub struct InflateSummary {
    pub members: Vec<MemberStats>,
    /// Bytes after the last member that were not a valid next header.
    pub trailing_junk: bool,
}

/// Fold one chunk of output into the running check and write it out. With
/// more than one process allowed, the fold runs on a second thread while the
/// main thread writes, joined before returning so the combine order matches
/// the byte order.
fn sink_chunk<W: Write>(
    chunk: &[u8],
    algo: CheckAlgo,
    check: &mut u32,
    output: &mut Option<&mut W>,
) -> Result<(), InflateError> {
    if let Some(writer) = output.as_deref_mut() {
        let prev = *check;
        *check = thread::scope(|scope| -> Result<u32, InflateError> {
            let fold = scope.spawn(move || algo.update(prev, chunk));
            writer.write_all(chunk)?;
            fold.join()
                .map_err(|_| InflateError::Internal("check thread panicked"))
        })?;
    } else {
        *check = algo.update(*check, chunk);
    }
    Ok(())
}

fn sink_chunk_serial<W: Write>(
    chunk: &[u8],
    algo: CheckAlgo,
    check: &mut u32,
    output: &mut Option<&mut W>,
) -> Result<(), InflateError> {
    *check = algo.update(*check, chunk);
    if let Some(writer) = output.as_deref_mut() {
        writer.write_all(chunk)?;
    }
    Ok(())
}

/// Inflate one member's deflate data from `input`, feeding `sink` and
/// returning (uncompressed length, check, compressed length consumed).
fn inflate_member<R: Read, W: Write>(
    input: &mut InputBuffer<R>,
    algo: CheckAlgo,
    output: &mut Option<&mut W>,
    procs: usize,
    window: &mut [u8],
) -> Result<(u64, u32, u64), InflateError> {
    let start = input.consumed_total();
    let mut engine = Decompress::new(false);
    let mut check = algo.init();
    let mut out_tot = 0u64;

    loop {
        if input.left() == 0 {
            input.load()?;
        }
        let before_in = engine.total_in();
        let before_out = engine.total_out();
        let status = engine
            .decompress(input.window(), window, FlushDecompress::None)
            .map_err(|_| InflateError::CorruptDeflate)?;
        let consumed = (engine.total_in() - before_in) as usize;
        let produced = (engine.total_out() - before_out) as usize;
        input.consume(consumed);
        if produced > 0 {
            out_tot += produced as u64;
            if procs > 1 {
                sink_chunk(&window[..produced], algo, &mut check, output)?;
            } else {
                sink_chunk_serial(&window[..produced], algo, &mut check, output)?;
            }
        }
        match status {
            Status::StreamEnd => break,
            Status::Ok | Status::BufError => {
                if consumed == 0 && produced == 0 && input.left() == 0 && input.eof() {
                    return Err(InflateError::CorruptDeflate);
                }
            }
        }
    }

    let clen = input.consumed_total() - start;
    trace!(out_tot, clen, "member inflated");
    Ok((out_tot, check, clen))
}

macro_rules! trailer {
    ($e:expr, $stream:expr) => {
        match $e? {
            Some(v) => v,
            None => {
                return Err(InflateError::CorruptTrailer {
                    stream: $stream,
                    what: "missing trailer",
                })
            }
        }
    };
}

/// Decode the member whose header was just read, verify its trailer, and
/// keep going through any further gzip or zlib members concatenated after
/// it. `meta` carries the zip lengths promised by the local header.
pub fn inflate_members<R: Read, W: Write>(
    input: &mut InputBuffer<R>,
    format: Format,
    meta: &HeaderMeta,
    mut output: Option<&mut W>,
    procs: usize,
) -> Result<InflateSummary, InflateError> {
    let mut summary = InflateSummary::default();
    let mut format = format;
    let mut zip_crc = meta.zip_crc;
    let mut zip_clen = meta.zip_clen;
    let mut zip_ulen = meta.zip_ulen;
    let mut window = vec![0u8; BUF];

    loop {
        let algo = format.check_algo();
        let (out_tot, out_check, clen) =
            inflate_member(input, algo, &mut output, procs, &mut window)?;

        let check = match format {
            Format::Zip | Format::ZipDesc => {
                if format == Format::ZipDesc {
                    // data descriptor follows the data
                    zip_crc = trailer!(input.get4(), "zip");
                    zip_clen = trailer!(input.get4(), "zip");
                    zip_ulen = trailer!(input.get4(), "zip");

                    // If the first word is not the crc, expect the Info-ZIP
                    // layout with a leading signature. When the crc happens
                    // to equal the signature this still takes the Info-ZIP
                    // branch, matching the historical behavior.
                    if zip_crc != out_check {
                        if zip_crc != parz_format::DESCRIPTOR_SIG || zip_clen != out_check {
                            return Err(InflateError::CorruptTrailer {
                                stream: "zip",
                                what: "crc32 mismatch",
                            });
                        }
                        zip_crc = zip_clen;
                        zip_clen = zip_ulen;
                        zip_ulen = trailer!(input.get4(), "zip");
                    }

                    // still disagreeing sizes mean 64-bit length fields
                    if zip_ulen != (out_tot & u64::from(LOW32)) as u32 {
                        zip_ulen = trailer!(input.get4(), "zip");
                        trailer!(input.get4(), "zip");
                    }
                }
                if zip_clen != (clen & u64::from(LOW32)) as u32
                    || zip_ulen != (out_tot & u64::from(LOW32)) as u32
                {
                    return Err(InflateError::CorruptTrailer {
                        stream: "zip",
                        what: "length mismatch",
                    });
                }
                zip_crc
            }
            Format::Zlib => {
                let mut check = 0u32;
                for _ in 0..4 {
                    check = check << 8 | u32::from(trailer!(input.get(), "zlib"));
                }
                if check != out_check {
                    return Err(InflateError::CorruptTrailer {
                        stream: "zlib",
                        what: "adler32 mismatch",
                    });
                }
                check
            }
            Format::Gzip => {
                let check = trailer!(input.get4(), "gzip");
                let len = trailer!(input.get4(), "gzip");
                if check != out_check {
                    return Err(InflateError::CorruptTrailer {
                        stream: "gzip",
                        what: "crc32 mismatch",
                    });
                }
                if len != (out_tot & u64::from(LOW32)) as u32 {
                    return Err(InflateError::CorruptTrailer {
                        stream: "gzip",
                        what: "length mismatch",
                    });
                }
                check
            }
        };

        summary.members.push(MemberStats {
            check,
            clen,
            ulen: out_tot,
        });

        // zip holds a single entry; gzip and zlib may be followed by more
        // members of the same family
        if format.is_zip() {
            return Ok(summary);
        }
        match read_header(input, false) {
            Ok((Method::Deflate, next @ (Format::Gzip | Format::Zlib), _)) => {
                debug!("another member follows");
                format = next;
            }
            Ok(_) => return Ok(summary), // a zip or lzw stream tail is left alone
            Err(InflateError::Eof) => return Ok(summary),
            Err(InflateError::Io(err)) => return Err(err.into()),
            Err(_) => {
                summary.trailing_junk = true;
                return Ok(summary);
            }
        }
    }
}
