//! End-to-end checks of the parallel compressor against an independent
//! decoder (flate2's own gzip and zlib readers), plus wire-level assertions
//! the decoders cannot make.

use std::io::{Cursor, Read};

use flate2::read::{MultiGzDecoder, ZlibDecoder};
use parz_deflate::{compress, CompressConfig, DEFAULT_BLOCK_SIZE, MIN_BLOCK_SIZE};
use parz_format::{Format, HeaderInfo};

fn mixed_data(bytes: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes);
    let mut state: u32 = 0x1234_5678;
    while out.len() < bytes {
        let zone = (out.len() / 4096) % 3;
        match zone {
            0 => out.extend_from_slice(b"parz-block-pipeline-"),
            1 => out.extend_from_slice(b"AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"),
            _ => {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                out.push((state >> 24) as u8);
            }
        }
    }
    out.truncate(bytes);
    out
}

fn config(format: Format, procs: usize, block_size: usize) -> CompressConfig {
    CompressConfig {
        format,
        procs,
        block_size,
        ..CompressConfig::default()
    }
}

fn compress_to_vec(data: &[u8], config: &CompressConfig) -> Vec<u8> {
    let mut out = Vec::new();
    compress(&mut Cursor::new(data), &mut out, config).expect("compression should succeed");
    out
}

fn gunzip(stream: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    MultiGzDecoder::new(stream)
        .read_to_end(&mut out)
        .expect("gzip stream should decode");
    out
}

fn unzlib(stream: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    ZlibDecoder::new(stream)
        .read_to_end(&mut out)
        .expect("zlib stream should decode");
    out
}

#[test]
fn gzip_round_trips_across_worker_counts() {
    let data = mixed_data(600_000);
    for procs in [1, 2, 4, 32] {
        let out = compress_to_vec(&data, &config(Format::Gzip, procs, MIN_BLOCK_SIZE));
        assert_eq!(gunzip(&out), data, "procs {procs}");
    }
}

#[test]
fn gzip_round_trips_across_block_sizes() {
    let data = mixed_data(700_000);
    for block_size in [MIN_BLOCK_SIZE, DEFAULT_BLOCK_SIZE, 1024 * 1024] {
        let out = compress_to_vec(&data, &config(Format::Gzip, 4, block_size));
        assert_eq!(gunzip(&out), data, "block size {block_size}");
    }
}

#[test]
fn zlib_round_trips_and_carries_adler() {
    let data = mixed_data(300_000);
    let out = compress_to_vec(&data, &config(Format::Zlib, 4, MIN_BLOCK_SIZE));
    assert_eq!(unzlib(&out), data);

    let mut adler = adler2::Adler32::new();
    adler.write_slice(&data);
    let tail = &out[out.len() - 4..];
    assert_eq!(tail, &adler.checksum().to_be_bytes()[..]);
}

#[test]
fn zlib_of_short_text_matches_direct_adler() {
    let data = b"hello world\n";
    let out = compress_to_vec(data, &config(Format::Zlib, 1, MIN_BLOCK_SIZE));
    assert_eq!(unzlib(&out), data);

    let mut adler = adler2::Adler32::new();
    adler.write_slice(data);
    assert_eq!(&out[out.len() - 4..], &adler.checksum().to_be_bytes()[..]);
}

#[test]
fn gzip_trailer_carries_crc_and_length() {
    let data = vec![0u8; 10_000_000];
    let out = compress_to_vec(&data, &config(Format::Gzip, 4, DEFAULT_BLOCK_SIZE));
    assert_eq!(gunzip(&out), data);

    let tail = &out[out.len() - 8..];
    let check = u32::from_le_bytes(tail[0..4].try_into().unwrap());
    let ulen = u32::from_le_bytes(tail[4..8].try_into().unwrap());
    assert_eq!(check, crc32fast::hash(&data));
    assert_eq!(ulen, 10_000_000);
}

#[test]
fn empty_input_makes_the_minimal_gzip_stream() {
    let out = compress_to_vec(&[], &config(Format::Gzip, 4, DEFAULT_BLOCK_SIZE));
    assert_eq!(out.len(), 20);
    assert_eq!(&out[..10], &[0x1f, 0x8b, 8, 0, 0, 0, 0, 0, 0, 3]);
    assert_eq!(&out[10..12], &[0x03, 0x00], "one empty final block");
    assert_eq!(&out[12..], &[0; 8], "zero crc and zero length");
    assert_eq!(gunzip(&out), Vec::<u8>::new());
}

#[test]
fn exact_block_multiple_round_trips() {
    let data = mixed_data(MIN_BLOCK_SIZE * 3);
    let out = compress_to_vec(&data, &config(Format::Gzip, 2, MIN_BLOCK_SIZE));
    assert_eq!(gunzip(&out), data);
}

#[test]
fn higher_level_does_not_lose_to_lower() {
    let data = mixed_data(1024 * 1024);
    let fast = compress_to_vec(
        &data,
        &CompressConfig {
            level: 1,
            ..config(Format::Gzip, 4, DEFAULT_BLOCK_SIZE)
        },
    );
    let best = compress_to_vec(
        &data,
        &CompressConfig {
            level: 9,
            ..config(Format::Gzip, 4, DEFAULT_BLOCK_SIZE)
        },
    );
    assert_eq!(gunzip(&fast), data);
    assert_eq!(gunzip(&best), data);
    assert!(best.len() <= fast.len());
}

#[test]
fn framing_is_deterministic_and_shared_across_worker_counts() {
    let data = mixed_data(500_000);
    let one = compress_to_vec(&data, &config(Format::Gzip, 1, MIN_BLOCK_SIZE));
    let again = compress_to_vec(&data, &config(Format::Gzip, 1, MIN_BLOCK_SIZE));
    assert_eq!(one, again, "identical runs are byte-identical");

    let four = compress_to_vec(&data, &config(Format::Gzip, 4, MIN_BLOCK_SIZE));
    assert_eq!(&one[..10], &four[..10], "headers agree");
    assert_eq!(
        &one[one.len() - 8..],
        &four[four.len() - 8..],
        "trailers agree"
    );
}

#[test]
fn dictionary_keeps_blocked_output_close_to_streamed() {
    let data = mixed_data(800_000);
    let with_dict = compress_to_vec(&data, &config(Format::Gzip, 4, MIN_BLOCK_SIZE));
    let without = compress_to_vec(
        &data,
        &CompressConfig {
            dict: false,
            ..config(Format::Gzip, 4, MIN_BLOCK_SIZE)
        },
    );
    assert_eq!(gunzip(&with_dict), data);
    assert_eq!(gunzip(&without), data);
    assert!(
        with_dict.len() <= without.len(),
        "cross-block references should not cost size on repetitive data"
    );
}

#[test]
fn independent_blocks_round_trip() {
    let data = mixed_data(400_000);
    for procs in [1, 4] {
        let out = compress_to_vec(
            &data,
            &CompressConfig {
                dict: false,
                ..config(Format::Gzip, procs, MIN_BLOCK_SIZE)
            },
        );
        assert_eq!(gunzip(&out), data, "procs {procs}");
    }
}

#[test]
fn gzip_header_records_the_file_name() {
    let data = b"named stream";
    let mut cfg = config(Format::Gzip, 1, MIN_BLOCK_SIZE);
    cfg.header = HeaderInfo {
        name: Some("original.txt".to_string()),
        mtime: 1_600_000_000,
    };
    let out = compress_to_vec(data, &cfg);
    assert_eq!(out[3], 8, "FNAME flag");
    assert_eq!(&out[10..23], b"original.txt\0");
    assert_eq!(gunzip(&out), data);
}

#[test]
fn zip_stream_has_descriptor_and_central_directory() {
    let data = mixed_data(200_000);
    let mut cfg = config(Format::ZipDesc, 4, MIN_BLOCK_SIZE);
    cfg.header = HeaderInfo {
        name: Some("member.bin".to_string()),
        mtime: 1_600_000_000,
    };
    let out = compress_to_vec(&data, &cfg);

    // local header
    assert_eq!(&out[0..4], b"PK\x03\x04");
    let name_len = u16::from_le_bytes(out[26..28].try_into().unwrap()) as usize;
    let extra_len = u16::from_le_bytes(out[28..30].try_into().unwrap()) as usize;
    assert_eq!(name_len, 10);
    assert_eq!(extra_len, 9);
    let head_len = 30 + name_len + extra_len;

    // raw deflate payload decodes to the input
    let mut engine = flate2::Decompress::new(false);
    let mut restored = vec![0u8; data.len() + 1024];
    engine
        .decompress(
            &out[head_len..],
            &mut restored,
            flate2::FlushDecompress::Finish,
        )
        .expect("zip payload should inflate");
    let produced = engine.total_out() as usize;
    assert_eq!(&restored[..produced], &data[..]);

    // descriptor right after the payload
    let clen = engine.total_in() as usize;
    let desc = &out[head_len + clen..head_len + clen + 12];
    let crc = u32::from_le_bytes(desc[0..4].try_into().unwrap());
    assert_eq!(crc, crc32fast::hash(&data));
    assert_eq!(
        u32::from_le_bytes(desc[4..8].try_into().unwrap()),
        clen as u32
    );
    assert_eq!(
        u32::from_le_bytes(desc[8..12].try_into().unwrap()),
        data.len() as u32
    );

    // central directory and end record
    assert_eq!(
        &out[head_len + clen + 12..head_len + clen + 16],
        b"PK\x01\x02"
    );
    let eocd = out.len() - 22;
    assert_eq!(&out[eocd..eocd + 4], b"PK\x05\x06");
    let central_offset = u32::from_le_bytes(out[eocd + 16..eocd + 20].try_into().unwrap());
    assert_eq!(central_offset as usize, head_len + clen + 12);
}

#[test]
fn single_thread_and_parallel_agree_on_totals() {
    let data = mixed_data(300_000);
    let mut one = Vec::new();
    let stats_one = compress(
        &mut Cursor::new(&data),
        &mut one,
        &config(Format::Gzip, 1, MIN_BLOCK_SIZE),
    )
    .expect("compression should succeed");
    let mut four = Vec::new();
    let stats_four = compress(
        &mut Cursor::new(&data),
        &mut four,
        &config(Format::Gzip, 4, MIN_BLOCK_SIZE),
    )
    .expect("compression should succeed");

    assert_eq!(stats_one.ulen, data.len() as u64);
    assert_eq!(stats_four.ulen, data.len() as u64);
    assert_eq!(stats_one.check, stats_four.check);
    assert_eq!(stats_one.check, crc32fast::hash(&data));
}
