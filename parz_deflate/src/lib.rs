//! Chunked-pipeline compression: the input stream is split into fixed-size
//! blocks, blocks are deflated concurrently on worker threads with the
//! previous block's 32-KiB tail as a preset dictionary, and a writer thread
//! concatenates the raw deflate fragments in input order inside exactly one
//! gzip, zlib, or zip framing. Every fragment but the last ends with a sync
//! flush, so the concatenation is a single valid deflate stream.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::mem;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread;

use flate2::{Compress, Compression, FlushCompress, Status};
use thiserror::Error;
use tracing::trace;

use parz_check::CheckAlgo;
use parz_format::{Format, HeaderInfo, DEFAULT_LEVEL};

/// Sliding dictionary size for deflate; also the minimum block size, so a
/// full block always carries a whole dictionary for its successor.
pub const DICT: usize = 32 * 1024;

pub const MIN_BLOCK_SIZE: usize = DICT;
pub const DEFAULT_BLOCK_SIZE: usize = 128 * 1024;
pub const DEFAULT_PROCS: usize = 32;

/// Cap on a single engine request, for targets whose engine length type is
/// narrower than usize.
const MAX_REQUEST: usize = 1 << 30;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("deflate engine error: {0}")]
    Engine(#[from] flate2::CompressError),
    #[error("internal error: {0}")]
    Internal(&'static str),
}

fn lock<'a, T>(mutex: &'a Mutex<T>) -> Result<MutexGuard<'a, T>, PipelineError> {
    mutex
        .lock()
        .map_err(|_| PipelineError::Internal("mutex poisoned"))
}

fn wait_on_condvar<'a, T>(
    condvar: &Condvar,
    guard: MutexGuard<'a, T>,
) -> Result<MutexGuard<'a, T>, PipelineError> {
    condvar
        .wait(guard)
        .map_err(|_| PipelineError::Internal("mutex poisoned"))
}

/// All knobs of a compression run. Workers receive this immutably; the work
/// unit pool is sized and shaped from it and lives only for the one call, so
/// a changed configuration can never meet stale units.
#[derive(Debug, Clone)]
pub struct CompressConfig {
    pub format: Format,
    pub level: u32,
    pub block_size: usize,
    pub procs: usize,
    /// Prime each block with the previous block's tail. Off means every
    /// block is independently decodable.
    pub dict: bool,
    pub header: HeaderInfo,
}

impl Default for CompressConfig {
    fn default() -> Self {
        Self {
            format: Format::Gzip,
            level: DEFAULT_LEVEL,
            block_size: DEFAULT_BLOCK_SIZE,
            procs: DEFAULT_PROCS,
            dict: true,
            header: HeaderInfo::default(),
        }
    }
}

impl CompressConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.block_size < MIN_BLOCK_SIZE {
            return Err(PipelineError::InvalidConfig(
                "block size must be at least 32 KiB",
            ));
        }
        if out_bound(self.block_size).is_none() {
            return Err(PipelineError::InvalidConfig(
                "block size expansion overflows the address space",
            ));
        }
        if self.procs < 1 {
            return Err(PipelineError::InvalidConfig("need at least one process"));
        }
        if self.level > 9 {
            return Err(PipelineError::InvalidConfig(
                "compression level must be 0 through 9",
            ));
        }
        Ok(())
    }
}

/// Worst-case deflate expansion of a block plus the trailing sync marker.
fn out_bound(block_size: usize) -> Option<usize> {
    block_size
        .checked_add(block_size / 2048)?
        .checked_add(10)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CompressStats {
    pub ulen: u64,
    pub clen: u64,
    pub check: u32,
}

/// One slot's worth of pipeline state: input and output buffers, the block's
/// preset dictionary, and a reusable raw deflate engine. Units cycle between
/// the reader, one worker, and the writer; ownership moves with the unit, so
/// exactly one thread can touch its buffers at a time.
struct WorkUnit {
    in_buf: Vec<u8>,
    out_buf: Vec<u8>,
    dict: Vec<u8>,
    len: usize,
    out_len: usize,
    check: u32,
    deflate: Compress,
}

impl WorkUnit {
    fn new(config: &CompressConfig) -> Self {
        // validate() already proved the expansion fits
        let bound = out_bound(config.block_size).unwrap_or(usize::MAX);
        Self {
            in_buf: vec![0; config.block_size],
            out_buf: vec![0; bound],
            dict: Vec::with_capacity(DICT),
            len: 0,
            out_len: 0,
            check: 0,
            deflate: Compress::new(Compression::new(config.level), false),
        }
    }
}

/// Shared pipeline state: the bounded free pool of work units (the ring's
/// backpressure) and the in-order staging area for finished blocks.
struct Pipe {
    state: Mutex<PipeState>,
    reader_cv: Condvar,
    writer_cv: Condvar,
}

struct PipeState {
    free: Vec<WorkUnit>,
    created: usize,
    ready: BTreeMap<u64, WorkUnit>,
    /// First failure; consumed by the writer for reporting.
    failed: Option<PipelineError>,
    /// Sticky: stays set after `failed` is taken, so the reader stops
    /// dispatching even once the error has been claimed.
    aborted: bool,
}

impl Pipe {
    fn new() -> Self {
        Self {
            state: Mutex::new(PipeState {
                free: Vec::new(),
                created: 0,
                ready: BTreeMap::new(),
                failed: None,
                aborted: false,
            }),
            reader_cv: Condvar::new(),
            writer_cv: Condvar::new(),
        }
    }

    /// Hand the reader a unit, creating one lazily while fewer than `procs`
    /// exist, else blocking until the writer recycles one.
    fn acquire(&self, config: &CompressConfig) -> Result<WorkUnit, PipelineError> {
        let mut state = lock(&self.state)?;
        loop {
            if state.aborted {
                return Err(PipelineError::Internal("pipeline aborted"));
            }
            if let Some(unit) = state.free.pop() {
                return Ok(unit);
            }
            if state.created < config.procs {
                state.created += 1;
                trace!(unit = state.created, "work unit created");
                return Ok(WorkUnit::new(config));
            }
            state = wait_on_condvar(&self.reader_cv, state)?;
        }
    }

    /// A worker finished block `index` (or failed trying).
    fn finish(&self, index: u64, result: Result<WorkUnit, PipelineError>) {
        if let Ok(mut state) = self.state.lock() {
            match result {
                Ok(unit) => {
                    state.ready.insert(index, unit);
                }
                Err(err) => {
                    state.failed.get_or_insert(err);
                    state.aborted = true;
                    self.reader_cv.notify_all();
                }
            }
            self.writer_cv.notify_all();
        }
    }

    /// Block until the unit for `index` is staged, surfacing the first
    /// pipeline failure instead if one occurred.
    fn take_ready(&self, index: u64) -> Result<WorkUnit, PipelineError> {
        let mut state = lock(&self.state)?;
        loop {
            if let Some(err) = state.failed.take() {
                return Err(err);
            }
            if state.aborted {
                return Err(PipelineError::Internal("pipeline aborted"));
            }
            if let Some(unit) = state.ready.remove(&index) {
                return Ok(unit);
            }
            state = wait_on_condvar(&self.writer_cv, state)?;
        }
    }

    fn release(&self, unit: WorkUnit) -> Result<(), PipelineError> {
        let mut state = lock(&self.state)?;
        state.free.push(unit);
        self.reader_cv.notify_all();
        Ok(())
    }

    fn fail(&self, err: PipelineError) {
        if let Ok(mut state) = self.state.lock() {
            state.failed.get_or_insert(err);
            state.aborted = true;
        }
        self.reader_cv.notify_all();
        self.writer_cv.notify_all();
    }
}

/// Read until `buf` is full or the input ends; returns bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut got = 0;
    while got < buf.len() {
        let n = reader.read(&mut buf[got..])?;
        if n == 0 {
            break;
        }
        got += n;
    }
    Ok(got)
}

/// Deflate one input range into `out`, bookkeeping through the engine's
/// running totals. The caller guarantees `out` can absorb the worst case,
/// so a stall means a broken engine rather than a full buffer.
fn deflate_range(
    engine: &mut Compress,
    mut input: &[u8],
    out: &mut [u8],
    out_len: &mut usize,
    flush: FlushCompress,
) -> Result<(), PipelineError> {
    loop {
        let before_in = engine.total_in();
        let before_out = engine.total_out();
        let status = engine.compress(input, &mut out[*out_len..], flush)?;
        let consumed = (engine.total_in() - before_in) as usize;
        let produced = (engine.total_out() - before_out) as usize;
        input = &input[consumed..];
        *out_len += produced;
        match status {
            Status::StreamEnd => return Ok(()),
            Status::Ok | Status::BufError => {
                if matches!(flush, FlushCompress::Finish) {
                    if consumed == 0 && produced == 0 {
                        return Err(PipelineError::Internal("deflate stalled before finish"));
                    }
                } else if input.is_empty() {
                    return Ok(());
                } else if consumed == 0 && produced == 0 {
                    return Err(PipelineError::Internal("deflate made no progress"));
                }
            }
        }
    }
}

/// Drive the engine over one input range, writing output as it is produced
/// instead of assuming it fits a buffer; the single-thread path keeps one
/// deflate history across blocks, so a call can emit more than one block's
/// worth of pending data.
fn stream_deflate<W: Write>(
    engine: &mut Compress,
    mut input: &[u8],
    out_buf: &mut [u8],
    writer: &mut W,
    flush: FlushCompress,
    clen: &mut u64,
) -> Result<(), PipelineError> {
    loop {
        let before_in = engine.total_in();
        let before_out = engine.total_out();
        let status = engine.compress(input, out_buf, flush)?;
        let consumed = (engine.total_in() - before_in) as usize;
        let produced = (engine.total_out() - before_out) as usize;
        input = &input[consumed..];
        if produced > 0 {
            writer.write_all(&out_buf[..produced])?;
            *clen += produced as u64;
        }
        match status {
            Status::StreamEnd => return Ok(()),
            Status::Ok | Status::BufError => {
                let filled = produced == out_buf.len();
                if filled {
                    continue; // drain whatever the engine still holds
                }
                if matches!(flush, FlushCompress::Finish) {
                    if consumed == 0 && produced == 0 {
                        return Err(PipelineError::Internal("deflate stalled before finish"));
                    }
                } else if input.is_empty() {
                    return Ok(());
                } else if consumed == 0 && produced == 0 {
                    return Err(PipelineError::Internal("deflate made no progress"));
                }
            }
        }
    }
}

/// Compress one block in a worker: reset the engine, prime the dictionary,
/// fold the block check, and deflate ending with a sync marker, or with
/// stream finish when this is the last (short) block.
fn compress_block(unit: &mut WorkUnit, config: &CompressConfig) -> Result<(), PipelineError> {
    let algo = config.format.check_algo();
    unit.deflate.reset();
    if config.dict && !unit.dict.is_empty() && unit.len > 0 {
        let _ = unit.deflate.set_dictionary(&unit.dict)?;
    }
    unit.check = algo.update(algo.init(), &unit.in_buf[..unit.len]);
    unit.out_len = 0;

    let last = unit.len < config.block_size;
    let mut pos = 0;
    while unit.len - pos > MAX_REQUEST {
        deflate_range(
            &mut unit.deflate,
            &unit.in_buf[pos..pos + MAX_REQUEST],
            &mut unit.out_buf,
            &mut unit.out_len,
            FlushCompress::None,
        )?;
        pos += MAX_REQUEST;
    }
    deflate_range(
        &mut unit.deflate,
        &unit.in_buf[pos..unit.len],
        &mut unit.out_buf,
        &mut unit.out_len,
        if last {
            FlushCompress::Finish
        } else {
            FlushCompress::Sync
        },
    )
}

/// Writer thread: header once, then each block's compressed bytes strictly
/// in input order while folding lengths and the combined check, then the
/// trailer. The wire stream is deterministic regardless of scheduling.
fn writer_loop<W: Write>(
    pipe: &Pipe,
    config: &CompressConfig,
    writer: &mut W,
) -> Result<CompressStats, PipelineError> {
    let head_len = parz_format::write_header(writer, config.format, config.level, &config.header)
        .map_err(|err| {
            let err = PipelineError::from(err);
            pipe.fail(PipelineError::Internal("writer failed"));
            err
        })?;

    let algo = config.format.check_algo();
    let mut stats = CompressStats {
        check: algo.init(),
        ..CompressStats::default()
    };

    let mut index = 0u64;
    loop {
        let unit = pipe.take_ready(index)?;
        if let Err(err) = writer.write_all(&unit.out_buf[..unit.out_len]) {
            pipe.fail(PipelineError::Internal("writer failed"));
            return Err(err.into());
        }
        stats.ulen += unit.len as u64;
        stats.clen += unit.out_len as u64;
        stats.check = algo.combine(stats.check, unit.check, unit.len as u64);
        let last = unit.len < config.block_size;
        trace!(block = index, len = unit.len, out = unit.out_len, "block written");
        pipe.release(unit)?;
        index += 1;
        if last {
            break;
        }
    }

    parz_format::write_trailer(
        writer,
        config.format,
        stats.ulen,
        stats.clen,
        stats.check,
        head_len,
        &config.header,
    )?;
    Ok(stats)
}

fn compress_parallel<R: Read, W: Write + Send>(
    reader: &mut R,
    writer: &mut W,
    config: &CompressConfig,
) -> Result<CompressStats, PipelineError> {
    let pipe = Pipe::new();
    thread::scope(|scope| {
        let writer_thread = scope.spawn(|| writer_loop(&pipe, config, writer));

        // The reader snapshots each full block's 32-KiB tail before the
        // block is dispatched; the copy travels with the next block's unit,
        // so the preset dictionary stays byte-identical to the previous
        // input no matter when buffers are recycled.
        let mut pending_dict: Vec<u8> = Vec::new();
        let mut index = 0u64;
        loop {
            let mut unit = match pipe.acquire(config) {
                Ok(unit) => unit,
                Err(_) => break, // writer or a worker failed; it reports
            };
            match read_full(reader, &mut unit.in_buf) {
                Ok(got) => unit.len = got,
                Err(err) => {
                    pipe.fail(err.into());
                    break;
                }
            }
            mem::swap(&mut unit.dict, &mut pending_dict);
            pending_dict.clear();
            if config.dict && unit.len == config.block_size {
                pending_dict.extend_from_slice(&unit.in_buf[unit.len - DICT..unit.len]);
            }

            let last = unit.len < config.block_size;
            let block = index;
            trace!(block, len = unit.len, "block dispatched");
            let pipe_ref = &pipe;
            scope.spawn(move || {
                let result = compress_block(&mut unit, config).map(|()| unit);
                pipe_ref.finish(block, result);
            });
            index += 1;
            if last {
                break;
            }
        }

        writer_thread
            .join()
            .map_err(|_| PipelineError::Internal("writer thread panicked"))?
    })
}

/// Single-thread fallback: same framing and check logic, one work unit,
/// deflate history carried across blocks by the engine itself. With the
/// dictionary off, blocks are separated by full flushes so each is
/// independently decodable.
fn compress_single<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    config: &CompressConfig,
) -> Result<CompressStats, PipelineError> {
    let head_len = parz_format::write_header(writer, config.format, config.level, &config.header)?;
    let algo = config.format.check_algo();
    let mut stats = CompressStats {
        check: algo.init(),
        ..CompressStats::default()
    };

    let mut unit = WorkUnit::new(config);
    loop {
        let got = read_full(reader, &mut unit.in_buf)?;
        stats.ulen += got as u64;
        stats.check = algo.update(stats.check, &unit.in_buf[..got]);
        let last = got < config.block_size;

        let mut pos = 0;
        loop {
            let piece = (got - pos).min(MAX_REQUEST);
            let flush = if pos + piece < got {
                FlushCompress::None
            } else if last {
                FlushCompress::Finish
            } else if config.dict {
                FlushCompress::None
            } else {
                FlushCompress::Full
            };
            stream_deflate(
                &mut unit.deflate,
                &unit.in_buf[pos..pos + piece],
                &mut unit.out_buf,
                writer,
                flush,
                &mut stats.clen,
            )?;
            pos += piece;
            if pos >= got {
                break;
            }
        }
        if last {
            break;
        }
    }

    parz_format::write_trailer(
        writer,
        config.format,
        stats.ulen,
        stats.clen,
        stats.check,
        head_len,
        &config.header,
    )?;
    Ok(stats)
}

/// Compress `reader` to `writer` under `config`, parallel when more than one
/// process is allowed. Returns the totals the trailer was built from.
pub fn compress<R: Read, W: Write + Send>(
    reader: &mut R,
    writer: &mut W,
    config: &CompressConfig,
) -> Result<CompressStats, PipelineError> {
    config.validate()?;
    if config.procs > 1 {
        compress_parallel(reader, writer, config)
    } else {
        compress_single(reader, writer, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_rejects_small_blocks() {
        let config = CompressConfig {
            block_size: MIN_BLOCK_SIZE - 1,
            ..CompressConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn config_rejects_zero_procs() {
        let config = CompressConfig {
            procs: 0,
            ..CompressConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_rejects_overflowing_block() {
        let config = CompressConfig {
            block_size: usize::MAX - 4,
            ..CompressConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_bound_has_room_for_sync_marker() {
        assert_eq!(out_bound(DEFAULT_BLOCK_SIZE), Some(131072 + 64 + 10));
    }

    #[test]
    fn read_full_spans_short_reads() {
        struct Dribble(Vec<u8>, usize);
        impl Read for Dribble {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                let n = (self.0.len() - self.1).min(7).min(buf.len());
                buf[..n].copy_from_slice(&self.0[self.1..self.1 + n]);
                self.1 += n;
                Ok(n)
            }
        }
        let mut src = Dribble((0..100u8).collect(), 0);
        let mut buf = [0u8; 64];
        assert_eq!(read_full(&mut src, &mut buf).expect("read should succeed"), 64);
        assert_eq!(buf[63], 63);
        let mut rest = [0u8; 64];
        assert_eq!(read_full(&mut src, &mut rest).expect("read should succeed"), 36);
    }
}
