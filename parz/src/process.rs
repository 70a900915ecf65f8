//! Per-file driver: decide what to do with one input path (or stdin), wire
//! the compression pipeline or the decoder to it, manage the output file,
//! and copy metadata afterwards. Problems with a single file are reported
//! and skipped; real failures propagate.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use filetime::FileTime;
use tracing::debug;
use walkdir::WalkDir;

use parz_deflate::CompressConfig;
use parz_format::{compressed_suffix, Format, HeaderInfo};
use parz_inflate::{
    inflate_members, list_measure, lzw_decode, read_header, InflateError, InputBuffer, Method,
};

use crate::cleanup;
use crate::listing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Compress,
    Decompress,
    Test,
}

/// Everything the driver needs, distilled from the command line once.
pub struct Options {
    pub mode: Mode,
    pub list: bool,
    pub format: Format,
    pub level: u32,
    pub block_size: usize,
    pub procs: usize,
    pub dict: bool,
    pub suffix: String,
    pub keep: bool,
    pub force: bool,
    pub pipeout: bool,
    pub recursive: bool,
    /// Bit 1: store/restore the name; bit 2: store/restore the mod time.
    pub headis: u8,
    pub verbosity: u8,
}

impl Options {
    pub fn compress_config(&self, header: HeaderInfo) -> CompressConfig {
        CompressConfig {
            format: self.format,
            level: self.level,
            block_size: self.block_size,
            procs: self.procs,
            dict: self.dict,
            header,
        }
    }
}

/// Listing state shared across files so the header row prints once.
pub struct ListState {
    pub first: bool,
}

fn report(options: &Options, message: &str) {
    if options.verbosity > 0 {
        eprintln!("{message}");
    }
}

/// Process one path; `None` is stdin-to-stdout. Returns false when the file
/// was skipped or failed in a way that should turn into exit status 1.
pub fn process(
    options: &Options,
    path: Option<&Path>,
    list_state: &mut ListState,
) -> anyhow::Result<()> {
    let Some(path) = path else {
        return process_stdin(options, list_state);
    };

    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(_) => {
            report(options, &format!("{} does not exist -- skipping", path.display()));
            return Ok(());
        }
    };

    if meta.file_type().is_symlink() && !options.force {
        report(
            options,
            &format!("{} is a symbolic link -- skipping", path.display()),
        );
        return Ok(());
    }
    if meta.is_dir() {
        if !options.recursive {
            report(options, &format!("{} is a directory -- skipping", path.display()));
            return Ok(());
        }
        for entry in WalkDir::new(path).min_depth(1).follow_links(false) {
            let entry = entry.with_context(|| format!("walking {}", path.display()))?;
            if entry.file_type().is_file() {
                process(options, Some(entry.path()), list_state)?;
            }
        }
        return Ok(());
    }
    if !meta.is_file() && !meta.file_type().is_symlink() {
        report(
            options,
            &format!("{} is a special file or device -- skipping", path.display()),
        );
        return Ok(());
    }

    let name = path.to_string_lossy().into_owned();

    // suffix gating: don't recompress our own outputs, and only decode or
    // list recognizably compressed names
    if options.mode == Mode::Compress && !options.list && !options.force {
        if name.ends_with(&options.suffix) {
            report(
                options,
                &format!("{name} ends with {} -- skipping", options.suffix),
            );
            return Ok(());
        }
    }
    if options.mode != Mode::Compress || options.list {
        if compressed_suffix(&name) == 0 {
            report(
                options,
                &format!("{name} does not have compressed suffix -- skipping"),
            );
            return Ok(());
        }
    }

    let file = File::open(path).with_context(|| format!("read error on {name}"))?;
    process_opened(options, Some((path, meta)), file, &name, list_state)
}

fn process_stdin(options: &Options, list_state: &mut ListState) -> anyhow::Result<()> {
    let stdin = io::stdin();
    match options.mode {
        Mode::Compress if !options.list => {
            if !options.force && io::stdout().is_terminal() {
                bail!("trying to write compressed data to a terminal (use -f to force)");
            }
            // Stdout rather than a lock guard: the pipeline's writer runs
            // on its own thread and must be able to take the handle there.
            let mut out = io::stdout();
            parz_deflate::compress(
                &mut stdin.lock(),
                &mut out,
                &options.compress_config(HeaderInfo::default()),
            )?;
            out.flush()?;
            Ok(())
        }
        _ => {
            let mut input = InputBuffer::new(stdin.lock());
            decode_or_list_stream(options, &mut input, "<stdin>", None, list_state)
        }
    }
}

fn process_opened(
    options: &Options,
    source: Option<(&Path, fs::Metadata)>,
    file: File,
    name: &str,
    list_state: &mut ListState,
) -> anyhow::Result<()> {
    match options.mode {
        Mode::Compress if !options.list => {
            compress_file(options, source.expect("compress path has a source"), file, name)
        }
        _ => {
            let mut input = InputBuffer::new(file);
            decode_or_list_stream(options, &mut input, name, source, list_state)
        }
    }
}

fn header_info(options: &Options, path: &Path, meta: &fs::Metadata) -> HeaderInfo {
    let name = if options.headis & 1 != 0 {
        path.file_name().map(|n| n.to_string_lossy().into_owned())
    } else {
        None
    };
    let mtime = if options.headis & 2 != 0 {
        meta.modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    } else {
        0
    };
    HeaderInfo { name, mtime }
}

fn compress_file(
    options: &Options,
    source: (&Path, fs::Metadata),
    mut file: File,
    name: &str,
) -> anyhow::Result<()> {
    let (path, meta) = source;

    if options.pipeout {
        if !options.force && io::stdout().is_terminal() {
            bail!("trying to write compressed data to a terminal (use -f to force)");
        }
        let mut out = io::stdout();
        parz_deflate::compress(
            &mut file,
            &mut out,
            &options.compress_config(header_info(options, path, &meta)),
        )?;
        out.flush()?;
        return Ok(());
    }

    let mut out_name = path.as_os_str().to_owned();
    out_name.push(&options.suffix);
    let out_path = PathBuf::from(out_name);
    let Some(out_file) = create_output(options, &out_path)? else {
        return Ok(()); // exists, not overwriting
    };

    cleanup::set(Some(out_path.clone()));
    let result = run_compress(options, path, &meta, &mut file, out_file);
    match result {
        Ok(()) => {
            cleanup::set(None);
            if options.verbosity > 1 {
                eprintln!("{name} to {}", out_path.display());
            }
            finish_file(options, path, &out_path, None);
            Ok(())
        }
        Err(err) => {
            let _ = fs::remove_file(&out_path);
            cleanup::set(None);
            Err(err).with_context(|| format!("write error on {}", out_path.display()))
        }
    }
}

fn run_compress(
    options: &Options,
    path: &Path,
    meta: &fs::Metadata,
    file: &mut File,
    out_file: File,
) -> anyhow::Result<()> {
    let mut writer = io::BufWriter::new(out_file);
    parz_deflate::compress(
        file,
        &mut writer,
        &options.compress_config(header_info(options, path, meta)),
    )?;
    writer.into_inner().map_err(|err| err.into_error())?;
    Ok(())
}

/// Decode, test, or list one already-opened input stream.
fn decode_or_list_stream<R: parz_inflate::InputSource>(
    options: &Options,
    input: &mut InputBuffer<R>,
    name: &str,
    source: Option<(&Path, fs::Metadata)>,
    list_state: &mut ListState,
) -> anyhow::Result<()> {
    // plain listing parses the header and finds the trailer cheaply
    if options.list && options.mode != Mode::Test {
        match list_measure(input) {
            Ok(entry) => {
                listing::print_entry(
                    &entry,
                    name,
                    options.verbosity,
                    options.mode != Mode::Compress,
                    false,
                    &mut list_state.first,
                );
                return Ok(());
            }
            Err(InflateError::Eof) => return Ok(()),
            Err(InflateError::NotCompressed | InflateError::TruncatedHeader) => {
                report(options, &format!("{name} not a compressed file -- skipping"));
                return Ok(());
            }
            Err(err) => {
                report(options, &format!("{name}: {err} -- skipping"));
                return Ok(());
            }
        }
    }

    let (method, format, meta) = match read_header(input, true) {
        Ok(parsed) => parsed,
        Err(InflateError::Eof) => return Ok(()),
        Err(InflateError::NotCompressed | InflateError::TruncatedHeader
        | InflateError::InvalidHeaderFlags) => {
            report(options, &format!("{name} is not compressed -- skipping"));
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };
    if !matches!(method, Method::Deflate | Method::Lzw) {
        report(
            options,
            &format!("{name} has unknown compression method -- skipping"),
        );
        return Ok(());
    }

    if options.mode == Mode::Test {
        return run_decode::<_, io::Sink>(options, input, method, format, &meta, None, name, list_state);
    }

    // create the output file (or stdout) and decompress into it
    let stamp = meta.stamp;
    if options.pipeout || source.is_none() {
        let mut out = io::stdout().lock();
        run_decode(options, input, method, format, &meta, Some(&mut out), name, list_state)?;
        out.flush()?;
        return Ok(());
    }

    let (path, _meta) = source.expect("file source");
    let out_path = decoded_name(options, path, meta.name.as_deref());
    let Some(out_file) = create_output(options, &out_path)? else {
        return Ok(());
    };

    cleanup::set(Some(out_path.clone()));
    let mut writer = io::BufWriter::new(out_file);
    let result = run_decode(
        options,
        input,
        method,
        format,
        &meta,
        Some(&mut writer),
        name,
        list_state,
    )
    .and_then(|()| {
        writer
            .into_inner()
            .map_err(|err| anyhow::Error::from(err.into_error()))?;
        Ok(())
    });
    match result {
        Ok(()) => {
            cleanup::set(None);
            if options.verbosity > 1 {
                eprintln!("{name} to {}", out_path.display());
            }
            finish_file(options, path, &out_path, Some(stamp));
            Ok(())
        }
        Err(err) => {
            let _ = fs::remove_file(&out_path);
            cleanup::set(None);
            Err(err).with_context(|| name.to_string())
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_decode<R: Read, W: Write>(
    options: &Options,
    input: &mut InputBuffer<R>,
    method: Method,
    format: Format,
    meta: &parz_inflate::HeaderMeta,
    output: Option<&mut W>,
    name: &str,
    list_state: &mut ListState,
) -> anyhow::Result<()> {
    match method {
        Method::Deflate => {
            let summary = inflate_members(input, format, meta, output, options.procs)
                .with_context(|| name.to_string())?;
            if summary.trailing_junk && options.verbosity > 0 {
                eprintln!("{name} OK, has trailing junk which was ignored");
            }
            if options.list {
                let mut continued = false;
                for member in &summary.members {
                    let entry = parz_inflate::ListEntry {
                        method,
                        format,
                        check: Some(member.check),
                        stamp: meta.stamp,
                        name: meta.name.clone(),
                        clen: member.clen,
                        ulen: member.ulen,
                    };
                    listing::print_entry(
                        &entry,
                        name,
                        options.verbosity,
                        true,
                        continued,
                        &mut list_state.first,
                    );
                    continued = true;
                }
            }
            Ok(())
        }
        Method::Lzw => {
            let out_tot =
                lzw_decode(input, output).with_context(|| name.to_string())?;
            if options.list {
                let entry = parz_inflate::ListEntry {
                    method,
                    format,
                    check: None,
                    stamp: meta.stamp,
                    name: meta.name.clone(),
                    clen: input.total().saturating_sub(3),
                    ulen: out_tot,
                };
                listing::print_entry(
                    &entry,
                    name,
                    options.verbosity,
                    true,
                    false,
                    &mut list_state.first,
                );
            }
            Ok(())
        }
        Method::Other(_) => unreachable!("filtered before decode"),
    }
}

/// Output name for a decompressed file: the stored header name (under -N)
/// placed next to the input, else the input name minus its suffix.
fn decoded_name(options: &Options, path: &Path, stored: Option<&str>) -> PathBuf {
    if options.headis & 1 != 0 {
        if let Some(stored) = stored {
            // keep only the final component of the stored name
            let base = Path::new(stored)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .filter(|n| !n.is_empty());
            if let Some(base) = base {
                return path.parent().unwrap_or(Path::new("")).join(base);
            }
        }
    }
    let name = path.to_string_lossy();
    let cut = compressed_suffix(&name);
    PathBuf::from(&name[..name.len() - cut])
}

/// Create the output file, refusing to overwrite unless forced or the user
/// confirms at a terminal. `None` means the file was skipped.
fn create_output(options: &Options, out_path: &Path) -> anyhow::Result<Option<File>> {
    let mut open = OpenOptions::new();
    open.write(true);
    if options.force {
        open.create(true).truncate(true);
    } else {
        open.create_new(true);
    }
    match open.open(out_path) {
        Ok(file) => Ok(Some(file)),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            if io::stdin().is_terminal() && options.verbosity > 0 {
                eprint!("{} exists -- overwrite (y/n)? ", out_path.display());
                io::stderr().flush().ok();
                let mut reply = String::new();
                io::stdin().lock().read_line(&mut reply).ok();
                if matches!(reply.trim_start().chars().next(), Some('y') | Some('Y')) {
                    let file = OpenOptions::new()
                        .write(true)
                        .create(true)
                        .truncate(true)
                        .open(out_path)
                        .with_context(|| {
                            format!("write error on {}", out_path.display())
                        })?;
                    return Ok(Some(file));
                }
            }
            report(
                options,
                &format!("{} exists -- skipping", out_path.display()),
            );
            Ok(None)
        }
        Err(err) => {
            Err(err).with_context(|| format!("write error on {}", out_path.display()))
        }
    }
}

/// After a successful file-to-file run: copy metadata, restore the stored
/// stamp when decoding with -N, and delete the input unless kept.
fn finish_file(options: &Options, input: &Path, output: &Path, stamp: Option<i64>) {
    copymeta(input, output);
    if let Some(stamp) = stamp {
        if options.headis & 2 != 0 && stamp != 0 {
            let t = FileTime::from_unix_time(stamp, 0);
            let _ = filetime::set_file_times(output, t, t);
        }
    }
    if !options.keep {
        debug!(input = %input.display(), "removing input");
        let _ = fs::remove_file(input);
    }
}

/// Copy permissions, ownership, and times, best effort.
fn copymeta(from: &Path, to: &Path) {
    let Ok(meta) = fs::metadata(from) else { return };
    if !meta.is_file() {
        return;
    }
    let _ = fs::set_permissions(to, meta.permissions());
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let _ = std::os::unix::fs::chown(to, Some(meta.uid()), Some(meta.gid()));
    }
    let _ = filetime::set_file_times(
        to,
        FileTime::from_last_access_time(&meta),
        FileTime::from_last_modification_time(&meta),
    );
}
