//! parz: a parallel gzip/zlib/zip compressor and gzip/zlib/zip/compress
//! decompressor. Compression splits the input into blocks deflated
//! concurrently with cross-block dictionary continuity; the output is a
//! single ordinary stream any gzip can read.

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cleanup;
mod cli;
mod listing;
mod process;

use process::{ListState, Mode, Options};

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            cleanup::remove_current();
            eprintln!("parz abort: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbosity: u8) {
    let default = match verbosity {
        0 | 1 => "warn",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> anyhow::Result<ExitCode> {
    // invoked bare at a terminal: show usage rather than wait on stdin
    if std::env::args_os().len() < 2 && std::io::IsTerminal::is_terminal(&std::io::stdout()) {
        use clap::CommandFactory;
        cli::Args::command().print_help().ok();
        return Ok(ExitCode::SUCCESS);
    }

    let argv = cli::argv_with_env()?;
    let args = cli::Args::parse_from(argv);
    let verbosity = args.verbosity();
    init_tracing(verbosity);

    ctrlc::set_handler(|| {
        cleanup::remove_current();
        std::process::exit(1);
    })
    .ok();

    let mode = if args.test {
        Mode::Test
    } else if args.decompress {
        Mode::Decompress
    } else {
        Mode::Compress
    };

    let format = if args.zip {
        parz_format::Format::ZipDesc
    } else if args.zlib {
        parz_format::Format::Zlib
    } else {
        parz_format::Format::Gzip
    };

    // what the header stores or restores: bit 1 name, bit 2 time; plain
    // decompression restores nothing unless -N asks for it
    let mut headis: u8 = if mode == Mode::Compress { 3 } else { 0 };
    if args.name {
        headis = 3;
    }
    if args.no_name {
        headis &= !1;
    }
    if args.no_time {
        headis &= !2;
    }

    let options = Options {
        mode,
        list: args.list,
        format,
        level: args.level(),
        block_size: args.blocksize.unwrap_or(128).saturating_mul(1024),
        procs: args.processes.unwrap_or(parz_deflate::DEFAULT_PROCS),
        dict: !args.independent,
        suffix: args
            .suffix
            .clone()
            .unwrap_or_else(|| format.suffix().to_string()),
        keep: args.keep || args.pipeout,
        force: args.force,
        pipeout: args.pipeout,
        recursive: args.recursive,
        headis,
        verbosity,
    };

    // reject bad sizes and counts before touching any file
    options
        .compress_config(Default::default())
        .validate()
        .map_err(anyhow::Error::from)?;

    let mut list_state = ListState { first: true };
    let mut status = ExitCode::SUCCESS;

    if args.files.is_empty() {
        process::process(&options, None, &mut list_state)?;
        return Ok(status);
    }

    let mut done = 0u64;
    for file in &args.files {
        if done == 1
            && options.pipeout
            && mode == Mode::Compress
            && !options.list
            && options.format.is_zip()
        {
            eprintln!(
                "warning: output is concatenated zip files -- parz will not be able to extract"
            );
        }
        let path: Option<&Path> = if file.as_os_str() == "-" {
            None
        } else {
            Some(file)
        };
        if let Err(err) = process::process(&options, path, &mut list_state) {
            cleanup::remove_current();
            if verbosity > 0 {
                eprintln!("parz abort: {err:#}");
            }
            status = ExitCode::FAILURE;
        }
        done += 1;
    }
    Ok(status)
}
