//! Command-line surface. Options may also arrive through the `GZIP`
//! environment variable, whitespace-separated and spliced in ahead of the
//! real arguments; file names are not allowed there.

use std::ffi::OsString;
use std::path::PathBuf;

use anyhow::bail;
use clap::{ArgAction, Parser};

#[derive(Debug, Parser)]
#[command(
    name = "parz",
    version,
    about = "Compress or decompress files with parallel gzip, zlib, or zip",
    long_about = "parz compresses files in place, spreading the deflate work \
over multiple threads while producing ordinary gzip (or zlib, or single-entry \
zip) streams. With no files it filters stdin to stdout. It also decompresses \
gzip, zlib, zip, and Unix compress (.Z) input."
)]
pub struct Args {
    /// Compression level 0 (store) through 9 (best)
    #[arg(short = '0', hide = true, action = ArgAction::SetTrue)]
    pub level0: bool,
    #[arg(short = '1', long = "fast", hide = true, action = ArgAction::SetTrue)]
    pub level1: bool,
    #[arg(short = '2', hide = true, action = ArgAction::SetTrue)]
    pub level2: bool,
    #[arg(short = '3', hide = true, action = ArgAction::SetTrue)]
    pub level3: bool,
    #[arg(short = '4', hide = true, action = ArgAction::SetTrue)]
    pub level4: bool,
    #[arg(short = '5', hide = true, action = ArgAction::SetTrue)]
    pub level5: bool,
    #[arg(short = '6', hide = true, action = ArgAction::SetTrue)]
    pub level6: bool,
    #[arg(short = '7', hide = true, action = ArgAction::SetTrue)]
    pub level7: bool,
    #[arg(short = '8', hide = true, action = ArgAction::SetTrue)]
    pub level8: bool,
    #[arg(short = '9', long = "best", hide = true, action = ArgAction::SetTrue)]
    pub level9: bool,

    /// Compression block size in KiB (at least 32, default 128)
    #[arg(short = 'b', long = "blocksize", value_name = "KIB")]
    pub blocksize: Option<usize>,

    /// Allow up to this many compression threads
    #[arg(short = 'p', long = "processes", value_name = "N")]
    pub processes: Option<usize>,

    /// Compress blocks independently for damage recovery
    #[arg(short = 'i', long = "independent")]
    pub independent: bool,

    /// Decompress the compressed input
    #[arg(short = 'd', long = "decompress", alias = "uncompress")]
    pub decompress: bool,

    /// Test the integrity of the compressed input
    #[arg(short = 't', long = "test")]
    pub test: bool,

    /// List information about the compressed input
    #[arg(short = 'l', long = "list")]
    pub list: bool,

    /// Overwrite outputs, compress links, write to a terminal
    #[arg(short = 'f', long = "force")]
    pub force: bool,

    /// Process the contents of directories
    #[arg(short = 'r', long = "recursive")]
    pub recursive: bool,

    /// Use this suffix instead of .gz when compressing
    #[arg(short = 's', long = "suffix", value_name = ".SSS")]
    pub suffix: Option<String>,

    /// Compress to the zlib format (.zz)
    #[arg(short = 'z', long = "zlib")]
    pub zlib: bool,

    /// Compress to a single-entry PKWare zip (.zip)
    #[arg(short = 'K', long = "zip")]
    pub zip: bool,

    /// Do not delete the original file after processing
    #[arg(short = 'k', long = "keep")]
    pub keep: bool,

    /// Write all output to stdout (implies --keep)
    #[arg(short = 'c', long = "stdout", alias = "to-stdout")]
    pub pipeout: bool,

    /// Store or restore the file name and mod time in the header
    #[arg(short = 'N', long = "name")]
    pub name: bool,

    /// Do not store or restore the file name
    #[arg(short = 'n', long = "no-name")]
    pub no_name: bool,

    /// Do not store or restore the mod time
    #[arg(short = 'T', long = "no-time")]
    pub no_time: bool,

    /// Print no messages, even on error
    #[arg(short = 'q', long = "quiet", alias = "silent")]
    pub quiet: bool,

    /// More verbose output (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Files to process; with none, stdin is processed to stdout
    pub files: Vec<PathBuf>,
}

impl Args {
    /// The requested compression level; the highest digit flag wins, with 6
    /// as the default.
    pub fn level(&self) -> u32 {
        let digits = [
            self.level0,
            self.level1,
            self.level2,
            self.level3,
            self.level4,
            self.level5,
            self.level6,
            self.level7,
            self.level8,
            self.level9,
        ];
        digits
            .iter()
            .rposition(|&set| set)
            .map(|n| n as u32)
            .unwrap_or(parz_format::DEFAULT_LEVEL)
    }

    /// 0 quiet, 1 normal, 2 verbose, 3 trace.
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            1 + self.verbose
        }
    }
}

/// Build the argument vector, splicing options from the `GZIP` environment
/// variable in front of the command-line arguments.
pub fn argv_with_env() -> anyhow::Result<Vec<OsString>> {
    let mut argv: Vec<OsString> = std::env::args_os().collect();
    if let Ok(opts) = std::env::var("GZIP") {
        let mut extra = Vec::new();
        for token in opts.split_whitespace() {
            if !token.starts_with('-') {
                bail!("cannot provide files in GZIP environment variable");
            }
            extra.push(OsString::from(token));
        }
        let insert_at = 1.min(argv.len());
        argv.splice(insert_at..insert_at, extra);
    }
    Ok(argv)
}
