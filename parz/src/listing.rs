//! Listing output: one line per source stream with method, stored check,
//! time stamp, sizes, and reduction, under an optional header row.

use chrono::{Datelike, Local, LocalResult, TimeZone};
use parz_format::{compressed_suffix, Format};
use parz_inflate::{ListEntry, Method};

/// Name display limits by verbosity.
const NAME_MAX_NORMAL: usize = 48;
const NAME_MAX_VERBOSE: usize = 16;

/// The 12-character time column: clock time within the current year, the
/// year otherwise, dashes when no stamp was stored.
fn time_column(stamp: i64) -> String {
    if stamp == 0 {
        return "------ -----".to_string();
    }
    let tm = match Local.timestamp_opt(stamp, 0) {
        LocalResult::Single(tm) | LocalResult::Ambiguous(tm, _) => tm,
        LocalResult::None => return "------ -----".to_string(),
    };
    if tm.year() == Local::now().year() {
        tm.format("%b %e %H:%M").to_string()
    } else {
        tm.format("%b %e  %Y").to_string()
    }
}

/// Abbreviate a display name to `max` characters, marking truncation.
fn abbreviate(name: &str, max: usize) -> String {
    if name.chars().count() <= max {
        return name.to_string();
    }
    let kept: String = name.chars().take(max - 3).collect();
    kept + "..."
}

fn method_column(entry: &ListEntry, decode: bool) -> String {
    let check = |value: Option<u32>| match value {
        Some(check) => format!("{check:08x}"),
        None => "--------".to_string(),
    };
    let number = |method: Method| match method {
        Method::Deflate => 8,
        Method::Lzw => 256,
        Method::Other(m) => i64::from(m),
    };
    match (entry.method, entry.format) {
        (Method::Lzw, _) => format!("lzw     {}  ", check(None)),
        (method, Format::ZipDesc) if !decode => {
            format!("zip{:3}  {}  ", number(method), check(None))
        }
        (method, Format::Zip | Format::ZipDesc) => {
            format!("zip{:3}  {}  ", number(method), check(entry.check))
        }
        (method, Format::Zlib) => format!("zlib{:2}  {}  ", number(method), check(entry.check)),
        (method, Format::Gzip) => format!("gzip{:2}  {}  ", number(method), check(entry.check)),
    }
}

/// Print the header row before the first entry.
pub fn print_list_header(verbosity: u8, first: &mut bool) {
    if !*first {
        return;
    }
    *first = false;
    if verbosity > 1 {
        print!("method    check    timestamp    ");
    }
    if verbosity > 0 {
        println!("compressed   original reduced  name");
    }
}

/// Print one listing line. `source` is the input path used when the header
/// stored no name; `continued` marks second and later members of a
/// concatenated stream.
pub fn print_entry(
    entry: &ListEntry,
    source: &str,
    verbosity: u8,
    decode: bool,
    continued: bool,
    first: &mut bool,
) {
    if verbosity == 0 {
        return;
    }
    let max = if verbosity > 1 {
        NAME_MAX_VERBOSE
    } else {
        NAME_MAX_NORMAL
    };
    let name = if continued {
        "<...>".to_string()
    } else if let Some(stored) = &entry.name {
        abbreviate(stored, max)
    } else {
        let cut = compressed_suffix(source);
        abbreviate(&source[..source.len() - cut], max)
    };

    print_list_header(verbosity, first);

    if verbosity > 1 {
        print!("{}{}  ", method_column(entry, decode), time_column(entry.stamp));
    }

    // When the uncompressed length cannot be known (or plainly disagrees
    // with the compressed size), mark the ratio unknown.
    let unknown = (entry.format == Format::ZipDesc && !decode)
        || (entry.method == Method::Deflate
            && entry.clen > entry.ulen + (entry.ulen >> 10) + 12)
        || (entry.method == Method::Lzw && entry.clen > entry.ulen + (entry.ulen >> 1) + 3);
    if unknown {
        println!("{:>10} {:>10}?  unk    {}", entry.clen, entry.ulen, name);
    } else {
        let reduced = if entry.ulen == 0 {
            0.0
        } else {
            100.0 * (entry.ulen as f64 - entry.clen as f64) / entry.ulen as f64
        };
        println!(
            "{:>10} {:>10} {:>6.1}%  {}",
            entry.clen, entry.ulen, reduced, name
        );
    }
}
