//! Decoder for the Unix compress (LZW) format. Codes grow from 9 bits up to
//! the bit limit announced in the header; whenever the width increases (and
//! on every clear code) the remaining bytes of the current code-width chunk
//! are discarded, a quirk inherited from the format's original bulk decoder.

use std::io::{Read, Write};

use crate::input::{InputBuffer, BUF};
use crate::InflateError;

/// The table index type is 16 bits, so codes never exceed 65535.
const TABLE_SIZE: usize = 65536;

/// Longest possible decoded match plus the KwKwK byte.
const MATCH_MAX: usize = 65280 + 2;

/// Discard what is left of the current chunk of codes, realigning the code
/// reader on a byte boundary. End of input here is not an error; the next
/// read reports it.
fn flush_code<R: Read>(
    input: &mut InputBuffer<R>,
    chunk: &mut u32,
    left: &mut u32,
    rem: &mut u32,
) -> Result<(), InflateError> {
    *left = 0;
    *rem = 0;
    let dist = u64::from(*chunk);
    *chunk = 0;
    input.skip(dist)?;
    Ok(())
}

/// Decode a compress (LZW) stream positioned just past its two magic bytes,
/// writing decompressed bytes to `output` when present. Returns the total
/// decompressed length.
pub fn lzw_decode<R: Read, W: Write>(
    input: &mut InputBuffer<R>,
    mut output: Option<&mut W>,
) -> Result<u64, InflateError> {
    // remainder of the header: a flags byte
    let Some(flags) = input.get()? else {
        return Err(InflateError::InvalidLzw("missing lzw data"));
    };
    if flags & 0x60 != 0 {
        return Err(InflateError::InvalidLzw("unknown lzw flags set"));
    }
    let mut max = u32::from(flags & 0x1f);
    if !(9..=16).contains(&max) {
        return Err(InflateError::InvalidLzw("lzw bits out of range"));
    }
    if max == 9 {
        // 9 doesn't really mean 9 in this format
        max = 10;
    }
    let block = flags & 0x80 != 0; // block compress: clear code in use

    let mut bits: u32 = 9;
    let mut mask: u32 = 0x1ff;
    let mut end: u32 = if block { 256 } else { 255 };

    let mut prefix = vec![0u16; TABLE_SIZE];
    let mut suffix = vec![0u8; TABLE_SIZE];
    let mut match_buf = vec![0u8; MATCH_MAX];
    let mut out_buf = vec![0u8; BUF];
    let mut out_cnt: usize;
    let mut out_tot: u64 = 0;

    // the first 9-bit code is the first decompressed byte; it makes no
    // table entry
    let Some(first) = input.get()? else {
        return Ok(0); // no compressed data is ok
    };
    let mut final_byte = u32::from(first);
    let mut prev = final_byte;
    let Some(got) = input.get()? else {
        return Err(InflateError::InvalidLzw("invalid lzw code"));
    };
    if got & 1 != 0 {
        // the high bit of the first code would make it >= 256
        return Err(InflateError::InvalidLzw("invalid lzw code"));
    }
    let mut rem = u32::from(got) >> 1;
    let mut left: u32 = 7;
    let mut chunk: u32 = bits - 2; // bytes left in this chunk
    out_buf[0] = final_byte as u8;
    out_cnt = 1;

    let mut stack: usize = 0;
    loop {
        // about to fill the table: wider codes from here on
        if end >= mask && bits < max {
            flush_code(input, &mut chunk, &mut left, &mut rem)?;
            bits += 1;
            mask = (mask << 1) + 1;
        }

        if chunk == 0 {
            chunk = bits;
        }
        let mut code = rem;
        let Some(byte) = input.get()? else {
            // end of input ends the compressed data
            out_tot += out_cnt as u64;
            if out_cnt > 0 {
                if let Some(writer) = output.as_deref_mut() {
                    writer.write_all(&out_buf[..out_cnt])?;
                }
            }
            return Ok(out_tot);
        };
        code += u32::from(byte) << left;
        left += 8;
        chunk -= 1;
        let mut last = byte;
        if bits > left {
            let Some(byte) = input.get()? else {
                // input may not end in the middle of a code
                return Err(InflateError::InvalidLzw("invalid lzw code"));
            };
            code += u32::from(byte) << left;
            left += 8;
            chunk -= 1;
            last = byte;
        }
        code &= mask;
        left -= bits;
        rem = u32::from(last) >> (8 - left);

        // clear code empties the table
        if code == 256 && block {
            flush_code(input, &mut chunk, &mut left, &mut rem)?;
            bits = 9;
            mask = 0x1ff;
            end = 255;
            continue;
        }

        // KwKwK: the one code allowed to reference a not-yet-made entry
        let temp = code;
        if code > end {
            if code != end + 1 || prev > end {
                return Err(InflateError::InvalidLzw("invalid lzw code"));
            }
            match_buf[stack] = final_byte as u8;
            stack += 1;
            code = prev;
        }

        // walk the prefix chain, collecting the match in reverse
        while code >= 256 {
            match_buf[stack] = suffix[code as usize];
            stack += 1;
            code = u32::from(prefix[code as usize]);
        }
        match_buf[stack] = code as u8;
        stack += 1;
        final_byte = code;

        // link the new table entry
        if end < mask {
            end += 1;
            prefix[end as usize] = prev as u16;
            suffix[end as usize] = final_byte as u8;
        }
        prev = temp;

        // write the match in forward order, draining full buffers
        while stack > BUF - out_cnt {
            while out_cnt < BUF {
                stack -= 1;
                out_buf[out_cnt] = match_buf[stack];
                out_cnt += 1;
            }
            out_tot += out_cnt as u64;
            if let Some(writer) = output.as_deref_mut() {
                writer.write_all(&out_buf[..out_cnt])?;
            }
            out_cnt = 0;
        }
        while stack > 0 {
            stack -= 1;
            out_buf[out_cnt] = match_buf[stack];
            out_cnt += 1;
        }
    }
}
