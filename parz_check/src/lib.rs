//! Check values over uncompressed data: CRC-32 for gzip and zip, Adler-32
//! for zlib, plus the closed-form combination of two checks over
//! concatenated inputs that lets per-block checks computed in parallel be
//! folded into a whole-stream check.

const ADLER_BASE: u32 = 65521;
const LOW16: u32 = 0xffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckAlgo {
    Crc32,
    Adler32,
}

impl CheckAlgo {
    pub fn init(self) -> u32 {
        match self {
            CheckAlgo::Crc32 => 0,
            CheckAlgo::Adler32 => 1,
        }
    }

    pub fn update(self, check: u32, data: &[u8]) -> u32 {
        match self {
            CheckAlgo::Crc32 => {
                let mut hasher = crc32fast::Hasher::new_with_initial(check);
                hasher.update(data);
                hasher.finalize()
            }
            CheckAlgo::Adler32 => {
                let mut adler = adler2::Adler32::from_checksum(check);
                adler.write_slice(data);
                adler.checksum()
            }
        }
    }

    pub fn combine(self, check1: u32, check2: u32, len2: u64) -> u32 {
        match self {
            CheckAlgo::Crc32 => crc32_combine(check1, check2, len2),
            CheckAlgo::Adler32 => adler32_combine(check1, check2, len2),
        }
    }
}

fn gf2_matrix_times(mat: &[u32; 32], mut vec: u32) -> u32 {
    let mut sum = 0;
    let mut row = 0;
    while vec != 0 {
        if vec & 1 != 0 {
            sum ^= mat[row];
        }
        vec >>= 1;
        row += 1;
    }
    sum
}

fn gf2_matrix_square(square: &mut [u32; 32], mat: &[u32; 32]) {
    for n in 0..32 {
        square[n] = gf2_matrix_times(mat, mat[n]);
    }
}

/// Append `len2` zero bytes to the data under `crc1` in the CRC-32
/// polynomial domain, then fold in `crc2`. Equivalent to the CRC of the
/// concatenation of the two underlying byte sequences.
pub fn crc32_combine(mut crc1: u32, crc2: u32, mut len2: u64) -> u32 {
    if len2 == 0 {
        return crc1;
    }

    // operator for one zero bit
    let mut odd = [0u32; 32];
    odd[0] = 0xedb8_8320;
    let mut row = 1u32;
    for n in 1..32 {
        odd[n] = row;
        row <<= 1;
    }

    // square twice: operators for two and four zero bits
    let mut even = [0u32; 32];
    gf2_matrix_square(&mut even, &odd);
    gf2_matrix_square(&mut odd, &even);

    // apply len2 zero bytes, squaring up the operator ladder (the first
    // square below yields the operator for one zero byte)
    loop {
        gf2_matrix_square(&mut even, &odd);
        if len2 & 1 != 0 {
            crc1 = gf2_matrix_times(&even, crc1);
        }
        len2 >>= 1;
        if len2 == 0 {
            break;
        }

        gf2_matrix_square(&mut odd, &even);
        if len2 & 1 != 0 {
            crc1 = gf2_matrix_times(&odd, crc1);
        }
        len2 >>= 1;
        if len2 == 0 {
            break;
        }
    }

    crc1 ^ crc2
}

/// Adler-32 of the concatenation, from the two parts' checks and the length
/// of the second part.
pub fn adler32_combine(adler1: u32, adler2: u32, len2: u64) -> u32 {
    let rem = (len2 % u64::from(ADLER_BASE)) as u32;
    let mut sum1 = adler1 & LOW16;
    let mut sum2 = (rem * sum1) % ADLER_BASE;
    sum1 += (adler2 & LOW16) + ADLER_BASE - 1;
    sum2 += ((adler1 >> 16) & LOW16) + ((adler2 >> 16) & LOW16) + ADLER_BASE - rem;
    if sum1 > ADLER_BASE {
        sum1 -= ADLER_BASE;
    }
    if sum1 > ADLER_BASE {
        sum1 -= ADLER_BASE;
    }
    if sum2 > ADLER_BASE << 1 {
        sum2 -= ADLER_BASE << 1;
    }
    if sum2 > ADLER_BASE {
        sum2 -= ADLER_BASE;
    }
    sum1 | (sum2 << 16)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterned_data(len: usize) -> Vec<u8> {
        let mut data = Vec::with_capacity(len);
        for i in 0..len {
            data.push(((i as u32 * 31 + 7) % 251) as u8);
        }
        data
    }

    #[test]
    fn crc32_update_matches_one_shot() {
        let data = patterned_data(10_000);
        let mut check = CheckAlgo::Crc32.init();
        for piece in data.chunks(997) {
            check = CheckAlgo::Crc32.update(check, piece);
        }
        assert_eq!(check, crc32fast::hash(&data));
    }

    #[test]
    fn crc32_combine_matches_concatenation() {
        let left = patterned_data(5_000);
        let right = patterned_data(7_777);
        let c1 = CheckAlgo::Crc32.update(0, &left);
        let c2 = CheckAlgo::Crc32.update(0, &right);
        let mut whole = left.clone();
        whole.extend_from_slice(&right);
        assert_eq!(
            crc32_combine(c1, c2, right.len() as u64),
            crc32fast::hash(&whole)
        );
    }

    #[test]
    fn crc32_combine_zero_length_is_identity() {
        assert_eq!(crc32_combine(0xdead_beef, 0x1234_5678, 0), 0xdead_beef);
    }

    #[test]
    fn adler32_combine_matches_concatenation() {
        let left = patterned_data(66_000); // crosses the modulus at least once
        let right = patterned_data(3_000);
        let a1 = CheckAlgo::Adler32.update(1, &left);
        let a2 = CheckAlgo::Adler32.update(1, &right);
        let mut whole = left.clone();
        whole.extend_from_slice(&right);
        assert_eq!(
            adler32_combine(a1, a2, right.len() as u64),
            CheckAlgo::Adler32.update(1, &whole)
        );
    }

    #[test]
    fn adler32_combine_empty_right_side() {
        let left = patterned_data(1_024);
        let a1 = CheckAlgo::Adler32.update(1, &left);
        let a2 = CheckAlgo::Adler32.init();
        assert_eq!(adler32_combine(a1, a2, 0), a1);
    }

    #[test]
    fn combine_folds_many_blocks_in_order() {
        let data = patterned_data(50_000);
        let blocks: Vec<&[u8]> = data.chunks(8_192).collect();
        for algo in [CheckAlgo::Crc32, CheckAlgo::Adler32] {
            let mut combined = algo.init();
            for block in &blocks {
                let piece = algo.update(algo.init(), block);
                combined = algo.combine(combined, piece, block.len() as u64);
            }
            assert_eq!(combined, algo.update(algo.init(), &data));
        }
    }
}
