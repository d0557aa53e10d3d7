//! Zbc Barrett reduction.
//!
//! `s` holds up to 64 message bits with the running CRC folded into its top.
//! The remainder of `s * x^16` modulo the polynomial is
//! `clmul(clmulh(s, q) ^ s, p)` truncated to 16 bits, `q` being the
//! bit-reversed Barrett quotient.

use super::CRCT10DIF_POLY;

const STEP: usize = core::mem::size_of::<u64>();
const OFFSET_MASK: usize = STEP - 1;

const POLY_QT_BE: u64 = 0xf65a_57f8_1d33_a48a;

#[cfg(target_arch = "riscv64")]
#[inline]
fn reduce_zbc(s: u64) -> u16 {
    let crc: u64;
    // SAFETY: callers of `crc_t10dif_zbc` guarantee the hart implements Zbc.
    unsafe {
        core::arch::asm!(
            ".option push",
            ".option arch,+zbc",
            "clmulh {crc}, {s}, {qt}",
            "xor {crc}, {crc}, {s}",
            "clmul {crc}, {crc}, {poly}",
            ".option pop",
            crc = out(reg) crc,
            s = in(reg) s,
            qt = in(reg) POLY_QT_BE,
            poly = in(reg) CRCT10DIF_POLY as u64,
            options(pure, nomem, nostack),
        );
    }
    crc as u16
}

#[cfg(not(target_arch = "riscv64"))]
use self::reduce_soft as reduce_zbc;

#[cfg(any(test, not(target_arch = "riscv64")))]
fn clmul_wide(a: u64, b: u64) -> u128 {
    let mut product = 0u128;
    for bit in 0..64 {
        if (b >> bit) & 1 != 0 {
            product ^= (a as u128) << bit;
        }
    }
    product
}

/// The same reduction with carry-less products computed in software.
#[cfg(any(test, not(target_arch = "riscv64")))]
fn reduce_soft(s: u64) -> u16 {
    let high = (clmul_wide(s, POLY_QT_BE) >> 64) as u64;
    clmul_wide(high ^ s, CRCT10DIF_POLY as u64) as u16
}

/// Folds fewer than eight bytes into `crc`.
fn crc_unaligned(crc: u16, bytes: &[u8], reduce: fn(u64) -> u16) -> u16 {
    let bits = bytes.len() * 8;
    let mut s = bytes.iter().fold(0u64, |s, &b| (s << 8) | b as u64);
    let mut crc_low = 0u16;

    if bytes.len() < 2 {
        s ^= (crc >> (16 - bits)) as u64;
        crc_low = ((crc as u32) << bits) as u16;
    } else {
        s ^= (crc as u64) << (bits - 16);
    }

    reduce(s) ^ crc_low
}

/// Bytes up to the first 8-byte aligned address and the final partial word
/// are folded separately; everything between is processed a word at a time.
fn crc_barrett(mut crc: u16, data: &[u8], reduce: fn(u64) -> u16) -> u16 {
    let offset = data.as_ptr() as usize & OFFSET_MASK;
    let head_len = if offset != 0 {
        (STEP - offset).min(data.len())
    } else {
        0
    };
    let (head, rest) = data.split_at(head_len);
    if !head.is_empty() {
        crc = crc_unaligned(crc, head, reduce);
    }

    let mut words = rest.chunks_exact(STEP);
    for word in &mut words {
        let word = u64::from_be_bytes([
            word[0], word[1], word[2], word[3], word[4], word[5], word[6], word[7],
        ]);
        crc = reduce(((crc as u64) << 48) ^ word);
    }

    let tail = words.remainder();
    if !tail.is_empty() {
        crc = crc_unaligned(crc, tail, reduce);
    }
    crc
}

/// CRC-T10DIF using carry-less multiplication.
///
/// # Safety
///
/// On riscv64 this executes Zbc instructions: the calling hart must implement
/// Zbc.
pub(super) unsafe fn crc_t10dif_zbc(crc: u16, data: &[u8]) -> u16 {
    crc_barrett(crc, data, reduce_zbc)
}
