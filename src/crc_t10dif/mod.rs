//! CRC-T10DIF (polynomial 0x8bb7, MSB first, no reflection).
//!
//! With Zbc the checksum is computed eight bytes at a time by Barrett
//! reduction over carry-less products; otherwise a byte-wise table is used.

mod zbc;

use spin::Once;

use crate::cpufeature::{self, IsaExt};

use self::zbc::crc_t10dif_zbc;

pub const CRCT10DIF_POLY: u16 = 0x8bb7;

const fn make_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ CRCT10DIF_POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC_TABLE: [u16; 256] = make_table();

/// The table-driven routine.
pub fn crc_t10dif_generic(mut crc: u16, data: &[u8]) -> u16 {
    for &byte in data {
        crc = (crc << 8) ^ CRC_TABLE[((crc >> 8) as u8 ^ byte) as usize];
    }
    crc
}

static OPTIMIZED: Once<bool> = Once::new();

/// Whether [`crc_t10dif`] takes the Zbc path. Resolved on first use from the
/// boot hart's extensions.
pub fn crc_t10dif_is_optimized() -> bool {
    *OPTIMIZED.call_once(|| {
        let zbc = cpufeature::has_extension(IsaExt::Zbc);
        log::info!("crc-t10dif: {}", if zbc { "zbc" } else { "generic" });
        zbc
    })
}

/// Continues `crc` over `data`.
pub fn crc_t10dif(crc: u16, data: &[u8]) -> u16 {
    if crc_t10dif_is_optimized() {
        // SAFETY: the boot hart reported Zbc.
        unsafe { crc_t10dif_zbc(crc, data) }
    } else {
        crc_t10dif_generic(crc, data)
    }
}
