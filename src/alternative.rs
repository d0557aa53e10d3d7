//! Alternative instruction sequences.
//!
//! The build collects one [`AltEntry`] per alternative: the location of the
//! default ("old") sequence, the location of a replacement, and what the
//! replacement is conditioned on. Vendor id 0 marks cpufeature alternatives
//! whose patch id is an [`IsaExt`]; any other vendor id selects that vendor's
//! errata list.
//!
//! Applying alternatives happens after secondary harts may be running, so
//! every site is written under [`TEXT_MUTEX`](crate::sync::TEXT_MUTEX).

use alloc::vec::Vec;

use crate::arch::riscv::runtime_const::MergeStrategy;
use crate::cpufeature::{IsaExt, IsaExtensions};
use crate::errata::{self, CoreId, ErrataReport};
use crate::text::{copy_text, CodeMemory};
use crate::{Error, Result};

/// Vendor id of cpufeature alternatives.
pub const CPUFEATURE_VENDOR_ID: u16 = 0;

/// One alternative record, as laid out in the `.alternative` section.
///
/// Both offsets are relative to the address of the field holding them.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AltEntry {
    pub old_offset: i32,
    pub alt_offset: i32,
    pub vendor_id: u16,
    pub alt_len: u16,
    pub patch_id: u32,
}

pub const ALT_ENTRY_SIZE: usize = core::mem::size_of::<AltEntry>();

const OLD_OFFSET_FIELD: usize = 0;
const ALT_OFFSET_FIELD: usize = 4;

impl AltEntry {
    /// Decodes one little-endian record.
    pub fn from_le_bytes(b: &[u8; ALT_ENTRY_SIZE]) -> Self {
        AltEntry {
            old_offset: i32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            alt_offset: i32::from_le_bytes([b[4], b[5], b[6], b[7]]),
            vendor_id: u16::from_le_bytes([b[8], b[9]]),
            alt_len: u16::from_le_bytes([b[10], b[11]]),
            patch_id: u32::from_le_bytes([b[12], b[13], b[14], b[15]]),
        }
    }
}

/// Decodes a raw `.alternative` section.
pub fn parse_alt_entries(bytes: &[u8]) -> Result<Vec<AltEntry>> {
    if bytes.len() % ALT_ENTRY_SIZE != 0 {
        return Err(Error::TruncatedTable { len: bytes.len() });
    }
    Ok(bytes
        .chunks_exact(ALT_ENTRY_SIZE)
        .filter_map(|chunk| <&[u8; ALT_ENTRY_SIZE]>::try_from(chunk).ok())
        .map(AltEntry::from_le_bytes)
        .collect())
}

/// An alternative with its offsets resolved to absolute addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AltSite {
    pub old: usize,
    pub alt: usize,
    pub alt_len: usize,
    pub vendor_id: u16,
    pub patch_id: u32,
}

/// A table of alternative entries.
#[derive(Debug, Clone, Copy)]
pub struct AltTable<'a> {
    /// Address of `entries[0]`.
    base: usize,
    entries: &'a [AltEntry],
}

impl<'a> AltTable<'a> {
    pub const fn new(base: usize, entries: &'a [AltEntry]) -> Self {
        AltTable { base, entries }
    }

    /// # Safety
    ///
    /// `start..end` must bound a live array of [`AltEntry`] records.
    pub unsafe fn from_bounds(start: usize, end: usize) -> AltTable<'static> {
        if end <= start {
            return AltTable::new(start, &[]);
        }
        let len = (end - start) / ALT_ENTRY_SIZE;
        // SAFETY: guaranteed by the caller.
        let entries = unsafe { core::slice::from_raw_parts(start as *const AltEntry, len) };
        AltTable::new(start, entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn sites(&self) -> impl Iterator<Item = AltSite> + '_ {
        self.entries.iter().enumerate().map(move |(i, entry)| {
            let record = self.base + i * ALT_ENTRY_SIZE;
            AltSite {
                old: (record + OLD_OFFSET_FIELD).wrapping_add_signed(entry.old_offset as isize),
                alt: (record + ALT_OFFSET_FIELD).wrapping_add_signed(entry.alt_offset as isize),
                alt_len: entry.alt_len as usize,
                vendor_id: entry.vendor_id,
                patch_id: entry.patch_id,
            }
        })
    }
}

/// When alternatives are being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AltStage {
    /// Boot, after secondary harts may have started.
    Boot,
    /// A module being loaded.
    Module,
    /// Before the kernel is relocated and before locks work; nothing is
    /// patched in this stage.
    EarlyBoot,
}

/// Outcome of the cpufeature pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CpufeatureReport {
    /// Sites rewritten.
    pub patched: usize,
    /// Patch ids that name no known extension.
    pub unknown: Vec<u32>,
}

/// Applies every cpufeature alternative whose extension is present.
///
/// Entries are taken in table order, so when several alternatives replace the
/// same sequence the last applicable one wins.
pub fn apply_cpufeature_alternatives<M: CodeMemory + ?Sized>(
    mem: &mut M,
    table: &AltTable<'_>,
    exts: IsaExtensions,
    stage: AltStage,
) -> Result<CpufeatureReport> {
    let mut report = CpufeatureReport::default();
    if stage == AltStage::EarlyBoot {
        return Ok(report);
    }

    for site in table.sites() {
        if site.vendor_id != CPUFEATURE_VENDOR_ID {
            continue;
        }
        let Some(ext) = IsaExt::from_id(site.patch_id) else {
            log::warn!("cpufeature alternative id:{} out of range", site.patch_id);
            report.unknown.push(site.patch_id);
            continue;
        };
        if !exts.has(ext) {
            continue;
        }

        copy_text(mem, site.old, site.alt, site.alt_len)?;
        log::debug!("alternative {} at {:#x}", ext.name(), site.old);
        report.patched += 1;
    }
    Ok(report)
}

/// Combined outcome of one [`apply_alternatives`] call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AltReport {
    pub errata: ErrataReport,
    pub cpufeature: CpufeatureReport,
}

/// Applies vendor errata for the booted core, then cpufeature alternatives.
pub fn apply_alternatives<M: CodeMemory + ?Sized>(
    mem: &mut M,
    table: &AltTable<'_>,
    vendor_id: u16,
    core: CoreId,
    exts: IsaExtensions,
    stage: AltStage,
) -> Result<AltReport> {
    let errata = errata::apply_errata(mem, table, vendor_id, core, stage)?;
    let cpufeature = apply_cpufeature_alternatives(mem, table, exts, stage)?;
    if stage != AltStage::EarlyBoot {
        log::info!("runtime const merge: {:?}", MergeStrategy::select(exts));
    }
    Ok(AltReport { errata, cpufeature })
}

/// The alternative table bracketed by two linker symbols.
#[macro_export]
macro_rules! alt_table {
    ($start:ident, $end:ident) => {{
        mod __alt_bounds {
            $crate::linker_offsets!($start, $end);
        }
        // SAFETY: the linker brackets `.alternative` with these symbols.
        unsafe { $crate::alternative::AltTable::from_bounds(__alt_bounds::$start(), __alt_bounds::$end()) }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::TextImage;

    #[test]
    fn test_entry_layout() {
        assert_eq!(ALT_ENTRY_SIZE, 16);

        let raw = [
            0xf0, 0xff, 0xff, 0xff, // old_offset -16
            0x20, 0x00, 0x00, 0x00, // alt_offset 32
            0x27, 0x01, // vendor_id 0x127
            0x08, 0x00, // alt_len 8
            0x01, 0x00, 0x00, 0x00, // patch_id 1
        ];
        let entries = parse_alt_entries(&raw).unwrap();
        assert_eq!(
            entries,
            vec![AltEntry { old_offset: -16, alt_offset: 32, vendor_id: 0x127, alt_len: 8, patch_id: 1 }]
        );
        assert_eq!(parse_alt_entries(&raw[..15]), Err(Error::TruncatedTable { len: 15 }));

        let table = AltTable::new(0x1000, &entries);
        let site = table.sites().next().unwrap();
        assert_eq!(site.old, 0x1000 - 16);
        assert_eq!(site.alt, 0x1004 + 32);
    }

    #[test]
    fn test_early_boot_patches_nothing() {
        let mut text = TextImage::from_words(0x1000, &[1, 2]);
        let entries = [AltEntry {
            old_offset: 0x1000 - 0x4000,
            alt_offset: 0x1004 - 0x4004,
            vendor_id: CPUFEATURE_VENDOR_ID,
            alt_len: 4,
            patch_id: IsaExt::Zba.id(),
        }];
        let table = AltTable::new(0x4000, &entries);

        let report =
            apply_cpufeature_alternatives(&mut text, &table, IsaExtensions::all(), AltStage::EarlyBoot).unwrap();
        assert_eq!(report, CpufeatureReport::default());
        assert_eq!(text.words(0x1000, 2).unwrap(), vec![1, 2]);

        let report =
            apply_cpufeature_alternatives(&mut text, &table, IsaExtensions::all(), AltStage::Boot).unwrap();
        assert_eq!(report.patched, 1);
        assert_eq!(text.words(0x1000, 2).unwrap(), vec![2, 2]);
    }

    #[test]
    fn test_unknown_extension_skipped() {
        let mut text = TextImage::from_words(0x1000, &[1, 2]);
        let entries = [AltEntry {
            old_offset: 0x1000 - 0x4000,
            alt_offset: 0x1004 - 0x4004,
            vendor_id: CPUFEATURE_VENDOR_ID,
            alt_len: 4,
            patch_id: 1000,
        }];
        let table = AltTable::new(0x4000, &entries);

        let report =
            apply_cpufeature_alternatives(&mut text, &table, IsaExtensions::all(), AltStage::Module).unwrap();
        assert_eq!(report.unknown, vec![1000]);
        assert_eq!(text.words(0x1000, 2).unwrap(), vec![1, 2]);
    }

    mod runtime_ptr {
        use super::*;
        use crate::arch::riscv::insn::reg;
        use crate::arch::riscv::runtime_const::ptr64_placeholder;
        use crate::arch::riscv::sim::Hart;
        use crate::errata::CoreId;
        use crate::runtime_const::{runtime_const_fixup, ConstKind, FixupTable, Xlen};

        const TEXT: usize = 0x8020_0000;
        const ALT: usize = 0x8030_0000;
        const ALT_TABLE: usize = 0x8040_0000;
        const SITE_TABLE: usize = 0x8050_0000;

        /// A pointer site whose merge tail has a Zba and a Zbkb alternative,
        /// in that order.
        fn build() -> (TextImage, [AltEntry; 2]) {
            let mut text = TextImage::new(TEXT, 0x20_0000);
            text.load_words(TEXT, &ptr64_placeholder(reg::A0, reg::A1, MergeStrategy::ShiftAdd))
                .unwrap();
            text.load_words(ALT, &MergeStrategy::AddUw.tail(reg::A0, reg::A1)).unwrap();
            text.load_words(ALT + 16, &MergeStrategy::Pack.tail(reg::A0, reg::A1)).unwrap();

            let tail = TEXT + 16;
            let entries = [(ALT, MergeStrategy::AddUw), (ALT + 16, MergeStrategy::Pack)]
                .into_iter()
                .enumerate()
                .map(|(i, (alt, strategy))| {
                    let record = ALT_TABLE + i * ALT_ENTRY_SIZE;
                    AltEntry {
                        old_offset: (tail as isize - record as isize) as i32,
                        alt_offset: (alt as isize - (record + 4) as isize) as i32,
                        vendor_id: CPUFEATURE_VENDOR_ID,
                        alt_len: 16,
                        patch_id: strategy.extension().map_or(u32::MAX, IsaExt::id),
                    }
                })
                .collect::<Vec<_>>();
            (text, [entries[0], entries[1]])
        }

        fn patch_and_run(exts: IsaExtensions, val: u64) -> (Vec<u32>, u64) {
            let (mut text, entries) = build();
            let table = AltTable::new(ALT_TABLE, &entries);
            apply_alternatives(&mut text, &table, 0, CoreId::default(), exts, AltStage::Boot).unwrap();

            let offs = [(TEXT as isize - SITE_TABLE as isize) as i32];
            let sites = FixupTable::new(SITE_TABLE, &offs);
            runtime_const_fixup(&mut text, ConstKind::Ptr, val, &sites, Xlen::Rv64).unwrap();

            let words = text.words(TEXT, 8).unwrap();
            let mut hart = Hart::new();
            hart.run(&words);
            (words[4..].to_vec(), hart.reg(reg::A0))
        }

        #[test]
        fn test_tail_follows_extensions() {
            let val = 0xffff_ffd8_0123_4567;
            let cases = [
                (IsaExtensions::empty(), MergeStrategy::ShiftAdd),
                (IsaExtensions::ZBA, MergeStrategy::AddUw),
                (IsaExtensions::ZBKB, MergeStrategy::Pack),
                (IsaExtensions::ZBA | IsaExtensions::ZBKB, MergeStrategy::Pack),
            ];
            crate::klog::init(log::LevelFilter::Info);
            for (exts, strategy) in cases {
                let (tail, a0) = patch_and_run(exts, val);
                assert!(crate::klog::read().contains(&format!("runtime const merge: {:?}", strategy)));
                assert_eq!(tail, strategy.tail(reg::A0, reg::A1).to_vec(), "{:?}", exts);
                assert_eq!(strategy, MergeStrategy::select(exts));
                assert_eq!(a0, val, "{:?}", exts);
            }
        }
    }
}
