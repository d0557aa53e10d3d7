//! Vendor errata patching.
//!
//! Errata alternatives share the `.alternative` table with cpufeature
//! alternatives but carry a non-zero vendor id; their patch id indexes the
//! vendor's errata list from `config.toml`. An entry is applied when its
//! vendor matches the booted core and its erratum affects the core's
//! `marchid` and `mimpid`.

use alloc::vec::Vec;

use crate::alternative::{AltStage, AltTable, CPUFEATURE_VENDOR_ID};
use crate::config::{self, VendorErrata};
use crate::text::{copy_text, CodeMemory};
use crate::Result;

/// Identification CSRs of the booted hart.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CoreId {
    /// `marchid`
    pub archid: u64,
    /// `mimpid`
    pub impid: u64,
}

/// An entry skipped because its patch id is outside the vendor's list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkippedErratum {
    pub site: usize,
    pub patch_id: u32,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ErrataReport {
    /// Names of the errata patched, one per site.
    pub patched: Vec<&'static str>,
    pub skipped: Vec<SkippedErratum>,
    /// Entries of this vendor whose erratum does not affect the core.
    pub not_applicable: usize,
}

/// Applies the errata alternatives of `vendor_id` for `core`.
///
/// An entry with an out-of-range patch id is reported and left untouched; the
/// remaining entries are still processed.
pub fn apply_errata<M: CodeMemory + ?Sized>(
    mem: &mut M,
    table: &AltTable<'_>,
    vendor_id: u16,
    core: CoreId,
    stage: AltStage,
) -> Result<ErrataReport> {
    let mut report = ErrataReport::default();
    if stage == AltStage::EarlyBoot || vendor_id == CPUFEATURE_VENDOR_ID {
        return Ok(report);
    }
    let Some(vendor) = config::vendor_errata(vendor_id) else {
        log::debug!("no errata configured for vendor {:#x}", vendor_id);
        return Ok(report);
    };

    for site in table.sites() {
        if site.vendor_id != vendor_id {
            continue;
        }
        let Some(erratum) = vendor.erratum(site.patch_id) else {
            log::warn!("{} errata id:{} not in kernel errata list", vendor.vendor, site.patch_id);
            report.skipped.push(SkippedErratum {
                site: site.old,
                patch_id: site.patch_id,
            });
            continue;
        };
        if !erratum.applies_to(core.archid, core.impid) {
            report.not_applicable += 1;
            continue;
        }

        copy_text(mem, site.old, site.alt, site.alt_len)?;
        log::debug!("{} erratum {} at {:#x}", vendor.vendor, erratum.name, site.old);
        report.patched.push(erratum.name);
    }

    if !report.patched.is_empty() {
        log::info!("{}: {} errata sites patched", vendor.vendor, report.patched.len());
    }
    Ok(report)
}

/// Errata of `vendor` that affect `core`, by patch id.
pub fn active_errata(vendor: &VendorErrata, core: CoreId) -> impl Iterator<Item = u32> + '_ {
    vendor
        .errata
        .iter()
        .enumerate()
        .filter(move |(_, erratum)| erratum.applies_to(core.archid, core.impid))
        .map(|(id, _)| id as u32)
}
