//! Build-time errata configuration.
//!
//! `build.rs` renders the `[errata.<vendor>]` tables of `config.toml` into
//! [`VENDOR_ERRATA`].

pub const ANDES_VENDOR_ID: u16 = 0x31e;
pub const MIPS_VENDOR_ID: u16 = 0x127;
pub const SIFIVE_VENDOR_ID: u16 = 0x489;
pub const THEAD_VENDOR_ID: u16 = 0x5b7;

/// A single vendor erratum the kernel carries a patch for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Erratum {
    pub name: &'static str,
    /// Only cores reporting this `marchid` are affected, if set.
    pub archid: Option<u64>,
    /// Only cores reporting one of these `mimpid`s are affected, unless empty.
    pub impids: &'static [u64],
}

impl Erratum {
    pub fn applies_to(&self, archid: u64, impid: u64) -> bool {
        self.archid.is_none_or(|id| id == archid) && (self.impids.is_empty() || self.impids.contains(&impid))
    }
}

/// The errata list of one vendor. A patch id indexes into `errata`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VendorErrata {
    pub vendor: &'static str,
    pub vendor_id: u16,
    pub errata: &'static [Erratum],
}

impl VendorErrata {
    /// Number of known errata; patch ids at or above it are invalid.
    pub fn count(&self) -> u32 {
        self.errata.len() as u32
    }

    pub fn erratum(&self, patch_id: u32) -> Option<&'static Erratum> {
        self.errata.get(patch_id as usize)
    }
}

include!(concat!(env!("OUT_DIR"), "/errata_table.rs"));

/// Looks up the configured errata of `vendor_id`.
pub fn vendor_errata(vendor_id: u16) -> Option<&'static VendorErrata> {
    VENDOR_ERRATA.iter().find(|v| v.vendor_id == vendor_id)
}
