//! ISA extension discovery.
//!
//! The extension set is resolved once during boot and cached; every
//! capability-conditioned choice (merge strategy, CRC path, cpufeature
//! alternatives) reads the cached set.

use spin::Once;

/// ISA extensions that alternative sites may be conditioned on.
///
/// The discriminant is the patch id stored in cpufeature alternative entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum IsaExt {
    Zba = 0,
    Zbb = 1,
    Zbc = 2,
    Zbkb = 3,
    Zbs = 4,
    Zicbom = 5,
    Zihintpause = 6,
}

/// One past the largest valid [`IsaExt`] id.
pub const ISA_EXT_MAX: u32 = 7;

impl IsaExt {
    pub const ALL: [IsaExt; ISA_EXT_MAX as usize] = [
        IsaExt::Zba,
        IsaExt::Zbb,
        IsaExt::Zbc,
        IsaExt::Zbkb,
        IsaExt::Zbs,
        IsaExt::Zicbom,
        IsaExt::Zihintpause,
    ];

    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    pub const fn id(self) -> u32 {
        self as u32
    }

    pub const fn name(self) -> &'static str {
        match self {
            IsaExt::Zba => "zba",
            IsaExt::Zbb => "zbb",
            IsaExt::Zbc => "zbc",
            IsaExt::Zbkb => "zbkb",
            IsaExt::Zbs => "zbs",
            IsaExt::Zicbom => "zicbom",
            IsaExt::Zihintpause => "zihintpause",
        }
    }

    pub const fn flag(self) -> IsaExtensions {
        IsaExtensions::from_bits_truncate(1 << self as u32)
    }
}

bitflags! {
    /// A set of [`IsaExt`]s, bit `n` being the extension with id `n`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct IsaExtensions: u64 {
        const ZBA = 1 << 0;
        const ZBB = 1 << 1;
        const ZBC = 1 << 2;
        const ZBKB = 1 << 3;
        const ZBS = 1 << 4;
        const ZICBOM = 1 << 5;
        const ZIHINTPAUSE = 1 << 6;
    }
}

impl IsaExtensions {
    /// Parses a `riscv,isa` style string such as `rv64imac_zba_zbb`.
    ///
    /// Unknown extensions are ignored. The single-letter `b` implies
    /// Zba, Zbb and Zbs.
    pub fn from_isa_str(isa: &str) -> Self {
        let mut exts = IsaExtensions::empty();
        let mut parts = isa.trim().split('_');

        if let Some(base) = parts.next() {
            let letters = base
                .get(..4)
                .filter(|prefix| {
                    prefix.eq_ignore_ascii_case("rv32") || prefix.eq_ignore_ascii_case("rv64")
                })
                .and_then(|_| base.get(4..))
                .unwrap_or("");
            if letters.bytes().any(|b| b.eq_ignore_ascii_case(&b'b')) {
                exts |= IsaExtensions::ZBA | IsaExtensions::ZBB | IsaExtensions::ZBS;
            }
        }

        for part in parts {
            if let Some(ext) = IsaExt::ALL
                .iter()
                .find(|ext| ext.name().eq_ignore_ascii_case(part))
            {
                exts |= ext.flag();
            }
        }
        exts
    }

    pub fn has(self, ext: IsaExt) -> bool {
        self.contains(ext.flag())
    }
}

static HWCAP: Once<IsaExtensions> = Once::new();

/// Records the boot hart's extensions. Only the first call has an effect.
pub fn init(exts: IsaExtensions) -> IsaExtensions {
    *HWCAP.call_once(|| {
        log::info!("ISA extensions: {:?}", exts);
        exts
    })
}

/// The cached extension set, empty before [`init`].
pub fn isa_extensions() -> IsaExtensions {
    HWCAP.get().copied().unwrap_or_default()
}

pub fn has_extension(ext: IsaExt) -> bool {
    isa_extensions().has(ext)
}
