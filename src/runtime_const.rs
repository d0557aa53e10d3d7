//! Runtime constants.
//!
//! A runtime constant is a value fixed for one boot (a pointer, or a shift
//! amount) that the compiler emits as placeholder immediates. Each use site
//! records `site - &slot` in a `runtime_<kind>_<sym>` section, and once the
//! value is known the fixup driver walks that section and rewrites every site.
//!
//! Fixups run while the kernel is still single-threaded, so they write with
//! the non-locking primitives. Each site is invalidated right after its own
//! words are written.

use alloc::vec::Vec;
use hashbrown::HashMap;

use crate::arch::riscv::insn::INSN_SIZE;
use crate::arch::riscv::runtime_const::{fixup_32, fixup_shift};
use crate::text::{patch_insn_write, patch_text_nosync, CodeMemory};
use crate::{Error, Result};

/// Size of one site table slot.
pub const SLOT_SIZE: usize = core::mem::size_of::<i32>();

/// What kind of placeholder a site table points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstKind {
    /// A `lui`/`addi` pointer load.
    Ptr,
    /// A `srli`/`srliw` with a patched shift amount.
    Shift,
}

impl ConstKind {
    /// Section name prefix; the linker brackets `<prefix><sym>` with
    /// `__start_` and `__stop_` symbols.
    pub const fn section_prefix(self) -> &'static str {
        match self {
            ConstKind::Ptr => "runtime_ptr_",
            ConstKind::Shift => "runtime_shift_",
        }
    }
}

/// Register width of the patched code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Xlen {
    Rv32,
    Rv64,
}

impl Xlen {
    #[cfg(target_pointer_width = "32")]
    pub const NATIVE: Xlen = Xlen::Rv32;
    #[cfg(not(target_pointer_width = "32"))]
    pub const NATIVE: Xlen = Xlen::Rv64;

    /// Instructions rewritten at a pointer site.
    pub const fn ptr_insns(self) -> usize {
        match self {
            Xlen::Rv32 => 2,
            Xlen::Rv64 => 4,
        }
    }
}

/// A linker-collected array of self-relative site offsets.
#[derive(Debug, Clone, Copy)]
pub struct FixupTable<'a> {
    /// Address of `offsets[0]`.
    base: usize,
    offsets: &'a [i32],
}

impl<'a> FixupTable<'a> {
    /// A table whose first slot lives at address `base`.
    pub const fn new(base: usize, offsets: &'a [i32]) -> Self {
        FixupTable { base, offsets }
    }

    /// A table read in place, the slot addresses being the slice's own.
    pub fn in_place(offsets: &'a [i32]) -> Self {
        FixupTable {
            base: offsets.as_ptr() as usize,
            offsets,
        }
    }

    /// # Safety
    ///
    /// `start..stop` must bound a live, 4-byte aligned array of `i32` slots,
    /// as the `__start_`/`__stop_` symbols of a site section do.
    pub unsafe fn from_bounds(start: usize, stop: usize) -> FixupTable<'static> {
        if stop <= start {
            return FixupTable::new(start, &[]);
        }
        let len = (stop - start) / SLOT_SIZE;
        // SAFETY: guaranteed by the caller.
        let offsets = unsafe { core::slice::from_raw_parts(start as *const i32, len) };
        FixupTable::new(start, offsets)
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Absolute site addresses, in table order.
    pub fn sites(&self) -> impl Iterator<Item = usize> + '_ {
        self.offsets
            .iter()
            .enumerate()
            .map(move |(i, &offset)| (self.base + i * SLOT_SIZE).wrapping_add_signed(offset as isize))
    }
}

/// Decodes a raw little-endian site section.
pub fn parse_offsets(bytes: &[u8]) -> Result<Vec<i32>> {
    if bytes.len() % SLOT_SIZE != 0 {
        return Err(Error::TruncatedTable { len: bytes.len() });
    }
    Ok(bytes
        .chunks_exact(SLOT_SIZE)
        .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Rewrites the `lui` at `lui_addr` and its `addi` at `addi_addr`.
fn fixup_pair<M: CodeMemory + ?Sized>(mem: &mut M, lui_addr: usize, addi_addr: usize, val: u32) -> Result<()> {
    let lui = mem.read_insn(lui_addr)?;
    let addi = mem.read_insn(addi_addr)?;
    let [lui, addi] = fixup_32(lui, addi, val);
    patch_insn_write(mem, addi_addr, addi)?;
    patch_insn_write(mem, lui_addr, lui)
}

/// Patches one pointer site and invalidates its instructions.
pub fn runtime_fixup_ptr<M: CodeMemory + ?Sized>(mem: &mut M, site: usize, val: u64, xlen: Xlen) -> Result<()> {
    match xlen {
        Xlen::Rv32 => fixup_pair(mem, site, site + INSN_SIZE, val as u32)?,
        Xlen::Rv64 => {
            fixup_pair(mem, site, site + 2 * INSN_SIZE, val as u32)?;
            fixup_pair(mem, site + INSN_SIZE, site + 3 * INSN_SIZE, (val >> 32) as u32)?;
        }
    }
    mem.invalidate_icache_range(site, site + xlen.ptr_insns() * INSN_SIZE);
    Ok(())
}

/// Patches the shift amount of one shift site.
pub fn runtime_fixup_shift<M: CodeMemory + ?Sized>(mem: &mut M, site: usize, val: u64) -> Result<()> {
    let insn = mem.read_insn(site)?;
    let insn = fixup_shift(insn, val as u32);
    patch_text_nosync(mem, site, &insn.to_le_bytes())
}

/// Patches every site of `table` to hold `val`. Returns the number of sites.
pub fn runtime_const_fixup<M: CodeMemory + ?Sized>(
    mem: &mut M,
    kind: ConstKind,
    val: u64,
    table: &FixupTable<'_>,
    xlen: Xlen,
) -> Result<usize> {
    for site in table.sites() {
        match kind {
            ConstKind::Ptr => runtime_fixup_ptr(mem, site, val, xlen)?,
            ConstKind::Shift => runtime_fixup_shift(mem, site, val)?,
        }
        log::trace!("runtime const {:?} site {:#x} = {:#x}", kind, site, val);
    }
    Ok(table.len())
}

/// Site tables of named runtime constants.
pub struct RuntimeConsts<'a> {
    xlen: Xlen,
    ptr: HashMap<&'a str, FixupTable<'a>>,
    shift: HashMap<&'a str, FixupTable<'a>>,
}

impl<'a> RuntimeConsts<'a> {
    pub fn new(xlen: Xlen) -> Self {
        RuntimeConsts {
            xlen,
            ptr: HashMap::new(),
            shift: HashMap::new(),
        }
    }

    fn tables(&self, kind: ConstKind) -> &HashMap<&'a str, FixupTable<'a>> {
        match kind {
            ConstKind::Ptr => &self.ptr,
            ConstKind::Shift => &self.shift,
        }
    }

    /// Registers the site table of `name`, returning any table it replaces.
    pub fn register(&mut self, kind: ConstKind, name: &'a str, table: FixupTable<'a>) -> Option<FixupTable<'a>> {
        let tables = match kind {
            ConstKind::Ptr => &mut self.ptr,
            ConstKind::Shift => &mut self.shift,
        };
        tables.insert(name, table)
    }

    pub fn table(&self, kind: ConstKind, name: &str) -> Option<&FixupTable<'a>> {
        self.tables(kind).get(name)
    }

    /// Patches every site of `name` to `val`. Unknown names patch nothing.
    pub fn apply<M: CodeMemory + ?Sized>(&self, mem: &mut M, kind: ConstKind, name: &str, val: u64) -> Result<usize> {
        let Some(table) = self.table(kind, name) else {
            log::debug!("runtime const {}{} has no sites", kind.section_prefix(), name);
            return Ok(0);
        };
        let sites = runtime_const_fixup(mem, kind, val, table, self.xlen)?;
        log::debug!(
            "runtime const {}{} = {:#x} at {} sites",
            kind.section_prefix(),
            name,
            val,
            sites
        );
        Ok(sites)
    }
}

/// The [`ConstKind`] named by a `ptr` or `shift` token.
#[macro_export]
macro_rules! runtime_const_kind {
    (ptr) => {
        $crate::runtime_const::ConstKind::Ptr
    };
    (shift) => {
        $crate::runtime_const::ConstKind::Shift
    };
}

/// Name of the site section of `sym` for a `ptr` or `shift` constant.
#[macro_export]
macro_rules! runtime_const_section {
    (ptr, $sym:ident) => {
        concat!("runtime_ptr_", stringify!($sym))
    };
    (shift, $sym:ident) => {
        concat!("runtime_shift_", stringify!($sym))
    };
}

/// The site table of one runtime constant, bracketed by the linker's
/// `__start_` and `__stop_` symbols of its section.
///
/// ```ignore
/// let table = runtime_const_table!(ptr, dentry_hashtable);
/// ```
#[macro_export]
macro_rules! runtime_const_table {
    (ptr, $sym:ident) => {
        $crate::paste::paste! {
            $crate::runtime_const_table!(@bounds [<__start_runtime_ptr_ $sym>], [<__stop_runtime_ptr_ $sym>])
        }
    };
    (shift, $sym:ident) => {
        $crate::paste::paste! {
            $crate::runtime_const_table!(@bounds [<__start_runtime_shift_ $sym>], [<__stop_runtime_shift_ $sym>])
        }
    };
    (@bounds $start:ident, $stop:ident) => {{
        mod __runtime_const_bounds {
            $crate::linker_offsets!($start, $stop);
        }
        // SAFETY: the linker brackets the site section with these symbols.
        unsafe {
            $crate::runtime_const::FixupTable::from_bounds(
                __runtime_const_bounds::$start(),
                __runtime_const_bounds::$stop(),
            )
        }
    }};
}

/// Patches the running kernel's sites of one runtime constant.
///
/// The kind token selects both the site section and the fixup applied, so a
/// shift table is never patched as pointer loads or the other way round.
/// Must run before secondary harts enter the kernel proper.
///
/// ```ignore
/// runtime_const_init!(shift, d_hash_shift, 32 - log2_entries)?;
/// ```
#[cfg(feature = "self_modifying")]
#[macro_export]
macro_rules! runtime_const_init {
    ($kind:ident, $sym:ident, $val:expr) => {{
        let table = $crate::runtime_const_table!($kind, $sym);
        // SAFETY: site tables only point into kernel text.
        let mut text = unsafe { $crate::text::LiveText::new() };
        $crate::runtime_const::runtime_const_fixup(
            &mut text,
            $crate::runtime_const_kind!($kind),
            $val as u64,
            &table,
            $crate::runtime_const::Xlen::NATIVE,
        )
    }};
}
