//! Text patching.
//!
//! [`CodeMemory`] abstracts the two primitives self-modifying code needs: a
//! raw write into executable memory and an instruction cache invalidation over
//! the bytes written. Everything above it (runtime constants, alternatives,
//! errata) is written against the trait, so the same drivers patch the live
//! kernel through [`LiveText`] or an in-memory [`TextImage`].

mod image;
#[cfg(feature = "self_modifying")]
mod live;

pub use self::image::TextImage;
#[cfg(feature = "self_modifying")]
pub use self::live::LiveText;

use crate::arch::riscv::insn::INSN_SIZE;
use crate::sync::TEXT_MUTEX;
use crate::Result;

/// Executable memory that can be rewritten.
pub trait CodeMemory {
    /// Reads `buf.len()` bytes of text starting at `addr`.
    fn read_code_bytes(&self, addr: usize, buf: &mut [u8]) -> Result<()>;

    /// Overwrites text at `addr`. Does not touch the instruction cache.
    fn write_code_bytes(&mut self, addr: usize, bytes: &[u8]) -> Result<()>;

    /// Makes `start..end` coherent with instruction fetch on every hart.
    fn invalidate_icache_range(&mut self, start: usize, end: usize);

    /// Reads one little-endian instruction word.
    fn read_insn(&self, addr: usize) -> Result<u32> {
        let mut bytes = [0; INSN_SIZE];
        self.read_code_bytes(addr, &mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }
}

/// Writes one instruction without invalidating; the caller flushes the whole
/// sequence once all of its words are in place.
pub fn patch_insn_write<M: CodeMemory + ?Sized>(mem: &mut M, addr: usize, insn: u32) -> Result<()> {
    mem.write_code_bytes(addr, &insn.to_le_bytes())
}

/// Writes `bytes` at `addr` and invalidates exactly that range.
///
/// Only for contexts where no other hart can be writing text: early boot, or
/// with [`TEXT_MUTEX`] already held.
pub fn patch_text_nosync<M: CodeMemory + ?Sized>(mem: &mut M, addr: usize, bytes: &[u8]) -> Result<()> {
    mem.write_code_bytes(addr, bytes)?;
    mem.invalidate_icache_range(addr, addr + bytes.len());
    log::trace!("patched {} bytes at {:#x}", bytes.len(), addr);
    Ok(())
}

/// [`patch_text_nosync`] under [`TEXT_MUTEX`].
pub fn patch_text<M: CodeMemory + ?Sized>(mem: &mut M, addr: usize, bytes: &[u8]) -> Result<()> {
    let _guard = TEXT_MUTEX.lock();
    patch_text_nosync(mem, addr, bytes)
}

/// Copies `len` bytes of text from `src` over `dst`, then invalidates `dst`.
///
/// The ranges may overlap; the result is as if `src` were read in full first.
pub fn copy_text_nosync<M: CodeMemory + ?Sized>(mem: &mut M, dst: usize, src: usize, len: usize) -> Result<()> {
    let mut chunk = [0u8; 64];
    // A destination above an overlapping source is filled from the end.
    let backward = dst > src && dst - src < len;
    let mut done = 0;
    while done < len {
        let n = chunk.len().min(len - done);
        let offset = if backward { len - done - n } else { done };
        mem.read_code_bytes(src + offset, &mut chunk[..n])?;
        mem.write_code_bytes(dst + offset, &chunk[..n])?;
        done += n;
    }
    mem.invalidate_icache_range(dst, dst + len);
    log::trace!("copied {} bytes from {:#x} to {:#x}", len, src, dst);
    Ok(())
}

/// [`copy_text_nosync`] under [`TEXT_MUTEX`].
pub fn copy_text<M: CodeMemory + ?Sized>(mem: &mut M, dst: usize, src: usize, len: usize) -> Result<()> {
    let _guard = TEXT_MUTEX.lock();
    copy_text_nosync(mem, dst, src, len)
}
