use core::ptr;

use super::CodeMemory;
use crate::Result;

/// The running kernel's own text.
///
/// Writes go straight through the kernel mapping, so text must be mapped
/// writable while patching (during boot, before permissions are tightened).
pub struct LiveText {
    _private: (),
}

impl LiveText {
    /// # Safety
    ///
    /// Every address later passed to this backend must be mapped, writable
    /// kernel text, and instructions being rewritten must not be executing
    /// concurrently with the write except as allowed by the caller's locking.
    pub const unsafe fn new() -> Self {
        LiveText { _private: () }
    }
}

impl CodeMemory for LiveText {
    fn read_code_bytes(&self, addr: usize, buf: &mut [u8]) -> Result<()> {
        // SAFETY: `addr` is mapped kernel text per the constructor contract.
        unsafe { ptr::copy_nonoverlapping(addr as *const u8, buf.as_mut_ptr(), buf.len()) };
        Ok(())
    }

    fn write_code_bytes(&mut self, addr: usize, bytes: &[u8]) -> Result<()> {
        // SAFETY: `addr` is mapped writable kernel text per the constructor contract.
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), addr as *mut u8, bytes.len()) };
        Ok(())
    }

    fn invalidate_icache_range(&mut self, start: usize, end: usize) {
        crate::arch::flush_icache_range(start, end);
    }
}
