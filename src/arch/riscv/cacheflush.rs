use core::arch::asm;

/// Makes freshly written instructions visible to every hart.
///
/// RISC-V only offers whole-cache instruction fetch fences, so the range is
/// ignored: the local hart executes `fence.i` and the remote harts are asked
/// to do the same through SBI.
pub fn flush_icache_range(_start: usize, _end: usize) {
    // SAFETY: fence.i has no effect besides synchronizing instruction fetch.
    unsafe { asm!("fence.i", options(nostack, preserves_flags)) };

    // A base of usize::MAX addresses all harts.
    let ret = sbi_rt::remote_fence_i(sbi_rt::HartMask::from_mask_base(0, usize::MAX));
    if ret.error != 0 {
        log::warn!("SBI remote fence.i failed: error {:#x}", ret.error);
    }
}
