//! Architecture support.
//!
//! The RISC-V instruction encoder is plain integer arithmetic and is always
//! compiled, so host tooling and tests can use it. Instruction cache
//! maintenance for the live text backend is only real on RISC-V.

pub mod riscv;

#[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
pub use self::riscv::cacheflush::flush_icache_range;

/// Other targets only build the live backend for host tooling; there the
/// writes only need ordering.
#[cfg(not(any(target_arch = "riscv32", target_arch = "riscv64")))]
pub fn flush_icache_range(_start: usize, _end: usize) {
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
}
