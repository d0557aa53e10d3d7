//! # RISC-V

#[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
pub mod cacheflush;
pub mod insn;
pub mod runtime_const;
#[cfg(test)]
pub(crate) mod sim;
