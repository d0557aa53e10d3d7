//! # rvpatch
//!
//! Live instruction patching for RISC-V kernels: runtime constants baked into
//! `lui`/`addi` immediates and shift amounts, cpufeature alternatives and vendor
//! errata.
//!
//! Every patching path goes through two primitives on [`text::CodeMemory`]:
//! writing instruction bytes and invalidating the instruction cache over the
//! written range. Writers that can run concurrently with other harts take
//! [`sync::TEXT_MUTEX`] first.

#![allow(clippy::identity_op)]
#![allow(clippy::new_without_default)]
#![allow(clippy::unusual_byte_groupings)]

// Strict safety enforcement
#![deny(clippy::not_unsafe_ptr_arg_deref)]
#![deny(clippy::cast_ptr_alignment)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![deny(static_mut_refs)]
#![deny(unused_must_use)]

#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
extern crate bitflags;

pub mod alternative;
pub mod arch;
pub mod config;
pub mod cpufeature;
pub mod crc_t10dif;
pub mod errata;
pub mod error;
pub mod klog;
pub mod runtime_const;
pub mod sync;
pub mod text;

pub use error::{Error, Result};

#[doc(hidden)]
pub use paste;

/// Declares accessors returning the address of linker-provided symbols.
#[macro_export]
macro_rules! linker_offsets(
    ($($name:ident),*) => {
        $(
        #[inline]
        #[allow(non_snake_case)]
        pub fn $name() -> usize {
            unsafe extern "C" {
                static $name: u8;
            }
            (&raw const $name) as usize
        }
        )*
    }
);
