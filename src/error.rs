//! Errors surfaced by the patching backends.
//!
//! The live kernel text backend never fails: a bad address there is a broken
//! link-time invariant, not a recoverable condition. Only the simulated
//! [`TextImage`](crate::text::TextImage) and raw table parsing report errors.

use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// An access of `len` bytes at `addr` falls outside the text window.
    #[error("text access of {len} bytes at {addr:#x} is out of bounds")]
    OutOfBounds { addr: usize, len: usize },
    /// A raw site table is not a whole number of records.
    #[error("site table of {len} bytes is not a whole number of records")]
    TruncatedTable { len: usize },
}
