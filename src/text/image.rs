use alloc::vec;
use alloc::vec::Vec;
use core::ops::Range;

use super::CodeMemory;
use crate::arch::riscv::insn::INSN_SIZE;
use crate::{Error, Result};

/// An in-memory copy of a text window, as seen at link addresses.
///
/// Used by host tooling that pre-patches images and by tests. Every
/// invalidation is recorded so callers can check that each patched range was
/// flushed.
#[derive(Debug, Clone)]
pub struct TextImage {
    base: usize,
    bytes: Vec<u8>,
    flushes: Vec<Range<usize>>,
}

impl TextImage {
    /// A zero-filled window of `size` bytes at `base`.
    pub fn new(base: usize, size: usize) -> Self {
        TextImage {
            base,
            bytes: vec![0; size],
            flushes: Vec::new(),
        }
    }

    pub fn from_words(base: usize, words: &[u32]) -> Self {
        TextImage {
            base,
            bytes: words.iter().flat_map(|w| w.to_le_bytes()).collect(),
            flushes: Vec::new(),
        }
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn end(&self) -> usize {
        self.base + self.bytes.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Every range passed to [`CodeMemory::invalidate_icache_range`], in order.
    pub fn flushes(&self) -> &[Range<usize>] {
        &self.flushes
    }

    pub fn clear_flushes(&mut self) {
        self.flushes.clear();
    }

    /// Stores words without recording a flush, as a loader would.
    pub fn load_words(&mut self, addr: usize, words: &[u32]) -> Result<()> {
        let window = self.window(addr, words.len() * INSN_SIZE)?;
        for (dst, word) in self.bytes[window].chunks_exact_mut(INSN_SIZE).zip(words) {
            dst.copy_from_slice(&word.to_le_bytes());
        }
        Ok(())
    }

    pub fn words(&self, addr: usize, count: usize) -> Result<Vec<u32>> {
        let window = self.window(addr, count * INSN_SIZE)?;
        Ok(self.bytes[window]
            .chunks_exact(INSN_SIZE)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect())
    }

    fn window(&self, addr: usize, len: usize) -> Result<Range<usize>> {
        let out_of_bounds = Error::OutOfBounds { addr, len };
        let start = addr.checked_sub(self.base).ok_or(out_of_bounds)?;
        let end = start.checked_add(len).ok_or(out_of_bounds)?;
        if end > self.bytes.len() {
            return Err(out_of_bounds);
        }
        Ok(start..end)
    }
}

impl CodeMemory for TextImage {
    fn read_code_bytes(&self, addr: usize, buf: &mut [u8]) -> Result<()> {
        let window = self.window(addr, buf.len())?;
        buf.copy_from_slice(&self.bytes[window]);
        Ok(())
    }

    fn write_code_bytes(&mut self, addr: usize, bytes: &[u8]) -> Result<()> {
        let window = self.window(addr, bytes.len())?;
        self.bytes[window].copy_from_slice(bytes);
        Ok(())
    }

    fn invalidate_icache_range(&mut self, start: usize, end: usize) {
        self.flushes.push(start..end);
    }
}
