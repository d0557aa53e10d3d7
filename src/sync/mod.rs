//! Synchronization for text patching.
//!
//! Every writer of kernel text after early boot serializes on [`TEXT_MUTEX`].
//! Instruction fetch is never blocked by it; other harts may observe old bytes
//! until the writer has invalidated the range it touched.

use core::fmt;
use spin::{Mutex as SpinMutex, MutexGuard as SpinMutexGuard};

/// The process-wide text patching lock.
pub static TEXT_MUTEX: TextMutex = TextMutex::new();

/// A mutual-exclusion lock over kernel text writers.
pub struct TextMutex {
    inner: SpinMutex<()>,
}

impl TextMutex {
    pub const fn new() -> Self {
        TextMutex {
            inner: SpinMutex::new(()),
        }
    }

    /// Acquires the lock, spinning until it is free.
    ///
    /// The lock is released when the returned guard is dropped.
    pub fn lock(&self) -> TextGuard<'_> {
        TextGuard {
            _guard: self.inner.lock(),
        }
    }

    pub fn try_lock(&self) -> Option<TextGuard<'_>> {
        self.inner.try_lock().map(|guard| TextGuard { _guard: guard })
    }

    /// Returns true if some writer currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

impl fmt::Debug for TextMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_locked() {
            write!(f, "TextMutex {{ <locked> }}")
        } else {
            write!(f, "TextMutex {{ <unlocked> }}")
        }
    }
}

/// Proof that [`TEXT_MUTEX`] (or a private [`TextMutex`]) is held.
pub struct TextGuard<'a> {
    _guard: SpinMutexGuard<'a, ()>,
}
