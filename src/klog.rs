//! Kernel log ring.
//!
//! Records emitted through the `log` facade are formatted into a bounded
//! circular byte buffer, so diagnostics from early patching survive until a
//! console is available to drain them.

use alloc::collections::VecDeque;
use alloc::string::String;
use core::fmt;
use log::{LevelFilter, Metadata, Record};
use spin::{Mutex, MutexGuard};

/// Size of the global ring in bytes.
pub const LOG_SIZE: usize = 64 * 1024;

/// The global log ring.
pub static LOG: Mutex<Option<Log>> = Mutex::new(None);

static LOGGER: RingLogger = RingLogger;

/// Initializes the global log ring and installs it as the `log` backend.
pub fn init(level: LevelFilter) {
    {
        let mut log = LOG.lock();
        if log.is_none() {
            *log = Some(Log::new(LOG_SIZE));
        }
    }

    // A second call only adjusts the level.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

/// Copies the current contents of the global ring.
pub fn read() -> String {
    let log = LOG.lock();
    let Some(log) = log.as_ref() else {
        return String::new();
    };
    let (head, tail) = log.read();
    let mut text = String::with_capacity(head.len() + tail.len());
    text.push_str(&String::from_utf8_lossy(head));
    text.push_str(&String::from_utf8_lossy(tail));
    text
}

/// A circular buffer for storing log messages.
pub struct Log {
    /// The circular buffer.
    data: VecDeque<u8>,
    /// The maximum size of the buffer.
    size: usize,
}

impl Log {
    /// Creates a new `Log` with the given size.
    ///
    /// One slot is always kept free, so the size is at least two bytes.
    pub fn new(size: usize) -> Log {
        let size = size.max(2);
        Log {
            data: VecDeque::with_capacity(size),
            size,
        }
    }

    /// Reads the log buffer as a pair of slices.
    pub fn read(&self) -> (&[u8], &[u8]) {
        self.data.as_slices()
    }

    /// Writes to the log buffer, evicting the oldest bytes when full.
    pub fn write(&mut self, buf: &[u8]) {
        for &b in buf {
            while self.data.len() + 1 >= self.size {
                self.data.pop_front();
            }
            self.data.push_back(b);
        }
    }
}

/// A writer appending to the global ring while holding its lock.
pub struct Writer<'a> {
    log: MutexGuard<'a, Option<Log>>,
}

impl<'a> Writer<'a> {
    pub fn new() -> Writer<'a> {
        Writer { log: LOG.lock() }
    }

    pub fn write(&mut self, buf: &[u8]) {
        if let Some(ref mut log) = *self.log {
            log.write(buf);
        }
    }
}

impl fmt::Write for Writer<'_> {
    fn write_str(&mut self, s: &str) -> Result<(), fmt::Error> {
        self.write(s.as_bytes());
        Ok(())
    }
}

struct RingLogger;

impl log::Log for RingLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut writer = Writer::new();
        let _ = fmt::Write::write_fmt(
            &mut writer,
            format_args!("{:<5} {}: {}\n", record.level(), record.target(), record.args()),
        );
    }

    fn flush(&self) {}
}
