//! Global log capture shared by tests that assert on `log` output.

use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use log::Level;
use logtest::{Logger, Record};
use rstest::fixture;

/// Exclusive handle to the process-wide [`Logger`].
///
/// Only one [`Logger`] may be installed per process, so every test sharing it
/// holds this guard. Combine with `#[serial]` when tests also spawn tasks
/// that log after the guard is released.
pub struct LoggerHandle {
    guard: MutexGuard<'static, Logger>,
}

impl LoggerHandle {
    /// Acquire the global [`Logger`], discarding anything already captured.
    pub fn new() -> Self {
        static LOGGER: OnceLock<Mutex<Logger>> = OnceLock::new();

        let logger = LOGGER.get_or_init(|| Mutex::new(Logger::start()));
        let guard = logger.lock().unwrap_or_else(PoisonError::into_inner);
        let mut handle = Self { guard };
        handle.drain();
        handle
    }

    /// Remove and return every captured record.
    pub fn drain(&mut self) -> Vec<Record> {
        let mut records = Vec::new();
        while let Some(record) = self.guard.pop() {
            records.push(record);
        }
        records
    }

    /// Drain the capture and report whether any record at `level` contains
    /// every fragment in `needles`.
    pub fn contains(&mut self, level: Level, needles: &[&str]) -> bool {
        self.drain().iter().any(|record| {
            record.level() == level && needles.iter().all(|needle| record.args().contains(needle))
        })
    }
}

impl Default for LoggerHandle {
    fn default() -> Self { Self::new() }
}

impl std::ops::Deref for LoggerHandle {
    type Target = Logger;

    fn deref(&self) -> &Self::Target { &self.guard }
}

impl std::ops::DerefMut for LoggerHandle {
    fn deref_mut(&mut self) -> &mut Self::Target { &mut self.guard }
}

#[allow(
    unused_braces,
    reason = "rustc false positive for single line rstest fixtures"
)]
#[fixture]
pub fn logger() -> LoggerHandle { LoggerHandle::new() }
