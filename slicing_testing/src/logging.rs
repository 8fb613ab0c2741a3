//! Shared log capture for integration tests.
//!
//! The library logs through `tracing` with its `log-always` feature, so every
//! event is also forwarded to the `log` facade where [`logtest`] records it.
//! One process-wide [`Logger`] exists; [`LoggerHandle`] hands out exclusive
//! access so captures from concurrently running tests never mix.

use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use log::Level;
use logtest::Logger;
use rstest::fixture;

/// One captured event, rendered with its structured fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapturedEvent {
    /// Severity of the event.
    pub level: Level,
    /// Message followed by `key=value` fields.
    pub text: String,
}

impl CapturedEvent {
    /// Whether the rendered event mentions every string in `needles`.
    #[must_use]
    pub fn mentions(&self, needles: &[&str]) -> bool { needles.iter().all(|n| self.text.contains(n)) }
}

fn global() -> &'static Mutex<Logger> {
    static LOGGER: OnceLock<Mutex<Logger>> = OnceLock::new();
    LOGGER.get_or_init(|| Mutex::new(Logger::start()))
}

/// Exclusive access to the captured log, cleared on acquisition.
pub struct LoggerHandle {
    guard: MutexGuard<'static, Logger>,
}

impl LoggerHandle {
    /// Wait for exclusive access and discard events left by earlier tests.
    #[must_use]
    pub fn acquire() -> Self {
        let mut guard = global().lock().unwrap_or_else(PoisonError::into_inner);
        while guard.pop().is_some() {}
        Self { guard }
    }

    /// Remove and return everything captured so far, oldest first.
    pub fn drain(&mut self) -> Vec<CapturedEvent> {
        std::iter::from_fn(|| self.guard.pop())
            .map(|record| CapturedEvent {
                level: record.level(),
                text: record.args().to_owned(),
            })
            .collect()
    }

    /// Drain the capture, keeping events at `level` that mention every
    /// string in `needles`.
    pub fn drain_matching(&mut self, level: Level, needles: &[&str]) -> Vec<CapturedEvent> {
        self.drain()
            .into_iter()
            .filter(|event| event.level == level && event.mentions(needles))
            .collect()
    }
}

#[allow(
    unused_braces,
    reason = "rustc false positive for single line rstest fixtures"
)]
#[fixture]
pub fn logger() -> LoggerHandle { LoggerHandle::acquire() }
