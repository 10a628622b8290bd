use std::sync::{Mutex, MutexGuard, OnceLock};

use logtest::Logger;
use rstest::fixture;

/// Handle to the global logger with exclusive access.
///
/// `logtest` installs a process-wide logger, so only one test may inspect
/// captured records at a time. The handle holds a lock for its lifetime and
/// discards anything left over from earlier tests when acquired.
pub struct LoggerHandle {
    guard: MutexGuard<'static, Logger>,
}

impl LoggerHandle {
    /// Acquire the global [`Logger`] instance with an empty buffer.
    ///
    /// # Panics
    ///
    /// Panics if a previous holder panicked while holding the logger.
    #[must_use]
    pub fn new() -> Self {
        static LOGGER: OnceLock<Mutex<Logger>> = OnceLock::new();

        let logger = LOGGER.get_or_init(|| Mutex::new(Logger::start()));
        let mut guard = logger.lock().expect("logger poisoned");
        while guard.pop().is_some() {}

        Self { guard }
    }

    /// Drain every captured message, oldest first.
    pub fn messages(&mut self) -> Vec<String> {
        std::iter::from_fn(|| self.guard.pop())
            .map(|record| record.args().to_owned())
            .collect()
    }

    /// Returns `true` if any captured message contains `needle`.
    ///
    /// Drains the buffer.
    pub fn contains(&mut self, needle: &str) -> bool {
        self.messages().iter().any(|message| message.contains(needle))
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
