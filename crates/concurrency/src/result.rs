//! Background-job result indicator (C6).

use aggstate_core::AggError;
use parking_lot::Mutex;

/// `Has() / Set(err) / GetAndReset()`: an indicator only, not a queue.
/// Consumers are expected to re-query whatever state the background job
/// mutated; this just flags "did the last run fail, and if so why."
#[derive(Default)]
pub struct BackgroundResult {
    last_error: Mutex<Option<AggError>>,
}

impl BackgroundResult {
    /// A fresh indicator with no recorded error.
    pub fn new() -> Self {
        BackgroundResult {
            last_error: Mutex::new(None),
        }
    }

    /// True iff an error is currently recorded.
    pub fn has(&self) -> bool {
        self.last_error.lock().is_some()
    }

    /// Record an error, overwriting any previous one.
    pub fn set(&self, err: AggError) {
        *self.last_error.lock() = Some(err);
    }

    /// Take the recorded error, if any, clearing the indicator.
    pub fn get_and_reset(&self) -> Option<AggError> {
        self.last_error.lock().take()
    }
}
