use crate::types::SarResult;
use std::sync::{Mutex, OnceLock};

/// Run-scoped value computed by the first caller and shared afterwards
///
/// Concurrent callers block until the first initialization finishes and then
/// read the published value. A failed initialization publishes nothing, so the
/// next caller retries.
#[derive(Debug, Default)]
pub struct InitOnce<T> {
    cell: OnceLock<T>,
    lock: Mutex<()>,
}

impl<T> InitOnce<T> {
    pub const fn new() -> Self {
        Self { cell: OnceLock::new(), lock: Mutex::new(()) }
    }

    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }

    pub fn get_or_try_init<F>(&self, init: F) -> SarResult<&T>
    where
        F: FnOnce() -> SarResult<T>,
    {
        if let Some(value) = self.cell.get() {
            return Ok(value);
        }

        // a panicking initializer leaves the cell empty, so a poisoned lock is safe to reuse
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(value) = self.cell.get() {
            return Ok(value);
        }

        let value = init()?;
        Ok(self.cell.get_or_init(|| value))
    }

    pub fn get_or_init<F>(&self, init: F) -> &T
    where
        F: FnOnce() -> T,
    {
        self.cell.get_or_init(init)
    }
}
