use std::collections::HashMap;
use std::sync::Mutex;

use log::warn;

/// Last status seen per row, for updates that arrive without an old record.
/// An entry lives until the row is deleted.
pub(crate) struct ObservedStatuses<S> {
    seen: Mutex<HashMap<String, S>>,
}

impl<S: Copy> ObservedStatuses<S> {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Records `current` for `id` and returns the status it replaces. The
    /// feed's own previous status wins over the remembered one.
    pub fn observe(&self, id: &str, reported: Option<S>, current: S) -> Option<S> {
        let mut seen = self.seen.lock().unwrap_or_else(|poisoned| {
            warn!("Observed status mutex was poisoned, recovering");
            poisoned.into_inner()
        });
        let remembered = seen.insert(id.to_string(), current);
        reported.or(remembered)
    }

    pub fn forget(&self, id: &str) {
        let mut seen = self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        seen.remove(id);
    }
}
