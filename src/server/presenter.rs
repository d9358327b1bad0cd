//! Exclusive-presenter state machine
//!
//! At most one peer may present the screen at a time. All transitions go
//! through one mutex, so concurrent requests observe an atomic grant.

use parking_lot::Mutex;

/// Holds the current presenter's display name, `None` when idle
#[derive(Default)]
pub struct Presenter {
    current: Mutex<Option<String>>,
}

impl Presenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to become the presenter. Succeeds only from the idle state.
    pub fn request(&self, name: &str) -> bool {
        let mut current = self.current.lock();
        if current.is_some() {
            return false;
        }
        *current = Some(name.to_string());
        true
    }

    /// Stop presenting. Succeeds only if `name` is the active presenter;
    /// a stop from anyone else leaves the state unchanged.
    pub fn stop(&self, name: &str) -> bool {
        let mut current = self.current.lock();
        if current.as_deref() == Some(name) {
            *current = None;
            true
        } else {
            false
        }
    }

    /// Is `name` the active presenter?
    pub fn is_presenting(&self, name: &str) -> bool {
        self.current.lock().as_deref() == Some(name)
    }

    /// The active presenter's name, if any.
    pub fn current(&self) -> Option<String> {
        self.current.lock().clone()
    }
}
