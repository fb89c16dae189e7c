//! Deferred callbacks

use std::fmt;

/// Work deferred until a grace period has elapsed
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// A queued callback together with the grace-period sequence observed when it
/// was registered
pub struct CallbackRecord {
    func: Callback,
    registered_seq: Option<u64>,
}

impl CallbackRecord {
    /// Wrap `func`, registered while the global sequence read `registered_seq`
    pub fn new(func: Callback, registered_seq: u64) -> Self {
        Self {
            func,
            registered_seq: Some(registered_seq),
        }
    }

    /// Wrap `func` for entraining behind existing callbacks. It only has to
    /// run after them, not after a grace period of its own.
    pub fn entrained(func: Callback) -> Self {
        Self {
            func,
            registered_seq: None,
        }
    }

    /// Sequence observed at registration; `None` for entrained callbacks
    pub fn registered_seq(&self) -> Option<u64> {
        self.registered_seq
    }

    /// Run the callback, consuming the record
    pub fn invoke(self) {
        (self.func)()
    }
}

impl fmt::Debug for CallbackRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRecord")
            .field("registered_seq", &self.registered_seq)
            .finish_non_exhaustive()
    }
}
