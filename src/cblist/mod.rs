//! Callback staging
//!
//! Callbacks are pushed lock-free into a per-context inbox, then moved into
//! the context's [`SegCbList`] where they wait for their grace period.

mod callback;
mod segment;

pub use callback::{Callback, CallbackRecord};
pub use segment::{SegCbList, DONE, NEXT, NEXT_READY, NSEGS, WAIT};
