//! Grace-period coordinator
//!
//! One thread per domain drives grace periods through the [`GpState`]
//! machine. Contexts ask for grace periods through the funnel in `request`.

mod coordinator;
mod request;
mod state;

pub(crate) use coordinator::spawn_coordinator;
pub use state::GpState;
pub(crate) use state::{AtomicGpState, GP_FLAG_FQS, GP_FLAG_INIT};
