//! oxircu - A hierarchical Read-Copy-Update grace-period engine
//!
//! Readers enter cheap read-side critical sections; writers publish a new
//! version, then wait for a grace period (or queue a callback) before
//! reclaiming the old one. Quiescent states are aggregated through a tree of
//! nodes so that contexts rarely contend on the same lock.
//!
//! # Features
//!
//! - Configurable node tree (fan-out per level) with child-to-parent reporting
//! - Coordinator thread with forced quiescent states for idle and offline contexts
//! - Per-context segmented callback lists with a lock-free inbox
//! - Expedited grace periods, callback barriers and polled grace periods
//! - Runtime hotplug of contexts with callback migration
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use oxircu::{GracePeriodDomain, RcuConfig};
//!
//! let domain = GracePeriodDomain::new(RcuConfig::new().with_nr_cpus(4))?;
//!
//! // Reader on context 0
//! {
//!     let _guard = domain.read_lock(0)?;
//!     // dereference shared data
//! }
//!
//! // Writer on context 1: free the old version after a grace period
//! domain.defer_drop(1, old_version)?;
//!
//! // Every context's owner ticks periodically
//! domain.check_and_report(0)?;
//! domain.check_and_report(1)?;
//! ```

#![warn(missing_docs)]

pub mod cblist;
pub mod config;
mod data;
mod domain;
pub mod error;
mod expedited;
pub mod gp;
mod hotplug;
pub mod kick;
pub mod seq;
pub mod stats;
pub mod tree;

// Re-exports for convenience
pub use config::{ConfigError, RcuConfig, RcuFileConfig};
pub use domain::{GracePeriodDomain, ReadGuard};
pub use error::{RcuError, Result};
pub use gp::GpState;
pub use kick::{ContextKicker, KickReason, NoopKicker};
pub use tree::{NodeSnapshot, TreeGeometry};

/// Constants used throughout the library
pub mod constants {
    /// Width of every node mask, and so the largest fan-out
    pub const MAX_FANOUT: usize = 64;

    /// Deepest supported tree
    pub const MAX_LEVELS: usize = 4;

    /// Batch limit while a context is callback-overloaded
    pub const MAX_BLIMIT: usize = 10_000;
}

/// Prelude module for common imports
pub mod prelude {
    pub use crate::config::RcuConfig;
    pub use crate::domain::{GracePeriodDomain, ReadGuard};
    pub use crate::error::{RcuError, Result};
    pub use crate::kick::{ContextKicker, KickReason};
}
