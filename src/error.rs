//! Error types for domain operations

use std::io;

/// Errors returned by [`GracePeriodDomain`](crate::GracePeriodDomain) operations
#[derive(Debug, thiserror::Error)]
pub enum RcuError {
    /// Context index outside `0..nr_cpus`
    #[error("invalid context {cpu} (domain has {nr_cpus} contexts)")]
    InvalidCpu {
        /// Requested context
        cpu: usize,
        /// Number of contexts in the domain
        nr_cpus: usize,
    },
    /// Operation requires an online context
    #[error("context {0} is offline")]
    CpuOffline(usize),
    /// Context is already online
    #[error("context {0} is already online")]
    CpuAlreadyOnline(usize),
    /// Refused to take the last online context offline
    #[error("context {0} is the last online context")]
    LastOnlineCpu(usize),
    /// Operation is illegal inside a read-side critical section
    #[error("context {0} is inside a read-side critical section")]
    ReadSideActive(usize),
    /// The coordinator has been shut down
    #[error("grace-period domain is shut down")]
    ShutDown,
    /// Configuration rejected by validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The coordinator thread could not be spawned
    #[error("failed to spawn coordinator thread: {0}")]
    Spawn(#[from] io::Error),
}

impl RcuError {
    /// Whether retrying after a hotplug event could succeed
    pub const fn is_hotplug_state(&self) -> bool {
        matches!(
            self,
            RcuError::CpuOffline(_) | RcuError::CpuAlreadyOnline(_) | RcuError::LastOnlineCpu(_)
        )
    }
}

/// Result alias for domain operations
pub type Result<T> = std::result::Result<T, RcuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = RcuError::InvalidCpu { cpu: 9, nr_cpus: 4 };
        assert_eq!(err.to_string(), "invalid context 9 (domain has 4 contexts)");
        assert_eq!(RcuError::CpuOffline(3).to_string(), "context 3 is offline");
    }

    #[test]
    fn test_hotplug_classification() {
        assert!(RcuError::CpuOffline(0).is_hotplug_state());
        assert!(RcuError::LastOnlineCpu(0).is_hotplug_state());
        assert!(!RcuError::ShutDown.is_hotplug_state());
    }

    #[test]
    fn test_from_io() {
        let err: RcuError = io::Error::new(io::ErrorKind::Other, "boom").into();
        assert!(matches!(err, RcuError::Spawn(_)));
    }
}
