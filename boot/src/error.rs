use core::fmt;

use kestrel_lib::InventoryError;

/// Failures surfaced by bring-up and shutdown.  None of them are fatal to
/// boot on their own; the caller logs and degrades.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
    /// A firmware extension or hardware facility the step wanted is absent.
    CapabilityUnavailable(&'static str),
    /// Fewer processors reported in than were expected.
    StartupTimeout { running: usize, expected: usize },
    /// Every known power-off path was attempted and execution continued.
    ShutdownFailed,
    InventoryFull,
    DuplicateCpu(u32),
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CapabilityUnavailable(what) => write!(f, "{} not available", what),
            Self::StartupTimeout { running, expected } => {
                write!(f, "only {} of {} CPUs running", running, expected)
            }
            Self::ShutdownFailed => f.write_str("shutdown failed"),
            Self::InventoryFull => f.write_str("CPU inventory full"),
            Self::DuplicateCpu(id) => write!(f, "CPU id {} already recorded", id),
        }
    }
}

impl From<InventoryError> for BootError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::Full { .. } => Self::InventoryFull,
            InventoryError::Duplicate { id } => Self::DuplicateCpu(id),
        }
    }
}

pub type BootResult<T = ()> = Result<T, BootError>;
