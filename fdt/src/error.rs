use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdtError {
    /// Null pointer, short blob or wrong magic.
    NoDeviceTree,
    /// A header offset or token payload points outside the blob.
    Truncated { offset: usize },
    UnknownToken { token: u32, offset: usize },
    /// The output sink refused a write.
    Output,
}

pub type FdtResult<T = ()> = Result<T, FdtError>;

impl From<fmt::Error> for FdtError {
    fn from(_: fmt::Error) -> Self {
        Self::Output
    }
}

impl fmt::Display for FdtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoDeviceTree => f.write_str("invalid or missing device tree"),
            Self::Truncated { offset } => write!(f, "blob truncated at offset {:#x}", offset),
            Self::UnknownToken { token, .. } => write!(f, "unknown token {:#x}", token),
            Self::Output => f.write_str("output sink failed"),
        }
    }
}
