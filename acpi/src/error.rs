use core::fmt;

/// Why a firmware root pointer was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootFault {
    Null,
    Unmapped,
    BadSignature,
    BadChecksum,
    BadExtendedChecksum,
    /// The extended structure declares an implausible length.
    BadLength,
    /// The table the root pointer leads to is not a valid RSDT/XSDT.
    BadRootTable,
}

impl RootFault {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Null => "null address",
            Self::Unmapped => "address not mapped",
            Self::BadSignature => "signature mismatch",
            Self::BadChecksum => "checksum mismatch",
            Self::BadExtendedChecksum => "extended checksum mismatch",
            Self::BadLength => "length out of range",
            Self::BadRootTable => "root table invalid",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcpiError {
    /// The root pointer (or the table list it names) cannot be trusted.
    InvalidRoot(RootFault),
    /// A table's contents contradict its own header; `offset` is relative
    /// to the start of the table.
    MalformedTable { signature: [u8; 4], offset: usize },
    /// A table failed its checksum and was skipped.
    TableChecksum { signature: [u8; 4] },
    /// A table-list entry points at memory that cannot be mapped.
    UnmappedTable { phys: u64 },
}

pub type AcpiResult<T = ()> = Result<T, AcpiError>;

/// Displays a table signature as text, substituting `?` for non-ASCII.
pub struct Signature(pub [u8; 4]);

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            let c = if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '?'
            };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

impl fmt::Display for AcpiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRoot(fault) => write!(f, "invalid root pointer: {}", fault.as_str()),
            Self::MalformedTable { signature, offset } => write!(
                f,
                "malformed {} table at offset {:#x}",
                Signature(*signature),
                offset
            ),
            Self::TableChecksum { signature } => {
                write!(f, "{} table checksum mismatch", Signature(*signature))
            }
            Self::UnmappedTable { phys } => write!(f, "table at {:#x} not mapped", phys),
        }
    }
}
