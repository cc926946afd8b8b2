//! Fixed ACPI Description Table.
//!
//! Only the fields the shutdown path needs are extracted.  The sleep type
//! for S5 lives in the DSDT's `\_S5` package, which would require AML
//! evaluation; the shutdown path sweeps candidate values instead.

use kestrel_lib::ShutdownMechanism;

use crate::error::AcpiResult;
use crate::tables::{Sdt, read_u8, read_u32};

pub const FADT_SIGNATURE: &[u8; 4] = b"FACP";

const FADT_DSDT_OFFSET: usize = 40;
const FADT_PM1A_CNT_BLK_OFFSET: usize = 64;
const FADT_PM1_CNT_LEN_OFFSET: usize = 89;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fadt {
    pub dsdt: u32,
    /// I/O port of the PM1a control block, or 0 if absent.
    pub pm1a_control_block: u32,
    /// 0 when the table predates the field.
    pub pm1_control_length: u8,
}

impl Fadt {
    pub fn parse(sdt: &Sdt<'_>) -> AcpiResult<Self> {
        let bytes = sdt.bytes();
        if sdt.signature() != *FADT_SIGNATURE {
            return Err(sdt.malformed(0));
        }
        let pm1a_control_block = read_u32(bytes, FADT_PM1A_CNT_BLK_OFFSET)
            .ok_or_else(|| sdt.malformed(FADT_PM1A_CNT_BLK_OFFSET))?;
        Ok(Self {
            dsdt: read_u32(bytes, FADT_DSDT_OFFSET).unwrap_or(0),
            pm1a_control_block,
            pm1_control_length: read_u8(bytes, FADT_PM1_CNT_LEN_OFFSET).unwrap_or(0),
        })
    }

    /// PM1a control is an I/O port; anything outside the 16-bit port space
    /// cannot be used.
    pub fn shutdown_mechanism(&self) -> ShutdownMechanism {
        match u16::try_from(self.pm1a_control_block) {
            Ok(0) | Err(_) => ShutdownMechanism::Unavailable,
            Ok(port) => ShutdownMechanism::Pm1aControl { port },
        }
    }
}
