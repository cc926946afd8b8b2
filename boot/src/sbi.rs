//! Supervisor Binary Interface calls.
//!
//! Everything the RISC-V path asks of firmware goes through [`SbiCall`].
//! [`Firmware`] issues real `ecall`s; tests substitute a recorder.

use core::fmt;

use kestrel_lib::klog_info;

pub const EXT_BASE: usize = 0x10;
pub const EXT_HSM: usize = 0x0048_534D;
pub const EXT_SRST: usize = 0x5352_5354;
pub const EXT_DBCN: usize = 0x4442_434E;

pub const EXT_LEGACY_PUTCHAR: usize = 0x01;
pub const EXT_LEGACY_SHUTDOWN: usize = 0x08;

pub const BASE_GET_SPEC_VERSION: usize = 0;
pub const BASE_GET_IMPL_ID: usize = 1;
pub const BASE_GET_IMPL_VERSION: usize = 2;
pub const BASE_PROBE_EXT: usize = 3;
pub const BASE_GET_MVENDORID: usize = 4;
pub const BASE_GET_MARCHID: usize = 5;
pub const BASE_GET_MIMPID: usize = 6;

pub const HSM_HART_START: usize = 0;
pub const SRST_RESET: usize = 0;
pub const DBCN_CONSOLE_WRITE: usize = 0;

pub const SRST_TYPE_SHUTDOWN: u32 = 0;
pub const SRST_REASON_NONE: u32 = 0;

const IMPL_ID_OPENSBI: usize = 1;

/// Raw `a0`/`a1` pair returned by an SBI call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SbiRet {
    pub error: isize,
    pub value: usize,
}

impl SbiRet {
    pub const fn ok(value: usize) -> Self {
        Self { error: 0, value }
    }

    pub fn into_result(self) -> Result<usize, SbiError> {
        match self.error {
            0 => Ok(self.value),
            code => Err(SbiError::from_code(code)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SbiError {
    Failed,
    NotSupported,
    InvalidParam,
    Denied,
    InvalidAddress,
    AlreadyAvailable,
    Other(isize),
}

impl SbiError {
    pub fn from_code(code: isize) -> Self {
        match code {
            -1 => Self::Failed,
            -2 => Self::NotSupported,
            -3 => Self::InvalidParam,
            -4 => Self::Denied,
            -5 => Self::InvalidAddress,
            -6 => Self::AlreadyAvailable,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for SbiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed => f.write_str("failed"),
            Self::NotSupported => f.write_str("not supported"),
            Self::InvalidParam => f.write_str("invalid parameter"),
            Self::Denied => f.write_str("denied"),
            Self::InvalidAddress => f.write_str("invalid address"),
            Self::AlreadyAvailable => f.write_str("already available"),
            Self::Other(code) => write!(f, "error {}", code),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpecVersion {
    pub major: usize,
    pub minor: usize,
}

impl SpecVersion {
    pub const fn from_raw(raw: usize) -> Self {
        Self {
            major: (raw >> 24) & 0x7F,
            minor: raw & 0xFF_FFFF,
        }
    }
}

pub trait SbiCall {
    fn ecall(&self, ext: usize, fid: usize, args: [usize; 6]) -> SbiRet;

    fn probe_extension(&self, ext: usize) -> bool {
        self.ecall(EXT_BASE, BASE_PROBE_EXT, [ext, 0, 0, 0, 0, 0]).value != 0
    }

    fn base(&self, fid: usize) -> usize {
        self.ecall(EXT_BASE, fid, [0; 6]).value
    }

    fn spec_version(&self) -> SpecVersion {
        SpecVersion::from_raw(self.base(BASE_GET_SPEC_VERSION))
    }

    fn hart_start(&self, hart: usize, start_addr: usize, opaque: usize) -> Result<(), SbiError> {
        self.ecall(EXT_HSM, HSM_HART_START, [hart, start_addr, opaque, 0, 0, 0])
            .into_result()
            .map(|_| ())
    }

    fn system_reset(&self, reset_type: u32, reason: u32) -> SbiRet {
        self.ecall(
            EXT_SRST,
            SRST_RESET,
            [reset_type as usize, reason as usize, 0, 0, 0, 0],
        )
    }

    fn legacy_shutdown(&self) {
        self.ecall(EXT_LEGACY_SHUTDOWN, 0, [0; 6]);
    }

    fn legacy_putchar(&self, byte: u8) {
        self.ecall(EXT_LEGACY_PUTCHAR, 0, [byte as usize, 0, 0, 0, 0, 0]);
    }

    /// Write through the debug console.  The buffer address is passed as
    /// a physical address, so it must be identity mapped.
    fn debug_console_write(&self, bytes: &[u8]) -> Result<usize, SbiError> {
        self.ecall(
            EXT_DBCN,
            DBCN_CONSOLE_WRITE,
            [bytes.len(), bytes.as_ptr() as usize, 0, 0, 0, 0],
        )
        .into_result()
    }
}

/// The SBI implementation underneath this kernel.
#[derive(Clone, Copy, Debug, Default)]
pub struct Firmware;

#[cfg(target_arch = "riscv64")]
impl SbiCall for Firmware {
    fn ecall(&self, ext: usize, fid: usize, args: [usize; 6]) -> SbiRet {
        let error: isize;
        let value: usize;
        // SAFETY: the SBI calling convention clobbers only a0/a1.
        unsafe {
            core::arch::asm!(
                "ecall",
                inlateout("a0") args[0] => error,
                inlateout("a1") args[1] => value,
                in("a2") args[2],
                in("a3") args[3],
                in("a4") args[4],
                in("a5") args[5],
                in("a6") fid,
                in("a7") ext,
                options(nostack),
            );
        }
        SbiRet { error, value }
    }
}

fn impl_name(id: usize) -> Option<&'static str> {
    match id {
        IMPL_ID_OPENSBI => Some("OpenSBI"),
        _ => None,
    }
}

/// One-line description of the firmware.
pub fn print_base_info<S: SbiCall>(sbi: &S) {
    let impl_id = sbi.base(BASE_GET_IMPL_ID);
    let impl_version = sbi.base(BASE_GET_IMPL_VERSION);
    let spec = sbi.spec_version();
    match impl_name(impl_id) {
        Some(name) => klog_info!(
            "SBI: {} v{}.{}, SBI Specification Version {}.{}",
            name,
            impl_version >> 16,
            impl_version & 0xFFFF,
            spec.major,
            spec.minor
        ),
        None => klog_info!(
            "SBI: Unknown implementation {}, SBI Specification Version {}.{}",
            impl_id,
            spec.major,
            spec.minor
        ),
    }
}

/// Vendor, architecture and implementation ids of the calling hart.
pub fn cpu_identify<S: SbiCall>(sbi: &S, hart: usize) {
    klog_info!(
        "cpu{}: vendor {} arch {} imp {}",
        hart,
        sbi.base(BASE_GET_MVENDORID),
        sbi.base(BASE_GET_MARCHID),
        sbi.base(BASE_GET_MIMPID)
    );
}

pub fn hart_hang() -> ! {
    kestrel_lib::cpu::halt_loop()
}
