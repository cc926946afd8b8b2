//! Best-effort power off.
//!
//! There is no way to observe whether a write took effect short of the
//! machine stopping, so every known path is tried in a fixed order and
//! `ShutdownFailed` means only that execution is still going.

use core::convert::Infallible;

use kestrel_lib::config::{EMULATOR_SHUTDOWN_PORT, EMULATOR_SHUTDOWN_VALUE};
use kestrel_lib::{ShutdownMechanism, klog_error, klog_info, klog_warn};

use crate::error::{BootError, BootResult};
use crate::sbi::{EXT_SRST, SRST_REASON_NONE, SRST_TYPE_SHUTDOWN, SbiCall};

pub const SLP_EN: u16 = 1 << 13;
const SLP_TYP_SHIFT: u16 = 10;
const SLP_TYP_MAX: u16 = 7;

/// Without an AML interpreter the S5 sleep type is unknown; 0 is tried
/// first and then every value in turn.
const SLP_TYP_GUESS: u16 = 0;

pub trait PortIo {
    fn write_u16(&self, port: u16, value: u16);
}

#[cfg(target_arch = "x86_64")]
pub struct HardwarePorts;

#[cfg(target_arch = "x86_64")]
impl PortIo for HardwarePorts {
    fn write_u16(&self, port: u16, value: u16) {
        let mut port = x86_64::instructions::port::Port::<u16>::new(port);
        // SAFETY: only power-management ports are written, and only on the
        // way down.
        unsafe { port.write(value) }
    }
}

pub const fn pm1_sleep_command(slp_typ: u16) -> u16 {
    (slp_typ << SLP_TYP_SHIFT) | SLP_EN
}

/// PM1a sleep command, then a sweep of every sleep type, then the
/// emulator's debug exit port.
pub fn acpi_shutdown<P: PortIo>(ports: &P, mechanism: ShutdownMechanism) -> BootResult<Infallible> {
    klog_info!("ACPI: Initiating shutdown...");

    match mechanism {
        ShutdownMechanism::Pm1aControl { port } => {
            ports.write_u16(port, pm1_sleep_command(SLP_TYP_GUESS));
            for slp_typ in 0..=SLP_TYP_MAX {
                ports.write_u16(port, pm1_sleep_command(slp_typ));
            }
        }
        _ => klog_warn!("ACPI: No PM1a control block"),
    }

    ports.write_u16(EMULATOR_SHUTDOWN_PORT, EMULATOR_SHUTDOWN_VALUE);

    klog_error!("ACPI: Shutdown failed");
    Err(BootError::ShutdownFailed)
}

/// System reset extension when firmware has it, then the legacy call.
pub fn sbi_shutdown<S: SbiCall>(sbi: &S) -> BootResult<Infallible> {
    if sbi.probe_extension(EXT_SRST) {
        let ret = sbi.system_reset(SRST_TYPE_SHUTDOWN, SRST_REASON_NONE);
        if let Err(err) = ret.into_result() {
            klog_warn!("sbi: system reset refused: {}", err);
        }
    }
    sbi.legacy_shutdown();

    klog_error!("sbi: Shutdown failed");
    Err(BootError::ShutdownFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sbi::fake::FakeSbi;
    use crate::sbi::{EXT_LEGACY_SHUTDOWN, SRST_RESET};
    use core::cell::RefCell;

    #[derive(Default)]
    struct RecordingPorts {
        writes: RefCell<Vec<(u16, u16)>>,
    }

    impl PortIo for RecordingPorts {
        fn write_u16(&self, port: u16, value: u16) {
            self.writes.borrow_mut().push((port, value));
        }
    }

    #[test]
    fn test_pm1a_write_order() {
        let ports = RecordingPorts::default();
        let result = acpi_shutdown(&ports, ShutdownMechanism::Pm1aControl { port: 0xB004 });
        assert_eq!(result, Err(BootError::ShutdownFailed));

        let mut expected = vec![(0xB004, 0x2000)];
        for slp_typ in 0..8u16 {
            expected.push((0xB004, (slp_typ << 10) | 0x2000));
        }
        expected.push((0x604, 0x2000));
        assert_eq!(*ports.writes.borrow(), expected);
    }

    #[test]
    fn test_without_pm1a_only_emulator_port() {
        let ports = RecordingPorts::default();
        assert!(acpi_shutdown(&ports, ShutdownMechanism::Unavailable).is_err());
        assert_eq!(*ports.writes.borrow(), vec![(0x604, 0x2000)]);
    }

    #[test]
    fn test_sbi_reset_then_legacy() {
        let sbi = FakeSbi::with_extensions(&[EXT_SRST]);
        assert_eq!(sbi_shutdown(&sbi), Err(BootError::ShutdownFailed));
        assert_eq!(
            sbi.calls_to(EXT_SRST),
            vec![(SRST_RESET, [SRST_TYPE_SHUTDOWN as usize, 0, 0, 0, 0, 0])]
        );
        assert_eq!(sbi.calls_to(EXT_LEGACY_SHUTDOWN).len(), 1);
    }

    #[test]
    fn test_sbi_legacy_only_without_srst() {
        let sbi = FakeSbi::default();
        assert!(sbi_shutdown(&sbi).is_err());
        assert!(sbi.calls_to(EXT_SRST).is_empty());
        assert_eq!(sbi.calls_to(EXT_LEGACY_SHUTDOWN).len(), 1);
    }
}
