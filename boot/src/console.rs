//! klog backends: COM1 on x86_64, the SBI console on RISC-V.

use core::fmt;

use crate::sbi::SbiCall;

/// `fmt::Write` over the SBI console.  Prefers the debug console
/// extension and drops to one legacy call per byte without it.
pub struct SbiWriter<'a, S: SbiCall> {
    sbi: &'a S,
    debug_console: bool,
}

impl<'a, S: SbiCall> SbiWriter<'a, S> {
    pub fn new(sbi: &'a S, debug_console: bool) -> Self {
        Self { sbi, debug_console }
    }

    fn write_legacy(&self, bytes: &[u8]) {
        for &b in bytes {
            self.sbi.legacy_putchar(b);
        }
    }
}

impl<S: SbiCall> fmt::Write for SbiWriter<'_, S> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if !self.debug_console {
            self.write_legacy(s.as_bytes());
            return Ok(());
        }
        let mut rest = s.as_bytes();
        while !rest.is_empty() {
            match self.sbi.debug_console_write(rest) {
                Ok(0) => return Err(fmt::Error),
                Ok(written) => rest = &rest[written.min(rest.len())..],
                Err(_) => {
                    self.write_legacy(rest);
                    break;
                }
            }
        }
        Ok(())
    }
}

#[cfg(target_arch = "x86_64")]
mod serial {
    use core::fmt::{self, Write};

    use spin::Mutex;
    use uart_16550::SerialPort;

    use kestrel_lib::klog_register_backend;

    const COM1_BASE: u16 = 0x3F8;

    // SAFETY: 0x3F8 is the standard COM1 base on every PC-compatible.
    static COM1: Mutex<SerialPort> = Mutex::new(unsafe { SerialPort::new(COM1_BASE) });

    fn serial_backend(args: fmt::Arguments<'_>) {
        let mut port = COM1.lock();
        let _ = port.write_fmt(args);
        let _ = port.write_str("\n");
    }

    pub fn init() {
        COM1.lock().init();
        klog_register_backend(serial_backend);
    }
}

#[cfg(target_arch = "x86_64")]
pub use serial::init as init_serial;

#[cfg(target_arch = "riscv64")]
mod sbi_console {
    use core::fmt::{self, Write};
    use core::sync::atomic::{AtomicBool, Ordering};

    use kestrel_lib::{klog_register_backend, klog_warn};

    use super::SbiWriter;
    use crate::sbi::{EXT_DBCN, Firmware, SbiCall};

    static DEBUG_CONSOLE: AtomicBool = AtomicBool::new(false);

    fn sbi_backend(args: fmt::Arguments<'_>) {
        let mut out = SbiWriter::new(&Firmware, DEBUG_CONSOLE.load(Ordering::Relaxed));
        let _ = out.write_fmt(args);
        let _ = out.write_str("\n");
    }

    pub fn init() {
        let debug_console = Firmware.probe_extension(EXT_DBCN);
        DEBUG_CONSOLE.store(debug_console, Ordering::Relaxed);
        klog_register_backend(sbi_backend);
        if !debug_console {
            klog_warn!("sbi: warning: deprecated sbi_console_putchar extension in use.");
        }
    }
}

#[cfg(target_arch = "riscv64")]
pub use sbi_console::init as init_sbi;
