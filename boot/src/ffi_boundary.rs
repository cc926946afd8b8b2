#![allow(unsafe_op_in_unsafe_fn)]

//! FFI Boundary Layer
//!
//! Only entry points reached from the loader's assembly live here.  Both
//! run the platform's boot phases, try to power off and halt.

#[cfg(target_arch = "x86_64")]
use core::ffi::{CStr, c_char};

#[cfg(target_arch = "x86_64")]
unsafe fn cmdline_str(cmdline: *const c_char) -> Option<&'static str> {
    if cmdline.is_null() {
        return None;
    }
    CStr::from_ptr(cmdline).to_str().ok()
}

/// x86_64 entry on the bootstrap processor.
///
/// # Safety
///
/// All physical memory is mapped at `phys_offset`, the low megabyte is
/// also identity mapped, and `cmdline` is null or a NUL-terminated string
/// that outlives boot.
#[cfg(target_arch = "x86_64")]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kestrel_x86_main(
    rsdp_phys: u64,
    phys_offset: u64,
    cmdline: *const c_char,
) -> ! {
    use kestrel_lib::{config_from_cmdline, cpu, klog_error, klog_init};

    use crate::early_init::{boot_init_run_all, x86};
    use crate::shutdown::{HardwarePorts, acpi_shutdown};

    let config = config_from_cmdline(cmdline_str(cmdline));
    klog_init(config.log_level);

    let mut boot = x86::X86Boot::new(rsdp_phys, phys_offset, config);
    if let Err(err) = boot_init_run_all(&x86::PHASES, &mut boot) {
        klog_error!("[boot:init] boot stopped: {}", err);
    }

    #[cfg(feature = "itests")]
    crate::smp_tests::run_boot_suites();

    let _ = acpi_shutdown(&HardwarePorts, boot.hardware.shutdown);
    cpu::halt_loop()
}

/// Time left for secondary harts to announce themselves before power off.
#[cfg(target_arch = "riscv64")]
const SHUTDOWN_GRACE_MS: u64 = 100;

/// RISC-V entry on the boot hart, with `tp` already holding `hart_id`.
/// Options come from `/chosen/bootargs` in the device tree.
#[cfg(target_arch = "riscv64")]
#[unsafe(no_mangle)]
pub extern "C" fn kestrel_riscv_main(hart_id: usize, fdt: *const u8) -> ! {
    use kestrel_fdt::Fdt;
    use kestrel_lib::{Delay, SpinDelay, config_from_cmdline, klog_error, klog_info, klog_init};

    use crate::early_init::{boot_init_run_all, riscv};
    use crate::sbi::{Firmware, hart_hang};
    use crate::shutdown::sbi_shutdown;

    // SAFETY: firmware hands over its blob and never reclaims it.
    let bootargs = unsafe { Fdt::from_ptr(fdt) }
        .ok()
        .and_then(|blob| blob.bootargs());
    let config = config_from_cmdline(bootargs);
    klog_init(config.log_level);

    let mut boot = riscv::RiscvBoot {
        hart_id,
        fdt,
        config,
    };
    if let Err(err) = boot_init_run_all(&riscv::PHASES, &mut boot) {
        klog_error!("[boot:init] boot stopped: {}", err);
    }

    klog_info!("cpu{}: system will shutdown in a few secs...", hart_id);
    SpinDelay::default().delay_ms(SHUTDOWN_GRACE_MS);

    #[cfg(feature = "itests")]
    crate::smp_tests::run_boot_suites();

    let _ = sbi_shutdown(&Firmware);
    hart_hang()
}
