//! Hart bring-up through the SBI hart state management extension.
//!
//! There is no handshake here: every hart id below `MAX_CPUS` other than
//! the boot hart gets one start request and the boot hart moves on.
//! Harts announce themselves from [`secondary_hart_main`] whenever they
//! get there.

use kestrel_lib::config::MAX_CPUS;
use kestrel_lib::{klog_debug, klog_info, klog_warn};

use super::BringupContext;
use crate::error::{BootError, BootResult};
use crate::sbi::{EXT_HSM, SbiCall, cpu_identify};

/// Ask firmware to start every other hart at `entry`.  Returns how many
/// requests firmware accepted.
pub fn start_secondary_harts<S: SbiCall>(
    sbi: &S,
    ctx: &BringupContext,
    boot_hart: usize,
    entry: usize,
) -> BootResult<usize> {
    if !sbi.probe_extension(EXT_HSM) {
        klog_warn!("sbi: warning: HSM extension is not available.");
        return Err(BootError::CapabilityUnavailable("HSM"));
    }

    // Started harts report in through the same lock, so they wait here
    // until their record exists.
    let mut inventory = ctx.lock();
    let mut started = 0;
    for hart in 0..MAX_CPUS {
        if hart == boot_hart {
            continue;
        }
        if let Err(err) = sbi.hart_start(hart, entry, 0) {
            klog_debug!("sbi: hart {} not started: {}", hart, err);
            continue;
        }
        match BringupContext::add_started(&mut inventory, hart as u32) {
            Ok(_) => started += 1,
            Err(err) => klog_warn!("sbi: hart {} started but not recorded: {}", hart, err),
        }
    }
    drop(inventory);

    klog_info!("sbi: {} start requests accepted", started);
    Ok(started)
}

/// Identify, announce and report in.
pub fn secondary_hart_body<S: SbiCall>(sbi: &S, ctx: &BringupContext, hart: usize) -> Option<usize> {
    cpu_identify(sbi, hart);
    let index = ctx.report_in(hart as u32);
    match index {
        Some(_) => klog_info!("cpu{}: non_boot_cpu", hart),
        None => klog_warn!("cpu{}: started without a record", hart),
    }
    index
}

/// Rust entry for secondary harts, reached from `kestrel_hart_entry` with
/// `tp` and `sp` already set.
#[cfg(target_arch = "riscv64")]
#[unsafe(no_mangle)]
pub extern "C" fn secondary_hart_main(hart: usize) -> ! {
    secondary_hart_body(&crate::sbi::Firmware, &super::BRINGUP, hart);
    crate::sbi::hart_hang()
}

#[cfg(target_arch = "riscv64")]
unsafe extern "C" {
    fn kestrel_hart_entry();
}

/// Physical start address handed to `hart_start`.
#[cfg(target_arch = "riscv64")]
pub fn hart_entry_address() -> usize {
    kestrel_hart_entry as usize
}

// Firmware enters with a0 = hart id and the MMU off.  Each hart takes the
// `AP_STACKS` slot named by its id.
#[cfg(target_arch = "riscv64")]
core::arch::global_asm!(
    ".section .text",
    ".global kestrel_hart_entry",
    "kestrel_hart_entry:",
    "    mv tp, a0",
    "    li t0, {max_cpus}",
    "    bgeu a0, t0, 2f",
    "    la sp, {stacks}",
    "    li t0, {stack_size}",
    "    addi t1, a0, 1",
    "    mul t0, t0, t1",
    "    add sp, sp, t0",
    "    call secondary_hart_main",
    "2:",
    "    wfi",
    "    j 2b",
    stacks = sym super::AP_STACKS,
    stack_size = const kestrel_lib::config::AP_STACK_SIZE,
    max_cpus = const MAX_CPUS,
);
