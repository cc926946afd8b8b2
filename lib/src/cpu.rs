//! Primitive processor operations shared by both platforms.
//!
//! The identity of the executing processor is supplied by the platform
//! layer through [`register_cpu_id_fn`] (LAPIC id on x86_64, hart id on
//! RISC-V).  Until one is registered every caller reads as processor 0,
//! which is correct for the single-processor window before bring-up.

#[cfg(any(target_arch = "x86_64", target_arch = "riscv64"))]
use core::arch::asm;
use core::sync::atomic::{AtomicPtr, Ordering};

/// Returns the hardware identifier of the executing processor.
pub type CpuIdFn = fn() -> u32;

static CPU_ID_FN: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

pub fn register_cpu_id_fn(f: CpuIdFn) {
    CPU_ID_FN.store(f as *mut (), Ordering::Release);
}

#[inline]
pub fn current_cpu_id() -> u32 {
    let ptr = CPU_ID_FN.load(Ordering::Acquire);
    if ptr.is_null() {
        return 0;
    }
    // SAFETY: only `register_cpu_id_fn` stores into CPU_ID_FN, and it only
    // stores valid `CpuIdFn` pointers.
    let f: CpuIdFn = unsafe { core::mem::transmute::<*mut (), CpuIdFn>(ptr) };
    f()
}

/// Spin-loop hint (PAUSE on x86_64).
#[inline(always)]
pub fn pause() {
    core::hint::spin_loop();
}

/// Park the processor until the next interrupt or event.
#[inline(always)]
pub fn wait_for_interrupt() {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        asm!("hlt", options(nomem, nostack, preserves_flags));
    }
    #[cfg(target_arch = "riscv64")]
    unsafe {
        asm!("wfi", options(nomem, nostack, preserves_flags));
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "riscv64")))]
    core::hint::spin_loop();
}

/// Halt forever in a low-power wait loop. Does not return.
#[inline(always)]
pub fn halt_loop() -> ! {
    loop {
        wait_for_interrupt();
    }
}
