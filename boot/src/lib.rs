//! Kestrel boot: processor bring-up and power off on top of firmware
//! discovery.
//!
//! - x86_64: ACPI inventory, local APIC, INIT/SIPI/SIPI through a real-mode
//!   trampoline, PM1a shutdown.
//! - riscv64: device tree dump, SBI hart state management, SBI reset.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_op_in_unsafe_fn)]

pub mod console;
pub mod early_init;
pub mod error;
pub mod ffi_boundary;
#[cfg(target_arch = "x86_64")]
pub mod lapic;
pub mod sbi;
pub mod shutdown;
pub mod smp;
#[cfg(feature = "itests")]
pub mod smp_tests;
#[cfg(target_arch = "x86_64")]
pub mod trampoline;

pub use early_init::{BootInitPhase, BootInitStep, boot_init_run_all, boot_init_run_phase};
pub use error::{BootError, BootResult};
pub use shutdown::{PortIo, acpi_shutdown, sbi_shutdown};
pub use smp::{BRINGUP, BringupContext};
