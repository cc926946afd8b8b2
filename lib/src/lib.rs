#![cfg_attr(not(test), no_std)]
#![allow(unsafe_op_in_unsafe_fn)]

pub mod config;
pub mod cpu;
pub mod delay;
pub mod inventory;
pub mod klog;
pub mod spinlock;
pub mod testing;

pub use config::{BootConfig, MAX_CPUS, config_from_cmdline};
pub use cpu::{current_cpu_id, register_cpu_id_fn};
pub use delay::{Delay, SpinDelay};
pub use inventory::{
    BringupState, CpuInventory, CpuRecord, CpuRole, HardwareInventory, InventoryError,
    PrimarySlot, ShutdownMechanism,
};
pub use klog::{
    KlogLevel, LineWriter, klog_get_level, klog_init, klog_register_backend, klog_set_level,
};
pub use spinlock::{SpinLock, SpinLockGuard};
