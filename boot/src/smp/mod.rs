//! Secondary processor bring-up.
//!
//! [`BringupContext`] is the only state more than one processor writes:
//! the CPU inventory, always under its lock, and the running count, which
//! is a lone atomic.  A processor that reports in does both inside the
//! same critical section, so the count never runs ahead of the records
//! marked `Running`.

pub mod mailbox;
#[cfg(target_arch = "x86_64")]
pub mod apic;
pub mod sbi;

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

use kestrel_lib::config::{AP_STACK_SIZE, MAX_CPUS, REPORT_POLL_INTERVAL_MS};
use kestrel_lib::{
    BringupState, CpuInventory, CpuRecord, CpuRole, Delay, SpinLock, SpinLockGuard, klog_debug,
};

use crate::error::{BootError, BootResult};

pub struct BringupContext {
    inventory: SpinLock<CpuInventory>,
    running: AtomicUsize,
}

impl BringupContext {
    pub const fn new() -> Self {
        Self {
            inventory: SpinLock::new(CpuInventory::new()),
            running: AtomicUsize::new(0),
        }
    }

    /// Take over a discovered inventory.  The primary record is marked
    /// running and counted; everything else starts out `NotStarted`.
    pub fn load(&self, cpus: CpuInventory) {
        let mut inventory = self.inventory.lock();
        *inventory = cpus;
        if let Some((index, _)) = inventory.primary() {
            inventory.advance(index, BringupState::Running);
        }
        self.running
            .store(inventory.count_in(BringupState::Running), Ordering::Release);
    }

    pub fn lock(&self) -> SpinLockGuard<'_, CpuInventory> {
        self.inventory.lock()
    }

    pub fn record(&self, index: usize) -> Option<CpuRecord> {
        self.inventory.lock().get(index).copied()
    }

    pub fn expected(&self) -> usize {
        self.inventory.lock().len()
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    pub fn mark_starting(&self, index: usize) -> bool {
        self.inventory.lock().advance(index, BringupState::Starting)
    }

    /// Record a processor that was handed a start request after load.
    pub fn add_started(inventory: &mut CpuInventory, id: u32) -> BootResult<usize> {
        let index = inventory.push(id, CpuRole::Secondary)?;
        inventory.advance(index, BringupState::Starting);
        Ok(index)
    }

    /// Called by a secondary once it knows its own id.  Returns its index,
    /// or `None` if the id has no record or it already reported.
    pub fn report_in(&self, id: u32) -> Option<usize> {
        let mut inventory = self.inventory.lock();
        let index = inventory.index_of(id)?;
        if !inventory.advance(index, BringupState::Running) {
            return None;
        }
        self.running.fetch_add(1, Ordering::AcqRel);
        Some(index)
    }

    /// Poll the running count every `REPORT_POLL_INTERVAL_MS` until
    /// `expected` processors are in or `polls` run out.
    pub fn wait_for_running<D: Delay>(
        &self,
        expected: usize,
        polls: u64,
        delay: &D,
    ) -> BootResult<usize> {
        for _ in 0..polls {
            if self.running() >= expected {
                break;
            }
            delay.delay_ms(REPORT_POLL_INTERVAL_MS);
        }
        let running = self.running();
        if running >= expected {
            Ok(running)
        } else {
            klog_debug!("SMP: gave up after {} polls", polls);
            Err(BootError::StartupTimeout { running, expected })
        }
    }
}

impl Default for BringupContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Bring-up state shared by every processor.
pub static BRINGUP: BringupContext = BringupContext::new();

/// One private stack per inventory slot (per hart id on RISC-V).
#[repr(C, align(16))]
pub struct ApStacks(UnsafeCell<[[u8; AP_STACK_SIZE]; MAX_CPUS]>);

// SAFETY: each slot is handed to exactly one processor and never touched
// by anyone else; the array itself is only used for address arithmetic.
unsafe impl Sync for ApStacks {}

impl ApStacks {
    pub const fn new() -> Self {
        Self(UnsafeCell::new([[0; AP_STACK_SIZE]; MAX_CPUS]))
    }

    /// Initial stack pointer for `slot`; stacks grow down from here.
    pub fn top(&self, slot: usize) -> Option<u64> {
        if slot >= MAX_CPUS {
            return None;
        }
        let base = self.0.get() as u64;
        Some(base + ((slot + 1) * AP_STACK_SIZE) as u64)
    }
}

impl Default for ApStacks {
    fn default() -> Self {
        Self::new()
    }
}

pub static AP_STACKS: ApStacks = ApStacks::new();
