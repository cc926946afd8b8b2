//! Local APIC register access for processor startup.
//!
//! Only the identifier register and the interrupt command register pair
//! are touched here.  Register access goes through [`ApicOps`] so the
//! startup sequence can run against a recording fake on the host.

use bitflags::bitflags;
use spin::Once;

use kestrel_lib::{cpu, klog_warn};

// =============================================================================
// Register Offsets
// =============================================================================

pub const LAPIC_ID: u32 = 0x020;
pub const LAPIC_ICR_LOW: u32 = 0x300;
pub const LAPIC_ICR_HIGH: u32 = 0x310;

/// Architectural default MMIO base, used when the MADT gives none.
pub const LAPIC_DEFAULT_BASE: u64 = 0xFEE0_0000;

const LAPIC_ICR_DEST_SHIFT: u32 = 24;
const IPI_POLL_LIMIT: u32 = 10_000;

bitflags! {
    /// Low half of the interrupt command register.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct IcrLow: u32 {
        const VECTOR = 0xFF;
        const DELIVERY_INIT = 0x5 << 8;
        const DELIVERY_STARTUP = 0x6 << 8;
        const DELIVERY_STATUS = 1 << 12;
        const LEVEL_ASSERT = 1 << 14;
    }
}

impl IcrLow {
    pub const fn init() -> Self {
        Self::DELIVERY_INIT.union(Self::LEVEL_ASSERT)
    }

    pub const fn startup(vector: u8) -> Self {
        Self::DELIVERY_STARTUP.union(Self::from_bits_retain(vector as u32))
    }
}

pub trait ApicOps {
    fn read(&self, reg: u32) -> u32;
    fn write(&self, reg: u32, value: u32);

    fn id(&self) -> u32 {
        self.read(LAPIC_ID) >> 24
    }

    /// Spin until the previous IPI has left the local APIC.  Returns false
    /// if the delivery-status bit never cleared.
    fn wait_icr_idle(&self) -> bool {
        let mut remaining = IPI_POLL_LIMIT;
        while self.read(LAPIC_ICR_LOW) & IcrLow::DELIVERY_STATUS.bits() != 0 {
            if remaining == 0 {
                return false;
            }
            cpu::pause();
            remaining -= 1;
        }
        true
    }

    /// Destination goes in first; the write to the low half sends.
    /// Returns false if the ICR stayed busy, before or after the send.
    fn send_ipi(&self, dest: u32, command: IcrLow) -> bool {
        if !self.wait_icr_idle() {
            klog_warn!(
                "APIC: ICR busy, IPI {:#x} to APIC ID {} not sent",
                command.bits(),
                dest
            );
            return false;
        }
        self.write(LAPIC_ICR_HIGH, dest << LAPIC_ICR_DEST_SHIFT);
        self.write(LAPIC_ICR_LOW, command.bits());
        if !self.wait_icr_idle() {
            klog_warn!(
                "APIC: IPI {:#x} to APIC ID {} not delivered",
                command.bits(),
                dest
            );
            return false;
        }
        true
    }
}

/// Memory-mapped local APIC.
pub struct LocalApic {
    base: usize,
}

impl LocalApic {
    /// # Safety
    ///
    /// `base` must be the virtual address of the local APIC register page,
    /// mapped uncached for the lifetime of the value.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }
}

impl ApicOps for LocalApic {
    fn read(&self, reg: u32) -> u32 {
        // SAFETY: `new` requires `base` to map the register page.
        unsafe { core::ptr::read_volatile((self.base + reg as usize) as *const u32) }
    }

    fn write(&self, reg: u32, value: u32) {
        // SAFETY: as for `read`.
        unsafe { core::ptr::write_volatile((self.base + reg as usize) as *mut u32, value) }
    }
}

/// The local APIC every processor uses.  The register page sits at the
/// same address on each processor and each sees its own registers there.
static LAPIC: Once<LocalApic> = Once::new();

pub fn install(apic: LocalApic) -> &'static LocalApic {
    LAPIC.call_once(|| apic)
}

pub fn get() -> Option<&'static LocalApic> {
    LAPIC.get()
}

/// APIC id of the executing processor; 0 before [`install`].
pub fn current_id() -> u32 {
    get().map_or(0, |apic| apic.id())
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use core::cell::{Cell, RefCell};

    /// Records register writes; reads of the ID register return `id`.
    pub struct FakeApic {
        pub id: u32,
        pub writes: RefCell<Vec<(u32, u32)>>,
        /// Number of ICR reads that report a pending delivery.
        pub busy_reads: Cell<u32>,
    }

    impl FakeApic {
        pub fn new(id: u32) -> Self {
            Self {
                id,
                writes: RefCell::new(Vec::new()),
                busy_reads: Cell::new(0),
            }
        }
    }

    impl ApicOps for FakeApic {
        fn read(&self, reg: u32) -> u32 {
            match reg {
                LAPIC_ID => self.id << 24,
                LAPIC_ICR_LOW if self.busy_reads.get() > 0 => {
                    self.busy_reads.set(self.busy_reads.get() - 1);
                    IcrLow::DELIVERY_STATUS.bits()
                }
                _ => 0,
            }
        }

        fn write(&self, reg: u32, value: u32) {
            self.writes.borrow_mut().push((reg, value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeApic;
    use super::*;

    #[test]
    fn test_command_encoding() {
        assert_eq!(IcrLow::init().bits(), 0x4500);
        assert_eq!(IcrLow::startup(0x08).bits(), 0x0608);
    }

    #[test]
    fn test_send_ipi_writes_destination_first() {
        let apic = FakeApic::new(0);
        assert!(apic.send_ipi(3, IcrLow::startup(0x08)));
        assert_eq!(
            *apic.writes.borrow(),
            vec![(LAPIC_ICR_HIGH, 3 << 24), (LAPIC_ICR_LOW, 0x0608)]
        );
    }

    #[test]
    fn test_wait_icr_idle_is_bounded() {
        let apic = FakeApic::new(0);
        apic.busy_reads.set(5);
        assert!(apic.wait_icr_idle());
        apic.busy_reads.set(u32::MAX);
        assert!(!apic.wait_icr_idle());
    }

    #[test]
    fn test_stuck_icr_sends_nothing() {
        let apic = FakeApic::new(0);
        apic.busy_reads.set(u32::MAX);
        assert!(!apic.send_ipi(3, IcrLow::init()));
        assert!(apic.writes.borrow().is_empty());
    }

    #[test]
    fn test_id_from_register() {
        assert_eq!(FakeApic::new(7).id(), 7);
    }
}
