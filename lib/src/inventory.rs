//! Normalised hardware inventory produced by firmware discovery.
//!
//! Records live in a statically sized arena indexed by discovery order.
//! That index doubles as the user-facing CPU number printed in
//! diagnostics, so decoders must append in the order firmware lists
//! processors.  Records are never removed.

use core::fmt;

use crate::config::MAX_CPUS;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpuRole {
    Primary,
    Secondary,
}

/// Bring-up progress of one processor.  Only ever moves forward.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum BringupState {
    NotStarted = 0,
    Starting = 1,
    Running = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CpuRecord {
    /// APIC id or hart id.
    pub id: u32,
    pub enabled: bool,
    pub role: CpuRole,
    pub state: BringupState,
}

impl CpuRecord {
    pub const fn new(id: u32, role: CpuRole) -> Self {
        Self {
            id,
            enabled: true,
            role,
            state: BringupState::NotStarted,
        }
    }

    pub fn is_primary(&self) -> bool {
        self.role == CpuRole::Primary
    }

    /// Move to `next` if that is strictly forward.  Returns whether the
    /// state changed.
    pub fn advance(&mut self, next: BringupState) -> bool {
        if next > self.state {
            self.state = next;
            true
        } else {
            false
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InventoryError {
    Full { capacity: usize },
    Duplicate { id: u32 },
}

impl fmt::Display for InventoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full { capacity } => write!(f, "cpu inventory full ({} records)", capacity),
            Self::Duplicate { id } => write!(f, "cpu id {} already recorded", id),
        }
    }
}

/// Where [`CpuInventory::set_primary`] put the primary record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PrimarySlot {
    pub index: usize,
    /// The primary was not listed and got a record of its own.
    pub appended: bool,
    /// Id whose record was given up because the inventory was full.
    pub displaced: Option<u32>,
}

const EMPTY_RECORD: CpuRecord = CpuRecord::new(0, CpuRole::Secondary);

/// Fixed-capacity, insertion-ordered set of processors keyed by id.
#[derive(Clone, Debug)]
pub struct CpuInventory {
    records: [CpuRecord; MAX_CPUS],
    len: usize,
}

impl CpuInventory {
    pub const fn new() -> Self {
        Self {
            records: [EMPTY_RECORD; MAX_CPUS],
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[CpuRecord] {
        &self.records[..self.len]
    }

    pub fn iter(&self) -> impl Iterator<Item = &CpuRecord> {
        self.as_slice().iter()
    }

    pub fn get(&self, index: usize) -> Option<&CpuRecord> {
        self.as_slice().get(index)
    }

    pub fn index_of(&self, id: u32) -> Option<usize> {
        self.iter().position(|r| r.id == id)
    }

    /// Append a processor.  Identifiers are unique; the first record for
    /// an id wins.
    pub fn push(&mut self, id: u32, role: CpuRole) -> Result<usize, InventoryError> {
        if self.index_of(id).is_some() {
            return Err(InventoryError::Duplicate { id });
        }
        if self.len == MAX_CPUS {
            return Err(InventoryError::Full {
                capacity: MAX_CPUS,
            });
        }
        let index = self.len;
        self.records[index] = CpuRecord::new(id, role);
        self.len += 1;
        Ok(index)
    }

    /// Make `id` the single primary processor, appending it if firmware
    /// did not list it.  Every other record becomes secondary.
    ///
    /// A full inventory gives up its last record to an unlisted primary,
    /// so there is always exactly one primary afterwards.
    pub fn set_primary(&mut self, id: u32) -> PrimarySlot {
        let slot = match self.index_of(id) {
            Some(index) => PrimarySlot {
                index,
                appended: false,
                displaced: None,
            },
            None if self.len == MAX_CPUS => {
                let index = MAX_CPUS - 1;
                let displaced = self.records[index].id;
                self.records[index] = CpuRecord::new(id, CpuRole::Primary);
                PrimarySlot {
                    index,
                    appended: true,
                    displaced: Some(displaced),
                }
            }
            None => {
                let index = self.len;
                self.records[index] = CpuRecord::new(id, CpuRole::Primary);
                self.len += 1;
                PrimarySlot {
                    index,
                    appended: true,
                    displaced: None,
                }
            }
        };
        for (i, record) in self.records[..self.len].iter_mut().enumerate() {
            record.role = if i == slot.index {
                CpuRole::Primary
            } else {
                CpuRole::Secondary
            };
        }
        slot
    }

    pub fn primary(&self) -> Option<(usize, &CpuRecord)> {
        self.iter().enumerate().find(|(_, r)| r.is_primary())
    }

    pub fn secondaries(&self) -> impl Iterator<Item = (usize, &CpuRecord)> {
        self.iter().enumerate().filter(|(_, r)| !r.is_primary())
    }

    /// Advance the record at `index`; returns whether it moved.
    pub fn advance(&mut self, index: usize, next: BringupState) -> bool {
        match self.records[..self.len].get_mut(index) {
            Some(record) => record.advance(next),
            None => false,
        }
    }

    pub fn count_in(&self, state: BringupState) -> usize {
        self.iter().filter(|r| r.state == state).count()
    }
}

impl Default for CpuInventory {
    fn default() -> Self {
        Self::new()
    }
}

/// How the platform can be powered off.  Written once during discovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownMechanism {
    /// Nothing usable was discovered.
    Unavailable,
    /// ACPI PM1a control block I/O port.
    Pm1aControl { port: u16 },
    /// Ask the supervisor firmware to reset the system.
    FirmwareReset,
}

/// Everything discovery hands to the bootstrap controller.
#[derive(Clone, Debug)]
pub struct HardwareInventory {
    pub cpus: CpuInventory,
    pub shutdown: ShutdownMechanism,
    /// Local APIC MMIO base reported by the MADT, when present.
    pub local_apic_base: Option<u32>,
}

impl HardwareInventory {
    pub const fn new() -> Self {
        Self {
            cpus: CpuInventory::new(),
            shutdown: ShutdownMechanism::Unavailable,
            local_apic_base: None,
        }
    }
}

impl Default for HardwareInventory {
    fn default() -> Self {
        Self::new()
    }
}
