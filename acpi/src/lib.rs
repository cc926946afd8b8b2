//! ACPI table discovery for Kestrel.
//!
//! Zero-allocation parsing of the firmware table hierarchy into a
//! [`HardwareInventory`].  Every read is bounds-checked against a slice
//! obtained through [`PhysMemory`], so a corrupt table can stop a scan but
//! never send the walker past a table's declared length.
//!
//! # Architecture
//!
//! - [`tables`]: RSDP validation, RSDT/XSDT traversal with length caps.
//! - [`madt`]: MADT entry iteration and local APIC enumeration.
//! - [`fadt`]: PM1a control port extraction for shutdown.
//!
//! # Usage
//!
//! ```ignore
//! let mem = unsafe { DirectMap::new(phys_offset) };
//! let inventory = kestrel_acpi::discover(&mem, rsdp_phys, bsp_apic_id)?;
//! ```

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_op_in_unsafe_fn)]

pub mod error;
pub mod fadt;
pub mod madt;
pub mod tables;

#[cfg(test)]
mod testutil;

pub use error::{AcpiError, AcpiResult, RootFault, Signature};
pub use fadt::Fadt;
pub use madt::{Madt, MadtEntry, decode_madt};
pub use tables::{AcpiTables, DirectMap, PhysMemory, Sdt};

use kestrel_lib::{HardwareInventory, klog_debug, klog_info, klog_warn};

/// Tables the walker knows how to decode.
enum KnownTable<'a> {
    Madt(Madt<'a>),
    Fadt(Fadt),
}

impl<'a> KnownTable<'a> {
    /// Classify by signature; `None` for tables this walker ignores.
    fn classify(sdt: Sdt<'a>) -> Option<AcpiResult<Self>> {
        match &sdt.signature() {
            madt::MADT_SIGNATURE => Some(Madt::parse(sdt).map(Self::Madt)),
            fadt::FADT_SIGNATURE => Some(Fadt::parse(&sdt).map(Self::Fadt)),
            _ => None,
        }
    }

    fn merge_into(self, inventory: &mut HardwareInventory) -> AcpiResult {
        match self {
            Self::Madt(madt) => {
                inventory.local_apic_base = Some(madt.local_apic_address());
                decode_madt(&madt, &mut inventory.cpus).map(|_| ())
            }
            Self::Fadt(fadt) => {
                klog_info!(
                    "ACPI: PM1a control port {:#x} (len {}), DSDT at {:#x}",
                    fadt.pm1a_control_block,
                    fadt.pm1_control_length,
                    fadt.dsdt
                );
                inventory.shutdown = fadt.shutdown_mechanism();
                Ok(())
            }
        }
    }
}

/// Build the hardware inventory from the root pointer at `rsdp_phys`.
///
/// An invalid root pointer fails the whole call.  Problems with an
/// individual table are logged and the remaining tables are still
/// decoded.  `boot_cpu_id` is the APIC id of the executing processor; its
/// record becomes the single primary, and it is appended if the MADT does
/// not list it.
pub fn discover<M: PhysMemory>(
    mem: &M,
    rsdp_phys: u64,
    boot_cpu_id: u32,
) -> AcpiResult<HardwareInventory> {
    let tables = AcpiTables::from_rsdp(mem, rsdp_phys)?;
    klog_info!(
        "ACPI: {:?} with {} entries",
        tables.root().kind(),
        tables.root().entry_count()
    );

    let mut inventory = HardwareInventory::new();
    for table in tables.tables() {
        let sdt = match table {
            Ok(sdt) => sdt,
            Err(err) => {
                klog_warn!("ACPI: skipping table: {}", err);
                continue;
            }
        };
        klog_debug!("ACPI: {} at {:#x}", Signature(sdt.signature()), sdt.phys());
        let Some(known) = KnownTable::classify(sdt) else {
            continue;
        };
        if let Err(err) = known.and_then(|known| known.merge_into(&mut inventory)) {
            klog_warn!("ACPI: {}", err);
        }
    }

    let slot = inventory.cpus.set_primary(boot_cpu_id);
    if slot.appended {
        klog_warn!(
            "ACPI: boot APIC ID {} not in MADT, recorded as CPU #{}",
            boot_cpu_id,
            slot.index
        );
    }
    if let Some(displaced) = slot.displaced {
        klog_warn!(
            "ACPI: inventory full, dropped APIC ID {} for the boot processor",
            displaced
        );
    }
    klog_info!("ACPI: {} CPUs found", inventory.cpus.len());

    Ok(inventory)
}
