use bitflags::bitflags;
use kestrel_lib::{CpuInventory, CpuRole, InventoryError, klog_debug, klog_info, klog_warn};

use crate::error::AcpiResult;
use crate::tables::{SDT_HEADER_LEN, Sdt, read_u32};

pub const MADT_SIGNATURE: &[u8; 4] = b"APIC";

/// Local APIC address (u32) and flags (u32) follow the common header.
const MADT_FIXED_LEN: usize = SDT_HEADER_LEN + 8;
const ENTRY_HEADER_LEN: usize = 2;

const MADT_ENTRY_LOCAL_APIC: u8 = 0;
const MADT_ENTRY_IOAPIC: u8 = 1;
const MADT_ENTRY_INTERRUPT_OVERRIDE: u8 = 2;
const MADT_ENTRY_LOCAL_X2APIC: u8 = 9;

const LOCAL_APIC_LEN: usize = 8;
const IOAPIC_LEN: usize = 12;
const INTERRUPT_OVERRIDE_LEN: usize = 10;
const LOCAL_X2APIC_LEN: usize = 16;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct LocalApicFlags: u32 {
        const ENABLED = 1 << 0;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocalApic {
    pub processor_id: u8,
    pub apic_id: u8,
    pub flags: LocalApicFlags,
}

impl LocalApic {
    pub fn is_enabled(&self) -> bool {
        self.flags.contains(LocalApicFlags::ENABLED)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IoapicInfo {
    pub id: u8,
    pub address: u32,
    pub gsi_base: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InterruptOverride {
    pub bus_source: u8,
    pub irq_source: u8,
    pub gsi: u32,
    pub flags: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocalX2Apic {
    pub x2apic_id: u32,
    pub flags: LocalApicFlags,
    pub processor_uid: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MadtEntry {
    LocalApic(LocalApic),
    Ioapic(IoapicInfo),
    InterruptOverride(InterruptOverride),
    LocalX2Apic(LocalX2Apic),
    Unknown { entry_type: u8, length: u8 },
}

/// Parsed handle to the MADT, supporting iteration over its entries.
#[derive(Clone, Copy, Debug)]
pub struct Madt<'a> {
    sdt: Sdt<'a>,
}

impl<'a> Madt<'a> {
    pub fn parse(sdt: Sdt<'a>) -> AcpiResult<Self> {
        if sdt.signature() != *MADT_SIGNATURE {
            return Err(sdt.malformed(0));
        }
        if sdt.len() < MADT_FIXED_LEN {
            return Err(sdt.malformed(SDT_HEADER_LEN));
        }
        Ok(Self { sdt })
    }

    /// Physical address of the local APIC register window.
    pub fn local_apic_address(&self) -> u32 {
        read_u32(self.sdt.bytes(), SDT_HEADER_LEN).unwrap_or(0)
    }

    pub fn entries(&self) -> MadtEntries<'a> {
        MadtEntries {
            sdt: self.sdt,
            offset: MADT_FIXED_LEN,
            done: false,
        }
    }
}

/// Forward walk over the variable-length sub-entries.
///
/// A sub-entry with length zero, or one that would extend past the table's
/// declared end, yields a single `MalformedTable` error and ends the walk.
pub struct MadtEntries<'a> {
    sdt: Sdt<'a>,
    offset: usize,
    done: bool,
}

impl MadtEntries<'_> {
    fn fail(&mut self) -> Option<AcpiResult<MadtEntry>> {
        self.done = true;
        Some(Err(self.sdt.malformed(self.offset)))
    }
}

impl<'a> Iterator for MadtEntries<'a> {
    type Item = AcpiResult<MadtEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let bytes = self.sdt.bytes();
        let end = bytes.len();
        if self.offset == end {
            self.done = true;
            return None;
        }
        if self.offset + ENTRY_HEADER_LEN > end {
            return self.fail();
        }

        let entry_type = bytes[self.offset];
        let length = bytes[self.offset + 1];
        let len = length as usize;
        if len == 0 || self.offset + len > end {
            return self.fail();
        }
        let raw = &bytes[self.offset..self.offset + len];

        let entry = match entry_type {
            MADT_ENTRY_LOCAL_APIC if len >= LOCAL_APIC_LEN => MadtEntry::LocalApic(LocalApic {
                processor_id: raw[2],
                apic_id: raw[3],
                flags: LocalApicFlags::from_bits_retain(read_u32(raw, 4).unwrap_or(0)),
            }),
            MADT_ENTRY_IOAPIC if len >= IOAPIC_LEN => MadtEntry::Ioapic(IoapicInfo {
                id: raw[2],
                address: read_u32(raw, 4).unwrap_or(0),
                gsi_base: read_u32(raw, 8).unwrap_or(0),
            }),
            MADT_ENTRY_INTERRUPT_OVERRIDE if len >= INTERRUPT_OVERRIDE_LEN => {
                MadtEntry::InterruptOverride(InterruptOverride {
                    bus_source: raw[2],
                    irq_source: raw[3],
                    gsi: read_u32(raw, 4).unwrap_or(0),
                    flags: u16::from_le_bytes([raw[8], raw[9]]),
                })
            }
            MADT_ENTRY_LOCAL_X2APIC if len >= LOCAL_X2APIC_LEN => {
                MadtEntry::LocalX2Apic(LocalX2Apic {
                    x2apic_id: read_u32(raw, 4).unwrap_or(0),
                    flags: LocalApicFlags::from_bits_retain(read_u32(raw, 8).unwrap_or(0)),
                    processor_uid: read_u32(raw, 12).unwrap_or(0),
                })
            }
            _ => MadtEntry::Unknown { entry_type, length },
        };

        self.offset += len;
        Some(Ok(entry))
    }
}

/// Append one record per enabled local APIC, in table order.
///
/// Records are appended as secondaries; the caller assigns the primary
/// role once the executing processor's id is known.  Returns the number of
/// records added.  On a malformed sub-entry the records found so far are
/// kept and the error is returned.
pub fn decode_madt(madt: &Madt<'_>, cpus: &mut CpuInventory) -> AcpiResult<usize> {
    klog_info!("ACPI: local APIC at {:#x}", madt.local_apic_address());

    let mut added = 0;
    for entry in madt.entries() {
        match entry? {
            MadtEntry::LocalApic(lapic) if lapic.is_enabled() => {
                let id = u32::from(lapic.apic_id);
                match cpus.push(id, CpuRole::Secondary) {
                    Ok(index) => {
                        klog_debug!(
                            "ACPI: CPU #{} processor {} APIC ID {}",
                            index,
                            lapic.processor_id,
                            id
                        );
                        added += 1;
                    }
                    Err(InventoryError::Duplicate { id }) => {
                        klog_warn!("ACPI: duplicate APIC ID {} ignored", id);
                    }
                    Err(err @ InventoryError::Full { .. }) => {
                        klog_warn!("ACPI: APIC ID {} ignored: {}", id, err);
                    }
                }
            }
            MadtEntry::LocalApic(lapic) => {
                klog_debug!("ACPI: APIC ID {} disabled, skipping", lapic.apic_id);
            }
            MadtEntry::LocalX2Apic(x2) => {
                klog_debug!("ACPI: x2APIC ID {} not used for bring-up", x2.x2apic_id);
            }
            _ => {}
        }
    }
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AcpiError;
    use crate::testutil::{build_madt, build_sdt, lapic_entry};
    use kestrel_lib::MAX_CPUS;

    fn parse(bytes: &[u8]) -> Madt<'_> {
        Madt::parse(Sdt::from_bytes(0x1000, bytes).unwrap()).unwrap()
    }

    #[test]
    fn test_enabled_entries_become_records_in_order() {
        let bytes = build_madt(
            0xFEE0_0000,
            &[
                lapic_entry(0, 0, true),
                lapic_entry(1, 4, false),
                lapic_entry(2, 2, true),
                lapic_entry(3, 6, false),
                lapic_entry(4, 1, true),
            ],
        );
        let madt = parse(&bytes);
        assert_eq!(madt.local_apic_address(), 0xFEE0_0000);

        let mut cpus = CpuInventory::new();
        assert_eq!(decode_madt(&madt, &mut cpus), Ok(3));
        let ids: Vec<u32> = cpus.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![0, 2, 1]);
    }

    #[test]
    fn test_zero_length_entry_stops_scan() {
        let zero = vec![0u8, 0, 7, 7, 1, 0, 0, 0];
        let bytes = build_madt(
            0xFEE0_0000,
            &[lapic_entry(0, 0, true), zero, lapic_entry(1, 1, true)],
        );
        let madt = parse(&bytes);

        let results: Vec<_> = madt.entries().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert_eq!(
            results[1],
            Err(AcpiError::MalformedTable {
                signature: *b"APIC",
                offset: MADT_FIXED_LEN + 8
            })
        );

        let mut cpus = CpuInventory::new();
        assert!(decode_madt(&madt, &mut cpus).is_err());
        assert_eq!(cpus.len(), 1);
    }

    #[test]
    fn test_entry_past_declared_end_stops_scan() {
        let mut truncated = lapic_entry(1, 1, true);
        truncated[1] = 40;
        let bytes = build_madt(0, &[lapic_entry(0, 0, true), truncated]);
        let madt = parse(&bytes);
        let results: Vec<_> = madt.entries().collect();
        assert_eq!(results.len(), 2);
        assert!(results[1].is_err());
    }

    #[test]
    fn test_other_entry_types_decoded() {
        let mut ioapic = vec![1u8, 12, 3, 0];
        ioapic.extend_from_slice(&0xFEC0_0000u32.to_le_bytes());
        ioapic.extend_from_slice(&0u32.to_le_bytes());
        let mut iso = vec![2u8, 10, 0, 0];
        iso.extend_from_slice(&2u32.to_le_bytes());
        iso.extend_from_slice(&0x000Du16.to_le_bytes());
        let mut x2 = vec![9u8, 16, 0, 0];
        x2.extend_from_slice(&300u32.to_le_bytes());
        x2.extend_from_slice(&1u32.to_le_bytes());
        x2.extend_from_slice(&7u32.to_le_bytes());
        let odd = vec![0x7Fu8, 3, 0];

        let bytes = build_madt(0, &[ioapic, iso, x2, odd]);
        let madt = parse(&bytes);
        let entries: Vec<MadtEntry> = madt.entries().map(|e| e.unwrap()).collect();
        assert_eq!(
            entries,
            vec![
                MadtEntry::Ioapic(IoapicInfo {
                    id: 3,
                    address: 0xFEC0_0000,
                    gsi_base: 0
                }),
                MadtEntry::InterruptOverride(InterruptOverride {
                    bus_source: 0,
                    irq_source: 0,
                    gsi: 2,
                    flags: 0xD
                }),
                MadtEntry::LocalX2Apic(LocalX2Apic {
                    x2apic_id: 300,
                    flags: LocalApicFlags::ENABLED,
                    processor_uid: 7
                }),
                MadtEntry::Unknown {
                    entry_type: 0x7F,
                    length: 3
                },
            ]
        );

        let mut cpus = CpuInventory::new();
        assert_eq!(decode_madt(&madt, &mut cpus), Ok(0));
    }

    #[test]
    fn test_duplicates_and_overflow_are_skipped() {
        let mut entries = vec![lapic_entry(0, 5, true), lapic_entry(1, 5, true)];
        for id in 0..(MAX_CPUS as u8 + 2) {
            entries.push(lapic_entry(id, 0x10 + id, true));
        }
        let bytes = build_madt(0, &entries);
        let madt = parse(&bytes);
        let mut cpus = CpuInventory::new();
        assert_eq!(decode_madt(&madt, &mut cpus), Ok(MAX_CPUS));
        assert_eq!(cpus.get(0).map(|r| r.id), Some(5));
        assert_eq!(cpus.index_of(5), Some(0));
    }

    #[test]
    fn test_short_table_rejected() {
        let bytes = build_sdt(b"APIC", &[0; 4]);
        assert!(Madt::parse(Sdt::from_bytes(0, &bytes).unwrap()).is_err());
    }
}
