//! Synthetic firmware tables for host tests.

use crate::tables::{PhysMemory, checksum};

/// Sparse physical memory made of independently placed regions.
pub struct FakeMemory {
    regions: Vec<(u64, Vec<u8>)>,
}

impl FakeMemory {
    pub fn new() -> Self {
        Self {
            regions: Vec::new(),
        }
    }

    pub fn insert(&mut self, base: u64, bytes: Vec<u8>) {
        self.regions.retain(|(b, _)| *b != base);
        self.regions.push((base, bytes));
    }
}

impl PhysMemory for FakeMemory {
    fn map(&self, phys: u64, len: usize) -> Option<&[u8]> {
        self.regions.iter().find_map(|(base, bytes)| {
            let start = phys.checked_sub(*base)? as usize;
            bytes.get(start..start.checked_add(len)?)
        })
    }
}

fn fix_checksum(bytes: &mut [u8], at: usize, over: usize) {
    bytes[at] = 0;
    bytes[at] = 0u8.wrapping_sub(checksum(&bytes[..over]));
}

/// Root pointer with valid checksums.  Revision 2+ gets the 36-byte layout.
pub fn build_rsdp(revision: u8, rsdt: u32, xsdt: u64) -> Vec<u8> {
    let len = if revision >= 2 { 36 } else { 20 };
    let mut bytes = vec![0u8; len];
    bytes[..8].copy_from_slice(b"RSD PTR ");
    bytes[9..15].copy_from_slice(b"KSTRL ");
    bytes[15] = revision;
    bytes[16..20].copy_from_slice(&rsdt.to_le_bytes());
    if revision >= 2 {
        bytes[20..24].copy_from_slice(&36u32.to_le_bytes());
        bytes[24..32].copy_from_slice(&xsdt.to_le_bytes());
    }
    fix_checksum(&mut bytes, 8, 20);
    if revision >= 2 {
        fix_checksum(&mut bytes, 32, 36);
    }
    bytes
}

/// Table with a 36-byte header, the given body and a valid checksum.
pub fn build_sdt(signature: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let len = 36 + body.len();
    let mut bytes = vec![0u8; len];
    bytes[..4].copy_from_slice(signature);
    bytes[4..8].copy_from_slice(&(len as u32).to_le_bytes());
    bytes[8] = 1;
    bytes[10..16].copy_from_slice(b"KSTRL ");
    bytes[36..].copy_from_slice(body);
    fix_checksum(&mut bytes, 9, len);
    bytes
}

/// Type-0 local APIC sub-entry.
pub fn lapic_entry(processor_id: u8, apic_id: u8, enabled: bool) -> Vec<u8> {
    let flags: u32 = if enabled { 1 } else { 0 };
    let mut entry = vec![0u8, 8, processor_id, apic_id];
    entry.extend_from_slice(&flags.to_le_bytes());
    entry
}

/// MADT with the given local APIC base and raw sub-entries.
pub fn build_madt(lapic_base: u32, entries: &[Vec<u8>]) -> Vec<u8> {
    let mut body = lapic_base.to_le_bytes().to_vec();
    body.extend_from_slice(&1u32.to_le_bytes());
    for entry in entries {
        body.extend_from_slice(entry);
    }
    build_sdt(b"APIC", &body)
}

/// FADT long enough to hold the PM1 control length field.
pub fn build_fadt(dsdt: u32, pm1a_cnt: u32) -> Vec<u8> {
    let mut body = vec![0u8; 116 - 36];
    body[40 - 36..44 - 36].copy_from_slice(&dsdt.to_le_bytes());
    body[64 - 36..68 - 36].copy_from_slice(&pm1a_cnt.to_le_bytes());
    body[89 - 36] = 2;
    build_sdt(b"FACP", &body)
}

/// Place an RSDP (revision 0) listing `tables` at consecutive addresses.
pub fn firmware_with(tables: Vec<Vec<u8>>) -> (FakeMemory, u64) {
    const RSDP: u64 = 0xE_0000;
    const RSDT: u64 = 0x7FE_0000;
    const FIRST_TABLE: u64 = 0x7FE_1000;

    let mut mem = FakeMemory::new();
    let mut body = Vec::new();
    for (i, table) in tables.into_iter().enumerate() {
        let phys = FIRST_TABLE + (i as u64) * 0x1000;
        body.extend_from_slice(&(phys as u32).to_le_bytes());
        mem.insert(phys, table);
    }
    mem.insert(RSDT, build_sdt(b"RSDT", &body));
    mem.insert(RSDP, build_rsdp(0, RSDT as u32, 0));
    (mem, RSDP)
}
