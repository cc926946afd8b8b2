use kestrel_lib::{klog_debug, klog_warn};

use crate::error::{AcpiError, AcpiResult, RootFault};

pub const RSDP_SIGNATURE: &[u8; 8] = b"RSD PTR ";
pub const RSDT_SIGNATURE: &[u8; 4] = b"RSDT";
pub const XSDT_SIGNATURE: &[u8; 4] = b"XSDT";

/// Bytes covered by the ACPI 1.0 checksum.
const RSDP_V1_LEN: usize = 20;
/// Size of the ACPI 2.0+ root pointer structure.
const RSDP_V2_LEN: usize = 36;
/// Largest extended root pointer accepted before mapping it.
const RSDP_MAX_LEN: usize = 0x1000;
/// Size of the common table header.
pub const SDT_HEADER_LEN: usize = 36;
/// Largest table length accepted before mapping it.
pub const SDT_MAX_LEN: usize = 0x10_0000;

/// Physical memory access for table walking.
///
/// Every table read goes through a slice returned here, so a reader can
/// never step past what it asked to map.
pub trait PhysMemory {
    /// Borrow `len` bytes at physical address `phys`.
    fn map(&self, phys: u64, len: usize) -> Option<&[u8]>;
}

/// Physical memory reachable at a fixed virtual offset (identity map,
/// higher-half direct map).
pub struct DirectMap {
    offset: u64,
}

impl DirectMap {
    /// # Safety
    ///
    /// All firmware tables must be mapped readable at `phys + offset` for
    /// as long as this value is used.
    pub const unsafe fn new(offset: u64) -> Self {
        Self { offset }
    }
}

impl PhysMemory for DirectMap {
    fn map(&self, phys: u64, len: usize) -> Option<&[u8]> {
        if phys == 0 {
            return None;
        }
        let virt = phys.checked_add(self.offset)?;
        virt.checked_add(len as u64)?;
        // SAFETY: the constructor's contract covers every table address.
        Some(unsafe { core::slice::from_raw_parts(virt as usize as *const u8, len) })
    }
}

// ---------------------------------------------------------------------------
// Little-endian field readers.  All return `None` past the end of `bytes`.
// ---------------------------------------------------------------------------

pub(crate) fn read_u8(bytes: &[u8], offset: usize) -> Option<u8> {
    bytes.get(offset).copied()
}

pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

pub(crate) fn read_u64(bytes: &[u8], offset: usize) -> Option<u64> {
    let raw = bytes.get(offset..offset.checked_add(8)?)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(raw);
    Some(u64::from_le_bytes(buf))
}

/// Wrapping byte sum; a valid ACPI structure sums to zero.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |sum, &b| sum.wrapping_add(b))
}

// ---------------------------------------------------------------------------
// Root system description pointer
// ---------------------------------------------------------------------------

/// Validated root system description pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rsdp {
    pub oem_id: [u8; 6],
    pub revision: u8,
    pub rsdt_address: u32,
    /// Present only for revision 2+ with a nonzero address.
    pub xsdt_address: Option<u64>,
}

impl Rsdp {
    /// Validate the root pointer at `phys`.
    ///
    /// The signature and the 20-byte checksum are always checked; revision
    /// 2+ structures must also pass the extended checksum over their
    /// declared length.
    pub fn parse<M: PhysMemory>(mem: &M, phys: u64) -> AcpiResult<Self> {
        if phys == 0 {
            return Err(AcpiError::InvalidRoot(RootFault::Null));
        }
        let v1 = mem
            .map(phys, RSDP_V1_LEN)
            .ok_or(AcpiError::InvalidRoot(RootFault::Unmapped))?;
        if &v1[..8] != RSDP_SIGNATURE {
            return Err(AcpiError::InvalidRoot(RootFault::BadSignature));
        }
        if checksum(v1) != 0 {
            return Err(AcpiError::InvalidRoot(RootFault::BadChecksum));
        }

        let mut oem_id = [0u8; 6];
        oem_id.copy_from_slice(&v1[9..15]);
        let revision = v1[15];
        let rsdt_address = read_u32(v1, 16).unwrap_or(0);

        let mut xsdt_address = None;
        if revision >= 2 {
            let head = mem
                .map(phys, RSDP_V2_LEN)
                .ok_or(AcpiError::InvalidRoot(RootFault::Unmapped))?;
            let length = read_u32(head, 20).unwrap_or(0) as usize;
            if !(RSDP_V2_LEN..=RSDP_MAX_LEN).contains(&length) {
                return Err(AcpiError::InvalidRoot(RootFault::BadLength));
            }
            let full = mem
                .map(phys, length)
                .ok_or(AcpiError::InvalidRoot(RootFault::Unmapped))?;
            if checksum(full) != 0 {
                return Err(AcpiError::InvalidRoot(RootFault::BadExtendedChecksum));
            }
            xsdt_address = read_u64(full, 24).filter(|&addr| addr != 0);
        }

        Ok(Self {
            oem_id,
            revision,
            rsdt_address,
            xsdt_address,
        })
    }
}

// ---------------------------------------------------------------------------
// System description tables
// ---------------------------------------------------------------------------

/// A firmware table bounded by its declared length.
#[derive(Clone, Copy, Debug)]
pub struct Sdt<'a> {
    phys: u64,
    bytes: &'a [u8],
}

impl<'a> Sdt<'a> {
    /// Map the table at `phys`: first its header, then exactly the number
    /// of bytes the header declares, at most [`SDT_MAX_LEN`].  The checksum
    /// is not verified here.
    pub fn load<M: PhysMemory>(mem: &'a M, phys: u64) -> AcpiResult<Self> {
        let header = mem
            .map(phys, SDT_HEADER_LEN)
            .ok_or(AcpiError::UnmappedTable { phys })?;
        let mut signature = [0u8; 4];
        signature.copy_from_slice(&header[..4]);
        let length = read_u32(header, 4).unwrap_or(0) as usize;
        if !(SDT_HEADER_LEN..=SDT_MAX_LEN).contains(&length) {
            return Err(AcpiError::MalformedTable {
                signature,
                offset: 4,
            });
        }
        let bytes = mem
            .map(phys, length)
            .ok_or(AcpiError::UnmappedTable { phys })?;
        Ok(Self { phys, bytes })
    }

    pub fn from_bytes(phys: u64, bytes: &'a [u8]) -> Option<Self> {
        let length = read_u32(bytes, 4)? as usize;
        if length < SDT_HEADER_LEN || length > bytes.len() {
            return None;
        }
        Some(Self {
            phys,
            bytes: &bytes[..length],
        })
    }

    pub fn signature(&self) -> [u8; 4] {
        let mut sig = [0u8; 4];
        sig.copy_from_slice(&self.bytes[..4]);
        sig
    }

    pub fn phys(&self) -> u64 {
        self.phys
    }

    /// Declared length; always equals `bytes().len()`.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn revision(&self) -> u8 {
        self.bytes[8]
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn checksum_ok(&self) -> bool {
        checksum(self.bytes) == 0
    }

    pub fn malformed(&self, offset: usize) -> AcpiError {
        AcpiError::MalformedTable {
            signature: self.signature(),
            offset,
        }
    }
}

// ---------------------------------------------------------------------------
// Root table (RSDT / XSDT)
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RootKind {
    Rsdt,
    Xsdt,
}

impl RootKind {
    pub const fn entry_width(self) -> usize {
        match self {
            Self::Rsdt => 4,
            Self::Xsdt => 8,
        }
    }
}

/// The top-level list of table pointers.
#[derive(Clone, Copy, Debug)]
pub struct RootTable<'a> {
    kind: RootKind,
    sdt: Sdt<'a>,
}

impl<'a> RootTable<'a> {
    /// Entry width follows from which signature matched; anything else is
    /// not a root table.
    pub fn from_sdt(sdt: Sdt<'a>) -> AcpiResult<Self> {
        let kind = match &sdt.signature() {
            XSDT_SIGNATURE => RootKind::Xsdt,
            RSDT_SIGNATURE => RootKind::Rsdt,
            _ => return Err(AcpiError::InvalidRoot(RootFault::BadRootTable)),
        };
        Ok(Self { kind, sdt })
    }

    pub fn kind(&self) -> RootKind {
        self.kind
    }

    pub fn entry_count(&self) -> usize {
        (self.sdt.len() - SDT_HEADER_LEN) / self.kind.entry_width()
    }

    /// Physical addresses of the listed tables, in order.
    pub fn entries(&self) -> impl Iterator<Item = u64> + 'a {
        let bytes = self.sdt.bytes();
        let width = self.kind.entry_width();
        (0..self.entry_count()).filter_map(move |i| {
            let offset = SDT_HEADER_LEN + i * width;
            match width {
                8 => read_u64(bytes, offset),
                _ => read_u32(bytes, offset).map(u64::from),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Table set
// ---------------------------------------------------------------------------

/// Validated handle to the ACPI table hierarchy rooted at an RSDP.
pub struct AcpiTables<'m, M: PhysMemory> {
    mem: &'m M,
    root: RootTable<'m>,
}

impl<'m, M: PhysMemory> AcpiTables<'m, M> {
    /// Validate the RSDP at `rsdp_phys` and the root table it names.
    ///
    /// The XSDT is preferred when present; if it fails validation the
    /// RSDT is tried before giving up.
    pub fn from_rsdp(mem: &'m M, rsdp_phys: u64) -> AcpiResult<Self> {
        let rsdp = Rsdp::parse(mem, rsdp_phys)?;
        klog_debug!(
            "ACPI: RSDP revision {} OEM '{}'",
            rsdp.revision,
            OemId(rsdp.oem_id)
        );

        if let Some(xsdt) = rsdp.xsdt_address {
            match Self::load_root(mem, xsdt) {
                Ok(root) => return Ok(Self { mem, root }),
                Err(err) => klog_warn!("ACPI: XSDT at {:#x} rejected: {}", xsdt, err),
            }
        }
        if rsdp.rsdt_address == 0 {
            return Err(AcpiError::InvalidRoot(RootFault::BadRootTable));
        }
        let root = Self::load_root(mem, u64::from(rsdp.rsdt_address))?;
        Ok(Self { mem, root })
    }

    fn load_root(mem: &'m M, phys: u64) -> AcpiResult<RootTable<'m>> {
        let sdt = Sdt::load(mem, phys).map_err(|_| AcpiError::InvalidRoot(RootFault::BadRootTable))?;
        let root = RootTable::from_sdt(sdt)?;
        if !sdt.checksum_ok() {
            return Err(AcpiError::InvalidRoot(RootFault::BadRootTable));
        }
        Ok(root)
    }

    pub fn root(&self) -> &RootTable<'m> {
        &self.root
    }

    /// Every table the root lists, in order.  Entries that cannot be
    /// mapped or fail their checksum are reported as errors in place.
    pub fn tables(&self) -> impl Iterator<Item = AcpiResult<Sdt<'m>>> + '_ {
        let mem = self.mem;
        self.root.entries().map(move |phys| {
            let sdt = Sdt::load(mem, phys)?;
            if !sdt.checksum_ok() {
                return Err(AcpiError::TableChecksum {
                    signature: sdt.signature(),
                });
            }
            Ok(sdt)
        })
    }
}

struct OemId([u8; 6]);

impl core::fmt::Display for OemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            }
        }
        Ok(())
    }
}
