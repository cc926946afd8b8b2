//! Real-mode startup trampoline for application processors.
//!
//! A STARTUP IPI drops the AP into 16-bit real mode at
//! `TRAMPOLINE_ADDR`.  The image below walks it through protected mode
//! into long mode on the bootstrap processor's page tables, loads the
//! stack from the [`ParameterBlock`] and calls the entry with a pointer to
//! that block in `rdi`.
//!
//! The image is machine code assembled by hand, so the byte layout is
//! fixed:
//!
//! | offset | contents                                  |
//! |--------|-------------------------------------------|
//! | 0x00   | 16-bit entry: flat segments, `lgdt`, PE   |
//! | 0x40   | 32-bit entry: data selectors              |
//! | 0x60   | GDT pointer                               |
//! | 0x70   | GDT: null, code32, data, code64           |
//! | 0x90   | CR4.PAE, CR3, EFER.LME, CR0.PG            |
//! | 0xC0   | 64-bit entry: stack, call entry, halt     |
//! | 0x100  | [`ParameterBlock`]                        |
//!
//! Constraints the caller must meet: the trampoline page is identity
//! mapped in the active page tables, and the page-table root is below
//! 4 GiB (it is loaded through a 32-bit register).

use kestrel_lib::config::{TRAMPOLINE_ADDR, TRAMPOLINE_PARAMS_OFFSET};

use crate::error::{BootError, BootResult};
use crate::smp::mailbox::ParameterBlock;

pub const TRAMPOLINE_CODE_LEN: usize = TRAMPOLINE_PARAMS_OFFSET as usize;

/// Parameter block offsets as encoded in the image.
pub const PARAM_PAGE_TABLE_ROOT: u8 = 0;
pub const PARAM_STACK_TOP: u8 = 8;
pub const PARAM_ENTRY: u8 = 16;

const PM_ENTRY: usize = 0x40;
const GDT_POINTER: usize = 0x60;
const GDT: usize = 0x70;
const PAGING_SETUP: usize = 0x90;
const LM_ENTRY: usize = 0xC0;

const SEL_CODE32: u16 = 0x08;
const SEL_DATA: u16 = 0x10;
const SEL_CODE64: u16 = 0x18;

const GDT_ENTRIES: [u64; 4] = [
    0,
    0x00CF_9A00_0000_FFFF,
    0x00CF_9200_0000_FFFF,
    0x00AF_9A00_0000_FFFF,
];

const CR4_PAE_PGE: u32 = 0xA0;
const MSR_EFER: u32 = 0xC000_0080;
/// SCE | LME | NXE.
const EFER_BITS: u32 = 0x901;
const CR0_PG_PE: u32 = 0x8000_0001;

const NOP: u8 = 0x90;

struct Emitter {
    code: [u8; TRAMPOLINE_CODE_LEN],
    at: usize,
}

impl Emitter {
    const fn new() -> Self {
        Self {
            code: [0; TRAMPOLINE_CODE_LEN],
            at: 0,
        }
    }

    fn bytes(&mut self, bytes: &[u8]) {
        self.code[self.at..self.at + bytes.len()].copy_from_slice(bytes);
        self.at += bytes.len();
    }

    fn u16(&mut self, value: u16) {
        self.bytes(&value.to_le_bytes());
    }

    fn u32(&mut self, value: u32) {
        self.bytes(&value.to_le_bytes());
    }

    fn u64(&mut self, value: u64) {
        self.bytes(&value.to_le_bytes());
    }

    fn pad_to(&mut self, offset: usize, fill: u8) {
        debug_assert!(self.at <= offset, "trampoline section overlaps {:#x}", offset);
        self.code[self.at..offset].fill(fill);
        self.at = offset;
    }
}

const fn phys(offset: usize) -> u32 {
    TRAMPOLINE_ADDR as u32 + offset as u32
}

/// Assemble the trampoline for `TRAMPOLINE_ADDR`.
pub fn build_image() -> [u8; TRAMPOLINE_CODE_LEN] {
    let mut e = Emitter::new();
    let params = phys(TRAMPOLINE_CODE_LEN);

    // 16-bit real mode, CS = TRAMPOLINE_ADDR >> 4.
    e.bytes(&[0xFA, 0xFC]); // cli; cld
    e.bytes(&[0x31, 0xC0]); // xor ax, ax
    e.bytes(&[0x8E, 0xD8, 0x8E, 0xC0, 0x8E, 0xD0]); // mov ds/es/ss, ax
    e.bytes(&[0x0F, 0x01, 0x16]); // lgdt [disp16]
    e.u16(phys(GDT_POINTER) as u16);
    e.bytes(&[0x0F, 0x20, 0xC0]); // mov eax, cr0
    e.bytes(&[0x66, 0x83, 0xC8, 0x01]); // or eax, 1
    e.bytes(&[0x0F, 0x22, 0xC0]); // mov cr0, eax
    e.bytes(&[0x66, 0xEA]); // jmp far ptr32
    e.u32(phys(PM_ENTRY));
    e.u16(SEL_CODE32);
    e.pad_to(PM_ENTRY, NOP);

    // 32-bit protected mode.
    e.bytes(&[0x66, 0xB8]); // mov ax, imm16
    e.u16(SEL_DATA);
    e.bytes(&[0x8E, 0xD8, 0x8E, 0xC0, 0x8E, 0xD0, 0x8E, 0xE0, 0x8E, 0xE8]);
    e.bytes(&[0xBF]); // mov edi, imm32
    e.u32(params);
    let rel = PAGING_SETUP - (e.at + 2);
    e.bytes(&[0xEB, rel as u8]); // jmp rel8
    e.pad_to(GDT_POINTER, NOP);

    e.u16((GDT_ENTRIES.len() * 8 - 1) as u16);
    e.u32(phys(GDT));
    e.pad_to(GDT, 0);
    for entry in GDT_ENTRIES {
        e.u64(entry);
    }

    e.pad_to(PAGING_SETUP, NOP);
    e.bytes(&[0xB8]); // mov eax, imm32
    e.u32(CR4_PAE_PGE);
    e.bytes(&[0x0F, 0x22, 0xE0]); // mov cr4, eax
    e.bytes(&[0x8B, 0x47, PARAM_PAGE_TABLE_ROOT]); // mov eax, [edi+disp8]
    e.bytes(&[0x0F, 0x22, 0xD8]); // mov cr3, eax
    e.bytes(&[0xB9]); // mov ecx, imm32
    e.u32(MSR_EFER);
    e.bytes(&[0xB8]); // mov eax, imm32
    e.u32(EFER_BITS);
    e.bytes(&[0x31, 0xD2]); // xor edx, edx
    e.bytes(&[0x0F, 0x30]); // wrmsr
    e.bytes(&[0x0F, 0x20, 0xC0]); // mov eax, cr0
    e.bytes(&[0x0D]); // or eax, imm32
    e.u32(CR0_PG_PE);
    e.bytes(&[0x0F, 0x22, 0xC0]); // mov cr0, eax
    e.bytes(&[0xEA]); // jmp far ptr32
    e.u32(phys(LM_ENTRY));
    e.u16(SEL_CODE64);
    e.pad_to(LM_ENTRY, NOP);

    // 64-bit long mode.
    e.bytes(&[0x48, 0xBB]); // mov rbx, imm64
    e.u64(u64::from(params));
    e.bytes(&[0x48, 0x8B, 0x63, PARAM_STACK_TOP]); // mov rsp, [rbx+disp8]
    e.bytes(&[0x48, 0x83, 0xE4, 0xF0]); // and rsp, -16
    e.bytes(&[0x48, 0x89, 0xDF]); // mov rdi, rbx
    e.bytes(&[0x48, 0x8B, 0x43, PARAM_ENTRY]); // mov rax, [rbx+disp8]
    e.bytes(&[0xFF, 0xD0]); // call rax
    e.bytes(&[0xFA, 0xF4, 0xEB, 0xFC]); // cli; hlt; jmp -4
    e.pad_to(TRAMPOLINE_CODE_LEN, 0);

    e.code
}

/// Copy the image into low memory and return its parameter block.
///
/// # Safety
///
/// `phys_offset + TRAMPOLINE_ADDR` must be a writable mapping of the
/// trampoline page, and no AP may be executing from it.
pub unsafe fn install(phys_offset: u64, page_table_root: u64) -> BootResult<*mut ParameterBlock> {
    if page_table_root > u64::from(u32::MAX) {
        return Err(BootError::CapabilityUnavailable("page tables below 4 GiB"));
    }
    let image = build_image();
    let base = (phys_offset + TRAMPOLINE_ADDR) as *mut u8;
    core::ptr::copy_nonoverlapping(image.as_ptr(), base, image.len());
    let block = base.add(TRAMPOLINE_CODE_LEN) as *mut ParameterBlock;
    block.write(ParameterBlock::new());
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u32_at(image: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(image[offset..offset + 4].try_into().unwrap())
    }

    #[test]
    fn test_sections_land_on_fixed_offsets() {
        let image = build_image();
        assert_eq!(&image[..2], &[0xFA, 0xFC]);
        assert_eq!(&image[PM_ENTRY..PM_ENTRY + 4], &[0x66, 0xB8, 0x10, 0x00]);
        assert_eq!(image[PAGING_SETUP], 0xB8);
        assert_eq!(&image[LM_ENTRY..LM_ENTRY + 2], &[0x48, 0xBB]);
    }

    #[test]
    fn test_gdt_and_pointer() {
        let image = build_image();
        assert_eq!(u16::from_le_bytes([image[GDT_POINTER], image[GDT_POINTER + 1]]), 31);
        assert_eq!(u32_at(&image, GDT_POINTER + 2), TRAMPOLINE_ADDR as u32 + 0x70);
        let code64 = u64::from_le_bytes(image[GDT + 24..GDT + 32].try_into().unwrap());
        assert_eq!(code64, 0x00AF_9A00_0000_FFFF);
    }

    #[test]
    fn test_far_jumps_target_trampoline() {
        let image = build_image();
        // 16-bit far jump sits just before the PM entry padding.
        let pos = image[..PM_ENTRY]
            .windows(2)
            .position(|w| w == [0x66, 0xEA])
            .unwrap();
        assert_eq!(u32_at(&image, pos + 2), TRAMPOLINE_ADDR as u32 + 0x40);
        let pos = image[PAGING_SETUP..LM_ENTRY]
            .iter()
            .position(|&b| b == 0xEA)
            .unwrap()
            + PAGING_SETUP;
        assert_eq!(u32_at(&image, pos + 1), TRAMPOLINE_ADDR as u32 + 0xC0);
        assert_eq!(&image[pos + 5..pos + 7], &[0x18, 0x00]);
    }

    #[test]
    fn test_long_mode_reads_parameter_block() {
        let image = build_image();
        let imm = u64::from_le_bytes(image[LM_ENTRY + 2..LM_ENTRY + 10].try_into().unwrap());
        assert_eq!(imm, TRAMPOLINE_ADDR + TRAMPOLINE_PARAMS_OFFSET);
        assert_eq!(
            &image[LM_ENTRY + 10..LM_ENTRY + 14],
            &[0x48, 0x8B, 0x63, PARAM_STACK_TOP]
        );
    }

    #[test]
    fn test_parameter_offsets_match_struct() {
        assert_eq!(
            core::mem::offset_of!(ParameterBlock, page_table_root),
            PARAM_PAGE_TABLE_ROOT as usize
        );
        assert_eq!(core::mem::offset_of!(ParameterBlock, stack_top), PARAM_STACK_TOP as usize);
        assert_eq!(core::mem::offset_of!(ParameterBlock, entry), PARAM_ENTRY as usize);
    }

    #[test]
    fn test_install_rejects_high_page_tables() {
        let result = unsafe { install(0, 0x1_0000_0000) };
        assert_eq!(
            result.unwrap_err(),
            BootError::CapabilityUnavailable("page tables below 4 GiB")
        );
    }

    #[test]
    fn test_install_copies_image_and_resets_block() {
        let mut page = vec![0xAAAA_AAAA_AAAA_AAAAu64; 512];
        let base = page.as_mut_ptr() as *mut u8;
        let block = unsafe { install(base as u64 - TRAMPOLINE_ADDR, 0x1000) }.unwrap();
        let copied = unsafe { core::slice::from_raw_parts(base, TRAMPOLINE_CODE_LEN) };
        assert_eq!(copied, &build_image()[..]);
        assert!(unsafe { &*block }.is_consumed());
    }
}
