//! Flattened device tree access.
//!
//! The blob is never materialised into a tree: [`Fdt::tokens`] is a cursor
//! over the structure block, and [`render`] turns that stream into DTS-like
//! text for diagnostics.  [`Fdt::property`] answers point lookups such as
//! `/chosen/bootargs`.  Nothing here feeds the hardware inventory.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_op_in_unsafe_fn)]

pub mod error;
pub mod render;

#[cfg(test)]
mod testutil;

pub use error::{FdtError, FdtResult};
pub use render::{dump, render};

use kestrel_lib::klog_debug;

pub const FDT_MAGIC: u32 = 0xd00d_feed;

const FDT_BEGIN_NODE: u32 = 0x1;
const FDT_END_NODE: u32 = 0x2;
const FDT_PROP: u32 = 0x3;
const FDT_NOP: u32 = 0x4;
const FDT_END: u32 = 0x9;

pub const FDT_HEADER_LEN: usize = 40;

fn be32(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

#[inline]
const fn align4(offset: usize) -> usize {
    (offset + 3) & !3
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FdtHeader {
    pub magic: u32,
    pub totalsize: u32,
    pub off_dt_struct: u32,
    pub off_dt_strings: u32,
    pub off_mem_rsvmap: u32,
    pub version: u32,
    pub last_comp_version: u32,
    pub boot_cpuid_phys: u32,
    pub size_dt_strings: u32,
    pub size_dt_struct: u32,
}

impl FdtHeader {
    fn parse(bytes: &[u8]) -> Option<Self> {
        let field = |i: usize| be32(bytes, i * 4);
        Some(Self {
            magic: field(0)?,
            totalsize: field(1)?,
            off_dt_struct: field(2)?,
            off_dt_strings: field(3)?,
            off_mem_rsvmap: field(4)?,
            version: field(5)?,
            last_comp_version: field(6)?,
            boot_cpuid_phys: field(7)?,
            size_dt_strings: field(8)?,
            size_dt_struct: field(9)?,
        })
    }
}

/// A validated device tree blob.
#[derive(Clone, Copy, Debug)]
pub struct Fdt<'a> {
    header: FdtHeader,
    structs: &'a [u8],
    struct_base: usize,
    strings: &'a [u8],
}

/// Locate a block inside the blob.  A zero size means "to the end", which
/// is how pre-v17 headers leave the size fields.
fn block(blob: &[u8], offset: u32, size: u32) -> FdtResult<&[u8]> {
    let start = offset as usize;
    let end = match size {
        0 => blob.len(),
        size => start
            .checked_add(size as usize)
            .ok_or(FdtError::Truncated { offset: start })?,
    };
    blob.get(start..end)
        .ok_or(FdtError::Truncated { offset: start })
}

impl<'a> Fdt<'a> {
    pub fn from_bytes(blob: &'a [u8]) -> FdtResult<Self> {
        if be32(blob, 0) != Some(FDT_MAGIC) {
            return Err(FdtError::NoDeviceTree);
        }
        let header = FdtHeader::parse(blob).ok_or(FdtError::NoDeviceTree)?;
        let total = header.totalsize as usize;
        if total < FDT_HEADER_LEN {
            return Err(FdtError::NoDeviceTree);
        }
        let blob = blob
            .get(..total)
            .ok_or(FdtError::Truncated { offset: blob.len() })?;

        let structs = block(blob, header.off_dt_struct, header.size_dt_struct)?;
        let strings = block(blob, header.off_dt_strings, header.size_dt_strings)?;
        klog_debug!(
            "FDT: version {}, {} bytes, boot CPU {}",
            header.version,
            header.totalsize,
            header.boot_cpuid_phys
        );
        Ok(Self {
            header,
            structs,
            struct_base: header.off_dt_struct as usize,
            strings,
        })
    }

    /// # Safety
    ///
    /// `ptr` must be null or point to a readable device tree blob whose
    /// `totalsize` bytes stay mapped and unmodified for `'static`.
    pub unsafe fn from_ptr(ptr: *const u8) -> FdtResult<Fdt<'static>> {
        if ptr.is_null() {
            return Err(FdtError::NoDeviceTree);
        }
        let head = core::slice::from_raw_parts(ptr, 8);
        if be32(head, 0) != Some(FDT_MAGIC) {
            return Err(FdtError::NoDeviceTree);
        }
        let total = be32(head, 4).unwrap_or(0) as usize;
        if total < FDT_HEADER_LEN {
            return Err(FdtError::NoDeviceTree);
        }
        Fdt::from_bytes(core::slice::from_raw_parts(ptr, total))
    }

    pub fn header(&self) -> &FdtHeader {
        &self.header
    }

    pub fn tokens(&self) -> Tokens<'a> {
        Tokens {
            fdt: *self,
            pos: 0,
            done: false,
        }
    }

    /// Value of property `name` on the node at `path` (`/` for the root,
    /// `/chosen`, `/soc/uart`).  A path component without a unit address
    /// also matches `component@unit`.
    pub fn property(&self, path: &str, name: &str) -> FdtResult<Option<&'a [u8]>> {
        let mut components = path.split('/').filter(|c| !c.is_empty());
        let wanted = components.clone().count();
        // Open nodes, counting the root, and how many of them match the
        // leading path components.
        let mut depth = 0usize;
        let mut matched = 0usize;

        for token in self.tokens() {
            match token? {
                Token::BeginNode { name: node } => {
                    depth += 1;
                    if depth == matched + 2
                        && components
                            .clone()
                            .nth(matched)
                            .is_some_and(|c| node_matches(node, c))
                    {
                        matched += 1;
                    }
                }
                Token::EndNode => {
                    if depth == matched + 1 && matched > 0 {
                        matched -= 1;
                    }
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        break;
                    }
                }
                Token::Prop { name: prop, value }
                    if depth == wanted + 1 && matched == wanted && prop == name.as_bytes() =>
                {
                    return Ok(Some(value));
                }
                Token::End => break,
                Token::Prop { .. } | Token::Nop => {}
            }
        }
        Ok(None)
    }

    /// Kernel command line from `/chosen/bootargs`.
    pub fn bootargs(&self) -> Option<&'a str> {
        let value = self.property("/chosen", "bootargs").ok().flatten()?;
        let text = value.split(|&b| b == 0).next()?;
        core::str::from_utf8(text).ok()
    }

    /// NUL-terminated name at `offset` in the strings block.
    fn string_at(&self, offset: usize) -> Option<&'a [u8]> {
        let tail = self.strings.get(offset..)?;
        let nul = tail.iter().position(|&b| b == 0)?;
        Some(&tail[..nul])
    }
}

fn node_matches(node: &[u8], component: &str) -> bool {
    let component = component.as_bytes();
    if node == component {
        return true;
    }
    !component.contains(&b'@')
        && node.len() > component.len()
        && node.starts_with(component)
        && node[component.len()] == b'@'
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Token<'a> {
    /// Empty name for the root node.
    BeginNode { name: &'a [u8] },
    EndNode,
    Prop { name: &'a [u8], value: &'a [u8] },
    Nop,
    End,
}

/// Cursor over the structure block.
///
/// Yields `End` once and then stops.  Any error is yielded once and also
/// stops the walk.
pub struct Tokens<'a> {
    fdt: Fdt<'a>,
    pos: usize,
    done: bool,
}

impl<'a> Tokens<'a> {
    /// Current position as an offset from the blob start.
    fn blob_offset(&self, pos: usize) -> usize {
        self.fdt.struct_base + pos
    }

    fn truncated(&mut self, pos: usize) -> FdtError {
        self.done = true;
        FdtError::Truncated {
            offset: self.blob_offset(pos),
        }
    }

    fn read_token(&mut self) -> FdtResult<Token<'a>> {
        let structs = self.fdt.structs;
        let start = self.pos;
        let token = match be32(structs, start) {
            Some(token) => token,
            None => return Err(self.truncated(start)),
        };
        let mut pos = start + 4;

        let token = match token {
            FDT_BEGIN_NODE => {
                let tail = structs.get(pos..).unwrap_or(&[]);
                let Some(nul) = tail.iter().position(|&b| b == 0) else {
                    return Err(self.truncated(pos));
                };
                let name = &tail[..nul];
                pos = align4(pos + nul + 1);
                Token::BeginNode { name }
            }
            FDT_END_NODE => Token::EndNode,
            FDT_PROP => {
                let (Some(len), Some(nameoff)) = (be32(structs, pos), be32(structs, pos + 4))
                else {
                    return Err(self.truncated(pos));
                };
                pos += 8;
                let len = len as usize;
                let Some(value) = structs.get(pos..pos.saturating_add(len)) else {
                    return Err(self.truncated(pos));
                };
                let Some(name) = self.fdt.string_at(nameoff as usize) else {
                    return Err(self.truncated(pos - 4));
                };
                pos = align4(pos + len);
                Token::Prop { name, value }
            }
            FDT_NOP => Token::Nop,
            FDT_END => {
                self.done = true;
                Token::End
            }
            other => {
                self.done = true;
                return Err(FdtError::UnknownToken {
                    token: other,
                    offset: self.blob_offset(start),
                });
            }
        };
        self.pos = pos;
        Ok(token)
    }
}

impl<'a> Iterator for Tokens<'a> {
    type Item = FdtResult<Token<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        Some(self.read_token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FdtBuilder;

    #[test]
    fn test_header_and_tokens() {
        let mut b = FdtBuilder::new();
        b.begin_node("");
        b.prop("model", b"test\0");
        b.nop();
        b.begin_node("cpus");
        b.end_node();
        b.end_node();
        b.end();
        let blob = b.finish();

        let fdt = Fdt::from_bytes(&blob).unwrap();
        assert_eq!(fdt.header().magic, FDT_MAGIC);
        assert_eq!(fdt.header().version, 17);
        assert_eq!(fdt.header().totalsize as usize, blob.len());

        let tokens: Vec<Token<'_>> = fdt.tokens().map(|t| t.unwrap()).collect();
        assert_eq!(
            tokens,
            vec![
                Token::BeginNode { name: b"" },
                Token::Prop {
                    name: b"model",
                    value: b"test\0"
                },
                Token::Nop,
                Token::BeginNode { name: b"cpus" },
                Token::EndNode,
                Token::EndNode,
                Token::End,
            ]
        );
    }

    #[test]
    fn test_bad_magic_and_short_blob() {
        let mut blob = FdtBuilder::new().finish();
        blob[0] = 0;
        assert_eq!(Fdt::from_bytes(&blob).unwrap_err(), FdtError::NoDeviceTree);
        assert_eq!(
            Fdt::from_bytes(&[0xd0, 0x0d]).unwrap_err(),
            FdtError::NoDeviceTree
        );
        assert_eq!(
            unsafe { Fdt::from_ptr(core::ptr::null()) }.unwrap_err(),
            FdtError::NoDeviceTree
        );
    }

    #[test]
    fn test_totalsize_beyond_buffer_is_truncated() {
        let blob = FdtBuilder::new().finish();
        let short = &blob[..blob.len() - 4];
        assert!(matches!(
            Fdt::from_bytes(short),
            Err(FdtError::Truncated { .. })
        ));
    }

    #[test]
    fn test_unknown_token_stops_walk() {
        let mut b = FdtBuilder::new();
        b.begin_node("");
        b.raw_token(0x7);
        b.end_node();
        b.end();
        let blob = b.finish();
        let fdt = Fdt::from_bytes(&blob).unwrap();

        let results: Vec<_> = fdt.tokens().collect();
        assert_eq!(results.len(), 2);
        assert_eq!(
            results[1],
            Err(FdtError::UnknownToken {
                token: 0x7,
                offset: FDT_HEADER_LEN + 8
            })
        );
    }

    #[test]
    fn test_prop_running_off_struct_block() {
        let mut b = FdtBuilder::new();
        b.begin_node("");
        b.prop_raw_len("reg", 0x100);
        let blob = b.finish();
        let fdt = Fdt::from_bytes(&blob).unwrap();
        let last = fdt.tokens().last().unwrap();
        assert!(matches!(last, Err(FdtError::Truncated { .. })));
    }

    fn chosen_tree(bootargs: &[u8]) -> Vec<u8> {
        let mut b = FdtBuilder::new();
        b.begin_node("");
        b.prop("bootargs", b"root-level\0");
        b.begin_node("cpus");
        b.begin_node("chosen");
        b.prop("bootargs", b"nested\0");
        b.end_node();
        b.end_node();
        b.begin_node("chosen");
        b.prop("stdout-path", b"/soc/serial@10000000\0");
        b.prop("bootargs", bootargs);
        b.end_node();
        b.begin_node("soc");
        b.begin_node("serial@10000000");
        b.prop("reg", &[0, 0, 0, 0, 0x10, 0, 0, 0]);
        b.end_node();
        b.end_node();
        b.end_node();
        b.end();
        b.finish()
    }

    #[test]
    fn test_property_lookup_by_path() {
        let blob = chosen_tree(b"console=ttyS0\0");
        let fdt = Fdt::from_bytes(&blob).unwrap();
        assert_eq!(
            fdt.property("/", "bootargs").unwrap(),
            Some(&b"root-level\0"[..])
        );
        assert_eq!(
            fdt.property("/chosen", "bootargs").unwrap(),
            Some(&b"console=ttyS0\0"[..])
        );
        assert_eq!(
            fdt.property("/soc/serial", "reg").unwrap().map(|v| v.len()),
            Some(8)
        );
        assert_eq!(fdt.property("/chosen", "missing").unwrap(), None);
        assert_eq!(fdt.property("/memory", "reg").unwrap(), None);
    }

    #[test]
    fn test_bootargs_feed_boot_config() {
        let blob = chosen_tree(b"klog=debug smp=off fdt.dump=no\0");
        let fdt = Fdt::from_bytes(&blob).unwrap();
        assert_eq!(fdt.bootargs(), Some("klog=debug smp=off fdt.dump=no"));

        let cfg = kestrel_lib::config_from_cmdline(fdt.bootargs());
        assert!(!cfg.smp_enabled);
        assert!(!cfg.fdt_dump);
        assert_eq!(cfg.log_level, kestrel_lib::KlogLevel::Debug);
    }

    #[test]
    fn test_missing_chosen_has_no_bootargs() {
        let mut b = FdtBuilder::new();
        b.begin_node("");
        b.prop("model", b"bare\0");
        b.end_node();
        b.end();
        let blob = b.finish();
        assert_eq!(Fdt::from_bytes(&blob).unwrap().bootargs(), None);
    }

    #[test]
    fn test_property_lookup_reports_bad_tokens() {
        let mut b = FdtBuilder::new();
        b.begin_node("");
        b.raw_token(0x7);
        b.end_node();
        b.end();
        let blob = b.finish();
        assert!(matches!(
            Fdt::from_bytes(&blob).unwrap().property("/chosen", "bootargs"),
            Err(FdtError::UnknownToken { token: 0x7, .. })
        ));
    }
}
