//! DTS-style text rendering of a device tree.
//!
//! Output resembles `dtc -I dtb -O dts`.  Property values have no type
//! information in the blob, so they are classified by shape:
//!
//! 1. NUL-terminated and otherwise printable: one or more quoted strings,
//!    split on embedded NULs.
//! 2. Length a multiple of four: big-endian cells, `<0x.. 0x..>`.
//! 3. Anything else: raw bytes, `[01 02 ..]`.

use core::fmt::{self, Write};

use crate::{Fdt, FdtError, FdtResult, Token};

const INDENT: &str = "    ";

fn write_indent<W: Write>(out: &mut W, depth: usize) -> fmt::Result {
    for _ in 0..depth {
        out.write_str(INDENT)?;
    }
    Ok(())
}

fn write_name<W: Write>(out: &mut W, name: &[u8]) -> fmt::Result {
    for &b in name {
        if b.is_ascii_graphic() {
            out.write_char(b as char)?;
        } else {
            write!(out, "\\x{:02x}", b)?;
        }
    }
    Ok(())
}

fn is_printable_string(value: &[u8]) -> bool {
    let Some((&last, body)) = value.split_last() else {
        return false;
    };
    last == 0
        && body
            .iter()
            .all(|&c| c == 0 || (0x20..0x7f).contains(&c) || matches!(c, b'\n' | b'\t' | b'\r'))
}

fn write_escaped<W: Write>(out: &mut W, s: &[u8]) -> fmt::Result {
    for &c in s {
        match c {
            b'\n' => out.write_str("\\n")?,
            b'\t' => out.write_str("\\t")?,
            b'\r' => out.write_str("\\r")?,
            b'\\' => out.write_str("\\\\")?,
            b'"' => out.write_str("\\\"")?,
            0x20..=0x7e => out.write_char(c as char)?,
            _ => write!(out, "\\x{:02x}", c)?,
        }
    }
    Ok(())
}

fn write_value<W: Write>(out: &mut W, value: &[u8]) -> fmt::Result {
    if is_printable_string(value) {
        let body = &value[..value.len() - 1];
        for (i, s) in body.split(|&b| b == 0).enumerate() {
            if i > 0 {
                out.write_str(", ")?;
            }
            out.write_char('"')?;
            write_escaped(out, s)?;
            out.write_char('"')?;
        }
        return Ok(());
    }

    if value.len() % 4 == 0 {
        out.write_char('<')?;
        for (i, cell) in value.chunks_exact(4).enumerate() {
            if i > 0 {
                out.write_char(' ')?;
            }
            let cell = u32::from_be_bytes([cell[0], cell[1], cell[2], cell[3]]);
            write!(out, "{:#x}", cell)?;
        }
        return out.write_char('>');
    }

    out.write_char('[')?;
    for (i, b) in value.iter().enumerate() {
        if i > 0 {
            out.write_char(' ')?;
        }
        write!(out, "{:02x}", b)?;
    }
    out.write_char(']')
}

/// Render the whole tree into `out`.
///
/// An unknown token is reported in the output and ends rendering with
/// `UnknownToken`; everything emitted up to that point stays.
pub fn render<W: Write>(fdt: &Fdt<'_>, out: &mut W) -> FdtResult {
    let header = fdt.header();
    writeln!(out, "/dts-v1/;")?;
    writeln!(
        out,
        "// FDT version {}, size {} bytes",
        header.version, header.totalsize
    )?;
    writeln!(out)?;

    let mut depth = 0usize;
    for token in fdt.tokens() {
        let token = match token {
            Ok(token) => token,
            Err(err) => {
                writeln!(out, "fdt: {}", err)?;
                return Err(err);
            }
        };
        match token {
            Token::BeginNode { name } => {
                write_indent(out, depth)?;
                if name.is_empty() {
                    out.write_char('/')?;
                } else {
                    write_name(out, name)?;
                }
                out.write_str(" {\n")?;
                depth += 1;
            }
            Token::EndNode => {
                depth = depth.saturating_sub(1);
                write_indent(out, depth)?;
                out.write_str("};\n")?;
                if depth == 0 {
                    writeln!(out)?;
                }
            }
            Token::Prop { name, value } => {
                write_indent(out, depth)?;
                write_name(out, name)?;
                if !value.is_empty() {
                    out.write_str(" = ")?;
                    write_value(out, value)?;
                }
                out.write_str(";\n")?;
            }
            Token::Nop => {}
            Token::End => return Ok(()),
        }
    }
    Ok(())
}

/// Render a blob if it is valid, otherwise print a one-line notice.
pub fn dump<W: Write>(blob: FdtResult<Fdt<'_>>, out: &mut W) -> FdtResult {
    match blob {
        Ok(fdt) => render(&fdt, out),
        Err(FdtError::Output) => Err(FdtError::Output),
        Err(err) => {
            writeln!(out, "fdt: invalid or missing device tree")?;
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FdtBuilder;

    fn render_blob(blob: &[u8]) -> (String, FdtResult) {
        let mut out = String::new();
        let result = dump(Fdt::from_bytes(blob), &mut out);
        (out, result)
    }

    fn render_value(value: &[u8]) -> String {
        let mut out = String::new();
        write_value(&mut out, value).unwrap();
        out
    }

    #[test]
    fn test_model_and_reg() {
        let mut b = FdtBuilder::new();
        b.begin_node("");
        b.prop("model", b"test\0");
        b.prop("reg", &[0, 0, 0x10, 0, 0, 0, 0x20, 0]);
        b.end_node();
        b.end();
        let blob = b.finish();

        let (out, result) = render_blob(&blob);
        assert_eq!(result, Ok(()));
        let expected = format!(
            "/dts-v1/;\n// FDT version 17, size {} bytes\n\n/ {{\n    model = \"test\";\n    reg = <0x1000 0x2000>;\n}};\n\n",
            blob.len()
        );
        assert_eq!(out, expected);
    }

    #[test]
    fn test_nested_nodes_indent() {
        let mut b = FdtBuilder::new();
        b.begin_node("");
        b.begin_node("cpus");
        b.begin_node("cpu@0");
        b.prop("status", b"okay\0");
        b.prop("interrupt-controller", &[]);
        b.end_node();
        b.end_node();
        b.end_node();
        b.end();
        let (out, _) = render_blob(&b.finish());

        let body: Vec<&str> = out.lines().skip(3).collect();
        assert_eq!(
            body,
            vec![
                "/ {",
                "    cpus {",
                "        cpu@0 {",
                "            status = \"okay\";",
                "            interrupt-controller;",
                "        };",
                "    };",
                "};",
                "",
            ]
        );
    }

    #[test]
    fn test_single_nul_is_empty_string() {
        assert_eq!(render_value(&[0]), "\"\"");
    }

    #[test]
    fn test_string_list_and_escapes() {
        assert_eq!(
            render_value(b"ns16550a\0simple-bus\0"),
            "\"ns16550a\", \"simple-bus\""
        );
        assert_eq!(render_value(b"a\tb\"c\\\0"), "\"a\\tb\\\"c\\\\\"");
        assert_eq!(render_value(b"x\0\0"), "\"x\", \"\"");
    }

    #[test]
    fn test_cells_and_bytes() {
        // Not NUL-terminated, length a multiple of four.
        assert_eq!(render_value(&[0, 0, 0, 1, 0xde, 0xad, 0xbe, 0xef]), "<0x1 0xdeadbeef>");
        // Printable but not terminated, odd length.
        assert_eq!(render_value(b"abc"), "[61 62 63]");
        // Terminated but with a non-printable byte.
        assert_eq!(render_value(&[0x01, 0x02, 0x00]), "[01 02 00]");
        assert_eq!(render_value(&[0x80, 0, 0, 0]), "<0x80000000>");
    }

    #[test]
    fn test_unknown_token_reported() {
        let mut b = FdtBuilder::new();
        b.begin_node("");
        b.raw_token(0x42);
        b.end_node();
        b.end();
        let (out, result) = render_blob(&b.finish());
        assert!(matches!(
            result,
            Err(FdtError::UnknownToken { token: 0x42, .. })
        ));
        assert!(out.ends_with("/ {\nfdt: unknown token 0x42\n"));
    }

    #[test]
    fn test_invalid_blob_notice() {
        let (out, result) = render_blob(&[0u8; 64]);
        assert_eq!(result, Err(FdtError::NoDeviceTree));
        assert_eq!(out, "fdt: invalid or missing device tree\n");
    }
}
