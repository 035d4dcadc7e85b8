//! Pretty-printers for both on-disk dialects.
//!
//! Each printed record is preceded by exactly one blank line. The choice
//! of value encoding is shared between the dialects: values that are
//! LDIF-safe and readable under the configured policy go out verbatim,
//! values with a NUL byte always go out as base64, and the rest use the
//! extended dialect's backslash escaping or, in LDIF, base64.

use std::io::{self, Write};

use crate::base64;
use crate::data::{Entry, Mod, ModOp};
use crate::dn;

/// Which byte sequences count as human-readable on output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readability {
    /// Printable ASCII plus tab and newline.
    Ascii,
    /// Any valid UTF-8 without NUL bytes.
    Utf8,
    /// Everything; only NUL bytes still force base64.
    Any,
}

/// Output policy, threaded through both printers.
#[derive(Debug, Clone, Copy)]
pub struct PrinterOptions {
    pub readability: Readability,
    /// Fold LDIF logical lines longer than 76 bytes. The extended dialect
    /// always emits one physical line per value.
    pub fold: bool,
}

impl Default for PrinterOptions {
    fn default() -> PrinterOptions {
        PrinterOptions {
            readability: Readability::Utf8,
            fold: true,
        }
    }
}

const FOLD_COLUMN: usize = 76;

// ---------------------------------------------------------------------------
// Value classification
// ---------------------------------------------------------------------------

fn utf8_readable(data: &[u8]) -> bool {
    !data.contains(&0) && std::str::from_utf8(data).is_ok()
}

fn ascii_readable(data: &[u8]) -> bool {
    data.iter()
        .all(|&b| b < 128 && (b >= 32 || b == b'\n' || b == b'\t'))
}

fn is_readable(data: &[u8], readability: Readability) -> bool {
    match readability {
        Readability::Utf8 => utf8_readable(data),
        Readability::Ascii => ascii_readable(data),
        Readability::Any => true,
    }
}

/// LDIF SAFE-STRING: no NUL/CR/LF, ASCII only, and no leading space,
/// colon or less-than.
fn safe_string(data: &[u8]) -> bool {
    if let Some(&first) = data.first() {
        if first == b' ' || first == b':' || first == b'<' {
            return false;
        }
    }
    data.iter()
        .all(|&b| b != 0 && b != b'\r' && b != b'\n' && b < 0x80)
}

/// Backslash escaping for the extended dialect: newline and backslash
/// are prefixed with a backslash.
fn write_escaped(w: &mut dyn Write, data: &[u8]) -> io::Result<()> {
    for &b in data {
        if b == b'\n' || b == b'\\' {
            w.write_all(b"\\")?;
        }
        w.write_all(&[b])?;
    }
    Ok(())
}

fn mod_op_name(op: ModOp) -> &'static str {
    match op {
        ModOp::Add => "add",
        ModOp::Delete => "delete",
        ModOp::Replace => "replace",
    }
}

// ---------------------------------------------------------------------------
// Extended dialect
// ---------------------------------------------------------------------------

/// Printer for the native extended format.
#[derive(Debug, Default)]
pub struct ExtendedPrinter {
    pub options: PrinterOptions,
}

impl ExtendedPrinter {
    pub fn new(options: PrinterOptions) -> ExtendedPrinter {
        ExtendedPrinter { options }
    }

    /// The encoding marker and value for a body line, without the
    /// attribute name or terminating newline.
    fn value_token(&self, w: &mut dyn Write, data: &[u8]) -> io::Result<()> {
        if data.contains(&0) || !is_readable(data, self.options.readability) {
            w.write_all(b":: ")?;
            w.write_all(base64::encode(data).as_bytes())
        } else if !safe_string(data) {
            w.write_all(b":; ")?;
            write_escaped(w, data)
        } else {
            w.write_all(b": ")?;
            w.write_all(data)
        }
    }

    /// A DN after a record keyword: space-separated, backslash-escaped.
    fn dn_token(&self, w: &mut dyn Write, data: &[u8]) -> io::Result<()> {
        if data.contains(&0) || !is_readable(data, self.options.readability) {
            w.write_all(b":: ")?;
            w.write_all(base64::encode(data).as_bytes())
        } else {
            w.write_all(b" ")?;
            write_escaped(w, data)
        }
    }

    fn header(&self, w: &mut dyn Write, keyword: &str, dn: &str) -> io::Result<()> {
        w.write_all(b"\n")?;
        w.write_all(keyword.as_bytes())?;
        self.dn_token(w, dn.as_bytes())?;
        w.write_all(b"\n")
    }

    /// Print an attrval record. Without a key the record is tagged
    /// `entry`.
    pub fn entry(&self, w: &mut dyn Write, key: Option<&str>, entry: &Entry) -> io::Result<()> {
        self.header(w, key.unwrap_or("entry"), &entry.dn)?;
        for attr in &entry.attributes {
            for value in &attr.values {
                w.write_all(attr.ad.as_bytes())?;
                self.value_token(w, value)?;
                w.write_all(b"\n")?;
            }
        }
        Ok(())
    }

    pub fn add(&self, w: &mut dyn Write, dn: &str, mods: &[Mod]) -> io::Result<()> {
        self.header(w, "add", dn)?;
        for m in mods {
            for value in &m.values {
                w.write_all(m.ad.as_bytes())?;
                self.value_token(w, value)?;
                w.write_all(b"\n")?;
            }
        }
        Ok(())
    }

    pub fn delete(&self, w: &mut dyn Write, dn: &str) -> io::Result<()> {
        self.header(w, "delete", dn)
    }

    pub fn modify(&self, w: &mut dyn Write, dn: &str, mods: &[Mod]) -> io::Result<()> {
        self.header(w, "modify", dn)?;
        for m in mods {
            w.write_all(mod_op_name(m.op).as_bytes())?;
            self.value_token(w, m.ad.as_bytes())?;
            w.write_all(b"\n")?;
            for value in &m.values {
                self.value_token(w, value)?;
                w.write_all(b"\n")?;
            }
        }
        Ok(())
    }

    pub fn rename(
        &self,
        w: &mut dyn Write,
        old_dn: &str,
        new_dn: &str,
        delete_old_rdn: bool,
    ) -> io::Result<()> {
        self.header(w, "rename", old_dn)?;
        let action = if delete_old_rdn { "replace" } else { "add" };
        w.write_all(action.as_bytes())?;
        self.value_token(w, new_dn.as_bytes())?;
        w.write_all(b"\n")
    }

    /// Rename given only the new RDN; the parent is taken from `old_dn`.
    pub fn modrdn(
        &self,
        w: &mut dyn Write,
        old_dn: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
    ) -> io::Result<()> {
        let new_dn = match dn::split_first_rdn(old_dn) {
            (_, Some(parent)) => format!("{new_rdn},{parent}"),
            (_, None) => new_rdn.to_string(),
        };
        self.rename(w, old_dn, &new_dn, delete_old_rdn)
    }
}

// ---------------------------------------------------------------------------
// LDIF dialect
// ---------------------------------------------------------------------------

/// Printer for RFC 2849 LDIF.
#[derive(Debug, Default)]
pub struct LdifPrinter {
    pub options: PrinterOptions,
}

impl LdifPrinter {
    pub fn new(options: PrinterOptions) -> LdifPrinter {
        LdifPrinter { options }
    }

    /// One attribute line, folded when the policy asks for it.
    fn line(&self, w: &mut dyn Write, ad: &str, value: &[u8]) -> io::Result<()> {
        let mut logical = Vec::with_capacity(ad.len() + value.len() + 4);
        logical.extend_from_slice(ad.as_bytes());
        if safe_string(value) && is_readable(value, self.options.readability) {
            logical.extend_from_slice(b": ");
            logical.extend_from_slice(value);
        } else {
            logical.extend_from_slice(b":: ");
            logical.extend_from_slice(base64::encode(value).as_bytes());
        }
        self.write_folded(w, &logical)
    }

    fn write_folded(&self, w: &mut dyn Write, line: &[u8]) -> io::Result<()> {
        if !self.options.fold || line.len() <= FOLD_COLUMN {
            w.write_all(line)?;
        } else {
            w.write_all(&line[..FOLD_COLUMN])?;
            for chunk in line[FOLD_COLUMN..].chunks(FOLD_COLUMN - 1) {
                w.write_all(b"\n ")?;
                w.write_all(chunk)?;
            }
        }
        w.write_all(b"\n")
    }

    /// Print an attrval record, tagged with `ldapvi-key` when a key is
    /// given.
    pub fn entry(&self, w: &mut dyn Write, key: Option<&str>, entry: &Entry) -> io::Result<()> {
        w.write_all(b"\n")?;
        self.line(w, "dn", entry.dn.as_bytes())?;
        if let Some(key) = key {
            writeln!(w, "ldapvi-key: {key}")?;
        }
        for attr in &entry.attributes {
            for value in &attr.values {
                self.line(w, &attr.ad, value)?;
            }
        }
        Ok(())
    }

    pub fn add(&self, w: &mut dyn Write, dn: &str, mods: &[Mod]) -> io::Result<()> {
        w.write_all(b"\n")?;
        self.line(w, "dn", dn.as_bytes())?;
        w.write_all(b"changetype: add\n")?;
        for m in mods {
            for value in &m.values {
                self.line(w, &m.ad, value)?;
            }
        }
        Ok(())
    }

    pub fn delete(&self, w: &mut dyn Write, dn: &str) -> io::Result<()> {
        w.write_all(b"\n")?;
        self.line(w, "dn", dn.as_bytes())?;
        w.write_all(b"changetype: delete\n")
    }

    pub fn modify(&self, w: &mut dyn Write, dn: &str, mods: &[Mod]) -> io::Result<()> {
        w.write_all(b"\n")?;
        self.line(w, "dn", dn.as_bytes())?;
        w.write_all(b"changetype: modify\n")?;
        for m in mods {
            writeln!(w, "{}: {}", mod_op_name(m.op), m.ad)?;
            for value in &m.values {
                self.line(w, &m.ad, value)?;
            }
            w.write_all(b"-\n")?;
        }
        Ok(())
    }

    /// Print a rename as `changetype: modrdn`, splitting `new_dn` into
    /// `newrdn` and, when the new parent is non-empty, `newsuperior`.
    pub fn rename(
        &self,
        w: &mut dyn Write,
        old_dn: &str,
        new_dn: &str,
        delete_old_rdn: bool,
    ) -> io::Result<()> {
        let (new_rdn, parent) = dn::split_first_rdn(new_dn);

        w.write_all(b"\n")?;
        self.line(w, "dn", old_dn.as_bytes())?;
        w.write_all(b"changetype: modrdn\n")?;
        self.line(w, "newrdn", new_rdn.as_bytes())?;
        writeln!(w, "deleteoldrdn: {}", u8::from(delete_old_rdn))?;
        match parent {
            Some(parent) if !parent.is_empty() => {
                self.line(w, "newsuperior", parent.as_bytes())?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Print a rename given only the new RDN, without `newsuperior`.
    pub fn modrdn(
        &self,
        w: &mut dyn Write,
        old_dn: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
    ) -> io::Result<()> {
        w.write_all(b"\n")?;
        self.line(w, "dn", old_dn.as_bytes())?;
        w.write_all(b"changetype: modrdn\n")?;
        self.line(w, "newrdn", new_rdn.as_bytes())?;
        writeln!(w, "deleteoldrdn: {}", u8::from(delete_old_rdn))?;
        Ok(())
    }
}
