//! Parser for the editor's native extended record format.
//!
//! A record is a header line `KEY DN` followed by body lines whose shape
//! depends on the key:
//!
//! ```text
//! 0 cn=admin,dc=example,dc=com
//! objectClass: person
//! userPassword:ssha secret
//! jpegPhoto:< file:///tmp/photo.jpg
//!
//! ```
//!
//! Body lines carry an optional encoding after the attribute name:
//! nothing for backslash escaping, `:` for an LDIF-style line-folded
//! value, `::` for base64, `:<` for a file URL, `:;` for backslash
//! escaping, `:N` for N raw bytes, or a password scheme token whose
//! plaintext is run through the [`PasswordEncoder`] gateway.

use std::io::{self, Read, Seek};

use crate::base64;
use crate::data::{Entry, Mod, ModOp, Modify, Rename};
use crate::error::{Error, Result};
use crate::parser::{Record, RecordParser};
use crate::password::{BuiltinEncoder, PasswordEncoder, Scheme};
use crate::stream::RecordStream;

/// One physical-to-logical line of input.
enum Line {
    /// Attribute line; `name` is empty for modify value lines, which
    /// begin with a space.
    Attrval { name: String, value: Vec<u8> },
    Blank,
    End,
}

pub struct ExtendedParser<R> {
    stream: RecordStream<R>,
    encoder: Box<dyn PasswordEncoder>,
}

impl<R: Read + Seek> ExtendedParser<R> {
    pub fn new(reader: R) -> ExtendedParser<R> {
        ExtendedParser::with_encoder(reader, Box::new(BuiltinEncoder))
    }

    /// Use a caller-supplied password-hash gateway instead of the
    /// built-in one.
    pub fn with_encoder(reader: R, encoder: Box<dyn PasswordEncoder>) -> ExtendedParser<R> {
        ExtendedParser {
            stream: RecordStream::new(reader),
            encoder,
        }
    }

    fn syntax(&mut self, msg: &str) -> Error {
        Error::Syntax {
            pos: self.stream.position().unwrap_or(0),
            msg: msg.to_string(),
        }
    }

    fn encoding_err(&mut self, msg: String) -> Error {
        Error::Encoding {
            pos: self.stream.position().unwrap_or(0),
            msg,
        }
    }

    // -- low-level readers --------------------------------------------------

    /// Everything up to the first space; the space is consumed.
    fn read_lhs(&mut self) -> Result<String> {
        let mut lhs = String::new();
        loop {
            match self.stream.read_byte()? {
                Some(b' ') => return Ok(lhs),
                Some(b'\n') => return Err(self.syntax("unexpected end of line")),
                Some(0) => return Err(self.syntax("NUL byte in attribute name")),
                Some(b) => lhs.push(b as char),
                None => return Err(self.syntax("unexpected end of file")),
            }
        }
    }

    /// Value terminated by an unescaped newline. A backslash takes the
    /// following byte literally, so `\<newline>` embeds a newline and
    /// `\\` a backslash.
    fn read_escaped(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        loop {
            match self.stream.read_byte()? {
                Some(b'\n') => return Ok(data),
                Some(b'\\') => match self.stream.read_byte()? {
                    Some(b) => data.push(b),
                    None => return Err(self.syntax("unexpected end of file")),
                },
                Some(b) => data.push(b),
                None => return Err(self.syntax("unexpected end of file")),
            }
        }
    }

    /// LDIF-style value: a newline followed by a space folds into the
    /// logical line.
    fn read_folded(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        loop {
            match self.stream.read_byte()? {
                Some(b'\n') => match self.stream.read_byte()? {
                    Some(b' ') => continue,
                    Some(b) => {
                        self.stream.unread(b);
                        return Ok(data);
                    }
                    None => return Ok(data),
                },
                Some(b) => data.push(b),
                None => return Err(self.syntax("unexpected end of file")),
            }
        }
    }

    /// Skip the rest of a comment line, folding included.
    fn skip_comment(&mut self) -> Result<()> {
        loop {
            match self.stream.read_byte()? {
                Some(b'\n') => match self.stream.read_byte()? {
                    Some(b' ') => continue,
                    Some(b) => {
                        self.stream.unread(b);
                        return Ok(());
                    }
                    None => return Ok(()),
                },
                Some(_) => {}
                None => return Err(self.syntax("unexpected end of file")),
            }
        }
    }

    /// Exactly `n` raw bytes, then the line terminator.
    fn read_fixed(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        if let Err(e) = self.stream.fill_exact(&mut buf) {
            return match e.kind() {
                io::ErrorKind::UnexpectedEof => Err(self.syntax("unexpected end of file")),
                _ => Err(Error::Io(e)),
            };
        }
        match self.stream.read_byte()? {
            Some(b'\n') | None => Ok(buf),
            Some(_) => Err(self.syntax("expected end of line after fixed-length value")),
        }
    }

    fn read_hashed(&mut self, scheme: Scheme) -> Result<Vec<u8>> {
        let raw = self.read_folded()?;
        let plaintext = String::from_utf8_lossy(&raw).into_owned();
        let hashed = self
            .encoder
            .encode(scheme, &plaintext)
            .map_err(|e| self.encoding_err(e.to_string()))?;
        if !hashed.starts_with(scheme.prefix().as_bytes()) {
            return Err(self.encoding_err(format!(
                "password encoder did not produce a {} value",
                scheme.prefix()
            )));
        }
        Ok(hashed)
    }

    /// Read one logical line, dispatching on the encoding token between
    /// the attribute name and the separating space.
    fn read_line1(&mut self) -> Result<Line> {
        loop {
            match self.stream.read_byte()? {
                None => return Ok(Line::End),
                Some(b'\n') => return Ok(Line::Blank),
                Some(b'#') => {
                    self.skip_comment()?;
                }
                Some(b) => {
                    self.stream.unread(b);
                    break;
                }
            }
        }

        let lhs = self.read_lhs()?;
        let (name, encoding) = match lhs.find(':') {
            Some(colon) => (lhs[..colon].to_string(), Some(lhs[colon + 1..].to_string())),
            None => (lhs, None),
        };

        let value = match encoding.as_deref() {
            None | Some(";") => self.read_escaped()?,
            Some("") => self.read_folded()?,
            Some(":") => {
                let raw = self.read_folded()?;
                let text = String::from_utf8_lossy(&raw).into_owned();
                match base64::decode(&text) {
                    Some(decoded) => decoded,
                    None => return Err(self.encoding_err("invalid base64 string".into())),
                }
            }
            Some("<") => {
                let raw = self.read_folded()?;
                let url = String::from_utf8_lossy(&raw).into_owned();
                let path = url
                    .strip_prefix("file://")
                    .ok_or_else(|| self.encoding_err(format!("unknown URL scheme in `{url}`")))?
                    .to_string();
                std::fs::read(&path)
                    .map_err(|e| self.encoding_err(format!("cannot read {path}: {e}")))?
            }
            Some(token) => {
                if let Some(scheme) = Scheme::from_token(token) {
                    self.read_hashed(scheme)?
                } else if let Ok(n) = token.parse::<usize>() {
                    self.read_fixed(n)?
                } else {
                    return Err(self.encoding_err(format!("unknown value encoding `:{token}`")));
                }
            }
        };

        Ok(Line::Attrval { name, value })
    }

    /// Like `read_line1`, but content lines must carry a name.
    fn read_line(&mut self) -> Result<Option<(String, Vec<u8>)>> {
        match self.read_line1()? {
            Line::End | Line::Blank => Ok(None),
            Line::Attrval { name, value } => {
                if name.is_empty() {
                    return Err(self.syntax("space at beginning of line"));
                }
                Ok(Some((name, value)))
            }
        }
    }

    /// Header line of the next record: `(key, dn, pos)`. Skips blank
    /// lines and, at the very start of the stream, the version header.
    fn read_header(&mut self, offset: Option<u64>) -> Result<Option<(String, String, u64)>> {
        if let Some(off) = offset {
            self.stream.seek_to(off)?;
        }

        loop {
            let pos = self.stream.position()?;
            match self.read_line1()? {
                Line::End => return Ok(None),
                Line::Blank => continue,
                Line::Attrval { name, value } => {
                    if name == "version" && pos == 0 {
                        let found = String::from_utf8_lossy(&value).into_owned();
                        if found != "ldapvi" {
                            return Err(Error::Version { pos, found });
                        }
                        continue;
                    }
                    if name.is_empty() {
                        return Err(self.syntax("space at beginning of line"));
                    }
                    let dn = String::from_utf8_lossy(&value).into_owned();
                    if !dn.contains('=') {
                        return Err(Error::Syntax {
                            pos,
                            msg: format!("invalid distinguished name `{dn}`"),
                        });
                    }
                    return Ok(Some((name, dn, pos)));
                }
            }
        }
    }

    fn require_header(
        &mut self,
        offset: Option<u64>,
        expected: &str,
    ) -> Result<(String, u64)> {
        match self.read_header(offset)? {
            None => Err(self.syntax("unexpected end of file")),
            Some((key, dn, pos)) => {
                if key != expected {
                    return Err(Error::Key {
                        pos,
                        msg: format!("expected {expected} record, found `{key}`"),
                    });
                }
                Ok((dn, pos))
            }
        }
    }

    // -- record bodies ------------------------------------------------------

    fn read_attrval_body(&mut self, entry: &mut Entry) -> Result<()> {
        while let Some((name, value)) = self.read_line()? {
            entry.ensure_attribute(&name).values.push(value);
        }
        Ok(())
    }

    fn finish_mod(&mut self, current: &mut Option<Mod>, mods: &mut Vec<Mod>) -> Result<()> {
        if let Some(m) = current.take() {
            if m.values.is_empty() && m.op != ModOp::Delete {
                return Err(self.syntax("add/replace operation with no values"));
            }
            mods.push(m);
        }
        Ok(())
    }

    /// Modify body: `op attr` header lines, each followed by value lines
    /// that start with a space.
    fn read_modify_body(&mut self) -> Result<Vec<Mod>> {
        let mut mods = Vec::new();
        let mut current: Option<Mod> = None;

        loop {
            match self.read_line1()? {
                Line::Attrval { name, value } if !name.is_empty() => {
                    self.finish_mod(&mut current, &mut mods)?;
                    let op = match name.as_str() {
                        "add" => ModOp::Add,
                        "delete" => ModOp::Delete,
                        "replace" => ModOp::Replace,
                        _ => return Err(self.syntax("invalid change marker")),
                    };
                    current = Some(Mod {
                        op,
                        ad: String::from_utf8_lossy(&value).into_owned(),
                        values: Vec::new(),
                    });
                }
                Line::Attrval { value, .. } => match current.as_mut() {
                    Some(m) => m.values.push(value),
                    None => return Err(self.syntax("value line before any operation")),
                },
                Line::Blank | Line::End => {
                    self.finish_mod(&mut current, &mut mods)?;
                    return Ok(mods);
                }
            }
        }
    }

    /// Rename body: exactly one `add NEWDN` or `replace NEWDN` line.
    fn read_rename_body(&mut self) -> Result<(String, bool)> {
        match self.read_line()? {
            None => Err(self.syntax("rename record lacks a new dn line")),
            Some((action, value)) => {
                let delete_old_rdn = match action.as_str() {
                    "add" => false,
                    "replace" => true,
                    _ => {
                        return Err(self.syntax("expected `add` or `replace` in rename record"))
                    }
                };
                let new_dn = String::from_utf8_lossy(&value).into_owned();
                self.read_nothing()?;
                Ok((new_dn, delete_old_rdn))
            }
        }
    }

    /// The record must end here.
    fn read_nothing(&mut self) -> Result<()> {
        match self.read_line()? {
            None => Ok(()),
            Some(_) => Err(self.syntax("garbage at end of record")),
        }
    }
}

impl<R: Read + Seek> RecordParser for ExtendedParser<R> {
    fn read_record(&mut self, offset: Option<u64>) -> Result<Option<Record>> {
        let (key, dn, pos) = match self.read_header(offset)? {
            Some(header) => header,
            None => return Ok(None),
        };
        let mut entry = Entry::new(dn);
        self.read_attrval_body(&mut entry)?;
        Ok(Some(Record { key, entry, pos }))
    }

    fn peek_record(&mut self, offset: Option<u64>) -> Result<Option<(String, u64)>> {
        match self.read_header(offset)? {
            Some((key, _, pos)) => {
                self.stream.seek_to(pos)?;
                Ok(Some((key, pos)))
            }
            None => Ok(None),
        }
    }

    fn skip_record(&mut self, offset: Option<u64>) -> Result<Option<String>> {
        let (key, _, _) = match self.read_header(offset)? {
            Some(header) => header,
            None => return Ok(None),
        };
        match key.as_str() {
            "modify" => {
                self.read_modify_body()?;
            }
            "rename" => {
                self.read_rename_body()?;
            }
            "delete" => {
                self.read_nothing()?;
            }
            _ => {
                let mut scratch = Entry::new(String::new());
                self.read_attrval_body(&mut scratch)?;
            }
        }
        Ok(Some(key))
    }

    fn read_delete(&mut self, offset: Option<u64>) -> Result<String> {
        let (dn, _) = self.require_header(offset, "delete")?;
        self.read_nothing()?;
        Ok(dn)
    }

    fn read_modify(&mut self, offset: Option<u64>) -> Result<Modify> {
        let (dn, _) = self.require_header(offset, "modify")?;
        let mods = self.read_modify_body()?;
        Ok(Modify { dn, mods })
    }

    fn read_rename(&mut self, offset: Option<u64>) -> Result<Rename> {
        let (old_dn, _) = self.require_header(offset, "rename")?;
        let (new_dn, delete_old_rdn) = self.read_rename_body()?;
        Ok(Rename {
            old_dn,
            new_dn,
            delete_old_rdn,
        })
    }

    fn position(&mut self) -> Result<u64> {
        self.stream.position()
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        self.stream.seek_to(pos)
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read_raw(buf)
    }
}
