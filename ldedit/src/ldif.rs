//! RFC 2849 LDIF parser.
//!
//! Reads attrval and change records, with two deviations from the letter
//! of the RFC: `control:` lines are refused, and the proprietary
//! `ldapvi-key:` line (second line of a record) attaches an explicit
//! record key, which is how the clean file tags entries when the user
//! asks for LDIF instead of the native format.
//!
//! Physical lines end in `\n` or `\r\n`; a following space folds the next
//! physical line into the current logical one. Folding applies anywhere,
//! including inside attribute descriptions.

use std::io::{self, Read, Seek};

use crate::base64;
use crate::data::{Entry, Mod, ModOp, Modify, Rename};
use crate::dn;
use crate::error::{Error, Result};
use crate::parser::{Record, RecordParser};
use crate::stream::RecordStream;

/// One logical line.
enum Line {
    Attrval { name: String, value: Vec<u8> },
    Blank,
    Dash,
    End,
}

/// What follows the colon of an attribute line.
enum Marker {
    /// Plain SAFE-STRING value.
    Plain,
    /// `::` base64.
    Base64,
    /// `:<` URL.
    Url,
    /// End of line straight away: the value is empty.
    Empty,
}

enum AdResult {
    Ok,
    Dash,
}

pub struct LdifParser<R> {
    stream: RecordStream<R>,
}

impl<R: Read + Seek> LdifParser<R> {
    pub fn new(reader: R) -> LdifParser<R> {
        LdifParser {
            stream: RecordStream::new(reader),
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

    // -- low-level helpers --------------------------------------------------

    /// Finish a line ending whose first byte was `b` (`\n`, or `\r`
    /// requiring a following `\n`).
    fn finish_eol(&mut self, b: u8) -> Result<()> {
        if b == b'\r' {
            match self.stream.read_byte()? {
                Some(b'\n') => Ok(()),
                _ => Err(self.syntax("bare carriage return")),
            }
        } else {
            Ok(())
        }
    }

    /// After an EOL: true when the next physical line starts with a space
    /// and therefore continues the logical line. The space is consumed.
    fn folds(&mut self) -> Result<bool> {
        match self.stream.read_byte()? {
            Some(b' ') => Ok(true),
            Some(b) => {
                self.stream.unread(b);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Attribute description up to (and consuming) the colon.
    fn read_ad(&mut self, name: &mut String) -> Result<AdResult> {
        loop {
            match self.stream.read_byte()? {
                Some(b':') => return Ok(AdResult::Ok),
                Some(b @ (b'\n' | b'\r')) => {
                    self.finish_eol(b)?;
                    if !name.is_empty() {
                        if self.folds()? {
                            continue;
                        }
                        if name == "-" {
                            return Ok(AdResult::Dash);
                        }
                    }
                    return Err(self.syntax("unexpected end of line"));
                }
                Some(0) => return Err(self.syntax("NUL byte in attribute name")),
                Some(b) => name.push(b as char),
                None => return Err(self.syntax("unexpected end of file")),
            }
        }
    }

    /// The encoding marker after the colon. FILL spaces are consumed,
    /// both before the marker and between a `::`/`:<` marker and its
    /// value.
    fn read_marker(&mut self) -> Result<Marker> {
        loop {
            match self.stream.read_byte()? {
                Some(b' ') => continue,
                Some(b':') => {
                    self.skip_fill()?;
                    return Ok(Marker::Base64);
                }
                Some(b'<') => {
                    self.skip_fill()?;
                    return Ok(Marker::Url);
                }
                Some(b @ (b'\n' | b'\r')) => {
                    self.finish_eol(b)?;
                    if self.folds()? {
                        continue;
                    }
                    return Ok(Marker::Empty);
                }
                Some(0) => return Err(self.syntax("NUL byte in value")),
                Some(b) => {
                    self.stream.unread(b);
                    return Ok(Marker::Plain);
                }
                None => return Err(self.syntax("unexpected end of file")),
            }
        }
    }

    /// Consume FILL spaces; the first non-space byte is pushed back.
    fn skip_fill(&mut self) -> Result<()> {
        loop {
            match self.stream.read_byte()? {
                Some(b' ') => continue,
                Some(b) => {
                    self.stream.unread(b);
                    return Ok(());
                }
                None => return Ok(()),
            }
        }
    }

    /// Plain value until the end of the logical line.
    fn read_safe(&mut self, data: &mut Vec<u8>) -> Result<()> {
        loop {
            match self.stream.read_byte()? {
                Some(b @ (b'\n' | b'\r')) => {
                    self.finish_eol(b)?;
                    if self.folds()? {
                        continue;
                    }
                    return Ok(());
                }
                Some(b) => data.push(b),
                None => return Err(self.syntax("unexpected end of file")),
            }
        }
    }

    fn skip_comment(&mut self) -> Result<()> {
        loop {
            match self.stream.read_byte()? {
                Some(b @ (b'\n' | b'\r')) => {
                    self.finish_eol(b)?;
                    if self.folds()? {
                        continue;
                    }
                    return Ok(());
                }
                Some(_) => {}
                None => return Err(self.syntax("unexpected end of file")),
            }
        }
    }

    /// One logical line, comments skipped.
    fn read_line1(&mut self) -> Result<Line> {
        loop {
            match self.stream.read_byte()? {
                None => return Ok(Line::End),
                Some(b'\n') => return Ok(Line::Blank),
                Some(b'\r') => {
                    self.finish_eol(b'\r')?;
                    return Ok(Line::Blank);
                }
                Some(b'#') => {
                    self.skip_comment()?;
                }
                Some(b) => {
                    self.stream.unread(b);
                    break;
                }
            }
        }

        let mut name = String::new();
        match self.read_ad(&mut name)? {
            AdResult::Dash => return Ok(Line::Dash),
            AdResult::Ok => {}
        }

        let mut value = Vec::new();
        match self.read_marker()? {
            Marker::Empty => {}
            Marker::Plain => self.read_safe(&mut value)?,
            Marker::Base64 => {
                self.read_safe(&mut value)?;
                let text = String::from_utf8_lossy(&value).into_owned();
                match base64::decode(&text) {
                    Some(decoded) => value = decoded,
                    None => return Err(self.encoding_err("invalid base64 string".into())),
                }
            }
            Marker::Url => {
                self.read_safe(&mut value)?;
                let url = String::from_utf8_lossy(&value).into_owned();
                let path = url
                    .strip_prefix("file://")
                    .ok_or_else(|| self.encoding_err(format!("unknown URL scheme in `{url}`")))?
                    .to_string();
                value = std::fs::read(&path)
                    .map_err(|e| self.encoding_err(format!("cannot read {path}: {e}")))?;
            }
        }

        Ok(Line::Attrval { name, value })
    }

    /// A body line: `Ok(None)` at the end of the record, error on `-`.
    fn body_line(&mut self) -> Result<Option<(String, Vec<u8>)>> {
        match self.read_line1()? {
            Line::Blank | Line::End => Ok(None),
            Line::Dash => Err(self.syntax("unexpected `-` line")),
            Line::Attrval { name, value } => Ok(Some((name, value))),
        }
    }

    /// First two lines of a record: `(key, dn, pos)`.
    ///
    /// The key comes from the second line, either `changetype:` (with
    /// `modrdn`/`moddn` classified as `rename`) or `ldapvi-key:`. It
    /// defaults to `add`, in which case the second line is pushed back
    /// for the body reader.
    fn read_header(&mut self, offset: Option<u64>) -> Result<Option<(String, String, u64)>> {
        if let Some(off) = offset {
            self.stream.seek_to(off)?;
        }

        let (dn, pos) = loop {
            let pos = self.stream.position()?;
            match self.read_line1()? {
                Line::End => return Ok(None),
                Line::Blank => continue,
                Line::Dash => return Err(self.syntax("unexpected `-` line")),
                Line::Attrval { name, value } => {
                    if name == "version" && pos == 0 {
                        let found = String::from_utf8_lossy(&value).into_owned();
                        if found != "1" {
                            return Err(Error::Version { pos, found });
                        }
                        continue;
                    }
                    if !name.eq_ignore_ascii_case("dn") {
                        return Err(Error::Syntax {
                            pos,
                            msg: format!("expected dn line, found `{name}`"),
                        });
                    }
                    let dn = String::from_utf8_lossy(&value).into_owned();
                    if !dn.contains('=') {
                        return Err(Error::Syntax {
                            pos,
                            msg: format!("invalid distinguished name `{dn}`"),
                        });
                    }
                    break (dn, pos);
                }
            }
        };

        let pos2 = self.stream.position()?;
        let key = match self.read_line1()? {
            Line::End => "add".to_string(),
            Line::Blank => {
                // empty body; rewind so the body reader sees the blank
                self.stream.seek_to(pos2)?;
                "add".to_string()
            }
            Line::Dash => return Err(self.syntax("unexpected `-` line")),
            Line::Attrval { name, value } => {
                let text = String::from_utf8_lossy(&value).into_owned();
                if name == "ldapvi-key" {
                    text
                } else if name.eq_ignore_ascii_case("changetype") {
                    match text.as_str() {
                        "modrdn" | "moddn" => "rename".to_string(),
                        "add" | "delete" | "modify" => text,
                        _ => {
                            return Err(Error::Syntax {
                                pos: pos2,
                                msg: format!("invalid changetype `{text}`"),
                            })
                        }
                    }
                } else if name.eq_ignore_ascii_case("control") {
                    return Err(Error::NotSupported {
                        pos: pos2,
                        msg: "control lines are not supported".into(),
                    });
                } else {
                    // ordinary attribute: implicit add, re-read in the body
                    self.stream.seek_to(pos2)?;
                    "add".to_string()
                }
            }
        };

        Ok(Some((key, dn, pos)))
    }

    fn require_header(&mut self, offset: Option<u64>, expected: &str) -> Result<(String, u64)> {
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
        while let Some((name, value)) = self.body_line()? {
            entry.ensure_attribute(&name).values.push(value);
        }
        Ok(())
    }

    /// Modify body: `op: attr` blocks closed by `-` lines.
    fn read_modify_body(&mut self) -> Result<Vec<Mod>> {
        let mut mods = Vec::new();

        loop {
            let (op_name, attr) = match self.body_line()? {
                None => break,
                Some((name, value)) => (name, String::from_utf8_lossy(&value).into_owned()),
            };
            let op = match op_name.as_str() {
                "add" => ModOp::Add,
                "delete" => ModOp::Delete,
                "replace" => ModOp::Replace,
                _ => return Err(self.syntax("invalid change marker")),
            };

            let mut values = Vec::new();
            loop {
                match self.read_line1()? {
                    Line::Dash => break,
                    Line::Attrval { name, value } => {
                        if !name.eq_ignore_ascii_case(&attr) {
                            return Err(self.syntax("attribute name mismatch in modify record"));
                        }
                        values.push(value);
                    }
                    Line::Blank | Line::End => {
                        return Err(self.syntax("unterminated modify operation"));
                    }
                }
            }

            // `replace` with no values means delete-if-present; a valueless
            // `add` has no meaning.
            if op == ModOp::Add && values.is_empty() {
                return Err(self.syntax("add operation with no values"));
            }
            mods.push(Mod {
                op,
                ad: attr,
                values,
            });
        }

        Ok(mods)
    }

    /// Rename body: `newrdn`, `deleteoldrdn`, optional `newsuperior`.
    /// Returns the synthesized new DN.
    fn read_rename_body(&mut self, old_dn: &str) -> Result<(String, bool)> {
        let newrdn = match self.body_line()? {
            Some((name, value)) if name.eq_ignore_ascii_case("newrdn") => {
                String::from_utf8_lossy(&value).into_owned()
            }
            _ => return Err(self.syntax("expected `newrdn`")),
        };

        let delete_old_rdn = match self.body_line()? {
            Some((name, value)) if name.eq_ignore_ascii_case("deleteoldrdn") => {
                match String::from_utf8_lossy(&value).as_ref() {
                    "0" => false,
                    "1" => true,
                    _ => return Err(self.syntax("deleteoldrdn must be 0 or 1")),
                }
            }
            _ => return Err(self.syntax("expected `deleteoldrdn`")),
        };

        match self.body_line()? {
            None => {
                // No newsuperior: keep the old parent.
                let (_, parent) = dn::split_first_rdn(old_dn);
                let new_dn = match parent {
                    Some(p) if !p.is_empty() => format!("{newrdn},{p}"),
                    _ => newrdn,
                };
                Ok((new_dn, delete_old_rdn))
            }
            Some((name, value)) => {
                if !name.eq_ignore_ascii_case("newsuperior") {
                    return Err(self.syntax("garbage at end of rename record"));
                }
                let newsuperior = String::from_utf8_lossy(&value).into_owned();
                self.read_nothing()?;
                if newsuperior.is_empty() {
                    Ok((newrdn, delete_old_rdn))
                } else {
                    Ok((format!("{newrdn},{newsuperior}"), delete_old_rdn))
                }
            }
        }
    }

    fn read_nothing(&mut self) -> Result<()> {
        match self.body_line()? {
            None => Ok(()),
            Some(_) => Err(self.syntax("garbage at end of record")),
        }
    }
}

impl<R: Read + Seek> RecordParser for LdifParser<R> {
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
        loop {
            match self.read_line1()? {
                Line::Blank | Line::End => break,
                Line::Attrval { .. } | Line::Dash => continue,
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
        let (new_dn, delete_old_rdn) = self.read_rename_body(&old_dn)?;
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
