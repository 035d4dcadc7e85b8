//! Stream-diff engine.
//!
//! [`compare_streams`] walks an edited ("data") stream record by record
//! and reconciles it against the original ("clean") stream, reporting the
//! minimal operation sequence through a [`ChangeHandler`]. Clean records
//! are addressed by the numeric keys embedded in the clean file: the
//! caller supplies `offsets`, where `offsets[k]` is the byte position of
//! the clean record whose key is `k`.
//!
//! The offsets array doubles as the progress bitmap: processing record
//! `k` flips `offsets[k]` to `-(offset + 2)`, and whatever is left
//! unflipped when the data stream ends was deleted by the user. The
//! transform is undone on every return path, so callers always get their
//! array back intact.

use crate::data::{multiset_difference, Entry, Mod, ModOp};
use crate::dn;
use crate::error::{Error, HandlerError, Result};
use crate::parser::RecordParser;

pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Receives the reconciliation operations, in stream order.
///
/// `key` is the numeric key of the clean record involved, or `None` for
/// an immediate change record that never touched the clean file. A
/// returned error aborts the comparison with
/// [`Error::HandlerAborted`].
pub trait ChangeHandler {
    fn handle_add(&mut self, key: Option<usize>, dn: &str, mods: &[Mod]) -> HandlerResult;

    fn handle_delete(&mut self, key: Option<usize>, dn: &str) -> HandlerResult;

    fn handle_change(
        &mut self,
        key: Option<usize>,
        old_dn: &str,
        new_dn: &str,
        mods: &[Mod],
    ) -> HandlerResult;

    /// A numbered clean entry whose edited copy carries a different DN.
    /// `target` is the full edited entry.
    fn handle_rename(&mut self, key: Option<usize>, old_dn: &str, target: &Entry)
        -> HandlerResult;

    /// An immediate rename record.
    fn handle_rename0(
        &mut self,
        old_dn: &str,
        new_dn: &str,
        delete_old_rdn: bool,
    ) -> HandlerResult;
}

// ---------------------------------------------------------------------------
// Offset marks
// ---------------------------------------------------------------------------

/// Flip the consumed mark on `offsets[i]`: `o -> -(o + 2)`. Applying it
/// twice restores the original value, and no valid offset maps to
/// itself.
pub fn toggle_mark(offsets: &mut [i64], i: usize) {
    offsets[i] = -(offsets[i] + 2);
}

// ---------------------------------------------------------------------------
// Fast byte comparison
// ---------------------------------------------------------------------------

/// Compare `n` bytes of `s` at `p` with `n` bytes of `t` at `q`.
///
/// Both stream positions are restored before returning, whatever the
/// outcome. A short read on either side counts as a mismatch.
pub fn fastcmp<S, T>(s: &mut S, t: &mut T, p: u64, q: u64, n: usize) -> Result<bool>
where
    S: RecordParser + ?Sized,
    T: RecordParser + ?Sized,
{
    let p_save = s.position()?;
    let q_save = t.position()?;
    let result = fastcmp_at(s, t, p, q, n);
    let _ = s.seek(p_save);
    let _ = t.seek(q_save);
    result
}

fn fastcmp_at<S, T>(s: &mut S, t: &mut T, p: u64, q: u64, n: usize) -> Result<bool>
where
    S: RecordParser + ?Sized,
    T: RecordParser + ?Sized,
{
    s.seek(p)?;
    t.seek(q)?;
    let mut buf_s = vec![0u8; n];
    let mut buf_t = vec![0u8; n];
    if read_full(s, &mut buf_s)? < n || read_full(t, &mut buf_t)? < n {
        return Ok(false);
    }
    Ok(buf_s == buf_t)
}

fn read_full<P: RecordParser + ?Sized>(p: &mut P, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match p.read_raw(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(filled)
}

// ---------------------------------------------------------------------------
// Rename validation
// ---------------------------------------------------------------------------

fn has_ava(entry: &Entry, ad: &str, value: &[u8]) -> bool {
    entry.attribute(ad).map_or(false, |a| a.contains_value(value))
}

/// Check that `data` is a legal renamed version of `clean` and derive
/// `deleteoldrdn`:
///
///   - both DNs must be non-empty,
///   - `clean` must carry the attribute values asserted by its own RDN,
///     and `data` those of its RDN,
///   - `data` must contain either all of `clean`'s RDN values (the old
///     RDN survives, `deleteoldrdn = false`) or none of them
///     (`deleteoldrdn = true`).
///
/// Returns `None` when any condition fails.
pub fn validate_rename(clean: &Entry, data: &Entry) -> Option<bool> {
    if clean.dn.is_empty() || data.dn.is_empty() {
        return None;
    }
    let old_avas = dn::rdn_avas(dn::first_rdn(&clean.dn));
    let new_avas = dn::rdn_avas(dn::first_rdn(&data.dn));
    if !old_avas.iter().all(|(ad, v)| has_ava(clean, ad, v)) {
        return None;
    }
    if !new_avas.iter().all(|(ad, v)| has_ava(data, ad, v)) {
        return None;
    }
    let kept = old_avas
        .iter()
        .filter(|(ad, v)| has_ava(data, ad, v))
        .count();
    if kept == old_avas.len() {
        Some(false)
    } else if kept == 0 {
        Some(true)
    } else {
        None
    }
}

/// Rewrite `entry` as the server would after a rename: drop the old RDN
/// values when deleting, assert the new ones, set the new DN. The
/// attribute diff then never re-reports the RDN change.
fn rename_entry(entry: &mut Entry, new_dn: &str, delete_old_rdn: bool) {
    if delete_old_rdn {
        let old_dn = entry.dn.clone();
        for (ad, value) in dn::rdn_avas(dn::first_rdn(&old_dn)) {
            if let Some(attr) = entry.attribute_mut(&ad) {
                attr.remove_value(&value);
            }
        }
    }
    for (ad, value) in dn::rdn_avas(dn::first_rdn(new_dn)) {
        let attr = entry.ensure_attribute(&ad);
        if !attr.contains_value(&value) {
            attr.values.push(value);
        }
    }
    entry.dn = new_dn.to_string();
}

// ---------------------------------------------------------------------------
// Attribute diff
// ---------------------------------------------------------------------------

/// Modifications that turn `clean` into `data`.
///
/// Attribute descriptions compare case-insensitively, values as byte
/// multisets. For an attribute present on both sides the added/removed
/// values are emitted as a delete/add pair, collapsed into a single
/// replace when `|added| + |removed| >= |values(data)| + 1`, i.e. when
/// replacing transfers less than patching would.
pub fn diff_entries(clean: &Entry, data: &Entry) -> Vec<Mod> {
    let mut mods = Vec::new();

    for attr in &data.attributes {
        match clean.attribute(&attr.ad) {
            None => mods.push(attr.to_mod(ModOp::Add)),
            Some(old) => {
                let added = multiset_difference(&attr.values, &old.values);
                let removed = multiset_difference(&old.values, &attr.values);
                if added.is_empty() && removed.is_empty() {
                    continue;
                }
                if added.len() + removed.len() >= attr.values.len() + 1 {
                    mods.push(attr.to_mod(ModOp::Replace));
                } else {
                    if !removed.is_empty() {
                        mods.push(Mod {
                            op: ModOp::Delete,
                            ad: attr.ad.clone(),
                            values: removed,
                        });
                    }
                    if !added.is_empty() {
                        mods.push(Mod {
                            op: ModOp::Add,
                            ad: attr.ad.clone(),
                            values: added,
                        });
                    }
                }
            }
        }
    }

    for attr in &clean.attributes {
        if data.attribute(&attr.ad).is_none() {
            mods.push(Mod {
                op: ModOp::Delete,
                ad: attr.ad.clone(),
                values: Vec::new(),
            });
        }
    }

    mods
}

// ---------------------------------------------------------------------------
// The comparison loop
// ---------------------------------------------------------------------------

fn read_entry_at<P: RecordParser + ?Sized>(parser: &mut P, pos: u64) -> Result<Entry> {
    match parser.read_record(Some(pos))? {
        Some(record) => Ok(record.entry),
        None => Err(Error::Syntax {
            pos,
            msg: "unexpected end of stream".into(),
        }),
    }
}

fn aborted(e: HandlerError) -> Error {
    Error::HandlerAborted(e)
}

/// Dispatch an immediate change record (`add`, `replace`, `delete`,
/// `modify`, `rename`) read from the data stream at `datapos`.
fn process_immediate<D, H>(data: &mut D, handler: &mut H, key: &str, datapos: u64) -> Result<()>
where
    D: RecordParser,
    H: ChangeHandler,
{
    match key {
        "add" => {
            let entry = read_entry_at(data, datapos)?;
            let mods = entry.to_mods();
            handler.handle_add(None, &entry.dn, &mods).map_err(aborted)
        }
        "replace" => {
            let entry = read_entry_at(data, datapos)?;
            let mods = entry.to_replace_mods();
            handler
                .handle_change(None, &entry.dn, &entry.dn, &mods)
                .map_err(aborted)
        }
        "delete" => {
            let dn = data.read_delete(Some(datapos))?;
            handler.handle_delete(None, &dn).map_err(aborted)
        }
        "modify" => {
            let modify = data.read_modify(Some(datapos))?;
            handler
                .handle_change(None, &modify.dn, &modify.dn, &modify.mods)
                .map_err(aborted)
        }
        "rename" => {
            let rename = data.read_rename(Some(datapos))?;
            handler
                .handle_rename0(&rename.old_dn, &rename.new_dn, rename.delete_old_rdn)
                .map_err(aborted)
        }
        _ => Err(Error::Key {
            pos: datapos,
            msg: format!("invalid key `{key}`"),
        }),
    }
}

/// Reconcile a data record carrying numeric key `n` against its clean
/// counterpart.
fn process_numbered<C, D, H>(
    clean: &mut C,
    data: &mut D,
    handler: &mut H,
    offsets: &mut [i64],
    n: usize,
    datapos: u64,
) -> Result<()>
where
    C: RecordParser,
    D: RecordParser,
    H: ChangeHandler,
{
    if n >= offsets.len() {
        return Err(Error::Key {
            pos: datapos,
            msg: format!("no clean entry numbered {n}"),
        });
    }
    if offsets[n] < 0 {
        return Err(Error::Key {
            pos: datapos,
            msg: format!("duplicate entry {n}"),
        });
    }
    let cleanpos = offsets[n] as u64;

    // Fast path: when the next clean offset is known, the clean record's
    // byte length (blank-line terminator included) is known too, and a
    // raw compare can skip parsing entirely.
    if let Some(&next) = offsets.get(n + 1) {
        if next > offsets[n] {
            let len = (next - offsets[n]) as usize;
            if fastcmp(clean, data, cleanpos, datapos, len)? {
                toggle_mark(offsets, n);
                data.seek(datapos + len as u64)?;
                return Ok(());
            }
        }
    }

    let entry = read_entry_at(data, datapos)?;
    let mut clean_entry = read_entry_at(clean, cleanpos)?;

    if clean_entry.dn != entry.dn {
        let delete_old_rdn = match validate_rename(&clean_entry, &entry) {
            Some(flag) => flag,
            None => {
                return Err(Error::Rename {
                    pos: datapos,
                    msg: format!("cannot rename `{}` to `{}`", clean_entry.dn, entry.dn),
                })
            }
        };
        handler
            .handle_rename(Some(n), &clean_entry.dn, &entry)
            .map_err(aborted)?;
        rename_entry(&mut clean_entry, &entry.dn, delete_old_rdn);
    }

    let mods = diff_entries(&clean_entry, &entry);
    if !mods.is_empty() {
        handler
            .handle_change(Some(n), &clean_entry.dn, &entry.dn, &mods)
            .map_err(aborted)?;
    }

    toggle_mark(offsets, n);
    Ok(())
}

fn run_compare<C, D, H>(
    clean: &mut C,
    data: &mut D,
    handler: &mut H,
    offsets: &mut [i64],
) -> Result<()>
where
    C: RecordParser,
    D: RecordParser,
    H: ChangeHandler,
{
    loop {
        let (key, datapos) = match data.peek_record(None)? {
            Some(head) => head,
            None => break,
        };

        // Snapshot both cursors so a failing record leaves the streams
        // where they were.
        let clean_save = clean.position()?;
        let data_save = data.position()?;
        let result = match key.parse::<usize>() {
            Ok(n) => process_numbered(clean, data, handler, offsets, n, datapos),
            Err(_) => process_immediate(data, handler, &key, datapos),
        };
        if result.is_err() {
            let _ = clean.seek(clean_save);
            let _ = data.seek(data_save);
            return result;
        }
    }

    // Whatever was never referenced by the data stream is gone.
    for n in 0..offsets.len() {
        if offsets[n] < 0 {
            continue;
        }
        let entry = read_entry_at(clean, offsets[n] as u64)?;
        handler.handle_delete(Some(n), &entry.dn).map_err(aborted)?;
    }
    Ok(())
}

/// Compare the clean and data streams and report every difference
/// through `handler`.
///
/// `offsets[k]` must hold the byte position of the clean record whose
/// numeric key is `k`; the keys in the clean file must be unique. The
/// array is used as scratch space during the run and is restored to its
/// original contents on every return path.
///
/// Numeric-key records are compared byte-wise first and structurally on
/// mismatch; change-keyword records dispatch directly to the handler.
/// Clean entries never referenced by the data stream are reported as
/// deletions, in ascending key order, once the data stream is
/// exhausted.
pub fn compare_streams<C, D, H>(
    clean: &mut C,
    data: &mut D,
    handler: &mut H,
    offsets: &mut [i64],
) -> Result<()>
where
    C: RecordParser,
    D: RecordParser,
    H: ChangeHandler,
{
    let result = run_compare(clean, data, handler, offsets);
    for n in 0..offsets.len() {
        if offsets[n] < 0 {
            toggle_mark(offsets, n);
        }
    }
    result
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldif::LdifParser;
    use std::io::Cursor;

    // -- Mock handler ------------------------------------------------------

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Add { key: Option<usize>, dn: String, mods: usize },
        Delete { key: Option<usize>, dn: String },
        Change { key: Option<usize>, old_dn: String, new_dn: String, mods: usize },
        Rename { key: Option<usize>, old_dn: String, new_dn: String },
        Rename0 { old_dn: String, new_dn: String, delete_old_rdn: bool },
    }

    #[derive(Default)]
    struct MockHandler {
        calls: Vec<Call>,
        fail_on_call: Option<usize>,
    }

    impl MockHandler {
        fn outcome(&self) -> HandlerResult {
            if self.fail_on_call == Some(self.calls.len() - 1) {
                Err(HandlerError::new("mock failure"))
            } else {
                Ok(())
            }
        }
    }

    impl ChangeHandler for MockHandler {
        fn handle_add(&mut self, key: Option<usize>, dn: &str, mods: &[Mod]) -> HandlerResult {
            self.calls.push(Call::Add {
                key,
                dn: dn.to_string(),
                mods: mods.len(),
            });
            self.outcome()
        }

        fn handle_delete(&mut self, key: Option<usize>, dn: &str) -> HandlerResult {
            self.calls.push(Call::Delete {
                key,
                dn: dn.to_string(),
            });
            self.outcome()
        }

        fn handle_change(
            &mut self,
            key: Option<usize>,
            old_dn: &str,
            new_dn: &str,
            mods: &[Mod],
        ) -> HandlerResult {
            self.calls.push(Call::Change {
                key,
                old_dn: old_dn.to_string(),
                new_dn: new_dn.to_string(),
                mods: mods.len(),
            });
            self.outcome()
        }

        fn handle_rename(
            &mut self,
            key: Option<usize>,
            old_dn: &str,
            target: &Entry,
        ) -> HandlerResult {
            self.calls.push(Call::Rename {
                key,
                old_dn: old_dn.to_string(),
                new_dn: target.dn.clone(),
            });
            self.outcome()
        }

        fn handle_rename0(
            &mut self,
            old_dn: &str,
            new_dn: &str,
            delete_old_rdn: bool,
        ) -> HandlerResult {
            self.calls.push(Call::Rename0 {
                old_dn: old_dn.to_string(),
                new_dn: new_dn.to_string(),
                delete_old_rdn,
            });
            self.outcome()
        }
    }

    // -- Helpers -----------------------------------------------------------

    fn make_entry(dn: &str, values: &[(&str, &str)]) -> Entry {
        let mut e = Entry::new(dn);
        for (ad, val) in values {
            e.ensure_attribute(ad).append_value(val.as_bytes());
        }
        e
    }

    fn ldif_parser(text: &str) -> LdifParser<Cursor<Vec<u8>>> {
        LdifParser::new(Cursor::new(text.as_bytes().to_vec()))
    }

    /// Scan an LDIF clean file for numbered records and build the
    /// offsets array.
    fn clean_offsets(text: &str) -> Vec<i64> {
        use crate::parser::RecordParser;
        let mut parser = ldif_parser(text);
        let mut offsets = Vec::new();
        while let Ok(Some(record)) = parser.read_record(None) {
            if let Ok(n) = record.key.parse::<usize>() {
                if offsets.len() <= n {
                    offsets.resize(n + 1, 0);
                }
                offsets[n] = record.pos as i64;
            }
        }
        offsets
    }

    fn compare_ldif(
        clean_text: &str,
        data_text: &str,
        handler: &mut MockHandler,
    ) -> (Result<()>, Vec<i64>, Vec<i64>) {
        let mut offsets = clean_offsets(clean_text);
        let original = offsets.clone();
        let mut clean = ldif_parser(clean_text);
        let mut data = ldif_parser(data_text);
        let result = compare_streams(&mut clean, &mut data, handler, &mut offsets);
        (result, original, offsets)
    }

    // ── Offset marks ──────────────────────────────────────────────

    #[test]
    fn mark_is_negative_and_reversible() {
        let mut a = vec![100i64];
        toggle_mark(&mut a, 0);
        assert_eq!(a[0], -102);
        toggle_mark(&mut a, 0);
        assert_eq!(a[0], 100);
    }

    #[test]
    fn mark_of_zero_offset_is_still_negative() {
        let mut a = vec![0i64];
        toggle_mark(&mut a, 0);
        assert_eq!(a[0], -2);
    }

    // ── fastcmp ───────────────────────────────────────────────────

    #[test]
    fn fastcmp_equal() {
        let mut s = ldif_parser("hello world");
        let mut t = ldif_parser("hello world");
        assert!(fastcmp(&mut s, &mut t, 0, 0, 11).unwrap());
    }

    #[test]
    fn fastcmp_different() {
        let mut s = ldif_parser("hello world");
        let mut t = ldif_parser("hello earth");
        assert!(!fastcmp(&mut s, &mut t, 0, 0, 11).unwrap());
    }

    #[test]
    fn fastcmp_short_read_is_mismatch() {
        let mut s = ldif_parser("hi");
        let mut t = ldif_parser("hello world");
        assert!(!fastcmp(&mut s, &mut t, 0, 0, 11).unwrap());
    }

    #[test]
    fn fastcmp_at_offsets() {
        let mut s = ldif_parser("XXXXXhello");
        let mut t = ldif_parser("YYhello");
        assert!(fastcmp(&mut s, &mut t, 5, 2, 5).unwrap());
    }

    #[test]
    fn fastcmp_restores_positions() {
        use crate::parser::RecordParser;
        let mut s = ldif_parser("hello world");
        let mut t = ldif_parser("hello world");
        s.seek(3).unwrap();
        t.seek(7).unwrap();
        fastcmp(&mut s, &mut t, 0, 0, 5).unwrap();
        assert_eq!(s.position().unwrap(), 3);
        assert_eq!(t.position().unwrap(), 7);
    }

    // ── validate_rename ───────────────────────────────────────────

    #[test]
    fn rename_dropping_old_rdn() {
        let clean = make_entry("cn=old,dc=example,dc=com", &[("cn", "old")]);
        let data = make_entry("cn=new,dc=example,dc=com", &[("cn", "new")]);
        assert_eq!(validate_rename(&clean, &data), Some(true));
    }

    #[test]
    fn rename_keeping_old_rdn() {
        let clean = make_entry("cn=old,dc=example,dc=com", &[("cn", "old")]);
        let data = make_entry(
            "cn=new,dc=example,dc=com",
            &[("cn", "new"), ("cn", "old")],
        );
        assert_eq!(validate_rename(&clean, &data), Some(false));
    }

    #[test]
    fn rename_rejects_empty_dns() {
        let empty = make_entry("", &[]);
        let ok = make_entry("cn=new,dc=com", &[("cn", "new")]);
        assert_eq!(validate_rename(&empty, &ok), None);
        assert_eq!(validate_rename(&ok, &empty), None);
    }

    #[test]
    fn rename_rejects_missing_rdn_attribute() {
        // clean does not carry its own RDN value
        let clean = make_entry("cn=old,dc=example,dc=com", &[]);
        let data = make_entry("cn=new,dc=example,dc=com", &[("cn", "new")]);
        assert_eq!(validate_rename(&clean, &data), None);
    }

    #[test]
    fn rename_rejects_partial_rdn_survival() {
        // multi-valued RDN where only one of the old values survives
        let clean = make_entry(
            "cn=a+sn=b,dc=com",
            &[("cn", "a"), ("sn", "b")],
        );
        let data = make_entry(
            "cn=x+sn=y,dc=com",
            &[("cn", "x"), ("sn", "y"), ("cn", "a")],
        );
        assert_eq!(validate_rename(&clean, &data), None);
    }

    // ── diff_entries ──────────────────────────────────────────────

    #[test]
    fn diff_identical_entries_is_empty() {
        let a = make_entry("cn=x,dc=com", &[("cn", "x"), ("sn", "y")]);
        assert!(diff_entries(&a, &a).is_empty());
    }

    #[test]
    fn diff_value_order_is_irrelevant() {
        let a = make_entry("cn=x,dc=com", &[("mail", "1"), ("mail", "2")]);
        let b = make_entry("cn=x,dc=com", &[("mail", "2"), ("mail", "1")]);
        assert!(diff_entries(&a, &b).is_empty());
    }

    #[test]
    fn diff_names_are_case_insensitive() {
        let a = make_entry("cn=x,dc=com", &[("objectClass", "person")]);
        let b = make_entry("cn=x,dc=com", &[("OBJECTCLASS", "person")]);
        assert!(diff_entries(&a, &b).is_empty());
    }

    #[test]
    fn diff_new_attribute_is_add() {
        let a = make_entry("cn=x,dc=com", &[("cn", "x")]);
        let b = make_entry("cn=x,dc=com", &[("cn", "x"), ("mail", "m@x")]);
        let mods = diff_entries(&a, &b);
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].op, ModOp::Add);
        assert_eq!(mods[0].ad, "mail");
        assert_eq!(mods[0].values, vec![b"m@x".to_vec()]);
    }

    #[test]
    fn diff_missing_attribute_is_bare_delete() {
        let a = make_entry("cn=x,dc=com", &[("cn", "x"), ("mail", "m@x")]);
        let b = make_entry("cn=x,dc=com", &[("cn", "x")]);
        let mods = diff_entries(&a, &b);
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].op, ModOp::Delete);
        assert_eq!(mods[0].ad, "mail");
        assert!(mods[0].values.is_empty());
    }

    #[test]
    fn diff_single_value_change_is_replace() {
        // one added + one removed >= one final value + 1
        let a = make_entry("cn=x,dc=com", &[("sn", "old")]);
        let b = make_entry("cn=x,dc=com", &[("sn", "new")]);
        let mods = diff_entries(&a, &b);
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].op, ModOp::Replace);
        assert_eq!(mods[0].values, vec![b"new".to_vec()]);
    }

    #[test]
    fn diff_added_value_stays_incremental() {
        let a = make_entry("cn=x,dc=com", &[("mail", "1"), ("mail", "2")]);
        let b = make_entry(
            "cn=x,dc=com",
            &[("mail", "1"), ("mail", "2"), ("mail", "3")],
        );
        let mods = diff_entries(&a, &b);
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].op, ModOp::Add);
        assert_eq!(mods[0].values, vec![b"3".to_vec()]);
    }

    #[test]
    fn diff_removed_value_stays_incremental() {
        let a = make_entry(
            "cn=x,dc=com",
            &[("mail", "1"), ("mail", "2"), ("mail", "3")],
        );
        let b = make_entry("cn=x,dc=com", &[("mail", "1"), ("mail", "2")]);
        let mods = diff_entries(&a, &b);
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].op, ModOp::Delete);
        assert_eq!(mods[0].values, vec![b"3".to_vec()]);
    }

    #[test]
    fn diff_full_rewrite_collapses_to_replace() {
        let a = make_entry("cn=x,dc=com", &[("mail", "1"), ("mail", "2")]);
        let b = make_entry("cn=x,dc=com", &[("mail", "3"), ("mail", "4")]);
        let mods = diff_entries(&a, &b);
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].op, ModOp::Replace);
        assert_eq!(mods[0].values.len(), 2);
    }

    // ── compare_streams: numbered records ─────────────────────────

    const CLEAN_ONE: &str = "\ndn: cn=foo,dc=example,dc=com\nldapvi-key: 0\ncn: foo\n\n";

    #[test]
    fn unchanged_stream_calls_nothing() {
        let mut h = MockHandler::default();
        let (result, original, after) = compare_ldif(CLEAN_ONE, CLEAN_ONE, &mut h);
        result.unwrap();
        assert!(h.calls.is_empty());
        assert_eq!(after, original);
    }

    #[test]
    fn unchanged_multi_record_stream_calls_nothing() {
        let clean = "\ndn: cn=foo,dc=example,dc=com\nldapvi-key: 0\ncn: foo\n\n\
                     \ndn: cn=bar,dc=example,dc=com\nldapvi-key: 1\ncn: bar\n\n";
        let mut h = MockHandler::default();
        let (result, _, _) = compare_ldif(clean, clean, &mut h);
        result.unwrap();
        assert!(h.calls.is_empty());
    }

    #[test]
    fn reordered_records_cause_no_calls() {
        let clean = "\ndn: cn=foo,dc=example,dc=com\nldapvi-key: 0\ncn: foo\n\n\
                     \ndn: cn=bar,dc=example,dc=com\nldapvi-key: 1\ncn: bar\n\n";
        let data = "\ndn: cn=bar,dc=example,dc=com\nldapvi-key: 1\ncn: bar\n\n\
                    \ndn: cn=foo,dc=example,dc=com\nldapvi-key: 0\ncn: foo\n\n";
        let mut h = MockHandler::default();
        let (result, _, _) = compare_ldif(clean, data, &mut h);
        result.unwrap();
        assert!(h.calls.is_empty());
    }

    #[test]
    fn changed_attribute_reports_change() {
        let clean = "\ndn: cn=foo,dc=example,dc=com\nldapvi-key: 0\ncn: foo\nsn: old\n\n";
        let data = "\ndn: cn=foo,dc=example,dc=com\nldapvi-key: 0\ncn: foo\nsn: new\n\n";
        let mut h = MockHandler::default();
        let (result, _, _) = compare_ldif(clean, data, &mut h);
        result.unwrap();
        assert_eq!(h.calls.len(), 1);
        match &h.calls[0] {
            Call::Change { key, old_dn, mods, .. } => {
                assert_eq!(*key, Some(0));
                assert_eq!(old_dn, "cn=foo,dc=example,dc=com");
                assert!(*mods > 0);
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[test]
    fn added_attribute_reports_change() {
        let clean = "\ndn: cn=foo,dc=example,dc=com\nldapvi-key: 0\ncn: foo\n\n";
        let data =
            "\ndn: cn=foo,dc=example,dc=com\nldapvi-key: 0\ncn: foo\nmail: foo@x\n\n";
        let mut h = MockHandler::default();
        let (result, _, _) = compare_ldif(clean, data, &mut h);
        result.unwrap();
        assert!(matches!(h.calls[0], Call::Change { .. }));
    }

    #[test]
    fn removed_attribute_reports_change() {
        let clean = "\ndn: cn=foo,dc=example,dc=com\nldapvi-key: 0\ncn: foo\nsn: bar\n\n";
        let data = "\ndn: cn=foo,dc=example,dc=com\nldapvi-key: 0\ncn: foo\n\n";
        let mut h = MockHandler::default();
        let (result, _, _) = compare_ldif(clean, data, &mut h);
        result.unwrap();
        assert!(matches!(h.calls[0], Call::Change { .. }));
    }

    // ── compare_streams: deletions ────────────────────────────────

    #[test]
    fn missing_record_reports_delete() {
        let mut h = MockHandler::default();
        let (result, _, _) = compare_ldif(CLEAN_ONE, "", &mut h);
        result.unwrap();
        assert_eq!(
            h.calls,
            vec![Call::Delete {
                key: Some(0),
                dn: "cn=foo,dc=example,dc=com".to_string()
            }]
        );
    }

    #[test]
    fn deletions_come_in_ascending_key_order() {
        let clean = "\ndn: cn=a,dc=com\nldapvi-key: 0\ncn: a\n\n\
                     \ndn: cn=b,dc=com\nldapvi-key: 1\ncn: b\n\n\
                     \ndn: cn=c,dc=com\nldapvi-key: 2\ncn: c\n\n";
        let data = "\ndn: cn=b,dc=com\nldapvi-key: 1\ncn: b\n\n";
        let mut h = MockHandler::default();
        let (result, _, _) = compare_ldif(clean, data, &mut h);
        result.unwrap();
        assert_eq!(
            h.calls,
            vec![
                Call::Delete {
                    key: Some(0),
                    dn: "cn=a,dc=com".to_string()
                },
                Call::Delete {
                    key: Some(2),
                    dn: "cn=c,dc=com".to_string()
                },
            ]
        );
    }

    // ── compare_streams: renames ──────────────────────────────────

    #[test]
    fn renamed_record_reports_rename() {
        let clean = "\ndn: cn=old,dc=example,dc=com\nldapvi-key: 0\ncn: old\n\n";
        let data = "\ndn: cn=new,dc=example,dc=com\nldapvi-key: 0\ncn: new\n\n";
        let mut h = MockHandler::default();
        let (result, _, _) = compare_ldif(clean, data, &mut h);
        result.unwrap();
        assert_eq!(
            h.calls,
            vec![Call::Rename {
                key: Some(0),
                old_dn: "cn=old,dc=example,dc=com".to_string(),
                new_dn: "cn=new,dc=example,dc=com".to_string(),
            }]
        );
    }

    #[test]
    fn rename_plus_attribute_edit_reports_both() {
        let clean =
            "\ndn: cn=old,dc=example,dc=com\nldapvi-key: 0\ncn: old\nsn: before\n\n";
        let data =
            "\ndn: cn=new,dc=example,dc=com\nldapvi-key: 0\ncn: new\nsn: after\n\n";
        let mut h = MockHandler::default();
        let (result, _, _) = compare_ldif(clean, data, &mut h);
        result.unwrap();
        assert_eq!(h.calls.len(), 2);
        assert!(matches!(h.calls[0], Call::Rename { .. }));
        match &h.calls[1] {
            Call::Change { mods, .. } => assert_eq!(*mods, 1),
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[test]
    fn invalid_rename_is_an_error() {
        // clean lacks its own RDN value, so the rename cannot validate
        let clean = "\ndn: cn=old,dc=example,dc=com\nldapvi-key: 0\nsn: x\n\n";
        let data = "\ndn: cn=new,dc=example,dc=com\nldapvi-key: 0\ncn: new\nsn: x\n\n";
        let mut h = MockHandler::default();
        let (result, original, after) = compare_ldif(clean, data, &mut h);
        assert!(matches!(result, Err(Error::Rename { .. })));
        assert_eq!(after, original);
    }

    // ── compare_streams: immediate records ────────────────────────

    #[test]
    fn immediate_add_record() {
        let data = "\ndn: cn=foo,dc=example,dc=com\nldapvi-key: 0\ncn: foo\n\n\
                    \ndn: cn=new,dc=example,dc=com\nldapvi-key: add\ncn: new\n\n";
        let mut h = MockHandler::default();
        let (result, _, _) = compare_ldif(CLEAN_ONE, data, &mut h);
        result.unwrap();
        assert_eq!(
            h.calls,
            vec![Call::Add {
                key: None,
                dn: "cn=new,dc=example,dc=com".to_string(),
                mods: 1
            }]
        );
    }

    #[test]
    fn immediate_replace_record() {
        let data = "\ndn: cn=foo,dc=example,dc=com\nldapvi-key: replace\ncn: foo\nsn: bar\n\n";
        let mut h = MockHandler::default();
        let (result, _, _) = compare_ldif("", data, &mut h);
        result.unwrap();
        match &h.calls[0] {
            Call::Change { key, old_dn, new_dn, mods } => {
                assert_eq!(*key, None);
                assert_eq!(old_dn, new_dn);
                assert_eq!(*mods, 2);
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[test]
    fn immediate_delete_record() {
        let data = "\ndn: cn=old,dc=example,dc=com\nchangetype: delete\n\n";
        let mut h = MockHandler::default();
        let (result, _, _) = compare_ldif("", data, &mut h);
        result.unwrap();
        assert_eq!(
            h.calls,
            vec![Call::Delete {
                key: None,
                dn: "cn=old,dc=example,dc=com".to_string()
            }]
        );
    }

    #[test]
    fn immediate_modify_record() {
        let data =
            "\ndn: cn=foo,dc=example,dc=com\nchangetype: modify\nreplace: sn\nsn: new\n-\n\n";
        let mut h = MockHandler::default();
        let (result, _, _) = compare_ldif("", data, &mut h);
        result.unwrap();
        assert!(matches!(h.calls[0], Call::Change { key: None, .. }));
    }

    #[test]
    fn immediate_rename_record() {
        let data = "\ndn: cn=old,dc=example,dc=com\nchangetype: modrdn\n\
                    newrdn: cn=new\ndeleteoldrdn: 1\n\n";
        let mut h = MockHandler::default();
        let (result, _, _) = compare_ldif("", data, &mut h);
        result.unwrap();
        assert_eq!(
            h.calls,
            vec![Call::Rename0 {
                old_dn: "cn=old,dc=example,dc=com".to_string(),
                new_dn: "cn=new,dc=example,dc=com".to_string(),
                delete_old_rdn: true,
            }]
        );
    }

    #[test]
    fn unknown_keyword_is_key_error() {
        let data = "\ndn: cn=foo,dc=example,dc=com\nldapvi-key: bogus\ncn: foo\n\n";
        let mut h = MockHandler::default();
        let (result, _, _) = compare_ldif("", data, &mut h);
        assert!(matches!(result, Err(Error::Key { .. })));
        assert!(h.calls.is_empty());
    }

    // ── compare_streams: key errors ───────────────────────────────

    #[test]
    fn out_of_range_key_is_error() {
        let data = "\ndn: cn=foo,dc=example,dc=com\nldapvi-key: 5\ncn: foo\n\n";
        let mut h = MockHandler::default();
        let (result, original, after) = compare_ldif(CLEAN_ONE, data, &mut h);
        assert!(matches!(result, Err(Error::Key { .. })));
        assert_eq!(after, original);
    }

    #[test]
    fn duplicate_key_is_error() {
        let data = "\ndn: cn=foo,dc=example,dc=com\nldapvi-key: 0\ncn: foo\n\n\
                    \ndn: cn=foo,dc=example,dc=com\nldapvi-key: 0\ncn: foo\n\n";
        let mut h = MockHandler::default();
        let (result, original, after) = compare_ldif(CLEAN_ONE, data, &mut h);
        assert!(matches!(result, Err(Error::Key { .. })));
        assert_eq!(after, original);
    }

    #[test]
    fn key_errors_carry_a_position() {
        let data = "\ndn: cn=foo,dc=example,dc=com\nldapvi-key: 5\ncn: foo\n\n";
        let mut h = MockHandler::default();
        let (result, _, _) = compare_ldif(CLEAN_ONE, data, &mut h);
        assert_eq!(result.unwrap_err().position(), Some(1));
    }

    // ── compare_streams: handler failures ─────────────────────────

    #[test]
    fn handler_failure_aborts_with_distinct_error() {
        let data = "\ndn: cn=foo,dc=example,dc=com\nldapvi-key: 0\ncn: foo\n\n\
                    \ndn: cn=new,dc=example,dc=com\nldapvi-key: add\ncn: new\n\n";
        let mut h = MockHandler {
            fail_on_call: Some(0),
            ..MockHandler::default()
        };
        let (result, original, after) = compare_ldif(CLEAN_ONE, data, &mut h);
        assert!(matches!(result, Err(Error::HandlerAborted(_))));
        assert_eq!(after, original);
    }

    #[test]
    fn handler_failure_during_deletions_restores_offsets() {
        let clean = "\ndn: cn=a,dc=com\nldapvi-key: 0\ncn: a\n\n\
                     \ndn: cn=b,dc=com\nldapvi-key: 1\ncn: b\n\n";
        let mut h = MockHandler {
            fail_on_call: Some(1),
            ..MockHandler::default()
        };
        let (result, original, after) = compare_ldif(clean, "", &mut h);
        assert!(matches!(result, Err(Error::HandlerAborted(_))));
        assert_eq!(after, original);
        assert_eq!(h.calls.len(), 2);
    }
}
