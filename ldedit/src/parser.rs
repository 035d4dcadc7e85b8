//! Dialect-independent parser facade.
//!
//! Both the extended-format parser and the LDIF parser expose the same
//! record-at-a-time operations; the diff engine talks only to this trait.

use std::io;

use crate::data::{Entry, Modify, Rename};
use crate::error::Result;

/// A fully parsed record.
#[derive(Debug, Clone)]
pub struct Record {
    /// Classification key: a decimal token, one of the change keywords
    /// `add`/`delete`/`modify`/`rename`, or any other token.
    pub key: String,
    pub entry: Entry,
    /// Absolute byte position of the record's first significant byte,
    /// past leading blank lines, comments and the version header.
    pub pos: u64,
}

/// Record-at-a-time reader over a seekable stream.
///
/// Every reader takes `offset: Option<u64>`: `Some(pos)` seeks there
/// first, while `None` continues from the current position. Readers
/// yield `None` at end of stream.
/// After an error the stream position is unspecified;
/// callers that intend to continue must seek explicitly.
pub trait RecordParser {
    /// Read a full attrval record.
    fn read_record(&mut self, offset: Option<u64>) -> Result<Option<Record>>;

    /// Classify the next record without consuming it. On success the
    /// stream is rewound to the returned position.
    fn peek_record(&mut self, offset: Option<u64>) -> Result<Option<(String, u64)>>;

    /// Consume a record wholesale, returning only its key.
    fn skip_record(&mut self, offset: Option<u64>) -> Result<Option<String>>;

    /// Read a delete record, yielding its DN. Any other record kind at
    /// `offset` is a key error.
    fn read_delete(&mut self, offset: Option<u64>) -> Result<String>;

    /// Read a modify record. Any other record kind is a key error.
    fn read_modify(&mut self, offset: Option<u64>) -> Result<Modify>;

    /// Read a rename record. Any other record kind is a key error.
    fn read_rename(&mut self, offset: Option<u64>) -> Result<Rename>;

    /// Current byte position of the underlying stream.
    fn position(&mut self) -> Result<u64>;

    fn seek(&mut self, pos: u64) -> Result<()>;

    /// Raw byte read bypassing record structure, for fast-path compares.
    fn read_raw(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Iterate over the remaining records. Iteration ends at end of
    /// stream, or after yielding the first error.
    fn records(&mut self) -> Records<'_, Self>
    where
        Self: Sized,
    {
        Records {
            parser: self,
            done: false,
        }
    }
}

/// Iterator adapter over [`RecordParser::records`].
pub struct Records<'a, P> {
    parser: &'a mut P,
    done: bool,
}

impl<P: RecordParser> Iterator for Records<'_, P> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.parser.read_record(None) {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
