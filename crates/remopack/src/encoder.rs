//! # Encoder
//!
//! Writes items into one growing buffer. Containers reserve four bytes for
//! their length when opened and fill them in when closed.
//!
//! ## Invariants
//! - A map only holds entries, and an entry holds exactly one value after its key.
//! - A string list only holds strings.
//! - Bytes can only be taken once every container is closed.

use crate::Error;
use crate::Result;
use crate::Tag;

/// The kind of container currently open on the `Encoder`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Top level. Takes any number of items.
    Root,
    List,
    StringList,
    Map,
    Entry,
}

struct Open {
    scope: Scope,
    /// Offset of the first body byte; the length sits in the four bytes before it.
    body: usize,
    items: usize,
}

pub struct Encoder {
    buf: Vec<u8>,
    open: Vec<Open>,
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(256),
            open: Vec::new(),
        }
    }

    /// Finishes encoding.
    ///
    /// # Errors
    /// `Error::ScopeStillOpen` while a container is open.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        self.finished()?;
        Ok(self.buf)
    }

    pub fn as_bytes(&self) -> Result<&[u8]> {
        self.finished()?;
        Ok(&self.buf)
    }

    fn finished(&self) -> Result<()> {
        match self.open.is_empty() {
            true => Ok(()),
            false => Err(Error::ScopeStillOpen),
        }
    }

    fn scope(&self) -> Scope {
        self.open.last().map_or(Scope::Root, |open| open.scope)
    }

    /// Checks that `tag` may be written at the current position and writes it.
    fn admit(&mut self, tag: Tag) -> Result<()> {
        let items = self.open.last().map_or(0, |open| open.items);
        match (self.scope(), tag) {
            (Scope::Map, Tag::Entry) => {}
            (Scope::Map, _) => return Err(Error::InvalidMapEntry),
            (Scope::StringList, Tag::String) => {}
            (Scope::StringList, _) => return Err(Error::InvalidStringListItem),
            (Scope::Entry, _) if items > 0 => return Err(Error::TooManyItems(Scope::Entry)),
            _ => {}
        }
        self.buf.push(tag as u8);
        Ok(())
    }

    fn counted(&mut self) -> Result<()> {
        if let Some(open) = self.open.last_mut() {
            open.items += 1;
        }
        Ok(())
    }

    fn length(&mut self, len: usize) -> Result<()> {
        let len = u32::try_from(len).map_err(|_| Error::BlobTooLarge(len))?;
        self.buf.extend_from_slice(&len.to_le_bytes());
        Ok(())
    }

    fn scalar<const N: usize>(&mut self, tag: Tag, payload: [u8; N]) -> Result<()> {
        self.admit(tag)?;
        self.buf.extend_from_slice(&payload);
        self.counted()
    }

    fn blob(&mut self, tag: Tag, payload: &[u8]) -> Result<()> {
        self.admit(tag)?;
        self.length(payload.len())?;
        self.buf.extend_from_slice(payload);
        self.counted()
    }

    fn open(&mut self, tag: Tag, scope: Scope) -> Result<()> {
        self.admit(tag)?;
        self.buf.extend_from_slice(&[0; 4]);
        self.open.push(Open { scope, body: self.buf.len(), items: 0 });
        Ok(())
    }

    fn close(&mut self, scope: Scope) -> Result<()> {
        let open = match self.open.last() {
            None => return Err(Error::ScopeUnderflow),
            Some(open) if open.scope != scope => {
                return Err(Error::ScopeMismatch { expected: scope, actual: open.scope });
            }
            Some(open) if open.scope == Scope::Entry && open.items == 0 => {
                return Err(Error::EmptyEntry);
            }
            Some(open) => open.body,
        };
        self.open.pop();

        let len = self.buf.len() - open;
        let len = u32::try_from(len).map_err(|_| Error::BlobTooLarge(len))?;
        self.buf[open - 4..open].copy_from_slice(&len.to_le_bytes());
        self.counted()
    }

    pub fn invalid(&mut self) -> Result<()> {
        self.scalar(Tag::Invalid, [])
    }

    pub fn bool(&mut self, v: bool) -> Result<()> {
        self.scalar(if v { Tag::BoolTrue } else { Tag::BoolFalse }, [])
    }

    pub fn u16(&mut self, v: u16) -> Result<()> {
        self.scalar(Tag::U16, v.to_le_bytes())
    }

    pub fn u32(&mut self, v: u32) -> Result<()> {
        self.scalar(Tag::U32, v.to_le_bytes())
    }

    pub fn s32(&mut self, v: i32) -> Result<()> {
        self.scalar(Tag::S32, v.to_le_bytes())
    }

    pub fn f64(&mut self, v: f64) -> Result<()> {
        self.scalar(Tag::F64, v.to_le_bytes())
    }

    pub fn date(&mut self, year: i32, month: u8, day: u8) -> Result<()> {
        let [a, b, c, d] = year.to_le_bytes();
        self.scalar(Tag::Date, [a, b, c, d, month, day])
    }

    pub fn str(&mut self, v: &str) -> Result<()> {
        self.blob(Tag::String, v.as_bytes())
    }

    pub fn bytes(&mut self, v: &[u8]) -> Result<()> {
        self.blob(Tag::Bytes, v)
    }

    pub fn list_begin(&mut self) -> Result<()> {
        self.open(Tag::List, Scope::List)
    }

    pub fn list_end(&mut self) -> Result<()> {
        self.close(Scope::List)
    }

    /// Opens a list whose direct children must all be `str()`.
    pub fn string_list_begin(&mut self) -> Result<()> {
        self.open(Tag::StringList, Scope::StringList)
    }

    pub fn string_list_end(&mut self) -> Result<()> {
        self.close(Scope::StringList)
    }

    /// Opens a map whose direct children must all be entries.
    pub fn map_begin(&mut self) -> Result<()> {
        self.open(Tag::Map, Scope::Map)
    }

    pub fn map_end(&mut self) -> Result<()> {
        self.close(Scope::Map)
    }

    /// Opens a map entry and writes its key. One value must follow before
    /// `entry_end()`.
    pub fn entry_begin(&mut self, key: &str) -> Result<()> {
        self.open(Tag::Entry, Scope::Entry)?;
        // The key does not count as the entry's value.
        self.buf.push(Tag::String as u8);
        self.length(key.len())?;
        self.buf.extend_from_slice(key.as_bytes());
        Ok(())
    }

    pub fn entry_end(&mut self) -> Result<()> {
        self.close(Scope::Entry)
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}
