//! # Decoder
//!
//! A cursor over a borrowed slice. Strings and byte blobs are returned as
//! sub-slices of the input, and entering a container yields a new `Decoder`
//! limited to that container's body.
//!
//! Every read fails with `Error::UnexpectedEnd` instead of reading past the
//! end of its view.

use crate::Error;
use crate::Result;
use crate::Tag;
use crate::tag::Body;

#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes left in this view.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Reads the next tag without consuming it.
    pub fn peek_tag(&self) -> Result<Tag> {
        let &b = self.buf.first().ok_or(Error::UnexpectedEnd)?;
        Tag::try_from(b)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let head = self.buf.get(..n).ok_or(Error::UnexpectedEnd)?;
        self.buf = &self.buf[n..];
        Ok(head)
    }

    fn fixed<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn length(&mut self) -> Result<usize> {
        Ok(u32::from_le_bytes(self.fixed()?) as usize)
    }

    /// Consumes the next tag if it is `expected`.
    fn expect(&mut self, expected: Tag) -> Result<()> {
        match self.peek_tag()? {
            tag if tag == expected => self.take(1).map(|_| ()),
            tag => Err(Error::InvalidTag(tag as u8)),
        }
    }

    fn sized(&mut self, expected: Tag) -> Result<&'a [u8]> {
        self.expect(expected)?;
        let len = self.length()?;
        self.take(len)
    }

    /// Consumes the next item whole, nested children included.
    pub fn skip(&mut self) -> Result<()> {
        let tag = self.peek_tag()?;
        self.take(1)?;
        let len = match tag.body() {
            Body::Fixed(n) => n,
            Body::Sized => self.length()?,
        };
        self.take(len).map(|_| ())
    }

    /// Splits the next item off into its own view.
    fn item(&mut self) -> Result<Decoder<'a>> {
        let mut probe = self.clone();
        probe.skip()?;
        let len = self.remaining() - probe.remaining();
        Ok(Decoder::new(self.take(len)?))
    }

    pub fn invalid(&mut self) -> Result<()> {
        self.expect(Tag::Invalid)
    }

    pub fn bool(&mut self) -> Result<bool> {
        let v = match self.peek_tag()? {
            Tag::BoolTrue => true,
            Tag::BoolFalse => false,
            tag => return Err(Error::InvalidTag(tag as u8)),
        };
        self.take(1)?;
        Ok(v)
    }

    pub fn u16(&mut self) -> Result<u16> {
        self.expect(Tag::U16)?;
        Ok(u16::from_le_bytes(self.fixed()?))
    }

    pub fn u32(&mut self) -> Result<u32> {
        self.expect(Tag::U32)?;
        Ok(u32::from_le_bytes(self.fixed()?))
    }

    pub fn s32(&mut self) -> Result<i32> {
        self.expect(Tag::S32)?;
        Ok(i32::from_le_bytes(self.fixed()?))
    }

    pub fn f64(&mut self) -> Result<f64> {
        self.expect(Tag::F64)?;
        Ok(f64::from_le_bytes(self.fixed()?))
    }

    /// Reads a date as `(year, month, day)`.
    pub fn date(&mut self) -> Result<(i32, u8, u8)> {
        self.expect(Tag::Date)?;
        let [a, b, c, d, month, day] = self.fixed()?;
        Ok((i32::from_le_bytes([a, b, c, d]), month, day))
    }

    pub fn str(&mut self) -> Result<&'a str> {
        let bytes = self.sized(Tag::String)?;
        std::str::from_utf8(bytes).map_err(|_| Error::InvalidUtf8)
    }

    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        self.sized(Tag::Bytes)
    }

    pub fn list(&mut self) -> Result<ListIter<'a>> {
        let body = self.sized(Tag::List)?;
        Ok(ListIter { body: Decoder::new(body) })
    }

    pub fn string_list(&mut self) -> Result<StringListIter<'a>> {
        let body = self.sized(Tag::StringList)?;
        Ok(StringListIter { body: Decoder::new(body) })
    }

    pub fn map(&mut self) -> Result<MapIter<'a>> {
        let body = self.sized(Tag::Map)?;
        Ok(MapIter { body: Decoder::new(body) })
    }

    /// Reads a map entry as its key and a view over its value.
    pub fn entry(&mut self) -> Result<(&'a str, Decoder<'a>)> {
        let mut body = Decoder::new(self.sized(Tag::Entry)?);
        let key = body.str()?;
        Ok((key, body))
    }
}

/// Items of a list, one view per item.
#[derive(Debug)]
pub struct ListIter<'a> {
    body: Decoder<'a>,
}

impl<'a> ListIter<'a> {
    pub fn next(&mut self) -> Result<Option<Decoder<'a>>> {
        match self.body.remaining() {
            0 => Ok(None),
            _ => self.body.item().map(Some),
        }
    }
}

#[derive(Debug)]
pub struct StringListIter<'a> {
    body: Decoder<'a>,
}

impl<'a> StringListIter<'a> {
    pub fn next(&mut self) -> Result<Option<&'a str>> {
        match self.body.remaining() {
            0 => Ok(None),
            _ => self.body.str().map(Some),
        }
    }
}

/// Entries of a map, as `(key, value view)` pairs.
#[derive(Debug)]
pub struct MapIter<'a> {
    body: Decoder<'a>,
}

impl<'a> MapIter<'a> {
    pub fn next(&mut self) -> Result<Option<(&'a str, Decoder<'a>)>> {
        match self.body.remaining() {
            0 => Ok(None),
            _ => self.body.entry().map(Some),
        }
    }
}
